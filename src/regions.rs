pub const VALID_AWS_REGIONS: &[&str] = &[
    "us-east-1",
    "us-east-2",
    "us-west-1",
    "us-west-2",
    "ca-central-1",
    "eu-north-1",
    "eu-west-3",
    "eu-west-2",
    "eu-west-1",
    "eu-central-1",
    "eu-south-1",
    "ap-south-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-east-1",
    "sa-east-1",
    "me-south-1",
    "af-south-1",
];

/// CloudFront only accepts ACM certificates issued in this region.
pub const CLOUDFRONT_CERT_REGION: &str = "us-east-1";

/// hosted zone id used by every cloudfront distribution alias target.
pub const CLOUDFRONT_HOSTED_ZONE_ID: &str = "Z2FDTNDATAQYW2";

/// (region, s3 website hosted zone id, endpoint uses a dash instead of a dot)
/// see https://docs.aws.amazon.com/general/latest/gr/s3.html#s3_website_region_endpoints
const S3_WEBSITE_ENDPOINTS: &[(&str, &str, bool)] = &[
    ("us-east-1", "Z3AQBSTGFYJSTF", true),
    ("us-east-2", "Z2O1EMRO9K5GLX", false),
    ("us-west-1", "Z2F56UZL2M1ACD", true),
    ("us-west-2", "Z3BJ6K6RIION7M", true),
    ("ca-central-1", "Z1QDHH18159H29", false),
    ("eu-north-1", "Z3BAZG2TWCNX0D", false),
    ("eu-west-3", "Z3R1K369G5AVDG", false),
    ("eu-west-2", "Z3GKZC51ZF0DB4", false),
    ("eu-west-1", "Z1BKCTXD74EZPE", true),
    ("eu-central-1", "Z21DNDUVLTQW6Q", false),
    ("ap-south-1", "Z11RGJOFQNVJUP", false),
    ("ap-northeast-1", "Z2M4EHUR26P7ZW", true),
    ("ap-northeast-2", "Z3W03O7B5YMIYP", false),
    ("ap-northeast-3", "Z2YQB5RD63NC85", false),
    ("ap-southeast-1", "Z3O0J2DXBE1FTB", true),
    ("ap-southeast-2", "Z1WCIGYICN2BYD", true),
    ("sa-east-1", "Z7KQH4QJS55SO", true),
];

pub fn is_valid_region(r: &str) -> bool {
    VALID_AWS_REGIONS.contains(&r)
}

pub fn verify_region(r: &str) -> Option<String> {
    if !is_valid_region(r) {
        Some(format!("Invalid region code {:?}\nMust be one of {:?}", r, VALID_AWS_REGIONS))
    } else {
        None
    }
}

/// returns the (dns name, hosted zone id) pair that a route53 alias
/// record must use to point at an S3 website bucket in `region`.
pub fn s3_website_alias_target(region: &str) -> Option<(String, &'static str)> {
    S3_WEBSITE_ENDPOINTS.iter()
        .find(|(r, _, _)| *r == region)
        .map(|(r, zone_id, dashed)| {
            let endpoint = if *dashed {
                format!("s3-website-{r}.amazonaws.com")
            } else {
                format!("s3-website.{r}.amazonaws.com")
            };
            (endpoint, *zone_id)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_regions() {
        assert!(verify_region("us-east-1").is_none());
        let err = verify_region("mars-north-1").unwrap();
        assert!(err.starts_with("Invalid region code \"mars-north-1\""));
    }

    #[test]
    fn website_endpoints_use_region_specific_separator() {
        let (dns, zone) = s3_website_alias_target("ap-northeast-1").unwrap();
        assert_eq!(dns, "s3-website-ap-northeast-1.amazonaws.com");
        assert_eq!(zone, "Z2M4EHUR26P7ZW");
        let (dns, _) = s3_website_alias_target("eu-central-1").unwrap();
        assert_eq!(dns, "s3-website.eu-central-1.amazonaws.com");
        assert!(s3_website_alias_target("me-south-1").is_none());
    }
}
