use serde_json::{json, Value};

use super::api_gateway::ApiDomainHandle;
use super::cloudfront::DistributionHandle;
use super::hosted_zone::HostedZoneRef;
use crate::error::{Error, Result};
use crate::regions::s3_website_alias_target;
use crate::stack::{CfnResource, Resource, StackInput};

/// what an alias record points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AliasTarget {
    /// an S3 website bucket. Route53 requires the bucket to be named
    /// exactly like the record.
    BucketWebsite { region: String },
    Distribution(DistributionHandle),
    ApiDomain(ApiDomainHandle),
}

impl AliasTarget {
    /// (dns name, hosted zone id)
    fn resolve(&self) -> Result<(Value, Value)> {
        match self {
            AliasTarget::BucketWebsite { region } => {
                let (dns_name, zone_id) = s3_website_alias_target(region).ok_or_else(|| {
                    Error::Config(format!("Region {region} has no S3 website endpoint that route53 can alias"))
                })?;
                Ok((dns_name.into(), zone_id.into()))
            }
            AliasTarget::Distribution(distribution) => {
                Ok((distribution.domain_name(), distribution.hosted_zone_id().into()))
            }
            AliasTarget::ApiDomain(domain) => {
                Ok((domain.regional_domain_name(), domain.regional_hosted_zone_id()))
            }
        }
    }
}

pub struct RecordInput {
    pub logical_name: String,
    pub zone: HostedZoneRef,
    /// fully qualified, without the trailing dot.
    pub record_name: String,
    pub target: AliasTarget,
}

struct RecordSet {
    zone_id: String,
    name: String,
    dns_name: Value,
    target_zone_id: Value,
    zone_name: String,
}

impl CfnResource for RecordSet {
    fn type_string(&self) -> &'static str {
        "AWS::Route53::RecordSet"
    }

    fn properties(&self) -> Value {
        json!({
            "HostedZoneId": self.zone_id,
            "Name": self.name,
            "Type": "A",
            "AliasTarget": {
                "DNSName": self.dns_name,
                "HostedZoneId": self.target_zone_id,
                "EvaluateTargetHealth": false,
            },
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let bare = self.name.trim_end_matches('.');
        if bare != self.zone_name && !bare.ends_with(&format!(".{}", self.zone_name)) {
            return Err(format!("Record {} is not part of hosted zone {}", self.name, self.zone_name));
        }
        Ok(())
    }
}

/// declares an A alias record in an existing zone. Returns the record's
/// fully qualified name, with its trailing dot.
pub fn add_route53_resource(input: RecordInput, stack: &mut StackInput) -> Result<String> {
    let (dns_name, target_zone_id) = input.target.resolve()?;
    let name = format!("{}.", input.record_name.trim_end_matches('.'));
    stack.push(Resource::new(input.logical_name, RecordSet {
        zone_id: input.zone.zone_id,
        name: name.clone(),
        dns_name,
        target_zone_id,
        zone_name: input.zone.zone_name,
    }));
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::CLOUDFRONT_HOSTED_ZONE_ID;
    use crate::stack::{get_att, RawResource};

    fn zone() -> HostedZoneRef {
        HostedZoneRef::from_attributes("Z09544292C54AJ4VKFFSY", "boonjiashen.com").unwrap()
    }

    fn record(target: AliasTarget) -> RecordInput {
        RecordInput {
            logical_name: "SiteRecord".into(),
            zone: zone(),
            record_name: "mosaic.boonjiashen.com".into(),
            target,
        }
    }

    #[test]
    fn distribution_alias_uses_cloudfront_zone() {
        let mut stack = StackInput::new("teststack");
        stack.push(Resource::new("SiteDistribution", RawResource { ty: "AWS::CloudFront::Distribution", properties: json!({}) }));
        let target = AliasTarget::Distribution(DistributionHandle { logical_id: "SiteDistribution".into() });
        let name = add_route53_resource(record(target), &mut stack).unwrap();
        assert_eq!(name, "mosaic.boonjiashen.com.");
        let template = stack.to_template().unwrap();
        let props = &template.resources["SiteRecord"].properties;
        assert_eq!(props["Type"], "A");
        assert_eq!(props["HostedZoneId"], "Z09544292C54AJ4VKFFSY");
        assert_eq!(props["AliasTarget"]["HostedZoneId"], CLOUDFRONT_HOSTED_ZONE_ID);
        assert_eq!(props["AliasTarget"]["DNSName"], get_att("SiteDistribution", "DomainName"));
    }

    #[test]
    fn api_domain_alias_uses_regional_attributes() {
        let mut stack = StackInput::new("teststack");
        stack.push(Resource::new("ApiCustomDomain", RawResource { ty: "AWS::ApiGatewayV2::DomainName", properties: json!({}) }));
        let target = AliasTarget::ApiDomain(ApiDomainHandle {
            logical_id: "ApiCustomDomain".into(),
            mapping_logical_id: "ApiCustomDomainMapping".into(),
        });
        add_route53_resource(record(target), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let alias = &template.resources["SiteRecord"].properties["AliasTarget"];
        assert_eq!(alias["DNSName"], get_att("ApiCustomDomain", "RegionalDomainName"));
        assert_eq!(alias["HostedZoneId"], get_att("ApiCustomDomain", "RegionalHostedZoneId"));
    }

    #[test]
    fn bucket_alias_uses_the_regional_website_endpoint() {
        let mut stack = StackInput::new("teststack");
        let target = AliasTarget::BucketWebsite { region: "us-east-1".into() };
        add_route53_resource(record(target), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let alias = &template.resources["SiteRecord"].properties["AliasTarget"];
        assert_eq!(alias["DNSName"], "s3-website-us-east-1.amazonaws.com");
    }

    #[test]
    fn record_must_be_inside_the_zone() {
        let mut stack = StackInput::new("teststack");
        let mut input = record(AliasTarget::BucketWebsite { region: "us-east-1".into() });
        input.record_name = "mosaic.example.com".into();
        add_route53_resource(input, &mut stack).unwrap();
        assert!(matches!(stack.to_template(), Err(Error::InvalidResource { .. })));
    }
}
