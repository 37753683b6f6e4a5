use serde_json::{json, Map, Value};

use super::certificate::{certificate_covers, CertificateHandle};
use super::s3_bucket::BucketHandle;
use crate::error::Result;
use crate::regions::CLOUDFRONT_HOSTED_ZONE_ID;
use crate::stack::{get_att, CfnResource, Resource, StackInput};

/// managed cache policy that forwards every request to the origin.
/// https://docs.aws.amazon.com/AmazonCloudFront/latest/DeveloperGuide/using-managed-cache-policies.html#managed-cache-policy-caching-disabled
pub const CACHING_DISABLED_POLICY_ID: &str = "4135ea2d-6df8-44a3-9df3-4b5a84be39ad";

pub struct DistributionInput {
    pub logical_name: String,
    pub comment: String,
    /// domain of the default origin. For an S3 bucket website this is
    /// the bucket's WebsiteURL without the scheme.
    pub origin_domain_name: Value,
    /// S3 website endpoints only speak http.
    pub origin_protocol_policy: String,
    /// custom domain names served by the distribution. Every alias must
    /// be covered by `certificate`.
    pub aliases: Vec<String>,
    pub certificate: Option<CertificateHandle>,
}

impl DistributionInput {
    pub fn for_bucket_website(logical_name: &str, bucket: &BucketHandle) -> Self {
        Self {
            logical_name: logical_name.to_string(),
            comment: String::new(),
            origin_domain_name: bucket.website_domain(),
            origin_protocol_policy: "http-only".to_string(),
            aliases: vec![],
            certificate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionHandle {
    pub logical_id: String,
}

impl DistributionHandle {
    pub fn domain_name(&self) -> Value {
        get_att(&self.logical_id, "DomainName")
    }

    pub fn hosted_zone_id(&self) -> &'static str {
        CLOUDFRONT_HOSTED_ZONE_ID
    }
}

const DEFAULT_ORIGIN_ID: &str = "origin0";

impl CfnResource for DistributionInput {
    fn type_string(&self) -> &'static str {
        "AWS::CloudFront::Distribution"
    }

    fn properties(&self) -> Value {
        let mut config = Map::new();
        config.insert("Enabled".into(), true.into());
        if !self.comment.is_empty() {
            config.insert("Comment".into(), self.comment.clone().into());
        }
        config.insert("Origins".into(), json!([{
            "Id": DEFAULT_ORIGIN_ID,
            "DomainName": self.origin_domain_name,
            "CustomOriginConfig": {
                "OriginProtocolPolicy": self.origin_protocol_policy,
            },
        }]));
        config.insert("DefaultCacheBehavior".into(), json!({
            "TargetOriginId": DEFAULT_ORIGIN_ID,
            "ViewerProtocolPolicy": "redirect-to-https",
            "CachePolicyId": CACHING_DISABLED_POLICY_ID,
            "Compress": true,
        }));
        if !self.aliases.is_empty() {
            config.insert("Aliases".into(), json!(self.aliases));
        }
        if let Some(cert) = &self.certificate {
            config.insert("ViewerCertificate".into(), json!({
                "AcmCertificateArn": cert.arn(),
                "MinimumProtocolVersion": "TLSv1.2_2021",
                "SslSupportMethod": "sni-only",
            }));
        }
        json!({ "DistributionConfig": config })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.origin_domain_name.is_null() {
            return Err("cloudfront distribution origin domain_name is required".to_string());
        }
        if !self.aliases.is_empty() && self.certificate.is_none() {
            return Err("A distribution with aliases must be given a certificate".to_string());
        }
        if let Some(cert) = &self.certificate {
            for alias in &self.aliases {
                if !certificate_covers(&cert.domain_name, alias) {
                    return Err(format!("Certificate for {} does not cover alias {alias}", cert.domain_name));
                }
            }
        }
        Ok(())
    }
}

pub fn add_cloudfront_resource(input: DistributionInput, stack: &mut StackInput) -> Result<DistributionHandle> {
    let handle = DistributionHandle { logical_id: input.logical_name.clone() };
    stack.push(Resource::new(input.logical_name.clone(), input));
    Ok(handle)
}
