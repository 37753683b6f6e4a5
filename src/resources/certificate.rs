use serde_json::{json, Value};

use super::hosted_zone::HostedZoneRef;
use crate::error::Result;
use crate::stack::{get_ref, CfnResource, Resource, StackInput};

/// An ACM certificate validated through DNS records in a route53 zone
/// that lives in the same account. Cloudformation does not finish creating
/// the certificate until the validation records resolve, so anything that
/// references it waits for a validated certificate.
pub struct CertificateInput {
    pub logical_name: String,
    /// the domain you're requesting a certificate for. Must be fully qualified. Can have 1 optional wildcard.
    /// Examples of valid values:
    /// - www.mysite.com
    /// - mysite.com
    /// - *.mysite.com
    /// Examples of invalid values:
    /// - *.something.*.mysite.com
    /// - cannotendwithdot.com.
    pub domain_name: String,
    pub hosted_zone: HostedZoneRef,
}

/// handle to a declared certificate. Only obtainable from
/// [`add_certificate_resource`], so holding one means the certificate
/// is part of the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateHandle {
    pub logical_id: String,
    pub domain_name: String,
}

impl CertificateHandle {
    pub fn arn(&self) -> Value {
        get_ref(&self.logical_id)
    }
}

impl CfnResource for CertificateInput {
    fn type_string(&self) -> &'static str {
        "AWS::CertificateManager::Certificate"
    }

    fn properties(&self) -> Value {
        json!({
            "DomainName": self.domain_name,
            "ValidationMethod": "DNS",
            "DomainValidationOptions": [{
                "DomainName": self.domain_name,
                "HostedZoneId": self.hosted_zone.zone_id,
            }],
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.domain_name.is_empty() {
            return Err("Must provide a domain name".to_string());
        }
        if self.domain_name.ends_with('.') {
            return Err(format!("Domain name {} must not end with a dot", self.domain_name));
        }
        if self.domain_name.contains('*') {
            if self.domain_name.matches('*').count() > 1 {
                return Err(format!("Must only provide 1 wildcard. {} is invalid.", self.domain_name));
            }
            if !self.domain_name.starts_with("*.") {
                return Err(format!("If using a wildcard, it must be the first component of your domain, eg: \"*.something.com\". {} is invalid.", self.domain_name));
            }
        }
        let bare = self.domain_name.trim_start_matches("*.");
        let zone = &self.hosted_zone.zone_name;
        if bare != zone && !bare.ends_with(&format!(".{zone}")) {
            return Err(format!("Domain {} is not part of hosted zone {zone}, so it cannot be validated through DNS", self.domain_name));
        }
        Ok(())
    }
}

/// true if a certificate issued for `cert_domain` is valid for `domain`.
pub fn certificate_covers(cert_domain: &str, domain: &str) -> bool {
    if cert_domain == domain {
        return true;
    }
    match cert_domain.strip_prefix("*.") {
        Some(parent) => domain
            .split_once('.')
            .map(|(_, rest)| rest == parent)
            .unwrap_or(false),
        None => false,
    }
}

pub fn add_certificate_resource(input: CertificateInput, stack: &mut StackInput) -> Result<CertificateHandle> {
    let handle = CertificateHandle {
        logical_id: input.logical_name.clone(),
        domain_name: input.domain_name.clone(),
    };
    stack.push(Resource::new(input.logical_name.clone(), input));
    Ok(handle)
}
