use crate::error::{Error, Result};

/// A route53 hosted zone that already exists in the target account.
///
/// Both the id and the zone name are required: certificates and alias
/// records need the zone's DNS name, not just its identifier, so there is
/// deliberately no id-only constructor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostedZoneRef {
    pub zone_id: String,
    /// stored without the trailing dot.
    pub zone_name: String,
}

impl HostedZoneRef {
    pub fn from_attributes(zone_id: &str, zone_name: &str) -> Result<Self> {
        if zone_id.is_empty() {
            return Err(Error::Config("Must provide the hosted zone ID of where your domain resides".into()));
        }
        if zone_id.starts_with("/hostedzone/") {
            return Err(Error::Config(format!(
                "Hosted zone ID {zone_id} must be provided as the actual ID without the `/hostedzone/` prefix"
            )));
        }
        if !zone_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::Config(format!("Invalid hosted zone ID {zone_id:?}")));
        }
        let zone_name = zone_name.trim_end_matches('.');
        if zone_name.is_empty() || !zone_name.contains('.') {
            return Err(Error::Config(format!(
                "Invalid hosted zone name {zone_name:?}. Must be a domain, eg: example.com"
            )));
        }
        Ok(Self {
            zone_id: zone_id.to_string(),
            zone_name: zone_name.to_lowercase(),
        })
    }

    /// `prefix.zone_name`
    pub fn record_fqdn(&self, prefix: &str) -> String {
        if prefix.is_empty() {
            self.zone_name.clone()
        } else {
            format!("{prefix}.{}", self.zone_name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_from_both_attributes() {
        let zone = HostedZoneRef::from_attributes("Z09544292C54AJ4VKFFSY", "boonjiashen.com.").unwrap();
        assert_eq!(zone.zone_name, "boonjiashen.com");
        assert_eq!(zone.record_fqdn("mosaic"), "mosaic.boonjiashen.com");
        assert_eq!(zone.record_fqdn(""), "boonjiashen.com");
    }

    #[test]
    fn rejects_prefixed_or_missing_ids() {
        assert!(HostedZoneRef::from_attributes("", "boonjiashen.com").is_err());
        let err = HostedZoneRef::from_attributes("/hostedzone/Z0958", "boonjiashen.com").unwrap_err();
        assert!(err.to_string().contains("without the `/hostedzone/` prefix"));
        assert!(HostedZoneRef::from_attributes("Z0958", "localhost").is_err());
    }
}
