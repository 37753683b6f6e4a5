//! the photomosaic application stack: a site bucket with its assets, the
//! function behind an HTTP API, and whichever front door the environment
//! puts on the site's domain.

use serde_json::Value;
use tracing::{debug, info};

use crate::config::{AppConfig, EnvironmentConfig, FrontDoor};
use crate::error::Result;
use crate::resources::*;
use crate::stack::{sub, SavedTemplate, StackInput};

pub const SITE_URL_OUTPUT: &str = "SiteUrl";
pub const API_ENDPOINT_OUTPUT: &str = "ApiEndpoint";
pub const SITE_BUCKET_OUTPUT: &str = "SiteBucketName";

/// one environment's validated template, plus what the deploy engine
/// needs to publish alongside it.
#[derive(Debug, Clone)]
pub struct SynthesizedStack {
    pub environment: EnvironmentConfig,
    pub template: SavedTemplate,
    pub bundles: Vec<AssetBundle>,
    /// the custom domain the site is served at, if any.
    pub site_domain: Option<String>,
}

impl SynthesizedStack {
    pub fn stack_name(&self) -> &str {
        &self.environment.stack_name
    }
}

/// declares every resource of the stack for `env`.
pub fn declare(env: &EnvironmentConfig, config: &AppConfig) -> Result<(StackInput, Vec<AssetBundle>, Option<String>)> {
    let zone = env.hosted_zone()?;
    let mut stack = StackInput::new(env.stack_name.as_str());
    stack.description = format!("photomosaic ({})", env.name);

    let site_domain = env.custom_domain.then(|| zone.record_fqdn(&config.site.subdomain));

    let site = &config.site;
    let bucket_name = match (env.front_door, &site_domain) {
        (FrontDoor::Bucket, Some(domain)) => Some(domain.clone()),
        _ => None,
    };
    let bucket = add_s3_bucket_resource(BucketInput {
        logical_name: "SiteBucket".into(),
        bucket_name,
        public_read: true,
        website: Some(WebsiteConfig {
            index_document: site.index_document.clone(),
            error_document: site.error_document.clone(),
        }),
        versioned: site.versioned,
        removal_policy: site.removal_policy,
        auto_delete_objects: site.auto_delete_objects,
    }, &mut stack)?;

    let bundle = AssetBundle::from_dir("SiteAssets", &site.assets_dir, &bucket, site.prune, site.retain_on_delete)?;
    debug!(stack = %env.stack_name, files = bundle.files.len(), fingerprint = %bundle.fingerprint, "fingerprinted site assets");
    add_asset_bundle(&bundle, &mut stack);

    let function = add_lambda_resource(FunctionInput {
        logical_name: "AppFunction".into(),
        description: format!("photomosaic processing function ({})", env.name),
        packaging: config.function.packaging.clone(),
        timeout_secs: config.function.timeout_secs,
        memory_mb: config.function.memory_mb,
        tracing: config.function.tracing,
        managed_policies: vec!["AmazonS3ReadOnlyAccess".into()],
        environment: config.function.environment.clone(),
    }, &mut stack)?;

    let api_settings = config.api_settings(env)?;
    let api = add_http_api_resource(HttpApiInput {
        logical_name: "AppHttpApi".into(),
        api_name: format!("{}-http-api", env.stack_name),
        description: String::new(),
        function,
        routes: api_settings.routes,
        default_proxy_url: api_settings.proxy_default_to_site.then(|| bucket.website_url()),
        cors: config.api.cors.clone(),
        access_log: config.api.access_log.clone(),
    }, &mut stack)?;

    let certificate = match (&site_domain, env.front_door) {
        (Some(domain), FrontDoor::Api | FrontDoor::Cdn) => Some(add_certificate_resource(CertificateInput {
            logical_name: "SiteCertificate".into(),
            domain_name: domain.clone(),
            hosted_zone: zone.clone(),
        }, &mut stack)?),
        _ => None,
    };

    let (site_url, alias_target): (Value, Option<AliasTarget>) = match env.front_door {
        FrontDoor::Api => match (&site_domain, certificate) {
            (Some(domain), Some(certificate)) => {
                let api_domain = bind_custom_domain(CustomDomainInput {
                    logical_name: "ApiCustomDomain".into(),
                    domain_name: domain.clone(),
                    certificate,
                    api: api.clone(),
                }, &mut stack)?;
                (format!("https://{domain}/").into(), Some(AliasTarget::ApiDomain(api_domain)))
            }
            _ => (api.endpoint(), None),
        },
        FrontDoor::Cdn => {
            let mut input = DistributionInput::for_bucket_website("SiteDistribution", &bucket);
            input.comment = format!("photomosaic site ({})", env.name);
            if let Some(domain) = &site_domain {
                input.aliases = vec![domain.clone()];
            }
            input.certificate = certificate;
            let distribution = add_cloudfront_resource(input, &mut stack)?;
            match &site_domain {
                Some(domain) => (format!("https://{domain}/").into(), Some(AliasTarget::Distribution(distribution))),
                None => (sub(&format!("https://${{{}.DomainName}}/", distribution.logical_id)), None),
            }
        }
        FrontDoor::Bucket => match &site_domain {
            Some(domain) => (
                format!("http://{domain}/").into(),
                Some(AliasTarget::BucketWebsite { region: env.region.clone() }),
            ),
            None => (bucket.website_url(), None),
        },
    };

    if let (Some(domain), Some(target)) = (&site_domain, alias_target) {
        add_route53_resource(RecordInput {
            logical_name: "SiteRecord".into(),
            zone: zone.clone(),
            record_name: domain.clone(),
            target,
        }, &mut stack)?;
    }

    stack.add_output(SITE_URL_OUTPUT, "where the site is served", site_url);
    stack.add_output(API_ENDPOINT_OUTPUT, "invoke url of the HTTP API", api.endpoint());
    stack.add_output(SITE_BUCKET_OUTPUT, "bucket the site assets are published to", bucket.name());
    Ok((stack, vec![bundle], site_domain))
}

/// declares and validates the stack for `env`.
pub fn instantiate(env: &EnvironmentConfig, config: &AppConfig) -> Result<SynthesizedStack> {
    let (stack, bundles, site_domain) = declare(env, config)?;
    let template = stack.to_template()?;
    info!(
        stack = %env.stack_name,
        region = %env.region,
        front_door = ?env.front_door,
        resources = template.resources.len(),
        "synthesized stack"
    );
    Ok(SynthesizedStack {
        environment: env.clone(),
        template,
        bundles,
        site_domain,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApiConfig, FunctionConfig, SiteConfig};
    use std::path::Path;

    fn config(assets: &Path, env: EnvironmentConfig) -> AppConfig {
        AppConfig {
            site: SiteConfig { assets_dir: assets.to_path_buf(), ..Default::default() },
            function: FunctionConfig {
                packaging: Packaging::Image,
                source_dir: assets.to_path_buf(),
                timeout_secs: 90,
                memory_mb: 10240,
                tracing: true,
                environment: Default::default(),
            },
            api: ApiConfig { routes: vec!["/process".into()], ..Default::default() },
            environments: vec![env],
        }
    }

    fn env(front_door: FrontDoor, custom_domain: bool) -> EnvironmentConfig {
        EnvironmentConfig {
            name: "devo".into(),
            stack_name: "photomosaicDevo".into(),
            region: "ap-northeast-1".into(),
            hosted_zone_id: "Z05586802LBP65122KD61".into(),
            hosted_zone_name: "dev.boonjiashen.com".into(),
            front_door,
            custom_domain,
            artifact_bucket: None,
            image_repository: Some("123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/photomosaic".into()),
            routes: None,
            proxy_default_to_site: None,
        }
    }

    fn assets() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>mosaic</h1>").unwrap();
        dir
    }

    #[test]
    fn api_front_door_aliases_the_api_domain() {
        let dir = assets();
        let e = env(FrontDoor::Api, true);
        let out = instantiate(&e, &config(dir.path(), e.clone())).unwrap();
        assert_eq!(out.site_domain.as_deref(), Some("mosaic.dev.boonjiashen.com"));
        let record = &out.template.resources["SiteRecord"].properties;
        assert_eq!(record["Name"], "mosaic.dev.boonjiashen.com.");
        assert_eq!(record["AliasTarget"]["DNSName"]["Fn::GetAtt"][0], "ApiCustomDomain");
        assert_eq!(out.template.resources_of_type("AWS::CloudFront::Distribution").count(), 0);
        assert_eq!(out.template.outputs[SITE_URL_OUTPUT].value, "https://mosaic.dev.boonjiashen.com/");

        let default_route = &out.template.resources["AppHttpApiDefaultRoute"].properties;
        assert_eq!(default_route["RouteKey"], "$default");
        assert_eq!(default_route["Target"]["Fn::Sub"], "integrations/${AppHttpApiDefaultIntegration}");
        let integration = &out.template.resources["AppHttpApiDefaultIntegration"].properties;
        assert_eq!(integration["IntegrationType"], "HTTP_PROXY");
        assert_eq!(integration["IntegrationUri"], serde_json::json!({ "Fn::GetAtt": ["SiteBucket", "WebsiteURL"] }));
        let root_routes = out.template.resources_of_type("AWS::ApiGatewayV2::Route")
            .filter(|(_, r)| r.properties["RouteKey"] == "ANY /")
            .count();
        assert_eq!(root_routes, 0);
    }

    #[test]
    fn api_front_door_refuses_a_root_function_route() {
        let dir = assets();
        let e = env(FrontDoor::Api, true);
        let mut c = config(dir.path(), e.clone());
        c.api.routes = vec!["/".into()];
        assert!(matches!(instantiate(&e, &c), Err(crate::error::Error::Config(_))));
    }

    #[test]
    fn bucket_front_door_names_the_bucket_after_the_site() {
        let dir = assets();
        let e = env(FrontDoor::Bucket, true);
        let out = instantiate(&e, &config(dir.path(), e.clone())).unwrap();
        assert_eq!(out.template.resources["SiteBucket"].properties["BucketName"], "mosaic.dev.boonjiashen.com");
        assert_eq!(out.template.resources_of_type("AWS::CertificateManager::Certificate").count(), 0);
        let alias = &out.template.resources["SiteRecord"].properties["AliasTarget"];
        assert_eq!(alias["DNSName"], "s3-website-ap-northeast-1.amazonaws.com");
    }

    #[test]
    fn without_custom_domain_there_is_no_record_or_certificate() {
        let dir = assets();
        for front_door in [FrontDoor::Api, FrontDoor::Cdn, FrontDoor::Bucket] {
            let e = env(front_door, false);
            let out = instantiate(&e, &config(dir.path(), e.clone())).unwrap();
            assert!(out.site_domain.is_none());
            assert_eq!(out.template.resources_of_type("AWS::Route53::RecordSet").count(), 0);
            assert_eq!(out.template.resources_of_type("AWS::CertificateManager::Certificate").count(), 0);
            assert!(out.template.outputs[SITE_URL_OUTPUT].value.is_object());
        }
    }

    #[test]
    fn proxy_default_to_site_adds_a_default_route() {
        let dir = assets();
        let e = env(FrontDoor::Cdn, false);
        let mut c = config(dir.path(), e.clone());
        c.api.proxy_default_to_site = true;
        c.api.routes = vec!["/process".into()];
        let out = instantiate(&e, &c).unwrap();
        let integration = &out.template.resources["AppHttpApiDefaultIntegration"].properties;
        assert_eq!(integration["IntegrationUri"]["Fn::GetAtt"][0], "SiteBucket");
        assert_eq!(out.template.resources["AppHttpApiRouteProcess"].properties["RouteKey"], "ANY /process");
    }
}
