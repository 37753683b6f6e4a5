//! `photomosaic.toml` parser.
//!
//! Everything that varies between deployments lives here: the shared
//! site, function and api settings, and one `[[environment]]` table per
//! stack.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::regions::{s3_website_alias_target, verify_region, CLOUDFRONT_CERT_REGION};
use crate::resources::{AccessLogConfig, CorsPolicy, HostedZoneRef, Packaging, RemovalPolicy};
use crate::stack::validate_stack_name;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub site: SiteConfig,
    pub function: FunctionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(rename = "environment", default)]
    pub environments: Vec<EnvironmentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// the site is served at `{subdomain}.{hosted zone}`. Empty means the zone apex.
    pub subdomain: String,
    pub assets_dir: PathBuf,
    pub index_document: String,
    pub error_document: Option<String>,
    pub versioned: bool,
    pub removal_policy: RemovalPolicy,
    pub auto_delete_objects: bool,
    pub prune: bool,
    pub retain_on_delete: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            subdomain: "mosaic".to_string(),
            assets_dir: PathBuf::from("site"),
            index_document: "index.html".to_string(),
            error_document: None,
            versioned: true,
            removal_policy: RemovalPolicy::Destroy,
            auto_delete_objects: true,
            prune: true,
            retain_on_delete: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub packaging: Packaging,
    /// docker build context for image functions, source directory for zips.
    pub source_dir: PathBuf,
    pub timeout_secs: u32,
    pub memory_mb: u32,
    #[serde(default = "default_true")]
    pub tracing: bool,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub routes: Vec<String>,
    /// send requests that match no route to the site bucket.
    pub proxy_default_to_site: bool,
    pub cors: CorsPolicy,
    pub access_log: AccessLogConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            routes: vec!["/".to_string()],
            proxy_default_to_site: false,
            cors: CorsPolicy::default(),
            access_log: AccessLogConfig::default(),
        }
    }
}

/// the entity the site's DNS record aliases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontDoor {
    /// the HTTP API's custom domain.
    #[default]
    Api,
    /// a cloudfront distribution in front of the bucket.
    Cdn,
    /// the bucket website endpoint directly.
    Bucket,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub stack_name: String,
    pub region: String,
    pub hosted_zone_id: String,
    pub hosted_zone_name: String,
    #[serde(default)]
    pub front_door: FrontDoor,
    #[serde(default = "default_true")]
    pub custom_domain: bool,
    /// where zip archives are uploaded before deployment.
    pub artifact_bucket: Option<String>,
    /// ECR repository uri that function images are pushed to.
    pub image_repository: Option<String>,
    /// overrides `api.routes` for this stack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routes: Option<Vec<String>>,
    /// overrides `api.proxy_default_to_site`. An api front door always proxies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_default_to_site: Option<bool>,
}

/// the routes and default integration one stack's HTTP API ends up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    pub routes: Vec<String>,
    pub proxy_default_to_site: bool,
}

fn default_true() -> bool {
    true
}

impl EnvironmentConfig {
    pub fn hosted_zone(&self) -> Result<HostedZoneRef> {
        HostedZoneRef::from_attributes(&self.hosted_zone_id, &self.hosted_zone_name)
    }

    pub fn matches(&self, selector: &str) -> bool {
        self.name == selector || self.stack_name == selector
    }
}

impl AppConfig {
    /// reads and validates the config file. Relative paths inside the file
    /// are resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AppConfig = toml::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(base_dir);
        config.validate()?;
        debug!(path = %path.display(), environments = config.environments.len(), "loaded config");
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base_dir: &Path) {
        if self.site.assets_dir.is_relative() {
            self.site.assets_dir = base_dir.join(&self.site.assets_dir);
        }
        if self.function.source_dir.is_relative() {
            self.function.source_dir = base_dir.join(&self.function.source_dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.environments.is_empty() {
            return Err(Error::Config("Must declare at least one [[environment]]".into()));
        }
        let mut names = BTreeSet::new();
        let mut stack_names = BTreeSet::new();
        for env in &self.environments {
            if !names.insert(env.name.as_str()) {
                return Err(Error::Config(format!("Environment name {} is used more than once", env.name)));
            }
            if !stack_names.insert(env.stack_name.as_str()) {
                return Err(Error::Config(format!("Stack name {} is used more than once", env.stack_name)));
            }
            self.validate_environment(env)?;
        }
        self.validate_function()?;
        self.validate_site()?;

        if self.api.cors.allows_all() {
            warn!("CORS allows every origin, method and header");
        }
        if !self.api.access_log.enabled {
            warn!("HTTP API access logging is disabled");
        }
        Ok(())
    }

    fn validate_environment(&self, env: &EnvironmentConfig) -> Result<()> {
        validate_stack_name(&env.stack_name)?;
        if let Some(err) = verify_region(&env.region) {
            return Err(Error::Config(format!("Environment {}: {err}", env.name)));
        }
        env.hosted_zone()?;
        self.api_settings(env)?;
        if env.custom_domain {
            match env.front_door {
                FrontDoor::Cdn if env.region != CLOUDFRONT_CERT_REGION => {
                    return Err(Error::Config(format!(
                        "Environment {}: a cdn front door with a custom domain must be deployed to {CLOUDFRONT_CERT_REGION}, because cloudfront only accepts certificates from there. Found {}",
                        env.name, env.region,
                    )));
                }
                FrontDoor::Bucket if s3_website_alias_target(&env.region).is_none() => {
                    return Err(Error::Config(format!(
                        "Environment {}: region {} has no S3 website endpoint that route53 can alias",
                        env.name, env.region,
                    )));
                }
                _ => {}
            }
            if env.front_door == FrontDoor::Bucket {
                warn!(environment = %env.name, "bucket front door serves the site over http only");
            }
        }
        match &self.function.packaging {
            Packaging::Image if env.image_repository.is_none() => {
                return Err(Error::Config(format!(
                    "Environment {}: image functions need an image_repository to push to", env.name,
                )));
            }
            Packaging::Zip { .. } if env.artifact_bucket.is_none() => {
                return Err(Error::Config(format!(
                    "Environment {}: zip functions need an artifact_bucket to upload to", env.name,
                )));
            }
            _ => {}
        }
        Ok(())
    }

    fn validate_function(&self) -> Result<()> {
        let f = &self.function;
        if f.memory_mb < 128 || f.memory_mb > 10240 {
            return Err(Error::Config(format!("Invalid function memory_mb {}\nMust be between 128 and 10240", f.memory_mb)));
        }
        if f.timeout_secs < 1 || f.timeout_secs > 900 {
            return Err(Error::Config(format!("Invalid function timeout_secs {}\nMust be between 1 and 900", f.timeout_secs)));
        }
        if !f.tracing {
            warn!("function tracing is disabled");
        }
        Ok(())
    }

    fn validate_site(&self) -> Result<()> {
        let site = &self.site;
        if site.auto_delete_objects && site.removal_policy != RemovalPolicy::Destroy {
            return Err(Error::Config("site.auto_delete_objects requires site.removal_policy = \"destroy\"".into()));
        }
        let valid_label = |s: &str| {
            !s.is_empty() && !s.starts_with('-') && !s.ends_with('-')
                && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        };
        if !site.subdomain.is_empty() && !site.subdomain.split('.').all(valid_label) {
            return Err(Error::Config(format!("Invalid site subdomain {:?}", site.subdomain)));
        }
        Ok(())
    }

    /// resolves the routes and default proxy for `env`. An api front door
    /// serves the site through the `$default` route, so it needs the proxy
    /// and no function route at `/`.
    pub fn api_settings(&self, env: &EnvironmentConfig) -> Result<ApiSettings> {
        let routes = env.routes.clone().unwrap_or_else(|| self.api.routes.clone());
        let proxy_default_to_site = env.proxy_default_to_site
            .unwrap_or(self.api.proxy_default_to_site || env.front_door == FrontDoor::Api);
        for route in &routes {
            if !route.starts_with('/') {
                return Err(Error::Config(format!("Route {route:?} must start with a /")));
            }
        }
        if env.front_door == FrontDoor::Api {
            if !proxy_default_to_site {
                return Err(Error::Config(format!(
                    "Environment {}: an api front door serves the site through the $default route, so proxy_default_to_site cannot be false",
                    env.name,
                )));
            }
            if routes.iter().any(|r| r == "/") {
                return Err(Error::Config(format!(
                    "Environment {}: route / would send the site's index to the function. Use a path such as /process",
                    env.name,
                )));
            }
        }
        Ok(ApiSettings { routes, proxy_default_to_site })
    }

    pub fn environment(&self, selector: &str) -> Option<&EnvironmentConfig> {
        self.environments.iter().find(|e| e.matches(selector))
    }

    /// `{subdomain}.{zone}` for the given environment.
    pub fn site_domain(&self, env: &EnvironmentConfig) -> Result<String> {
        Ok(env.hosted_zone()?.record_fqdn(&self.site.subdomain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Bundling;

    const SAMPLE: &str = r#"
[site]
subdomain = "mosaic"
assets_dir = "site"

[function]
source_dir = "lambda"
timeout_secs = 90
memory_mb = 10240
packaging = { mode = "image" }

[[environment]]
name = "devo"
stack_name = "photomosaicDevo"
region = "ap-northeast-1"
hosted_zone_id = "Z05586802LBP65122KD61"
hosted_zone_name = "dev.boonjiashen.com"
image_repository = "123456789012.dkr.ecr.ap-northeast-1.amazonaws.com/photomosaic"
routes = ["/process"]

[[environment]]
name = "prod"
stack_name = "prodPhotomosaic"
region = "us-east-1"
hosted_zone_id = "Z09544292C54AJ4VKFFSY"
hosted_zone_name = "boonjiashen.com"
front_door = "cdn"
image_repository = "123456789012.dkr.ecr.us-east-1.amazonaws.com/photomosaic"
"#;

    fn sample() -> AppConfig {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn parses_with_defaults() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.api.routes, vec!["/".to_string()]);
        assert!(config.api.cors.allows_all());
        assert!(config.api.access_log.enabled);
        assert!(config.function.tracing);
        assert_eq!(config.site.removal_policy, RemovalPolicy::Destroy);
        assert_eq!(config.environments[0].front_door, FrontDoor::Api);
        assert!(config.environments[0].custom_domain);
        assert_eq!(config.environments[1].front_door, FrontDoor::Cdn);
    }

    #[test]
    fn memory_and_timeout_are_required() {
        let without_memory = SAMPLE.replace("memory_mb = 10240\n", "");
        assert!(toml::from_str::<AppConfig>(&without_memory).is_err());
        let without_timeout = SAMPLE.replace("timeout_secs = 90\n", "");
        assert!(toml::from_str::<AppConfig>(&without_timeout).is_err());
    }

    #[test]
    fn cdn_with_custom_domain_must_be_in_us_east_1() {
        let mut config = sample();
        config.environments[1].region = "ap-northeast-1".into();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("us-east-1"), "{err}");

        config.environments[1].custom_domain = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn environment_names_are_unique() {
        let mut config = sample();
        config.environments[1].name = "devo".into();
        assert!(config.validate().is_err());
        let mut config = sample();
        config.environments[1].stack_name = "photomosaicDevo".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zip_functions_need_an_artifact_bucket() {
        let mut config = sample();
        config.function.packaging = Packaging::Zip {
            runtime: "python3.8".into(),
            handler: "index.handler".into(),
            bundling: Bundling::Requirements,
        };
        assert!(config.validate().is_err());
        for env in config.environments.iter_mut() {
            env.artifact_bucket = Some("photomosaic-artifacts".into());
        }
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_inputs() {
        let mut config = sample();
        config.environments[0].region = "mars-north-1".into();
        assert!(config.validate().is_err());

        let mut config = sample();
        config.environments[0].stack_name = "1photomosaic".into();
        assert!(matches!(config.validate(), Err(Error::InvalidStackName { .. })));

        let mut config = sample();
        config.api.routes = vec!["process".into()];
        assert!(config.validate().is_err());

        let mut config = sample();
        config.site.removal_policy = RemovalPolicy::Retain;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.function.memory_mb = 64;
        assert!(config.validate().is_err());

        let mut config = sample();
        config.environments[0].hosted_zone_id = "/hostedzone/Z05586802LBP65122KD61".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn api_front_door_proxies_the_site() {
        let config = sample();
        let devo = config.api_settings(&config.environments[0]).unwrap();
        assert_eq!(devo.routes, vec!["/process".to_string()]);
        assert!(devo.proxy_default_to_site);
        let prod = config.api_settings(&config.environments[1]).unwrap();
        assert_eq!(prod.routes, vec!["/".to_string()]);
        assert!(!prod.proxy_default_to_site);

        let mut config = sample();
        config.environments[0].routes = None;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("route /"), "{err}");

        let mut config = sample();
        config.environments[0].proxy_default_to_site = Some(false);
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("proxy_default_to_site"), "{err}");
    }

    #[test]
    fn selects_by_name_or_stack_name() {
        let config = sample();
        assert_eq!(config.environment("prod").unwrap().stack_name, "prodPhotomosaic");
        assert_eq!(config.environment("photomosaicDevo").unwrap().name, "devo");
        assert!(config.environment("staging").is_none());
        let devo = config.environment("devo").unwrap();
        assert_eq!(config.site_domain(devo).unwrap(), "mosaic.dev.boonjiashen.com");
    }

    #[test]
    fn load_resolves_paths_against_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photomosaic.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.site.assets_dir, dir.path().join("site"));
        assert_eq!(config.function.source_dir, dir.path().join("lambda"));
    }

    #[test]
    fn load_reports_the_path() {
        let err = AppConfig::load(Path::new("/definitely/not/photomosaic.toml")).unwrap_err();
        assert!(matches!(err, Error::ConfigRead { .. }));
    }
}
