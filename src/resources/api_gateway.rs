use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::certificate::{certificate_covers, CertificateHandle};
use super::lambda::FunctionHandle;
use crate::error::Result;
use crate::stack::{get_att, get_ref, sub, CfnResource, DeletionPolicy, Resource, StackInput};

/// cross origin settings for the HTTP API. The default allows every
/// method, origin and header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsPolicy {
    pub allow_methods: Vec<String>,
    pub allow_origins: Vec<String>,
    pub allow_headers: Vec<String>,
}

impl Default for CorsPolicy {
    fn default() -> Self {
        Self {
            allow_methods: vec!["*".to_string()],
            allow_origins: vec!["*".to_string()],
            allow_headers: vec!["*".to_string()],
        }
    }
}

impl CorsPolicy {
    pub fn allows_all(&self) -> bool {
        let wildcard = |v: &Vec<String>| v.iter().any(|s| s == "*");
        wildcard(&self.allow_methods) && wildcard(&self.allow_origins) && wildcard(&self.allow_headers)
    }

    fn to_value(&self) -> Value {
        json!({
            "AllowMethods": self.allow_methods,
            "AllowOrigins": self.allow_origins,
            "AllowHeaders": self.allow_headers,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessLogConfig {
    pub enabled: bool,
    /// how long cloudwatch keeps the access log. Forever if unset.
    pub retention_days: Option<u32>,
}

impl Default for AccessLogConfig {
    fn default() -> Self {
        Self { enabled: true, retention_days: None }
    }
}

/// retention periods cloudwatch logs accepts.
const VALID_RETENTION_DAYS: &[u32] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922, 3288, 3653,
];

/// one JSON object per request.
pub fn access_log_format() -> String {
    let format = json!({
        "requestId": "$context.requestId",
        "ip": "$context.identity.sourceIp",
        "requestTime": "$context.requestTime",
        "httpMethod": "$context.httpMethod",
        "routeKey": "$context.routeKey",
        "status": "$context.status",
        "protocol": "$context.protocol",
        "responseLength": "$context.responseLength",
        "integration": {
            "error": "$context.integration.error",
            "status": "$context.integration.status",
        },
        "error": {
            "message": "$context.error.message",
            "responseType": "$context.error.responseType",
        },
    });
    format.to_string()
}

pub struct HttpApiInput {
    pub logical_name: String,
    pub api_name: String,
    pub description: String,
    pub function: FunctionHandle,
    /// every path gets an `ANY {path}` route to the function.
    pub routes: Vec<String>,
    /// requests that match no route get proxied to this url.
    pub default_proxy_url: Option<Value>,
    pub cors: CorsPolicy,
    pub access_log: AccessLogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiHandle {
    pub logical_id: String,
    pub stage_logical_id: String,
}

impl ApiHandle {
    pub fn api_id(&self) -> Value {
        get_ref(&self.logical_id)
    }

    /// `https://{api id}.execute-api.{region}.amazonaws.com/`
    pub fn endpoint(&self) -> Value {
        sub(&format!("https://${{{}}}.execute-api.${{AWS::Region}}.${{AWS::URLSuffix}}/", self.logical_id))
    }
}

impl HttpApiInput {
    fn function_integration_id(&self) -> String {
        format!("{}FunctionIntegration", self.logical_name)
    }
    fn default_integration_id(&self) -> String {
        format!("{}DefaultIntegration", self.logical_name)
    }
    fn stage_id(&self) -> String {
        format!("{}DefaultStage", self.logical_name)
    }
    fn log_group_id(&self) -> String {
        format!("{}AccessLogs", self.logical_name)
    }
    fn permission_id(&self) -> String {
        format!("{}InvokePermission", self.logical_name)
    }
    fn route_id(&self, path: &str) -> String {
        format!("{}Route{}", self.logical_name, route_suffix(path))
    }
}

/// `/` -> `Root`, `/process` -> `Process`, `/images/{id}` -> `ImagesId`
fn route_suffix(path: &str) -> String {
    let mut out = String::new();
    for segment in path.split('/') {
        let mut chars = segment.chars().filter(|c| c.is_ascii_alphanumeric());
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if out.is_empty() {
        out.push_str("Root");
    }
    out
}

impl CfnResource for HttpApiInput {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::Api"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("Name".into(), self.api_name.clone().into());
        props.insert("ProtocolType".into(), "HTTP".into());
        if !self.description.is_empty() {
            props.insert("Description".into(), self.description.clone().into());
        }
        props.insert("CorsConfiguration".into(), self.cors.to_value());
        Value::Object(props)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.api_name.is_empty() {
            return Err("An HTTP API must have a name".to_string());
        }
        if self.routes.is_empty() && self.default_proxy_url.is_none() {
            return Err("An HTTP API needs at least one route or a default integration".to_string());
        }
        let mut seen = vec![];
        for path in &self.routes {
            if !path.starts_with('/') {
                return Err(format!("Route {path:?} must start with a /"));
            }
            if path.contains(char::is_whitespace) {
                return Err(format!("Route {path:?} must not contain whitespace"));
            }
            let id = self.route_id(path);
            if seen.contains(&id) {
                return Err(format!("Route {path:?} collides with another route"));
            }
            seen.push(id);
        }
        if self.cors.allow_methods.is_empty() || self.cors.allow_origins.is_empty() {
            return Err("CORS must allow at least one method and one origin".to_string());
        }
        if let Some(days) = self.access_log.retention_days {
            if !VALID_RETENTION_DAYS.contains(&days) {
                return Err(format!("Invalid log retention {days}\nMust be one of {VALID_RETENTION_DAYS:?}"));
            }
        }
        Ok(())
    }
}

/// declares an HTTP API fronting the function: the api, its integrations,
/// one route per path, the permission letting the api invoke the
/// function, and an auto deployed `$default` stage.
pub fn add_http_api_resource(input: HttpApiInput, stack: &mut StackInput) -> Result<ApiHandle> {
    let handle = ApiHandle {
        logical_id: input.logical_name.clone(),
        stage_logical_id: input.stage_id(),
    };
    let api_id = handle.api_id();
    let function_integration = input.function_integration_id();

    stack.push(Resource::new(function_integration.clone(), Integration {
        api_id: api_id.clone(),
        integration_type: "AWS_PROXY",
        uri: input.function.arn(),
        method: None,
        payload_format_version: "2.0",
    }));
    for path in &input.routes {
        stack.push(Resource::new(input.route_id(path), Route {
            api_id: api_id.clone(),
            route_key: format!("ANY {path}"),
            integration_logical_id: function_integration.clone(),
        }));
    }
    if let Some(url) = &input.default_proxy_url {
        let default_integration = input.default_integration_id();
        stack.push(Resource::new(default_integration.clone(), Integration {
            api_id: api_id.clone(),
            integration_type: "HTTP_PROXY",
            uri: url.clone(),
            method: Some("ANY"),
            payload_format_version: "1.0",
        }));
        stack.push(Resource::new(format!("{}DefaultRoute", input.logical_name), Route {
            api_id: api_id.clone(),
            route_key: "$default".to_string(),
            integration_logical_id: default_integration,
        }));
    }

    stack.push(Resource::new(input.permission_id(), InvokePermission {
        function_arn: input.function.arn(),
        api_logical_id: input.logical_name.clone(),
    }));

    let log_group = if input.access_log.enabled {
        let id = input.log_group_id();
        stack.push(Resource::new(id.clone(), LogGroup {
            retention_days: input.access_log.retention_days,
        }).deletion_policy(DeletionPolicy::Retain));
        Some(id)
    } else {
        None
    };
    stack.push(Resource::new(handle.stage_logical_id.clone(), Stage {
        api_id,
        log_group_logical_id: log_group,
    }));

    stack.push(Resource::new(handle.logical_id.clone(), input));
    Ok(handle)
}

struct Integration {
    api_id: Value,
    integration_type: &'static str,
    uri: Value,
    method: Option<&'static str>,
    payload_format_version: &'static str,
}

impl CfnResource for Integration {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::Integration"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("ApiId".into(), self.api_id.clone());
        props.insert("IntegrationType".into(), self.integration_type.into());
        props.insert("IntegrationUri".into(), self.uri.clone());
        if let Some(method) = self.method {
            props.insert("IntegrationMethod".into(), method.into());
        }
        props.insert("PayloadFormatVersion".into(), self.payload_format_version.into());
        Value::Object(props)
    }
}

struct Route {
    api_id: Value,
    route_key: String,
    integration_logical_id: String,
}

impl CfnResource for Route {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::Route"
    }

    fn properties(&self) -> Value {
        json!({
            "ApiId": self.api_id,
            "RouteKey": self.route_key,
            "Target": sub(&format!("integrations/${{{}}}", self.integration_logical_id)),
        })
    }
}

struct InvokePermission {
    function_arn: Value,
    api_logical_id: String,
}

impl CfnResource for InvokePermission {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Permission"
    }

    fn properties(&self) -> Value {
        json!({
            "Action": "lambda:InvokeFunction",
            "FunctionName": self.function_arn,
            "Principal": "apigateway.amazonaws.com",
            "SourceArn": sub(&format!(
                "arn:${{AWS::Partition}}:execute-api:${{AWS::Region}}:${{AWS::AccountId}}:${{{}}}/*/*",
                self.api_logical_id,
            )),
        })
    }
}

struct LogGroup {
    retention_days: Option<u32>,
}

impl CfnResource for LogGroup {
    fn type_string(&self) -> &'static str {
        "AWS::Logs::LogGroup"
    }

    fn properties(&self) -> Value {
        match self.retention_days {
            Some(days) => json!({ "RetentionInDays": days }),
            None => json!({}),
        }
    }
}

struct Stage {
    api_id: Value,
    log_group_logical_id: Option<String>,
}

impl CfnResource for Stage {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::Stage"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        props.insert("ApiId".into(), self.api_id.clone());
        props.insert("StageName".into(), "$default".into());
        props.insert("AutoDeploy".into(), true.into());
        if let Some(log_group) = &self.log_group_logical_id {
            props.insert("AccessLogSettings".into(), json!({
                "DestinationArn": get_att(log_group, "Arn"),
                "Format": access_log_format(),
            }));
        }
        Value::Object(props)
    }
}

pub struct CustomDomainInput {
    pub logical_name: String,
    pub domain_name: String,
    pub certificate: CertificateHandle,
    pub api: ApiHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiDomainHandle {
    pub logical_id: String,
    pub mapping_logical_id: String,
}

impl ApiDomainHandle {
    pub fn regional_domain_name(&self) -> Value {
        get_att(&self.logical_id, "RegionalDomainName")
    }

    pub fn regional_hosted_zone_id(&self) -> Value {
        get_att(&self.logical_id, "RegionalHostedZoneId")
    }
}

impl CfnResource for CustomDomainInput {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::DomainName"
    }

    fn properties(&self) -> Value {
        json!({
            "DomainName": self.domain_name,
            "DomainNameConfigurations": [{
                "CertificateArn": self.certificate.arn(),
                "EndpointType": "REGIONAL",
                "SecurityPolicy": "TLS_1_2",
            }],
        })
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if !certificate_covers(&self.certificate.domain_name, &self.domain_name) {
            return Err(format!(
                "Certificate for {} does not cover custom domain {}",
                self.certificate.domain_name, self.domain_name,
            ));
        }
        Ok(())
    }
}

struct ApiMapping {
    api_id: Value,
    domain_logical_id: String,
    stage_logical_id: String,
}

impl CfnResource for ApiMapping {
    fn type_string(&self) -> &'static str {
        "AWS::ApiGatewayV2::ApiMapping"
    }

    fn properties(&self) -> Value {
        json!({
            "ApiId": self.api_id,
            "DomainName": get_ref(&self.domain_logical_id),
            "Stage": get_ref(&self.stage_logical_id),
        })
    }
}

/// serves the api's `$default` stage on a custom domain. The mapping is
/// explicitly ordered after the domain name.
pub fn bind_custom_domain(input: CustomDomainInput, stack: &mut StackInput) -> Result<ApiDomainHandle> {
    let handle = ApiDomainHandle {
        logical_id: input.logical_name.clone(),
        mapping_logical_id: format!("{}Mapping", input.logical_name),
    };
    stack.push(Resource::new(handle.mapping_logical_id.clone(), ApiMapping {
        api_id: input.api.api_id(),
        domain_logical_id: handle.logical_id.clone(),
        stage_logical_id: input.api.stage_logical_id.clone(),
    }).depends_on(handle.logical_id.clone()));
    stack.push(Resource::new(handle.logical_id.clone(), input));
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::RawResource;

    fn function() -> FunctionHandle {
        FunctionHandle { logical_id: "AppFunction".into(), role_logical_id: "AppFunctionRole".into() }
    }

    fn base_stack() -> StackInput {
        let mut stack = StackInput::new("teststack");
        stack.push(Resource::new("AppFunction", RawResource { ty: "AWS::Lambda::Function", properties: json!({}) }));
        stack.push(Resource::new("SiteBucket", RawResource { ty: "AWS::S3::Bucket", properties: json!({}) }));
        stack.push(Resource::new("SiteCertificate", RawResource { ty: "AWS::CertificateManager::Certificate", properties: json!({}) }));
        stack
    }

    fn api_input(routes: &[&str]) -> HttpApiInput {
        HttpApiInput {
            logical_name: "AppHttpApi".into(),
            api_name: "teststack-api".into(),
            description: String::new(),
            function: function(),
            routes: routes.iter().map(|s| s.to_string()).collect(),
            default_proxy_url: None,
            cors: CorsPolicy::default(),
            access_log: AccessLogConfig::default(),
        }
    }

    #[test]
    fn route_suffixes() {
        assert_eq!(route_suffix("/"), "Root");
        assert_eq!(route_suffix("/process"), "Process");
        assert_eq!(route_suffix("/images/{id}"), "ImagesId");
    }

    #[test]
    fn routes_proxy_every_method_to_the_function() {
        let mut stack = base_stack();
        add_http_api_resource(api_input(&["/", "/process"]), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let root = &template.resources["AppHttpApiRouteRoot"].properties;
        assert_eq!(root["RouteKey"], "ANY /");
        assert_eq!(root["Target"]["Fn::Sub"], "integrations/${AppHttpApiFunctionIntegration}");
        assert_eq!(template.resources["AppHttpApiRouteProcess"].properties["RouteKey"], "ANY /process");
        let integration = &template.resources["AppHttpApiFunctionIntegration"].properties;
        assert_eq!(integration["IntegrationType"], "AWS_PROXY");
        assert_eq!(integration["PayloadFormatVersion"], "2.0");
        let permission = &template.resources["AppHttpApiInvokePermission"].properties;
        assert_eq!(permission["Principal"], "apigateway.amazonaws.com");
    }

    #[test]
    fn default_cors_allows_everything() {
        let mut stack = base_stack();
        add_http_api_resource(api_input(&["/"]), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let cors = &template.resources["AppHttpApi"].properties["CorsConfiguration"];
        assert_eq!(cors["AllowMethods"], json!(["*"]));
        assert_eq!(cors["AllowOrigins"], json!(["*"]));
        assert_eq!(cors["AllowHeaders"], json!(["*"]));
        assert!(CorsPolicy::default().allows_all());
    }

    #[test]
    fn access_log_goes_to_a_retained_log_group() {
        let mut stack = base_stack();
        let mut input = api_input(&["/"]);
        input.access_log.retention_days = Some(30);
        add_http_api_resource(input, &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let group = &template.resources["AppHttpApiAccessLogs"];
        assert_eq!(group.deletion_policy, Some(DeletionPolicy::Retain));
        assert_eq!(group.properties["RetentionInDays"], 30);
        let stage = &template.resources["AppHttpApiDefaultStage"].properties;
        assert_eq!(stage["StageName"], "$default");
        assert_eq!(stage["AccessLogSettings"]["DestinationArn"], get_att("AppHttpApiAccessLogs", "Arn"));
        let format: Value = serde_json::from_str(stage["AccessLogSettings"]["Format"].as_str().unwrap()).unwrap();
        assert_eq!(format["routeKey"], "$context.routeKey");
        assert_eq!(format["integration"]["status"], "$context.integration.status");
    }

    #[test]
    fn access_log_can_be_turned_off() {
        let mut stack = base_stack();
        let mut input = api_input(&["/"]);
        input.access_log.enabled = false;
        add_http_api_resource(input, &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        assert_eq!(template.resources_of_type("AWS::Logs::LogGroup").count(), 0);
        assert!(template.resources["AppHttpApiDefaultStage"].properties.get("AccessLogSettings").is_none());
    }

    #[test]
    fn default_route_proxies_to_the_site() {
        let mut stack = base_stack();
        let mut input = api_input(&["/process"]);
        input.default_proxy_url = Some(get_att("SiteBucket", "WebsiteURL"));
        add_http_api_resource(input, &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        assert_eq!(template.resources["AppHttpApiDefaultRoute"].properties["RouteKey"], "$default");
        let integration = &template.resources["AppHttpApiDefaultIntegration"].properties;
        assert_eq!(integration["IntegrationType"], "HTTP_PROXY");
        assert_eq!(integration["IntegrationMethod"], "ANY");
    }

    #[test]
    fn routes_must_be_paths() {
        assert!(api_input(&["process"]).validate().is_err());
        assert!(api_input(&["/a b"]).validate().is_err());
        assert!(api_input(&[]).validate().is_err());
        assert!(api_input(&["/process", "/pro-cess"]).validate().is_err());
        let mut bad_retention = api_input(&["/"]);
        bad_retention.access_log.retention_days = Some(2);
        assert!(bad_retention.validate().is_err());
    }

    #[test]
    fn custom_domain_mapping_waits_for_the_domain() {
        let mut stack = base_stack();
        let api = add_http_api_resource(api_input(&["/"]), &mut stack).unwrap();
        let cert = CertificateHandle { logical_id: "SiteCertificate".into(), domain_name: "mosaic.dev.boonjiashen.com".into() };
        let domain = bind_custom_domain(CustomDomainInput {
            logical_name: "ApiCustomDomain".into(),
            domain_name: "mosaic.dev.boonjiashen.com".into(),
            certificate: cert,
            api,
        }, &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let mapping = &template.resources[&domain.mapping_logical_id];
        assert_eq!(mapping.depends_on, vec!["ApiCustomDomain".to_string()]);
        assert_eq!(mapping.properties["Stage"], get_ref("AppHttpApiDefaultStage"));
        let config = &template.resources["ApiCustomDomain"].properties["DomainNameConfigurations"][0];
        assert_eq!(config["EndpointType"], "REGIONAL");
    }

    #[test]
    fn custom_domain_needs_a_covering_certificate() {
        let input = CustomDomainInput {
            logical_name: "ApiCustomDomain".into(),
            domain_name: "mosaic.boonjiashen.com".into(),
            certificate: CertificateHandle { logical_id: "SiteCertificate".into(), domain_name: "other.boonjiashen.com".into() },
            api: ApiHandle { logical_id: "AppHttpApi".into(), stage_logical_id: "AppHttpApiDefaultStage".into() },
        };
        assert!(input.validate().is_err());
    }

    #[test]
    fn endpoint_substitutes_the_api_id() {
        let api = ApiHandle { logical_id: "AppHttpApi".into(), stage_logical_id: "AppHttpApiDefaultStage".into() };
        assert_eq!(
            api.endpoint(),
            sub("https://${AppHttpApi}.execute-api.${AWS::Region}.${AWS::URLSuffix}/")
        );
    }
}
