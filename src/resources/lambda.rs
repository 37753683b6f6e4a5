use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::stack::{aws_managed_policy_arn, create_assume_role_policy_doc, get_att, get_ref, CfnResource, Resource, StackInput};

pub const IMAGE_URI_PARAM: &str = "FunctionImageUri";
pub const CODE_BUCKET_PARAM: &str = "FunctionCodeBucket";
pub const CODE_KEY_PARAM: &str = "FunctionCodeKey";

/// how third party dependencies of a source archive get packaged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bundling {
    /// ship the source directory as is.
    #[default]
    None,
    /// install `requirements.txt` next to the source before zipping.
    Requirements,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Packaging {
    /// a container image built from the function's build context.
    Image,
    /// a zip archive of the source directory run by a managed runtime.
    Zip {
        runtime: String,
        /// entry point, eg: `index.handler`
        handler: String,
        #[serde(default)]
        bundling: Bundling,
    },
}

#[derive(Debug, Clone)]
pub struct FunctionInput {
    pub logical_name: String,
    pub description: String,
    pub packaging: Packaging,
    /// Valid values: 1 - 900
    pub timeout_secs: u32,
    /// Valid values: 128 - 10240
    pub memory_mb: u32,
    pub tracing: bool,
    /// aws managed policy names attached to the execution role on top of
    /// basic execution (and xray when tracing is on).
    pub managed_policies: Vec<String>,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionHandle {
    pub logical_id: String,
    pub role_logical_id: String,
}

impl FunctionHandle {
    pub fn arn(&self) -> Value {
        get_att(&self.logical_id, "Arn")
    }
}

impl FunctionInput {
    fn role_logical_id(&self) -> String {
        format!("{}Role", self.logical_name)
    }

    fn managed_policy_names(&self) -> Vec<String> {
        let mut names = vec!["service-role/AWSLambdaBasicExecutionRole".to_string()];
        if self.tracing {
            names.push("AWSXRayDaemonWriteAccess".to_string());
        }
        for name in &self.managed_policies {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }
}

impl CfnResource for FunctionInput {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        match &self.packaging {
            Packaging::Image => {
                props.insert("PackageType".into(), "Image".into());
                props.insert("Code".into(), json!({ "ImageUri": get_ref(IMAGE_URI_PARAM) }));
            }
            Packaging::Zip { runtime, handler, .. } => {
                props.insert("Runtime".into(), runtime.clone().into());
                props.insert("Handler".into(), handler.clone().into());
                props.insert("Code".into(), json!({
                    "S3Bucket": get_ref(CODE_BUCKET_PARAM),
                    "S3Key": get_ref(CODE_KEY_PARAM),
                }));
            }
        }
        if !self.description.is_empty() {
            props.insert("Description".into(), self.description.clone().into());
        }
        props.insert("MemorySize".into(), self.memory_mb.into());
        props.insert("Timeout".into(), self.timeout_secs.into());
        props.insert("Role".into(), get_att(&self.role_logical_id(), "Arn"));
        let mode = if self.tracing { "Active" } else { "PassThrough" };
        props.insert("TracingConfig".into(), json!({ "Mode": mode }));
        if !self.environment.is_empty() {
            props.insert("Environment".into(), json!({ "Variables": self.environment }));
        }
        Value::Object(props)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.memory_mb < 128 || self.memory_mb > 10240 {
            return Err(format!("Invalid memory size {:?}\nMust be between 128 and 10240", self.memory_mb));
        }
        if self.timeout_secs < 1 || self.timeout_secs > 900 {
            return Err(format!("Invalid timeout {:?}\nMust be between 1 and 900", self.timeout_secs));
        }
        if let Packaging::Zip { runtime, handler, .. } = &self.packaging {
            if runtime.is_empty() {
                return Err("Source archive functions must provide a runtime".to_string());
            }
            if !handler.contains('.') {
                return Err(format!("Invalid handler {handler:?}. Must look like file.function"));
            }
        }
        Ok(())
    }
}

struct ExecutionRole {
    policies: Vec<String>,
}

impl CfnResource for ExecutionRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> Value {
        let arns: Vec<Value> = self.policies.iter().map(|p| aws_managed_policy_arn(p)).collect();
        json!({
            "AssumeRolePolicyDocument": create_assume_role_policy_doc("lambda.amazonaws.com"),
            "ManagedPolicyArns": arns,
        })
    }
}

/// declares the function, its execution role, and the template parameters
/// that carry the location of its code.
pub fn add_lambda_resource(input: FunctionInput, stack: &mut StackInput) -> Result<FunctionHandle> {
    let handle = FunctionHandle {
        logical_id: input.logical_name.clone(),
        role_logical_id: input.role_logical_id(),
    };
    match &input.packaging {
        Packaging::Image => {
            stack.add_parameter(IMAGE_URI_PARAM, "container image the function runs");
        }
        Packaging::Zip { .. } => {
            stack.add_parameter(CODE_BUCKET_PARAM, "bucket holding the function's source archive");
            stack.add_parameter(CODE_KEY_PARAM, "key of the function's source archive");
        }
    }
    stack.push(Resource::new(handle.role_logical_id.clone(), ExecutionRole {
        policies: input.managed_policy_names(),
    }));
    stack.push(Resource::new(handle.logical_id.clone(), input));
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_function() -> FunctionInput {
        FunctionInput {
            logical_name: "AppFunction".into(),
            description: String::new(),
            packaging: Packaging::Image,
            timeout_secs: 90,
            memory_mb: 10240,
            tracing: true,
            managed_policies: vec!["AmazonS3ReadOnlyAccess".into()],
            environment: Default::default(),
        }
    }

    #[test]
    fn image_function_uses_the_image_parameter() {
        let mut stack = StackInput::new("teststack");
        add_lambda_resource(image_function(), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let function = &template.resources["AppFunction"];
        assert_eq!(function.properties["PackageType"], "Image");
        assert_eq!(function.properties["Code"]["ImageUri"], get_ref(IMAGE_URI_PARAM));
        assert_eq!(function.properties["MemorySize"], 10240);
        assert_eq!(function.properties["Timeout"], 90);
        assert_eq!(function.properties["TracingConfig"]["Mode"], "Active");
        assert!(template.parameters.contains_key(IMAGE_URI_PARAM));
        assert!(!template.parameters.contains_key(CODE_KEY_PARAM));
    }

    #[test]
    fn role_is_read_only_on_storage() {
        let mut stack = StackInput::new("teststack");
        add_lambda_resource(image_function(), &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let policies = template.resources["AppFunctionRole"].properties["ManagedPolicyArns"].to_string();
        assert!(policies.contains("AmazonS3ReadOnlyAccess"));
        assert!(policies.contains("AWSXRayDaemonWriteAccess"));
        assert!(policies.contains("AWSLambdaBasicExecutionRole"));
        assert!(!policies.contains("AmazonS3FullAccess"));
    }

    #[test]
    fn zip_function_uses_runtime_and_handler() {
        let mut stack = StackInput::new("teststack");
        let input = FunctionInput {
            packaging: Packaging::Zip {
                runtime: "python3.8".into(),
                handler: "index.handler".into(),
                bundling: Bundling::Requirements,
            },
            tracing: false,
            ..image_function()
        };
        add_lambda_resource(input, &mut stack).unwrap();
        let template = stack.to_template().unwrap();
        let function = &template.resources["AppFunction"];
        assert_eq!(function.properties["Runtime"], "python3.8");
        assert_eq!(function.properties["Code"]["S3Key"], get_ref(CODE_KEY_PARAM));
        assert_eq!(function.properties["TracingConfig"]["Mode"], "PassThrough");
        assert!(function.properties.get("PackageType").is_none());
    }

    #[test]
    fn limits_are_bounded() {
        let too_big = FunctionInput { memory_mb: 20000, ..image_function() };
        assert_eq!(too_big.validate().unwrap_err(), "Invalid memory size 20000\nMust be between 128 and 10240");
        let too_long = FunctionInput { timeout_secs: 901, ..image_function() };
        assert!(too_long.validate().is_err());
        let zero = FunctionInput { timeout_secs: 0, ..image_function() };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn packaging_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            packaging: Packaging,
        }
        let parsed: Wrapper = toml::from_str("[packaging]\nmode = \"image\"\n").unwrap();
        assert_eq!(parsed.packaging, Packaging::Image);
        let parsed: Wrapper = toml::from_str(
            "[packaging]\nmode = \"zip\"\nruntime = \"python3.8\"\nhandler = \"index.handler\"\nbundling = \"requirements\"\n"
        ).unwrap();
        assert_eq!(parsed.packaging, Packaging::Zip {
            runtime: "python3.8".into(),
            handler: "index.handler".into(),
            bundling: Bundling::Requirements,
        });
    }
}
