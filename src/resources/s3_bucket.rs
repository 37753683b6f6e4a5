use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::stack::{
    aws_managed_policy_arn, create_assume_role_policy_doc, create_policy_doc, get_att, get_ref,
    select_s3website_url, sub, CfnResource, DeletionPolicy, Resource, StackInput,
};

/// what happens to the bucket when it's removed from the stack
/// (including when the whole stack is deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    Destroy,
    Retain,
}

impl From<RemovalPolicy> for DeletionPolicy {
    fn from(value: RemovalPolicy) -> Self {
        match value {
            RemovalPolicy::Destroy => DeletionPolicy::Delete,
            RemovalPolicy::Retain => DeletionPolicy::Retain,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteConfig {
    pub index_document: String,
    /// defaults to the index document so client side routes resolve.
    pub error_document: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BucketInput {
    pub logical_name: String,
    /// by default cloudformation generates a name from the logical id.
    /// A bucket that a route53 record aliases directly must be named
    /// exactly like the record.
    pub bucket_name: Option<String>,
    /// if enabled, we create a bucket policy to allow public read
    /// for every object, and open the public access block for policies only.
    pub public_read: bool,
    /// enabling this turns on static website hosting.
    pub website: Option<WebsiteConfig>,
    pub versioned: bool,
    pub removal_policy: RemovalPolicy,
    /// s3 buckets in cloudformation cannot be deleted if they contain objects.
    /// With this enabled a custom resource empties the bucket (every object
    /// version included) right before the bucket itself gets deleted.
    /// Requires `removal_policy = Destroy`.
    pub auto_delete_objects: bool,
}

impl Default for BucketInput {
    fn default() -> Self {
        Self {
            logical_name: "SiteBucket".into(),
            bucket_name: None,
            public_read: false,
            website: None,
            versioned: false,
            removal_policy: RemovalPolicy::Retain,
            auto_delete_objects: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketHandle {
    pub logical_id: String,
}

impl BucketHandle {
    pub fn name(&self) -> Value {
        get_ref(&self.logical_id)
    }

    /// `http://bucket.s3-website-region.amazonaws.com`
    pub fn website_url(&self) -> Value {
        get_att(&self.logical_id, "WebsiteURL")
    }

    /// the website url without its scheme, suitable as an origin domain.
    pub fn website_domain(&self) -> Value {
        select_s3website_url(&self.logical_id)
    }
}

impl CfnResource for BucketInput {
    fn type_string(&self) -> &'static str {
        "AWS::S3::Bucket"
    }

    fn properties(&self) -> Value {
        let mut props = Map::new();
        if let Some(name) = &self.bucket_name {
            props.insert("BucketName".into(), Value::String(name.clone()));
        }
        if let Some(website) = &self.website {
            let error_document = website.error_document.as_ref().unwrap_or(&website.index_document);
            props.insert("WebsiteConfiguration".into(), json!({
                "IndexDocument": website.index_document,
                "ErrorDocument": error_document,
            }));
        }
        if self.versioned {
            props.insert("VersioningConfiguration".into(), json!({ "Status": "Enabled" }));
        }
        if self.public_read {
            props.insert("PublicAccessBlockConfiguration".into(), json!({
                "BlockPublicAcls": true,
                "IgnorePublicAcls": true,
                "BlockPublicPolicy": false,
                "RestrictPublicBuckets": false,
            }));
        }
        Value::Object(props)
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.auto_delete_objects && self.removal_policy != RemovalPolicy::Destroy {
            return Err("Cannot use auto_delete_objects unless removal_policy is destroy".to_string());
        }
        if let Some(website) = &self.website {
            if website.index_document.is_empty() || website.index_document.contains('/') {
                return Err(format!("Invalid index document {:?}. Must be a file name such as index.html", website.index_document));
            }
        }
        if let Some(name) = &self.bucket_name {
            validate_bucket_name(name)?;
        }
        Ok(())
    }
}

fn validate_bucket_name(input: &str) -> std::result::Result<(), String> {
    if input.len() < 3 || input.len() > 63 {
        return Err(format!("Bucket name {input} must be 3-63 characters"));
    }
    if !input.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.') {
        return Err(format!("Bucket name {input} must contain only lowercase letters, numbers, dots, and hyphens"));
    }
    if input.starts_with(['-', '.']) || input.ends_with(['-', '.']) {
        return Err(format!("Bucket name {input} cannot start or end with a hyphen or dot"));
    }
    Ok(())
}

const AUTO_DELETE_HANDLER: &str = r#"import boto3
import cfnresponse
from botocore.exceptions import ClientError

def handler(event, context):
    status = cfnresponse.SUCCESS
    if event['RequestType'] == 'Delete':
        try:
            bucket = boto3.resource('s3').Bucket(event['ResourceProperties']['BucketName'])
            bucket.object_versions.delete()
            bucket.objects.all().delete()
        except ClientError as err:
            if err.response.get('Error', {}).get('Code') == 'NoSuchBucket':
                print("Bucket is already gone")
            else:
                print(f"Failed to empty bucket: {err}")
                status = cfnresponse.FAILED
        except Exception as err:
            print(f"Failed to empty bucket: {err}")
            status = cfnresponse.FAILED
    cfnresponse.send(event, context, status, {})
"#;

/// custom resource that empties a bucket when it receives a delete event.
pub struct AutoDeleteObjects {
    pub function_logical_id: String,
    pub bucket_logical_id: String,
}

impl CfnResource for AutoDeleteObjects {
    fn type_string(&self) -> &'static str {
        "Custom::S3AutoDeleteObjects"
    }

    fn properties(&self) -> Value {
        json!({
            "ServiceToken": get_att(&self.function_logical_id, "Arn"),
            "BucketName": get_ref(&self.bucket_logical_id),
        })
    }
}

struct BucketPolicy {
    bucket_logical_id: String,
}

impl CfnResource for BucketPolicy {
    fn type_string(&self) -> &'static str {
        "AWS::S3::BucketPolicy"
    }

    fn properties(&self) -> Value {
        let objects = sub(&format!("${{{}.Arn}}/*", self.bucket_logical_id));
        json!({
            "Bucket": get_ref(&self.bucket_logical_id),
            "PolicyDocument": create_policy_doc(&[("Allow", &["s3:GetObject"], objects, "*")]),
        })
    }
}

struct CleanupRole {
    bucket_logical_id: String,
}

impl CfnResource for CleanupRole {
    fn type_string(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self) -> Value {
        let bucket = &self.bucket_logical_id;
        json!({
            "Description": format!("empties {bucket} before it gets deleted"),
            "AssumeRolePolicyDocument": create_assume_role_policy_doc("lambda.amazonaws.com"),
            "ManagedPolicyArns": [aws_managed_policy_arn("service-role/AWSLambdaBasicExecutionRole")],
            "Policies": [{
                "PolicyName": "auto-delete-objects",
                "PolicyDocument": create_policy_doc(&[
                    ("Allow", &["s3:ListBucket", "s3:ListBucketVersions"], get_att(bucket, "Arn"), ""),
                    ("Allow", &["s3:DeleteObject", "s3:DeleteObjectVersion"], sub(&format!("${{{bucket}.Arn}}/*")), ""),
                ]),
            }],
        })
    }
}

struct CleanupFunction {
    role_logical_id: String,
}

impl CfnResource for CleanupFunction {
    fn type_string(&self) -> &'static str {
        "AWS::Lambda::Function"
    }

    fn properties(&self) -> Value {
        json!({
            "Runtime": "python3.12",
            "Handler": "index.handler",
            "Timeout": 300,
            "Role": get_att(&self.role_logical_id, "Arn"),
            "Code": { "ZipFile": AUTO_DELETE_HANDLER },
        })
    }
}

pub fn add_s3_bucket_resource(input: BucketInput, stack: &mut StackInput) -> Result<BucketHandle> {
    let logical_bucket_name = input.logical_name.clone();
    let handle = BucketHandle {
        logical_id: logical_bucket_name.clone(),
    };
    let public_read = input.public_read;
    let auto_delete = input.auto_delete_objects;
    let deletion_policy = input.removal_policy.into();

    stack.push(Resource::new(logical_bucket_name.clone(), input).deletion_policy(deletion_policy));
    if public_read {
        stack.push(Resource::new(format!("{logical_bucket_name}Policy"), BucketPolicy {
            bucket_logical_id: logical_bucket_name.clone(),
        }));
    }
    if !auto_delete {
        return Ok(handle);
    }

    let logical_role_name = format!("{logical_bucket_name}AutoDeleteRole");
    let logical_fn_name = format!("{logical_bucket_name}AutoDeleteFunction");
    stack.push(Resource::new(logical_role_name.clone(), CleanupRole {
        bucket_logical_id: logical_bucket_name.clone(),
    }));
    stack.push(Resource::new(logical_fn_name.clone(), CleanupFunction {
        role_logical_id: logical_role_name,
    }));
    stack.push(Resource::new(format!("{logical_bucket_name}AutoDeleteObjects"), AutoDeleteObjects {
        function_logical_id: logical_fn_name,
        bucket_logical_id: logical_bucket_name,
    }));
    Ok(handle)
}
