//! turns the function's source directory into the artifact its template
//! parameters point at.
//!
//! Artifacts are named after a fingerprint of their source, so an
//! unchanged source yields unchanged parameter values and cloudformation
//! has nothing to update.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::{EnvironmentConfig, FunctionConfig};
use crate::error::{Error, Result};
use crate::resources::{fingerprint_dir, Bundling, Packaging, CODE_BUCKET_PARAM, CODE_KEY_PARAM, IMAGE_URI_PARAM};

/// ordered shell commands that produce and upload the function artifact,
/// plus the template parameter values that point at it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub build: Vec<String>,
    pub package: Vec<String>,
    pub parameter_values: BTreeMap<String, String>,
}

impl BuildPlan {
    pub fn for_function(env: &EnvironmentConfig, function: &FunctionConfig, out_dir: &Path) -> Result<Self> {
        let fingerprint = fingerprint_dir(&function.source_dir)?.checksum;
        let mut plan = BuildPlan::default();
        match &function.packaging {
            Packaging::Image => {
                let repository = env.image_repository.as_deref().ok_or_else(|| Error::Config(format!(
                    "Environment {} has no image_repository", env.name,
                )))?;
                let registry = repository.split('/').next().unwrap_or(repository);
                let image = format!("{repository}:{fingerprint}");
                let context = quote(&function.source_dir.to_string_lossy());
                plan.build.push(format!("docker build --platform linux/amd64 -t {image} {context}"));
                plan.package.push(format!(
                    "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {registry}",
                    env.region,
                ));
                plan.package.push(format!("docker push {image}"));
                plan.parameter_values.insert(IMAGE_URI_PARAM.to_string(), image);
            }
            Packaging::Zip { bundling, .. } => {
                let bucket = env.artifact_bucket.as_deref().ok_or_else(|| Error::Config(format!(
                    "Environment {} has no artifact_bucket", env.name,
                )))?;
                let staging = out_dir.join(format!("{}-function", env.stack_name));
                let archive = archive_path(out_dir, &env.stack_name, &fingerprint);
                let key = format!("{}/function-{fingerprint}.zip", env.stack_name);
                let source = quote(&function.source_dir.to_string_lossy());
                let staging_str = quote(&staging.to_string_lossy());
                let archive_str = quote(&archive.to_string_lossy());

                plan.build.push(format!("rm -rf {staging_str} {archive_str}"));
                plan.build.push(format!("mkdir -p {staging_str}"));
                plan.build.push(format!("cp -R {source}/. {staging_str}/"));
                if *bundling == Bundling::Requirements {
                    plan.build.push(format!(
                        "pip install --quiet -r {source}/requirements.txt -t {staging_str}"
                    ));
                }
                plan.build.push(format!("cd {staging_str} && zip -qr {archive_str} ."));
                plan.package.push(format!("aws s3 cp {archive_str} s3://{bucket}/{key}"));
                plan.parameter_values.insert(CODE_BUCKET_PARAM.to_string(), bucket.to_string());
                plan.parameter_values.insert(CODE_KEY_PARAM.to_string(), key);
            }
        }
        Ok(plan)
    }

    pub fn commands(&self) -> impl Iterator<Item = &String> {
        self.build.iter().chain(self.package.iter())
    }

    /// `Key=Value` pairs in the form `aws cloudformation deploy` takes them.
    pub fn parameter_overrides(&self) -> String {
        self.parameter_values.iter()
            .map(|(k, v)| format!("{k}={}", quote(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn archive_path(out_dir: &Path, stack_name: &str, fingerprint: &str) -> PathBuf {
    out_dir.join(format!("{stack_name}-function-{fingerprint}.zip"))
}

/// single quotes `s` for sh unless it's made of characters that never need quoting.
pub fn quote(s: &str) -> String {
    let safe = |c: char| c.is_ascii_alphanumeric() || "-_./:=@,+%".contains(c);
    if !s.is_empty() && s.chars().all(safe) {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
