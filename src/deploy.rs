//! drives cloudformation and s3 through the AWS SDK: build the function
//! artifact, create or update the stack, wait for its outputs, then
//! publish the site assets into the stack's bucket.

use std::collections::{BTreeMap, BTreeSet};
use std::process::{Command, Stdio};

use aws_sdk_cloudformation::config::Region;
use aws_sdk_cloudformation::types::{Capability, OnFailure, Parameter, Stack, StackStatus};
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info, warn};

use crate::app::StackArtifacts;
use crate::error::{Error, Result};
use crate::photomosaic::{SynthesizedStack, SITE_BUCKET_OUTPUT};
use crate::resources::{content_type_for, AssetBundle};

/// object metadata key holding the checksum of the uploaded file.
pub const FINGERPRINT_METADATA_KEY: &str = "photomosaic-fingerprint";

const POLL_INTERVAL_MS: u64 = 700;

pub struct Deployer {
    cfn: aws_sdk_cloudformation::Client,
    s3: aws_sdk_s3::Client,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishSummary {
    pub uploaded: usize,
    pub unchanged: usize,
    pub deleted: usize,
}

impl Deployer {
    pub async fn new(region: &str) -> Self {
        let shared_config = aws_config::from_env()
            .region(Region::new(region.to_string()))
            .load()
            .await;
        Self {
            cfn: aws_sdk_cloudformation::Client::new(&shared_config),
            s3: aws_sdk_s3::Client::new(&shared_config),
        }
    }

    /// runs the build plan, deploys the template, and publishes assets.
    /// Returns the stack outputs.
    pub async fn deploy(&self, artifacts: &StackArtifacts, skip_build: bool) -> Result<BTreeMap<String, String>> {
        let name = artifacts.stack.stack_name();
        if skip_build {
            info!(stack = %name, "skipping build");
        } else {
            for command in artifacts.plan.commands() {
                run_command(command)?;
            }
        }

        let body = artifacts.stack.template.to_json_pretty()?;
        let parameters: Vec<Parameter> = artifacts.plan.parameter_values.iter()
            .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
            .collect();
        let deploy_err = |reason: String| Error::Deploy { stack: name.to_string(), reason };
        self.create_or_update_stack(name, &body, parameters).await.map_err(deploy_err)?;
        let outputs = self.wait_for_output(name).await.map_err(deploy_err)?;

        let bucket = outputs.get(SITE_BUCKET_OUTPUT).ok_or_else(|| Error::Deploy {
            stack: name.to_string(),
            reason: format!("Stack has no {SITE_BUCKET_OUTPUT} output"),
        })?;
        for bundle in &artifacts.stack.bundles {
            let summary = self.publish_assets(bundle, bucket).await.map_err(deploy_err)?;
            info!(
                stack = %name, bundle = %bundle.id, bucket = %bucket,
                uploaded = summary.uploaded, unchanged = summary.unchanged, deleted = summary.deleted,
                "published assets"
            );
        }
        Ok(outputs)
    }

    /// removes the bundles' objects (unless retained) and deletes the stack.
    pub async fn destroy(&self, stack: &SynthesizedStack) -> Result<()> {
        let name = stack.stack_name();
        let deploy_err = |reason: String| Error::Deploy { stack: name.to_string(), reason };
        if !self.does_stack_exist(name).await.map_err(deploy_err)? {
            warn!(stack = %name, "stack does not exist, nothing to destroy");
            return Ok(());
        }
        let outputs = self.current_stack(name).await.map_err(deploy_err)?
            .map(|s| outputs_of(&s))
            .unwrap_or_default();
        if let Some(bucket) = outputs.get(SITE_BUCKET_OUTPUT) {
            for bundle in stack.bundles.iter().filter(|b| !b.retain_on_delete) {
                for file in &bundle.files {
                    self.delete_object(bucket, &file.key).await.map_err(deploy_err)?;
                }
                info!(stack = %name, bundle = %bundle.id, objects = bundle.files.len(), "removed published assets");
            }
        }
        info!(stack = %name, "deleting stack");
        self.cfn.delete_stack().stack_name(name).send().await
            .map_err(|e| deploy_err(format!("{:#?}", e)))?;
        self.wait_for_deletion(name).await.map_err(deploy_err)
    }

    pub async fn does_stack_exist(&self, name: &str) -> std::result::Result<bool, String> {
        Ok(self.current_stack(name).await?.is_some())
    }

    /// the stack as cloudformation reports it now, `None` once it's gone.
    pub async fn current_stack(&self, name: &str) -> std::result::Result<Option<Stack>, String> {
        match self.cfn.describe_stacks().stack_name(name).send().await {
            Ok(resp) => Ok(resp.stacks().and_then(|s| s.first()).cloned()),
            Err(e) => {
                let e_str = format!("{:#?}", e);
                if e_str.contains("does not exist") {
                    return Ok(None);
                }
                Err(e_str)
            }
        }
    }

    /// polls until a create or update settles. A stack that gets deleted on
    /// the way failed to create, and is reported with the last reason seen.
    pub async fn wait_for_output(&self, name: &str) -> std::result::Result<BTreeMap<String, String>, String> {
        let mut last_reason: Option<String> = None;
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
            let stack = match self.current_stack(name).await? {
                Some(stack) => stack,
                None => return Err(failure_message(name, "DELETE_COMPLETE", last_reason.as_deref())),
            };
            let status = stack.stack_status().ok_or_else(|| format!("Stack {name} not found"))?;
            if let Some(reason) = stack.stack_status_reason() {
                last_reason = Some(reason.to_string());
            }
            match deploy_progress(status) {
                DeployProgress::Done => return Ok(outputs_of(&stack)),
                DeployProgress::Waiting => debug!(stack = %name, status = %status.as_str(), "waiting for stack"),
                DeployProgress::Failed => return Err(failure_message(name, status.as_str(), last_reason.as_deref())),
            }
        }
    }

    async fn wait_for_deletion(&self, name: &str) -> std::result::Result<(), String> {
        loop {
            tokio::time::sleep(tokio::time::Duration::from_millis(POLL_INTERVAL_MS)).await;
            let stack = match self.current_stack(name).await? {
                Some(stack) => stack,
                None => return Ok(()),
            };
            match stack.stack_status() {
                Some(StackStatus::DeleteComplete) => return Ok(()),
                Some(StackStatus::DeleteInProgress) => debug!(stack = %name, "waiting for stack deletion"),
                other => return Err(failure_message(
                    name,
                    other.map(|s| s.as_str()).unwrap_or("UNKNOWN"),
                    stack.stack_status_reason(),
                )),
            }
        }
    }

    pub async fn create_or_update_stack(
        &self,
        name: &str,
        body: &str,
        parameters: Vec<Parameter>,
    ) -> std::result::Result<(), String> {
        if self.does_stack_exist(name).await? {
            info!(stack = %name, "updating stack");
            let resp = self.cfn
                .update_stack()
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(parameters))
                .send()
                .await;
            if let Err(e) = resp {
                let e_str = format!("{:#?}", e);
                if e_str.contains("No updates are to be performed") {
                    info!(stack = %name, "stack is up to date");
                    return Ok(());
                }
                return Err(e_str);
            }
        } else {
            info!(stack = %name, "creating stack");
            self.cfn
                .create_stack()
                .on_failure(OnFailure::Delete)
                .capabilities(Capability::CapabilityNamedIam)
                .capabilities(Capability::CapabilityIam)
                .stack_name(name)
                .template_body(body)
                .set_parameters(Some(parameters))
                .send()
                .await
                .map_err(|e| format!("{:#?}", e))?;
        }
        Ok(())
    }

    /// uploads new or changed files, and deletes objects that aren't in the
    /// bundle when it prunes.
    pub async fn publish_assets(&self, bundle: &AssetBundle, bucket: &str) -> std::result::Result<PublishSummary, String> {
        let remote = self.remote_objects(bucket, bundle).await?;
        let plan = bundle.plan_sync(&remote);
        for file in &plan.uploads {
            let contents = std::fs::read(&file.path)
                .map_err(|e| format!("Failed to read {:?}\n{e}", file.path))?;
            self.s3.put_object()
                .bucket(bucket)
                .key(&file.key)
                .content_type(content_type_for(&file.key))
                .metadata(FINGERPRINT_METADATA_KEY, &file.checksum)
                .body(ByteStream::from(contents))
                .send()
                .await
                .map_err(|e| format!("Failed to upload {}\n{:#?}", file.key, e))?;
            debug!(key = %file.key, "uploaded");
        }
        for key in &plan.deletes {
            self.delete_object(bucket, key).await?;
        }
        Ok(PublishSummary {
            uploaded: plan.uploads.len(),
            unchanged: plan.unchanged,
            deleted: plan.deletes.len(),
        })
    }

    /// every object in the bucket, with the checksum it was uploaded with
    /// for the keys the bundle also has.
    async fn remote_objects(&self, bucket: &str, bundle: &AssetBundle) -> std::result::Result<BTreeMap<String, Option<String>>, String> {
        let local: BTreeSet<&str> = bundle.files.iter().map(|f| f.key.as_str()).collect();
        let mut objects = BTreeMap::new();
        for key in self.list_keys(bucket).await? {
            let checksum = if local.contains(key.as_str()) {
                self.remote_checksum(bucket, &key).await?
            } else {
                None
            };
            objects.insert(key, checksum);
        }
        Ok(objects)
    }

    async fn list_keys(&self, bucket: &str) -> std::result::Result<BTreeSet<String>, String> {
        let mut keys = BTreeSet::new();
        let mut token: Option<String> = None;
        loop {
            let resp = self.s3.list_objects_v2()
                .bucket(bucket)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| format!("Failed to list {bucket}\n{:#?}", e))?;
            for object in resp.contents().unwrap_or_default() {
                if let Some(key) = object.key() {
                    keys.insert(key.to_string());
                }
            }
            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => return Ok(keys),
            }
        }
    }

    async fn remote_checksum(&self, bucket: &str, key: &str) -> std::result::Result<Option<String>, String> {
        let resp = self.s3.head_object().bucket(bucket).key(key).send().await
            .map_err(|e| format!("Failed to inspect {key}\n{:#?}", e))?;
        Ok(resp.metadata().and_then(|m| m.get(FINGERPRINT_METADATA_KEY)).cloned())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> std::result::Result<(), String> {
        self.s3.delete_object().bucket(bucket).key(key).send().await
            .map_err(|e| format!("Failed to delete {key}\n{:#?}", e))?;
        debug!(key = %key, "deleted");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeployProgress {
    Done,
    Waiting,
    Failed,
}

/// where a create or update stands. `DELETE_COMPLETE` counts as failed:
/// creates roll back with `OnFailure::Delete`.
fn deploy_progress(status: &StackStatus) -> DeployProgress {
    match status {
        StackStatus::CreateComplete
        | StackStatus::UpdateComplete
        | StackStatus::ImportComplete => DeployProgress::Done,

        StackStatus::CreateInProgress
        | StackStatus::DeleteInProgress
        | StackStatus::ImportInProgress
        | StackStatus::ImportRollbackInProgress
        | StackStatus::ReviewInProgress
        | StackStatus::RollbackInProgress
        | StackStatus::UpdateCompleteCleanupInProgress
        | StackStatus::UpdateInProgress
        | StackStatus::UpdateRollbackCompleteCleanupInProgress
        | StackStatus::UpdateRollbackInProgress => DeployProgress::Waiting,

        _ => DeployProgress::Failed,
    }
}

fn failure_message(name: &str, status: &str, reason: Option<&str>) -> String {
    format!(
        "Stack {name} ended in {status}: {}",
        reason.unwrap_or("Failed to get stack failure reason"),
    )
}

fn outputs_of(stack: &Stack) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for output in stack.outputs().unwrap_or_default() {
        if let (Some(key), Some(val)) = (output.output_key(), output.output_value()) {
            out.insert(key.to_string(), val.to_string());
        }
    }
    out
}

/// runs one build step through `sh`, streaming its output.
pub fn run_command(command: &str) -> Result<()> {
    info!(command = %command, "running build step");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|e| Error::Build { command: command.to_string(), reason: e.to_string() })?;
    if !status.success() {
        return Err(Error::Build {
            command: command.to_string(),
            reason: format!("exited with {status}"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_stacks_fail_the_deploy() {
        assert_eq!(deploy_progress(&StackStatus::DeleteComplete), DeployProgress::Failed);
        assert_eq!(deploy_progress(&StackStatus::RollbackComplete), DeployProgress::Failed);
        assert_eq!(deploy_progress(&StackStatus::UpdateRollbackComplete), DeployProgress::Failed);
        assert_eq!(deploy_progress(&StackStatus::DeleteInProgress), DeployProgress::Waiting);
        assert_eq!(deploy_progress(&StackStatus::CreateComplete), DeployProgress::Done);
        assert_eq!(deploy_progress(&StackStatus::UpdateComplete), DeployProgress::Done);

        let message = failure_message("photomosaicDevo", "DELETE_COMPLETE", Some("The following resource(s) failed to create: [AppFunction]."));
        assert!(message.contains("DELETE_COMPLETE"));
        assert!(message.contains("AppFunction"));
    }

    #[test]
    fn build_steps_report_failures() {
        assert!(run_command("true").is_ok());
        let err = run_command("exit 3").unwrap_err();
        match err {
            Error::Build { command, reason } => {
                assert_eq!(command, "exit 3");
                assert!(reason.contains('3'), "{reason}");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
