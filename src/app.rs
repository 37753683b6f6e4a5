use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::config::{AppConfig, EnvironmentConfig};
use crate::error::{Error, Result};
use crate::packaging::{quote, BuildPlan};
use crate::photomosaic::{instantiate, SynthesizedStack, SITE_BUCKET_OUTPUT};
use crate::resources::AssetBundle;

pub const MANIFEST_FILE: &str = "manifest.json";

/// everything `synth` writes for one stack.
#[derive(Debug, Clone)]
pub struct StackArtifacts {
    pub stack: SynthesizedStack,
    pub plan: BuildPlan,
    pub template_path: PathBuf,
    pub script_path: PathBuf,
}

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    version: u32,
    stacks: Vec<ManifestEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct ManifestEntry<'a> {
    environment: &'a str,
    stack_name: &'a str,
    region: &'a str,
    site_domain: Option<&'a str>,
    template: String,
    deploy_script: String,
    parameters: &'a std::collections::BTreeMap<String, String>,
    assets: &'a [AssetBundle],
}

pub struct App {
    pub config: AppConfig,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(Self::new(AppConfig::load(path)?))
    }

    /// environments matching the selectors, in the order they appear in the
    /// config. No selectors means every environment.
    pub fn select(&self, selectors: &[String]) -> Result<Vec<&EnvironmentConfig>> {
        if selectors.is_empty() {
            return Ok(self.config.environments.iter().collect());
        }
        for selector in selectors {
            if self.config.environment(selector).is_none() {
                return Err(Error::UnknownStack(selector.clone()));
            }
        }
        Ok(self.config.environments.iter()
            .filter(|env| selectors.iter().any(|s| env.matches(s)))
            .collect())
    }

    /// synthesizes the selected stacks in memory, without touching the disk.
    pub fn synthesize(&self, selectors: &[String]) -> Result<Vec<SynthesizedStack>> {
        self.select(selectors)?
            .into_iter()
            .map(|env| instantiate(env, &self.config))
            .collect()
    }

    /// synthesizes the selected stacks and writes their templates, deploy
    /// scripts and a manifest into `out_dir`.
    pub fn synth(&self, selectors: &[String], out_dir: &Path) -> Result<Vec<StackArtifacts>> {
        let stacks = self.synthesize(selectors)?;
        std::fs::create_dir_all(out_dir)?;
        let out_dir = out_dir.canonicalize()?;

        let mut artifacts = vec![];
        for stack in stacks {
            let plan = BuildPlan::for_function(&stack.environment, &self.config.function, &out_dir)?;
            let template_path = out_dir.join(format!("{}.template.json", stack.stack_name()));
            std::fs::write(&template_path, stack.template.to_json_pretty()?)?;
            let script_path = out_dir.join(format!("{}.deploy.sh", stack.stack_name()));
            write_deploy_script(&script_path, &template_path, &stack, &plan)?;
            info!(stack = %stack.stack_name(), template = %template_path.display(), "wrote stack artifacts");
            artifacts.push(StackArtifacts { stack, plan, template_path, script_path });
        }

        let manifest = Manifest {
            version: 1,
            stacks: artifacts.iter().map(|a| ManifestEntry {
                environment: &a.stack.environment.name,
                stack_name: a.stack.stack_name(),
                region: &a.stack.environment.region,
                site_domain: a.stack.site_domain.as_deref(),
                template: a.template_path.display().to_string(),
                deploy_script: a.script_path.display().to_string(),
                parameters: &a.plan.parameter_values,
                assets: &a.stack.bundles,
            }).collect(),
        };
        std::fs::write(out_dir.join(MANIFEST_FILE), serde_json::to_string_pretty(&manifest)?)?;
        Ok(artifacts)
    }
}

/// a standalone script that does what `deploy` does, with the aws cli.
fn write_deploy_script(path: &Path, template_path: &Path, stack: &SynthesizedStack, plan: &BuildPlan) -> Result<()> {
    let env = &stack.environment;
    let region = &env.region;
    let stack_name = stack.stack_name();
    let mut file = std::fs::File::create(path)?;
    writeln!(file, "#!/usr/bin/env bash")?;
    writeln!(file, "set -euo pipefail\n")?;
    writeln!(file, "# build:")?;
    for step in &plan.build {
        writeln!(file, "{step}")?;
    }
    writeln!(file, "\n# package:")?;
    for step in &plan.package {
        writeln!(file, "{step}")?;
    }
    writeln!(file, "\n# deploy:")?;
    let mut cmd = format!(
        "AWS_REGION={region} aws --region {region} cloudformation deploy --stack-name {stack_name} --template-file {} --capabilities CAPABILITY_IAM CAPABILITY_NAMED_IAM",
        quote(&template_path.to_string_lossy()),
    );
    if !plan.parameter_values.is_empty() {
        cmd.push_str(" --parameter-overrides ");
        cmd.push_str(&plan.parameter_overrides());
    }
    writeln!(file, "{cmd}")?;

    writeln!(file, "\n# publish:")?;
    writeln!(
        file,
        "bucket=$(aws --region {region} cloudformation describe-stacks --stack-name {stack_name} --query \"Stacks[0].Outputs[?OutputKey=='{SITE_BUCKET_OUTPUT}'].OutputValue\" --output text)",
    )?;
    for bundle in &stack.bundles {
        let delete = if bundle.prune { " --delete" } else { "" };
        writeln!(
            file,
            "aws --region {region} s3 sync{delete} {} \"s3://$bucket\"",
            quote(&bundle.source_dir.to_string_lossy()),
        )?;
    }
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}
