use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use photomosaic_infra::app::App;
use photomosaic_infra::deploy::Deployer;
use tracing::info;

#[derive(Parser)]
#[command(name = "photomosaic-infra", about = "Synthesize and deploy the photomosaic stacks")]
struct Cli {
    /// path to the config file.
    #[arg(long, global = true, env = "PHOTOMOSAIC_CONFIG", default_value = "photomosaic.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the configured environments.
    List,
    /// Write templates, deploy scripts and a manifest.
    Synth {
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// environment or stack names. Defaults to every environment.
        stacks: Vec<String>,
    },
    /// Synthesize, build the function, deploy, and publish the site.
    Deploy {
        #[arg(long, default_value = "out")]
        out_dir: PathBuf,
        /// deploy with the artifacts from a previous build.
        #[arg(long)]
        skip_build: bool,
        stacks: Vec<String>,
    },
    /// Remove published assets and delete the stacks.
    Destroy {
        #[arg(required = true)]
        stacks: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let app = load(&cli.config)?;

    match cli.command {
        Command::List => {
            for env in &app.config.environments {
                let domain = app.config.site_domain(env)?;
                println!(
                    "{}\t{}\t{}\t{:?}\t{}",
                    env.name,
                    env.stack_name,
                    env.region,
                    env.front_door,
                    if env.custom_domain { domain.as_str() } else { "-" },
                );
            }
        }
        Command::Synth { out_dir, stacks } => {
            let artifacts = app.synth(&stacks, &out_dir).context("synthesis failed")?;
            for a in artifacts {
                println!("{}", a.template_path.display());
                println!("{}", a.script_path.display());
            }
        }
        Command::Deploy { out_dir, skip_build, stacks } => {
            let artifacts = app.synth(&stacks, &out_dir).context("synthesis failed")?;
            for a in artifacts {
                let name = a.stack.stack_name().to_string();
                let deployer = Deployer::new(&a.stack.environment.region).await;
                let outputs = deployer.deploy(&a, skip_build).await
                    .with_context(|| format!("deploying {name} failed"))?;
                info!(stack = %name, "deployed");
                println!("{name}");
                for (key, value) in outputs {
                    println!("  {key} = {value}");
                }
            }
        }
        Command::Destroy { stacks } => {
            for stack in app.synthesize(&stacks).context("synthesis failed")? {
                let deployer = Deployer::new(&stack.environment.region).await;
                deployer.destroy(&stack).await
                    .with_context(|| format!("destroying {} failed", stack.stack_name()))?;
                println!("destroyed {}", stack.stack_name());
            }
        }
    }
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<App> {
    App::load(path).with_context(|| format!("failed to load {}", path.display()))
}
