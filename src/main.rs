use std::path::PathBuf;

use clap::{Parser, Subcommand};
use comms::{OpenSsh, S3Cli};
use log::{info, warn};
use orchestrator::{AwsCli, DeployConfig, Deployment, ExecutionEnvironment, ExperimentConfig};

#[derive(Parser)]
#[command(name = "easydist")]
#[command(about = "Provisions a training cluster on EC2 and runs experiments on it", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the machines of an experiment
    Deploy {
        /// Deployment config (json)
        #[arg(short, long)]
        config: PathBuf,

        #[command(subcommand)]
        action: DeployAction,
    },

    /// Partition the data and start training on a deployed cluster
    Fit {
        /// Experiment config (json)
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum DeployAction {
    /// Create the security group and key, launch the machines and write the manifest
    Launch,
    /// Copy the key, the manifest and extra files to every machine
    Transfer,
    /// Open a shell on the parameter server
    Login,
    /// Terminate every machine of the experiment
    Terminate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    match Cli::parse().command {
        Commands::Deploy { config, action } => deploy(config, action).await,
        Commands::Fit { config } => fit(config).await,
    }
}

async fn deploy(path: PathBuf, action: DeployAction) -> anyhow::Result<()> {
    let config = DeployConfig::from_file(&path).await?;
    let cloud = AwsCli::new(config.region.clone());
    let shell = OpenSsh::new(config.ssh.user.clone(), config.ssh.key_path.clone());

    match action {
        DeployAction::Launch => {
            let mut deployment = Deployment::new(config, cloud, shell)?;
            let manifest = deployment.launch().await?;
            info!(
                workers = manifest.workers().len();
                "cluster is up, parameter server at {}",
                manifest.parameter_server()
            );
        }
        DeployAction::Transfer => {
            let report = Deployment::resume(config, cloud, shell).await?.transfer().await?;
            if !report.is_complete() {
                warn!("transfer failed on {}", report.failed.join(", "));
            }
        }
        DeployAction::Login => Deployment::resume(config, cloud, shell).await?.login().await?,
        DeployAction::Terminate => {
            Deployment::resume(config, cloud, shell)
                .await?
                .terminate()
                .await?
        }
    }

    Ok(())
}

async fn fit(path: PathBuf) -> anyhow::Result<()> {
    let config = ExperimentConfig::from_file(&path).await?;
    let shell = OpenSsh::new(config.ssh.user.clone(), config.ssh.key_path.clone());

    let mut env = ExecutionEnvironment::new(config, shell, &S3Cli::new()).await?;
    let execution = env.fit().await?;

    info!(
        execution = execution.number, workers = execution.workers.len();
        "training started"
    );
    if !execution.started.is_complete() {
        warn!("training failed to start on {}", execution.started.failed.join(", "));
    }

    Ok(())
}
