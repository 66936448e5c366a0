use std::path::PathBuf;

use clap::Parser;
use comms::specs::{JobName, TrainerArgs, parse_host_list};

use crate::error::{Result, WorkerErr};

/// The trainer's command line, as written into every run script.
#[derive(Debug, Clone, Parser)]
#[command(name = "easydist-worker", about = "Runs one task of a distributed training cluster")]
pub struct Flags {
    #[arg(long)]
    pub bucket: String,
    /// Comma separated object keys of this worker's data chunks.
    #[arg(long)]
    pub keys: String,
    #[arg(long = "job_name")]
    pub job_name: JobName,
    #[arg(long = "task_index")]
    pub task_index: usize,
    /// Comma separated `host:port` list of the parameter servers.
    #[arg(long = "ps_hosts")]
    pub ps_hosts: String,
    /// Comma separated `host:port` list of the workers.
    #[arg(long = "worker_hosts")]
    pub worker_hosts: String,
    #[arg(long)]
    pub epochs: usize,
    #[arg(long = "batch_size")]
    pub batch_size: usize,
    #[arg(long)]
    pub optimizer: String,
    /// Where the transferred graph lives.
    #[arg(long = "graph_dir", default_value = "Graph")]
    pub graph_dir: PathBuf,
    /// Where checkpoints are written.
    #[arg(long = "models_dir", default_value = "models")]
    pub models_dir: PathBuf,
    /// Reads objects from `<root>/<bucket>/<key>` instead of from S3.
    #[arg(long = "store_root")]
    pub store_root: Option<PathBuf>,
}

/// The local directories a trainer reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainerPaths {
    pub graph_dir: PathBuf,
    pub models_dir: PathBuf,
}

impl Default for TrainerPaths {
    fn default() -> Self {
        Self {
            graph_dir: PathBuf::from("Graph"),
            models_dir: PathBuf::from("models"),
        }
    }
}

impl Flags {
    /// Turns the raw flags into `TrainerArgs`.
    ///
    /// # Errors
    /// `WorkerErr::InvalidFlags` if a host list doesn't parse or a worker is asked
    /// to train with no epochs or empty batches.
    pub fn trainer_args(&self) -> Result<TrainerArgs> {
        let hosts = |csv: &str| {
            parse_host_list(csv).map_err(|e| WorkerErr::InvalidFlags(e.to_string()))
        };

        let args = TrainerArgs {
            bucket: self.bucket.clone(),
            keys: TrainerArgs::parse_keys(&self.keys),
            job_name: self.job_name,
            task_index: self.task_index,
            ps_hosts: hosts(&self.ps_hosts)?,
            worker_hosts: hosts(&self.worker_hosts)?,
            epochs: self.epochs,
            batch_size: self.batch_size,
            optimizer: self.optimizer.clone(),
        };

        if args.job_name == JobName::Worker {
            if args.epochs == 0 {
                return Err(WorkerErr::InvalidFlags("--epochs must be at least 1".into()));
            }
            if args.batch_size == 0 {
                return Err(WorkerErr::InvalidFlags(
                    "--batch_size must be at least 1".into(),
                ));
            }
        }

        Ok(args)
    }

    pub fn paths(&self) -> TrainerPaths {
        TrainerPaths {
            graph_dir: self.graph_dir.clone(),
            models_dir: self.models_dir.clone(),
        }
    }
}
