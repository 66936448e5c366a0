use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::SshConfig;
use crate::{error::Result, partition::PartitionStrategy};

/// A training run over an already provisioned cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub bucket: String,
    pub prefix: String,
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: String,
    /// The directory holding the serialized graph to train.
    pub graph_dir: PathBuf,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default = "default_runscripts_dir")]
    pub runscripts_dir: PathBuf,
    #[serde(default = "default_graphs_dir")]
    pub graphs_dir: PathBuf,
    #[serde(default)]
    pub partition: PartitionStrategy,
    /// The trainer invocation written into every run script.
    #[serde(default = "default_trainer_command")]
    pub trainer_command: String,
    /// Shell lines run before the trainer, e.g. activating an environment.
    #[serde(default)]
    pub setup: Vec<String>,
    /// Local files copied next to the run script on every machine, e.g. the trainer binary.
    #[serde(default)]
    pub support_files: Vec<PathBuf>,
}

impl ExperimentConfig {
    /// Loads an `ExperimentConfig` from a json file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        super::load_json(path).await
    }

    /// Creates a config with every optional field at its default.
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        epochs: usize,
        batch_size: usize,
        optimizer: impl Into<String>,
        graph_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            epochs,
            batch_size,
            optimizer: optimizer.into(),
            graph_dir: graph_dir.into(),
            port: default_port(),
            manifest: default_manifest(),
            ssh: SshConfig::default(),
            runscripts_dir: default_runscripts_dir(),
            graphs_dir: default_graphs_dir(),
            partition: PartitionStrategy::default(),
            trainer_command: default_trainer_command(),
            setup: Vec::new(),
            support_files: Vec::new(),
        }
    }
}

fn default_port() -> u16 {
    2222
}

fn default_manifest() -> PathBuf {
    PathBuf::from("resources.txt")
}

fn default_runscripts_dir() -> PathBuf {
    PathBuf::from("runscripts")
}

fn default_graphs_dir() -> PathBuf {
    PathBuf::from("graphs")
}

fn default_trainer_command() -> String {
    "./easydist-worker".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_overrides_defaults() {
        let config: ExperimentConfig = serde_json::from_str(
            r#"{
                "bucket": "easydist.data",
                "prefix": "rnnData/",
                "epochs": 1,
                "batch_size": 32,
                "optimizer": "adam",
                "graph_dir": "model",
                "port": 3333,
                "partition": "contiguous",
                "setup": ["source activate tensorflow_p36"]
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 3333);
        assert_eq!(config.partition, PartitionStrategy::Contiguous);
        assert_eq!(config.manifest, PathBuf::from("resources.txt"));
        assert_eq!(config.trainer_command, "./easydist-worker");
        assert_eq!(config.setup.len(), 1);
    }

    #[test]
    fn partition_defaults_to_balanced() {
        let config = ExperimentConfig::new("b", "p/", 1, 32, "adam", "model");
        assert_eq!(config.partition, PartitionStrategy::Balanced);
        assert_eq!(config.port, 2222);
    }
}
