use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// How the operator reaches the machines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            key_path: default_key_path(),
        }
    }
}

/// Everything needed to provision a cluster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    pub experiment_name: String,
    pub iam_role: String,
    pub worker_type: String,
    pub worker_num: usize,
    /// Root volume size of every worker, in GiB.
    #[serde(default = "default_worker_size")]
    pub worker_size: u32,
    #[serde(default = "default_ps_type")]
    pub ps_type: String,
    #[serde(default = "default_name")]
    pub key_name: String,
    #[serde(default = "default_name")]
    pub security_group: String,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default = "default_experiments_dir")]
    pub experiments_dir: PathBuf,
    #[serde(default = "default_ami_filter")]
    pub ami_filter: String,
    #[serde(default)]
    pub region: Option<String>,
    /// Extra local files copied to every machine by `transfer`.
    #[serde(default)]
    pub transfer_files: Vec<PathBuf>,
}

impl DeployConfig {
    /// Loads a `DeployConfig` from a json file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        super::load_json(path).await
    }

    /// Creates a config with every optional field at its default.
    pub fn new(
        experiment_name: impl Into<String>,
        iam_role: impl Into<String>,
        worker_type: impl Into<String>,
        worker_num: usize,
    ) -> Self {
        Self {
            experiment_name: experiment_name.into(),
            iam_role: iam_role.into(),
            worker_type: worker_type.into(),
            worker_num,
            worker_size: default_worker_size(),
            ps_type: default_ps_type(),
            key_name: default_name(),
            security_group: default_name(),
            ssh: SshConfig::default(),
            experiments_dir: default_experiments_dir(),
            ami_filter: default_ami_filter(),
            region: None,
            transfer_files: Vec::new(),
        }
    }

    /// The directory this experiment's artifacts live in.
    pub fn experiment_dir(&self) -> PathBuf {
        self.experiments_dir.join(&self.experiment_name)
    }

    /// Where the manifest of this experiment is written.
    pub fn manifest_path(&self) -> PathBuf {
        self.experiment_dir().join("resources.txt")
    }
}

fn default_user() -> String {
    "ec2-user".into()
}

fn default_key_path() -> PathBuf {
    PathBuf::from("aux").join("easyDist.pem")
}

fn default_worker_size() -> u32 {
    100
}

fn default_ps_type() -> String {
    "t2.nano".into()
}

fn default_name() -> String {
    "easyDist".into()
}

fn default_experiments_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_ami_filter() -> String {
    "Deep Learning AMI (Amazon Linux) Version*".into()
}
