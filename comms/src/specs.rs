use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{CommsErr, Result};

/// Placeholder used for the bucket and keys of a parameter-server task.
pub const PLACEHOLDER: &str = ".";

/// Optimizer names a trainer accepts, matched case insensitively.
pub const OPTIMIZERS: [&str; 3] = ["adam", "sgd", "gradient_descent"];

/// The role a process plays in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobName {
    Ps,
    Worker,
}

impl fmt::Display for JobName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobName::Ps => f.write_str("ps"),
            JobName::Worker => f.write_str("worker"),
        }
    }
}

impl FromStr for JobName {
    type Err = CommsErr;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ps" => Ok(JobName::Ps),
            "worker" => Ok(JobName::Worker),
            other => Err(CommsErr::InvalidSpec(format!(
                "unknown job name `{other}`, expected `ps` or `worker`"
            ))),
        }
    }
}

/// A `host:port` pair as it appears in the cluster specification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl HostPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostPort {
    type Err = CommsErr;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| CommsErr::InvalidSpec(format!("`{s}` is not host:port")))?;

        if host.is_empty() {
            return Err(CommsErr::InvalidSpec(format!("`{s}` has an empty host")));
        }

        let port = port
            .parse()
            .map_err(|_| CommsErr::InvalidSpec(format!("`{s}` has an invalid port")))?;

        Ok(Self::new(host, port))
    }
}

/// Parses a comma separated `host:port` list, ignoring empty entries.
pub fn parse_host_list(csv: &str) -> Result<Vec<HostPort>> {
    csv.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// Joins hosts back into the comma separated form the trainer flags take.
pub fn join_hosts(hosts: &[HostPort]) -> String {
    hosts
        .iter()
        .map(HostPort::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// The layout of the distributed cluster: parameter-server tasks and worker tasks.
///
/// Task `i` of a job is the `i`-th host of that job's list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSpec {
    ps: Vec<HostPort>,
    workers: Vec<HostPort>,
}

impl ClusterSpec {
    /// Creates a new `ClusterSpec`.
    ///
    /// # Errors
    /// `CommsErr::InvalidSpec` if either job has no hosts.
    pub fn new(ps: Vec<HostPort>, workers: Vec<HostPort>) -> Result<Self> {
        if ps.is_empty() {
            return Err(CommsErr::InvalidSpec(
                "at least one parameter server host is required".into(),
            ));
        }
        if workers.is_empty() {
            return Err(CommsErr::InvalidSpec(
                "at least one worker host is required".into(),
            ));
        }

        Ok(Self { ps, workers })
    }

    /// Builds the spec from the comma separated host lists of the trainer flags.
    pub fn from_lists(ps_csv: &str, workers_csv: &str) -> Result<Self> {
        Self::new(parse_host_list(ps_csv)?, parse_host_list(workers_csv)?)
    }

    pub fn ps(&self) -> &[HostPort] {
        &self.ps
    }

    pub fn workers(&self) -> &[HostPort] {
        &self.workers
    }

    /// The hosts of `job`.
    pub fn hosts(&self, job: JobName) -> &[HostPort] {
        match job {
            JobName::Ps => &self.ps,
            JobName::Worker => &self.workers,
        }
    }

    /// The address task `index` of `job` listens on.
    ///
    /// # Errors
    /// `CommsErr::InvalidSpec` if `index` is out of range for `job`.
    pub fn task_address(&self, job: JobName, index: usize) -> Result<&HostPort> {
        let hosts = self.hosts(job);
        hosts.get(index).ok_or_else(|| {
            CommsErr::InvalidSpec(format!(
                "task index {index} out of range for job {job} with {} task(s)",
                hosts.len()
            ))
        })
    }

    /// The chief is worker 0: it initializes variables and writes checkpoints.
    pub fn is_chief(job: JobName, index: usize) -> bool {
        job == JobName::Worker && index == 0
    }
}

/// Every argument a trainer process is launched with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainerArgs {
    pub bucket: String,
    pub keys: Vec<String>,
    pub job_name: JobName,
    pub task_index: usize,
    pub ps_hosts: Vec<HostPort>,
    pub worker_hosts: Vec<HostPort>,
    pub epochs: usize,
    pub batch_size: usize,
    pub optimizer: String,
}

impl TrainerArgs {
    /// Renders the flags in the order the run scripts embed them.
    pub fn to_flags(&self) -> Vec<String> {
        vec![
            format!("--epochs={}", self.epochs),
            format!("--batch_size={}", self.batch_size),
            format!("--optimizer={}", self.optimizer),
            format!("--ps_hosts={}", join_hosts(&self.ps_hosts)),
            format!("--worker_hosts={}", join_hosts(&self.worker_hosts)),
            format!("--job_name={}", self.job_name),
            format!("--task_index={}", self.task_index),
            format!("--bucket={}", self.bucket),
            format!("--keys={}", self.keys.join(",")),
        ]
    }

    /// The cluster these arguments describe.
    pub fn cluster_spec(&self) -> Result<ClusterSpec> {
        ClusterSpec::new(self.ps_hosts.clone(), self.worker_hosts.clone())
    }

    /// Splits the comma separated key flag, treating the placeholder as no keys.
    pub fn parse_keys(csv: &str) -> Vec<String> {
        csv.split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER)
            .map(str::to_string)
            .collect()
    }
}
