use std::path::{Path, PathBuf};

use comms::{ObjectStore, RemoteShell};
use log::{info, warn};

use crate::{
    configs::{Adapter, ExperimentConfig},
    error::{OrchestratorError, Result},
    manifest::Manifest,
    partition::{Partition, partition},
    report::HostReport,
    scripts::{self, REMOTE_SCRIPT, RunScript},
};

/// The directory graph files land in on every worker.
pub const REMOTE_GRAPH_DIR: &str = "Graph";

/// Starts the run script detached from the ssh session.
const START_COMMAND: &str = "nohup sh run.sh > run.out 2> run.err < /dev/null &";

/// One call to `fit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// The graph snapshot that was trained.
    pub number: usize,
    pub workers: Vec<String>,
    /// The machines training was started on.
    pub started: HostReport,
}

/// Drives training runs over a provisioned cluster.
///
/// Every remote call is awaited before the next one starts; nothing is retried.
pub struct ExecutionEnvironment<S: RemoteShell> {
    config: ExperimentConfig,
    shell: S,
    manifest: Manifest,
    chunks: Vec<String>,
    partition: Partition,
    saved: Option<usize>,
    executions: Vec<Execution>,
}

impl<S: RemoteShell> ExecutionEnvironment<S> {
    /// Creates a new `ExecutionEnvironment` whose data chunks are every object
    /// under the configured bucket and prefix.
    ///
    /// # Arguments
    /// * `config` - The experiment to run.
    /// * `shell` - How machines are reached.
    /// * `store` - Where the data chunks live.
    ///
    /// # Errors
    /// An `OrchestratorError` if the config is invalid, the manifest can't be read
    /// or the chunks can't be listed.
    pub async fn new(config: ExperimentConfig, shell: S, store: &dyn ObjectStore) -> Result<Self> {
        Adapter::new().validate_experiment(&config)?;

        let chunks = store.list(&config.bucket, &config.prefix).await?;
        info!(
            chunks = chunks.len();
            "listed data chunks under {}/{}", config.bucket, config.prefix
        );

        Self::with_chunks(config, shell, chunks).await
    }

    /// Creates a new `ExecutionEnvironment` over a fixed list of chunk keys.
    pub async fn with_chunks(config: ExperimentConfig, shell: S, chunks: Vec<String>) -> Result<Self> {
        Adapter::new().validate_experiment(&config)?;

        let manifest = Manifest::read(&config.manifest).await?;
        if manifest.workers().is_empty() {
            return Err(OrchestratorError::InvalidManifest(
                "the manifest lists no worker machines".into(),
            ));
        }

        let partition = partition(chunks.len(), manifest.workers().len(), config.partition)?;

        Ok(Self {
            config,
            shell,
            manifest,
            chunks,
            partition,
            saved: None,
            executions: Vec::new(),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn chunks(&self) -> &[String] {
        &self.chunks
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn shell(&self) -> &S {
        &self.shell
    }

    pub fn executions(&self) -> &[Execution] {
        &self.executions
    }

    /// The number of the most recently saved graph.
    pub fn saved(&self) -> Option<usize> {
        self.saved
    }

    /// The run scripts of the cluster, without writing or copying them.
    pub fn run_scripts(&self) -> Result<Vec<RunScript>> {
        scripts::generate(&self.config, &self.manifest, &self.chunks, &self.partition)
    }

    /// Writes every run script locally and copies each one to its machine as `run.sh`,
    /// followed by the support files.
    ///
    /// # Returns
    /// Which machines received their script.
    pub async fn create_run_scripts(&self) -> Result<HostReport> {
        let scripts = self.run_scripts()?;
        let paths = scripts::write_all(&scripts, &self.config.runscripts_dir).await?;

        let mut report = HostReport::new();
        for (script, path) in scripts.iter().zip(paths) {
            let output = self
                .shell
                .copy_to(&script.host, &[path], REMOTE_SCRIPT, false)
                .await?;

            let mut ok = output.success();
            if !ok {
                warn!(
                    host = script.host.as_str();
                    "failed to copy {} run script: {}", script.job(), output.stderr.trim()
                );
            }

            if ok && !self.config.support_files.is_empty() {
                let output = self
                    .shell
                    .copy_to(&script.host, &self.config.support_files, ".", false)
                    .await?;

                ok = output.success();
                if !ok {
                    warn!(host = script.host.as_str(); "failed to copy support files: {}", output.stderr.trim());
                }
            }
            report.record(&script.host, ok);
        }

        Ok(report)
    }

    /// Snapshots the graph directory into `<graphs>/graph<n>`.
    ///
    /// # Returns
    /// The snapshot number `n`, one more than the previous one.
    pub async fn save_graph(&mut self) -> Result<usize> {
        let source = &self.config.graph_dir;
        if !tokio::fs::try_exists(source).await? {
            return Err(OrchestratorError::InvalidConfig(format!(
                "graph directory '{}' does not exist",
                source.display()
            )));
        }

        let number = self.saved.map_or(0, |n| n + 1);
        let dest = self.graph_snapshot(number);
        copy_dir(source, &dest).await?;

        info!("saved graph {number} to {}", dest.display());
        self.saved = Some(number);
        Ok(number)
    }

    /// The local directory of graph snapshot `number`.
    pub fn graph_snapshot(&self, number: usize) -> PathBuf {
        self.config.graphs_dir.join(format!("graph{number}"))
    }

    /// Copies a graph snapshot to every worker.
    ///
    /// # Arguments
    /// * `number` - The snapshot to transfer, the most recent one if `None`.
    ///
    /// # Returns
    /// Which workers received the graph; a failed worker doesn't stop the others.
    pub async fn transfer_graph(&self, number: Option<usize>) -> Result<HostReport> {
        let number = number.or(self.saved).ok_or_else(|| {
            OrchestratorError::InvalidConfig("no graph has been saved yet".into())
        })?;

        let files = list_dir(&self.graph_snapshot(number)).await?;
        if files.is_empty() {
            return Err(OrchestratorError::InvalidConfig(format!(
                "graph {number} holds no files"
            )));
        }

        let graph_dest = format!("{REMOTE_GRAPH_DIR}/");
        let mut report = HostReport::new();

        for (i, host) in self.manifest.workers().iter().enumerate() {
            let mut ok = self
                .shell
                .exec(host, &format!("mkdir -p {REMOTE_GRAPH_DIR}"))
                .await?
                .success();

            ok &= self
                .shell
                .copy_to(host, &files, &graph_dest, true)
                .await?
                .success();

            if ok {
                info!(worker = i; "transferred graph {number} to {host}");
            } else {
                warn!(worker = i; "failed to transfer graph {number} to {host}");
            }
            report.record(host, ok);
        }

        Ok(report)
    }

    /// Starts `run.sh` on the parameter server, then on every worker.
    pub async fn start_training(&self) -> Result<HostReport> {
        let hosts = std::iter::once(self.manifest.parameter_server())
            .chain(self.manifest.workers().iter().map(String::as_str));

        let mut report = HostReport::new();
        for host in hosts {
            let output = self.shell.exec(host, START_COMMAND).await?;
            if output.success() {
                info!(host = host; "training started");
            } else {
                warn!(host = host; "failed to start training: {}", output.stderr.trim());
            }
            report.record(host, output.success());
        }

        Ok(report)
    }

    /// Creates the run scripts, snapshots and transfers the graph and starts training.
    pub async fn fit(&mut self) -> Result<&Execution> {
        info!("creating run scripts");
        self.create_run_scripts().await?;

        let number = self.save_graph().await?;
        self.transfer_graph(Some(number)).await?;
        let started = self.start_training().await?;

        self.executions.push(Execution {
            number,
            workers: self.manifest.workers().to_vec(),
            started,
        });

        let execution = &self.executions[self.executions.len() - 1];
        Ok(execution)
    }
}

/// The files of `dir`, sorted by name.
async fn list_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await.map_err(|e| {
        OrchestratorError::InvalidConfig(format!("cannot read '{}': {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// Recursively copies the contents of `from` into `to`.
async fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let mut pending = vec![(from.to_path_buf(), to.to_path_buf())];

    while let Some((src, dst)) = pending.pop() {
        tokio::fs::create_dir_all(&dst).await?;

        let mut entries = tokio::fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn copy_dir_keeps_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("model");
        std::fs::create_dir_all(from.join("variables")).unwrap();
        std::fs::write(from.join("graph.json"), "{}").unwrap();
        std::fs::write(from.join("variables/weights"), "w").unwrap();

        let to = dir.path().join("graphs/graph0");
        copy_dir(&from, &to).await.unwrap();

        assert_eq!(std::fs::read_to_string(to.join("graph.json")).unwrap(), "{}");
        assert_eq!(std::fs::read_to_string(to.join("variables/weights")).unwrap(), "w");
    }

    #[tokio::test]
    async fn list_dir_is_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b", "a", "c"] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }

        let names: Vec<_> = list_dir(dir.path())
            .await
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }
}
