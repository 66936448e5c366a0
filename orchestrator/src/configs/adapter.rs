use comms::specs::{HostPort, JobName, OPTIMIZERS, PLACEHOLDER, TrainerArgs};

use super::{DeployConfig, ExperimentConfig};
use crate::{
    error::{OrchestratorError, Result},
    manifest::Manifest,
    partition::Partition,
};

/// Validates configs and turns them into the arguments every trainer is launched with.
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    // -------------------------------------------------------------------------
    // Validation
    // -------------------------------------------------------------------------

    pub fn validate_deploy(&self, config: &DeployConfig) -> Result<()> {
        if config.experiment_name.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "experiment_name must not be empty".into(),
            ));
        }
        if config.experiment_name.contains(['/', '\\']) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "experiment_name `{}` must not contain path separators",
                config.experiment_name
            )));
        }
        if config.worker_num == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "at least one worker is required".into(),
            ));
        }
        if config.worker_type.is_empty() || config.ps_type.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "instance types must not be empty".into(),
            ));
        }
        if config.key_name.is_empty() || config.security_group.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "key_name and security_group must not be empty".into(),
            ));
        }

        Ok(())
    }

    pub fn validate_experiment(&self, config: &ExperimentConfig) -> Result<()> {
        if config.bucket.is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "bucket must not be empty".into(),
            ));
        }
        if config.epochs == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "epochs must be greater than 0".into(),
            ));
        }
        if config.batch_size == 0 {
            return Err(OrchestratorError::InvalidConfig(
                "batch_size must be greater than 0".into(),
            ));
        }
        let optimizer = config.optimizer.to_ascii_lowercase();
        if !OPTIMIZERS.contains(&optimizer.as_str()) {
            return Err(OrchestratorError::InvalidConfig(format!(
                "unknown optimizer `{}`, expected one of {}",
                config.optimizer,
                OPTIMIZERS.join(", ")
            )));
        }
        if config.trainer_command.trim().is_empty() {
            return Err(OrchestratorError::InvalidConfig(
                "trainer_command must not be empty".into(),
            ));
        }

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Adaptation
    // -------------------------------------------------------------------------

    /// Builds the trainer arguments of the parameter server and of every worker.
    ///
    /// # Arguments
    /// * `config` - The experiment being run.
    /// * `manifest` - The cluster it runs on.
    /// * `chunks` - Every chunk key of the dataset.
    /// * `partition` - Which chunks each worker reads.
    ///
    /// # Returns
    /// The parameter server's arguments and one set of arguments per worker, in
    /// manifest order.
    pub fn trainer_args(
        &self,
        config: &ExperimentConfig,
        manifest: &Manifest,
        chunks: &[String],
        partition: &Partition,
    ) -> Result<(TrainerArgs, Vec<TrainerArgs>)> {
        self.validate_experiment(config)?;

        if manifest.workers().is_empty() {
            return Err(OrchestratorError::InvalidManifest(
                "the manifest lists no worker machines".into(),
            ));
        }

        let ps_hosts = vec![HostPort::new(manifest.parameter_server(), config.port)];
        let worker_hosts: Vec<_> = manifest
            .workers()
            .iter()
            .map(|addr| HostPort::new(addr.as_str(), config.port))
            .collect();

        let base = TrainerArgs {
            bucket: PLACEHOLDER.to_string(),
            keys: vec![PLACEHOLDER.to_string()],
            job_name: JobName::Ps,
            task_index: 0,
            ps_hosts,
            worker_hosts,
            epochs: config.epochs,
            batch_size: config.batch_size,
            optimizer: config.optimizer.clone(),
        };

        let workers = (0..manifest.workers().len())
            .map(|k| TrainerArgs {
                bucket: config.bucket.clone(),
                keys: partition.chunks_for(chunks, k).to_vec(),
                job_name: JobName::Worker,
                task_index: k,
                ..base.clone()
            })
            .collect();

        Ok((base, workers))
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{PartitionStrategy, partition};

    fn manifest() -> Manifest {
        Manifest::parse("i-ps i-w0 i-w1\nps w0 w1\n").unwrap()
    }

    #[test]
    fn rejects_bad_experiments() {
        let adapter = Adapter::new();
        let mut config = ExperimentConfig::new("b", "p/", 1, 32, "adam", "model");
        assert!(adapter.validate_experiment(&config).is_ok());

        config.epochs = 0;
        assert!(adapter.validate_experiment(&config).is_err());

        config.epochs = 1;
        config.batch_size = 0;
        assert!(adapter.validate_experiment(&config).is_err());

        config.batch_size = 1;
        config.optimizer = "rmsprop".into();
        assert!(adapter.validate_experiment(&config).is_err());

        config.optimizer = "SGD".into();
        assert!(adapter.validate_experiment(&config).is_ok());

        config.bucket.clear();
        assert!(adapter.validate_experiment(&config).is_err());
    }

    #[test]
    fn rejects_bad_deployments() {
        let adapter = Adapter::new();
        let mut config = DeployConfig::new("rnn", "role", "p2.xlarge", 2);
        assert!(adapter.validate_deploy(&config).is_ok());

        config.worker_num = 0;
        assert!(adapter.validate_deploy(&config).is_err());

        config.worker_num = 1;
        config.experiment_name = "../escape".into();
        assert!(adapter.validate_deploy(&config).is_err());
    }

    #[test]
    fn trainer_args_per_role() {
        let adapter = Adapter::new();
        let config = ExperimentConfig::new("bucket", "p/", 2, 16, "adam", "model");
        let chunks: Vec<String> = ["c0", "c1", "c2"].iter().map(|s| s.to_string()).collect();
        let partition = partition(chunks.len(), 2, PartitionStrategy::Balanced).unwrap();

        let (ps, workers) = adapter
            .trainer_args(&config, &manifest(), &chunks, &partition)
            .unwrap();

        assert_eq!(ps.job_name, JobName::Ps);
        assert_eq!(ps.bucket, ".");
        assert_eq!(ps.keys, vec!["."]);
        assert_eq!(ps.ps_hosts, vec![HostPort::new("ps", 2222)]);

        assert_eq!(workers.len(), 2);
        assert_eq!(workers[0].task_index, 0);
        assert_eq!(workers[0].keys, vec!["c0", "c1"]);
        assert_eq!(workers[1].task_index, 1);
        assert_eq!(workers[1].keys, vec!["c2"]);
        assert_eq!(workers[1].bucket, "bucket");
        assert_eq!(
            workers[1].worker_hosts,
            vec![HostPort::new("w0", 2222), HostPort::new("w1", 2222)]
        );
    }

    #[test]
    fn manifest_without_workers_is_rejected() {
        let adapter = Adapter::new();
        let config = ExperimentConfig::new("bucket", "p/", 2, 16, "adam", "model");
        let manifest = Manifest::parse("i-ps\nps\n").unwrap();
        let partition = partition(0, 1, PartitionStrategy::Balanced).unwrap();

        assert!(adapter.trainer_args(&config, &manifest, &[], &partition).is_err());
    }
}
