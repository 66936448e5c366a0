use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use comms::{
    ObjectStore,
    specs::{ClusterSpec, JobName, TrainerArgs},
};
use log::{info, warn};

use crate::{
    checkpoint::CheckpointTracker,
    config::TrainerPaths,
    data::{Dataset, Preprocess, Rounding},
    error::{Result, WorkerErr},
    runtime::TrainingRuntime,
};

/// Batches between two progress reports.
pub const LOG_EVERY: usize = 500;

/// Where a trainer is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Idle,
    GraphImported,
    OptimizerAttached,
    EpochLoop,
    CheckpointMaybe,
    Done,
}

/// What a worker's training run amounted to.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    pub batches_per_epoch: usize,
    pub best_loss: Option<f64>,
    pub global_step: u64,
    pub read_time: Duration,
    pub average_epoch_time: Duration,
    pub total_time: Duration,
    /// Every checkpoint written, oldest first.
    pub checkpoints: Vec<PathBuf>,
}

/// How a trainer process ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A parameter server was shut down.
    Served,
    Trained(TrainingSummary),
}

/// Runs one task of the cluster: a parameter server or a worker.
pub struct Trainer<R: TrainingRuntime> {
    args: TrainerArgs,
    paths: TrainerPaths,
    cluster: ClusterSpec,
    runtime: R,
    state: TrainerState,
}

impl<R: TrainingRuntime> Trainer<R> {
    /// Creates a new `Trainer`.
    ///
    /// # Errors
    /// `WorkerErr::InvalidFlags` if the cluster is malformed or the task index
    /// is out of range for its job.
    pub fn new(args: TrainerArgs, paths: TrainerPaths, runtime: R) -> Result<Self> {
        let invalid = |e: comms::CommsErr| WorkerErr::InvalidFlags(e.to_string());
        let cluster = args.cluster_spec().map_err(invalid)?;
        cluster
            .task_address(args.job_name, args.task_index)
            .map_err(invalid)?;

        Ok(Self {
            args,
            paths,
            cluster,
            runtime,
            state: TrainerState::Idle,
        })
    }

    pub fn state(&self) -> TrainerState {
        self.state
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn cluster(&self) -> &ClusterSpec {
        &self.cluster
    }

    fn transition(&mut self, operation: &'static str, from: &[TrainerState], to: TrainerState) -> Result<()> {
        if !from.contains(&self.state) {
            return Err(WorkerErr::InvalidState {
                operation,
                state: self.state,
            });
        }

        self.state = to;
        Ok(())
    }

    /// Runs the task to completion.
    ///
    /// # Arguments
    /// * `store` - Where this worker's chunks live.
    /// * `hook` - Turns the fetched chunks into training arrays.
    pub async fn run(&mut self, store: &dyn ObjectStore, hook: &dyn Preprocess) -> Result<Outcome> {
        match self.args.job_name {
            JobName::Ps => {
                self.transition("serve", &[TrainerState::Idle], TrainerState::Done)?;
                info!(task = self.args.task_index; "starting parameter server");
                self.runtime.join().await?;
                Ok(Outcome::Served)
            }
            JobName::Worker => self.train(store, hook).await.map(Outcome::Trained),
        }
    }

    async fn train(&mut self, store: &dyn ObjectStore, hook: &dyn Preprocess) -> Result<TrainingSummary> {
        let start = Instant::now();
        let task = self.args.task_index;
        let chief = ClusterSpec::is_chief(self.args.job_name, task);
        info!(task = task, chief = chief; "starting worker");

        let graph = self.runtime.import_graph(&self.paths.graph_dir).await?;
        self.transition("import the graph", &[TrainerState::Idle], TrainerState::GraphImported)?;
        info!("input tensors are {}", graph.placeholders.join(", "));
        info!("loss tensor is {}", graph.loss);

        self.runtime.attach_optimizer(&self.args.optimizer).await?;
        self.transition(
            "attach the optimizer",
            &[TrainerState::GraphImported],
            TrainerState::OptimizerAttached,
        )?;

        let mut data = Dataset::new();
        let read_time = data
            .read_data(store, &self.args.bucket, &self.args.keys, hook)
            .await?;
        self.runtime.restore(&self.paths.graph_dir).await?;

        let batch_size = self.args.batch_size;
        let num_batches = data.num_batches(batch_size, Rounding::Ceil);
        if num_batches == 0 {
            warn!(task = task; "no training data was assigned to this worker");
        }
        info!("{num_batches} batch(es) per epoch");

        let mut tracker = CheckpointTracker::new();
        let mut checkpoints = Vec::new();
        let mut epoch_time = Duration::ZERO;
        let mut global_step = 0;

        for epoch in 0..self.args.epochs {
            self.transition(
                "start an epoch",
                &[TrainerState::OptimizerAttached, TrainerState::CheckpointMaybe],
                TrainerState::EpochLoop,
            )?;

            let epoch_start = Instant::now();
            let mut epoch_loss = 0.;

            for i in 0..num_batches {
                let out = self.runtime.step(&data.give_next(batch_size, i)).await?;
                epoch_loss += out.loss;
                global_step = out.global_step;

                if i % LOG_EVERY == 0 {
                    info!(
                        epoch = epoch, batch = i, step = global_step;
                        "epoch loss so far {epoch_loss:.6}, {:.2?} into the epoch, {num_batches} batches in total",
                        epoch_start.elapsed()
                    );
                }
            }

            let elapsed = epoch_start.elapsed();
            epoch_time += elapsed;
            info!(epoch = epoch, step = global_step; "finished epoch in {elapsed:.2?}, loss {epoch_loss:.6}");

            self.transition("checkpoint", &[TrainerState::EpochLoop], TrainerState::CheckpointMaybe)?;
            if tracker.observe(epoch_loss) {
                let path = self.runtime.save(&self.paths.models_dir, global_step).await?;
                info!("saved checkpoint {}", path.display());
                checkpoints.push(path);
            }
        }

        self.transition(
            "finish",
            &[TrainerState::OptimizerAttached, TrainerState::CheckpointMaybe],
            TrainerState::Done,
        )?;

        let epochs = self.args.epochs;
        let summary = TrainingSummary {
            epochs,
            batches_per_epoch: num_batches,
            best_loss: tracker.best(),
            global_step,
            read_time,
            average_epoch_time: epoch_time / epochs.max(1) as u32,
            total_time: start.elapsed(),
            checkpoints,
        };

        info!("total time taken was {:.2?}", summary.total_time);
        info!("time taken to read and preprocess data was {:.2?}", summary.read_time);
        info!("average epoch training time was {:.2?}", summary.average_epoch_time);
        match summary.best_loss {
            Some(loss) => info!("best loss was {loss:.6}"),
            None => info!("no epoch was run"),
        }

        Ok(summary)
    }
}
