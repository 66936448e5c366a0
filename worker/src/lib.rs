pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod runtime;
pub mod trainer;

pub use checkpoint::CheckpointTracker;
pub use config::{Flags, TrainerPaths};
pub use error::{Result, WorkerErr};
pub use runtime::{LocalRuntime, TrainingRuntime};
pub use trainer::{Outcome, Trainer, TrainerState, TrainingSummary};
