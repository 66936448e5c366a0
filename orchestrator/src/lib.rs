pub mod cloud;
pub mod configs;
pub mod deploy;
pub mod error;
pub mod manifest;
pub mod partition;
pub mod report;
pub mod scripts;
pub mod session;

pub use cloud::{AwsCli, Cloud, MockCloud};
pub use configs::{DeployConfig, ExperimentConfig};
pub use deploy::{DeployState, Deployment};
pub use error::{OrchestratorError, Result};
pub use manifest::Manifest;
pub use partition::{Partition, PartitionStrategy, partition};
pub use report::HostReport;
pub use session::{Execution, ExecutionEnvironment};
