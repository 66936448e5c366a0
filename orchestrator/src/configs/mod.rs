mod adapter;
mod deploy;
mod experiment;

use std::path::Path;

use serde::de::DeserializeOwned;

pub use adapter::Adapter;
pub use deploy::{DeployConfig, SshConfig};
pub use experiment::ExperimentConfig;

use crate::error::{OrchestratorError, Result};

/// Reads and parses a json config file.
///
/// # Errors
/// `OrchestratorError::InvalidConfig` with a human-readable message if the file
/// cannot be read or parsed.
async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        OrchestratorError::InvalidConfig(format!("cannot read '{}': {e}", path.display()))
    })?;

    serde_json::from_str(&content).map_err(|e| {
        OrchestratorError::InvalidConfig(format!("invalid json in '{}': {e}", path.display()))
    })
}
