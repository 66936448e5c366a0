use std::fmt;

use comms::CommsErr;

use crate::deploy::DeployState;

/// The orchestrator's result type.
pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before any side effect.
    InvalidConfig(String),
    /// The manifest file is malformed.
    InvalidManifest(String),
    /// The cloud provider rejected or failed a request.
    Cloud(String),
    /// An operation was attempted in the wrong deployment state.
    InvalidState {
        operation: &'static str,
        state: DeployState,
    },
    /// Failure while running a local or remote command.
    Comms(CommsErr),
    /// An underlying I/O error not covered by the above variants.
    Io(std::io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::InvalidManifest(msg) => write!(f, "invalid manifest: {msg}"),
            Self::Cloud(msg) => write!(f, "cloud error: {msg}"),
            Self::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while the deployment is {state:?}")
            }
            Self::Comms(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Comms(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<CommsErr> for OrchestratorError {
    fn from(e: CommsErr) -> Self {
        Self::Comms(e)
    }
}
