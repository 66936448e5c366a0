use std::{error::Error, fmt, io};

use comms::CommsErr;

use crate::trainer::TrainerState;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Trainer failures. All of them are fatal to the trainer process.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    Comms(CommsErr),
    InvalidFlags(String),
    /// The preprocessing hook failed or returned arrays of the wrong length.
    Preprocess(String),
    GraphImport(String),
    Runtime(String),
    InvalidState {
        operation: &'static str,
        state: TrainerState,
    },
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Comms(e) => write!(f, "{e}"),
            WorkerErr::InvalidFlags(msg) => write!(f, "invalid flags: {msg}"),
            WorkerErr::Preprocess(msg) => write!(f, "preprocessing failed: {msg}"),
            WorkerErr::GraphImport(msg) => write!(f, "cannot import graph: {msg}"),
            WorkerErr::Runtime(msg) => write!(f, "runtime error: {msg}"),
            WorkerErr::InvalidState { operation, state } => {
                write!(f, "cannot {operation} while the trainer is {state:?}")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            WorkerErr::Comms(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<CommsErr> for WorkerErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}
