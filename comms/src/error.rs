use std::{error::Error, fmt, io};

/// The comms module's result type.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures raised while talking to machines, shells and object storage.
#[derive(Debug)]
pub enum CommsErr {
    Io(io::Error),
    Spawn {
        program: String,
        source: io::Error,
    },
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    Json(serde_json::Error),
    InvalidSpec(String),
    ObjectNotFound {
        bucket: String,
        key: String,
    },
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::Spawn { program, source } => {
                write!(f, "failed to spawn `{program}`: {source}")
            }
            CommsErr::CommandFailed {
                command,
                code: Some(code),
                stderr,
            } => write!(f, "`{command}` exited with code {code}: {stderr}"),
            CommsErr::CommandFailed {
                command, stderr, ..
            } => write!(f, "`{command}` was terminated by a signal: {stderr}"),
            CommsErr::Json(e) => write!(f, "invalid json: {e}"),
            CommsErr::InvalidSpec(msg) => write!(f, "invalid spec: {msg}"),
            CommsErr::ObjectNotFound { bucket, key } => {
                write!(f, "object {key} not found in bucket {bucket}")
            }
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Io(e) => Some(e),
            CommsErr::Spawn { source, .. } => Some(source),
            CommsErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CommsErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
