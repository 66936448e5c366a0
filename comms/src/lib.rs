mod command;
mod error;
pub mod remote;
pub mod specs;
pub mod storage;

pub use command::{CommandOutput, CommandRunner};
pub use error::{CommsErr, Result};
pub use remote::{OpenSsh, RecordingShell, RemoteCall, RemoteShell};
pub use storage::{LocalStore, ObjectStore, S3Cli};
