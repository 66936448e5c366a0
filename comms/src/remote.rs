use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::info;
use parking_lot::Mutex;

use crate::{
    command::{CommandOutput, CommandRunner},
    error::{CommsErr, Result},
};

/// Remote shell and remote copy against a machine of the cluster.
///
/// Calls are blocking from the caller's point of view: there is no timeout and no
/// retry, a transient network failure shows up as a non-zero exit code.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Runs `command` on `host` and returns its captured output.
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput>;

    /// Copies local `sources` to `dest` on `host`.
    ///
    /// # Arguments
    /// * `host` - The machine to copy to.
    /// * `sources` - Local files or directories.
    /// * `dest` - Destination path relative to the remote home directory.
    /// * `recursive` - Whether directories are copied with their contents.
    async fn copy_to(
        &self,
        host: &str,
        sources: &[PathBuf],
        dest: &str,
        recursive: bool,
    ) -> Result<CommandOutput>;

    /// Opens an interactive session on `host`.
    async fn login(&self, host: &str) -> Result<()>;
}

/// `RemoteShell` backed by the OpenSSH `ssh` and `scp` clients.
#[derive(Debug, Clone)]
pub struct OpenSsh {
    user: String,
    key: PathBuf,
    runner: CommandRunner,
}

impl OpenSsh {
    /// Creates a new `OpenSsh`.
    ///
    /// # Arguments
    /// * `user` - The login user on every machine.
    /// * `key` - The private key file passed with `-i`.
    pub fn new(user: impl Into<String>, key: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key: key.into(),
            runner: CommandRunner::new(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    fn common_args(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key.display().to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
        ]
    }

    fn target(&self, host: &str) -> String {
        format!("{}@{host}", self.user)
    }
}

#[async_trait]
impl RemoteShell for OpenSsh {
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let mut args = self.common_args();
        args.push(self.target(host));
        args.push(command.to_string());
        self.runner.run("ssh", &args).await
    }

    async fn copy_to(
        &self,
        host: &str,
        sources: &[PathBuf],
        dest: &str,
        recursive: bool,
    ) -> Result<CommandOutput> {
        if sources.is_empty() {
            return Err(CommsErr::InvalidSpec(format!(
                "nothing to copy to {host}:{dest}"
            )));
        }

        let mut args = self.common_args();
        if recursive {
            args.push("-r".to_string());
        }
        args.extend(sources.iter().map(|src| src.display().to_string()));
        args.push(format!("{}:{dest}", self.target(host)));

        self.runner.run("scp", &args).await
    }

    async fn login(&self, host: &str) -> Result<()> {
        let mut args = self.common_args();
        args.push(self.target(host));

        info!(host = host; "opening ssh session");
        match self.runner.run_interactive("ssh", &args).await? {
            Some(0) => Ok(()),
            code => Err(CommsErr::CommandFailed {
                command: format!("ssh {}", self.target(host)),
                code,
                stderr: String::new(),
            }),
        }
    }
}

/// A single call observed by a `RecordingShell`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Exec {
        host: String,
        command: String,
    },
    Copy {
        host: String,
        sources: Vec<PathBuf>,
        dest: String,
        recursive: bool,
    },
    Login {
        host: String,
    },
}

impl RemoteCall {
    pub fn host(&self) -> &str {
        match self {
            RemoteCall::Exec { host, .. }
            | RemoteCall::Copy { host, .. }
            | RemoteCall::Login { host } => host,
        }
    }
}

/// `RemoteShell` that touches no machine and records every call in order.
///
/// Hosts marked as unreachable answer every call with exit code 255, like `ssh` does
/// when it cannot connect.
#[derive(Debug, Default)]
pub struct RecordingShell {
    calls: Mutex<Vec<RemoteCall>>,
    unreachable: Mutex<HashSet<String>>,
}

impl RecordingShell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later call against `host` fail.
    pub fn fail_host(&self, host: impl Into<String>) {
        self.unreachable.lock().insert(host.into());
    }

    /// A snapshot of the calls recorded so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().clone()
    }

    /// The calls recorded against `host`.
    pub fn calls_to(&self, host: &str) -> Vec<RemoteCall> {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.host() == host)
            .cloned()
            .collect()
    }

    fn record(&self, call: RemoteCall) -> CommandOutput {
        let code = if self.unreachable.lock().contains(call.host()) {
            255
        } else {
            0
        };
        self.calls.lock().push(call);
        CommandOutput::synthetic(code)
    }
}

#[async_trait]
impl RemoteShell for RecordingShell {
    async fn exec(&self, host: &str, command: &str) -> Result<CommandOutput> {
        Ok(self.record(RemoteCall::Exec {
            host: host.to_string(),
            command: command.to_string(),
        }))
    }

    async fn copy_to(
        &self,
        host: &str,
        sources: &[PathBuf],
        dest: &str,
        recursive: bool,
    ) -> Result<CommandOutput> {
        Ok(self.record(RemoteCall::Copy {
            host: host.to_string(),
            sources: sources.to_vec(),
            dest: dest.to_string(),
            recursive,
        }))
    }

    async fn login(&self, host: &str) -> Result<()> {
        let output = self.record(RemoteCall::Login {
            host: host.to_string(),
        });

        if output.success() {
            Ok(())
        } else {
            Err(CommsErr::CommandFailed {
                command: format!("ssh {host}"),
                code: output.code,
                stderr: String::new(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recording_shell_keeps_call_order() {
        let shell = RecordingShell::new();
        shell.exec("a", "mkdir -p Graph").await.unwrap();
        shell
            .copy_to("b", &[PathBuf::from("run.sh")], "run.sh", false)
            .await
            .unwrap();

        let calls = shell.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0],
            RemoteCall::Exec {
                host: "a".into(),
                command: "mkdir -p Graph".into()
            }
        );
        assert_eq!(calls[1].host(), "b");
        assert_eq!(shell.calls_to("a").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_hosts_fail() {
        let shell = RecordingShell::new();
        shell.fail_host("down");

        let out = shell.exec("down", "true").await.unwrap();
        assert_eq!(out.code, Some(255));
        assert!(shell.exec("up", "true").await.unwrap().success());
        assert!(shell.login("down").await.is_err());
    }

    #[tokio::test]
    async fn open_ssh_refuses_empty_copies() {
        let ssh = OpenSsh::new("ec2-user", "aux/easyDist.pem");
        let err = ssh.copy_to("host", &[], ".", false).await.unwrap_err();
        assert!(matches!(err, CommsErr::InvalidSpec(_)));
    }
}
