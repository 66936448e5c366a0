use std::{
    borrow::Cow,
    path::PathBuf,
    process::Stdio,
    time::{Duration, Instant},
};

use log::{debug, warn};
use tokio::process::Command;

use crate::error::{CommsErr, Result};

/// The captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// The exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub duration: Duration,
}

impl CommandOutput {
    /// Builds an output for a process that never ran, used by test doubles.
    pub fn synthetic(code: i32) -> Self {
        Self {
            code: Some(code),
            stdout: Vec::new(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Whether the process exited with code zero.
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// The standard output decoded as utf-8, replacing invalid sequences.
    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }
}

/// Runs local programs, one at a time, without a shell in between.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    working_dir: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl CommandRunner {
    /// Creates a new `CommandRunner` that runs in the current directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the directory commands are run from.
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Adds an environment variable to every command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Runs `program` with `args` and captures its output.
    ///
    /// A non-zero exit is not an error here, callers decide what a failure means.
    ///
    /// # Arguments
    /// * `program` - The executable to run.
    /// * `args` - Its arguments, passed verbatim.
    ///
    /// # Errors
    /// `CommsErr::Spawn` if the process could not be started.
    pub async fn run<I, S>(&self, program: &str, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        debug!(program = program; "running {}", describe(program, &args));

        let start = Instant::now();
        let output = self
            .command(program, &args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|source| CommsErr::Spawn {
                program: program.to_string(),
                source,
            })?;

        let output = CommandOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        };

        if !output.success() {
            warn!(
                program = program;
                "command exited with {:?} after {:?}", output.code, output.duration
            );
        }

        Ok(output)
    }

    /// Like `run` but turns a non-zero exit into `CommsErr::CommandFailed`.
    pub async fn run_checked<I, S>(&self, program: &str, args: I) -> Result<CommandOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        let output = self.run(program, &args).await?;

        if !output.success() {
            return Err(CommsErr::CommandFailed {
                command: describe(program, &args),
                code: output.code,
                stderr: output.stderr.trim().to_string(),
            });
        }

        Ok(output)
    }

    /// Runs `program` attached to the current terminal and waits for it.
    ///
    /// # Returns
    /// The exit code of the process.
    pub async fn run_interactive<I, S>(&self, program: &str, args: I) -> Result<Option<i32>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|a| a.as_ref().to_string()).collect();
        debug!(program = program; "attaching to {}", describe(program, &args));

        let status = self
            .command(program, &args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|source| CommsErr::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(status.code())
    }

    fn command(&self, program: &str, args: &[String]) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);

        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        for (key, value) in &self.envs {
            cmd.env(key, value);
        }

        cmd
    }
}

fn describe(program: &str, args: &[String]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}
