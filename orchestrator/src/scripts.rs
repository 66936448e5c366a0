use std::path::{Path, PathBuf};

use comms::specs::{JobName, TrainerArgs};

use crate::{
    configs::{Adapter, ExperimentConfig},
    error::Result,
    manifest::Manifest,
    partition::Partition,
};

/// The name every run script gets on the machine that executes it.
pub const REMOTE_SCRIPT: &str = "run.sh";

/// A shell script that launches one trainer process on one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunScript {
    /// The machine the script runs on.
    pub host: String,
    /// The local file name the script is written to.
    pub file_name: String,
    pub args: TrainerArgs,
    pub contents: String,
}

impl RunScript {
    pub fn job(&self) -> JobName {
        self.args.job_name
    }

    pub fn task_index(&self) -> usize {
        self.args.task_index
    }
}

/// Generates one parameter-server script and one script per worker, in that order.
///
/// # Arguments
/// * `config` - The experiment being run.
/// * `manifest` - The cluster it runs on.
/// * `chunks` - Every chunk key of the dataset.
/// * `partition` - Which chunks each worker reads.
pub fn generate(
    config: &ExperimentConfig,
    manifest: &Manifest,
    chunks: &[String],
    partition: &Partition,
) -> Result<Vec<RunScript>> {
    let (ps, workers) = Adapter::new().trainer_args(config, manifest, chunks, partition)?;

    let mut scripts = Vec::with_capacity(workers.len() + 1);
    scripts.push(RunScript {
        host: manifest.parameter_server().to_string(),
        file_name: REMOTE_SCRIPT.to_string(),
        contents: render(config, &ps),
        args: ps,
    });

    for (addr, args) in manifest.workers().iter().zip(workers) {
        scripts.push(RunScript {
            host: addr.clone(),
            file_name: format!("{addr}.sh"),
            contents: render(config, &args),
            args,
        });
    }

    Ok(scripts)
}

/// Writes every script into `dir`, creating it if needed.
///
/// # Returns
/// The paths written, in script order.
pub async fn write_all(scripts: &[RunScript], dir: &Path) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut paths = Vec::with_capacity(scripts.len());
    for script in scripts {
        let path = dir.join(&script.file_name);
        tokio::fs::write(&path, &script.contents).await?;
        paths.push(path);
    }

    Ok(paths)
}

fn render(config: &ExperimentConfig, args: &TrainerArgs) -> String {
    let mut lines = vec!["#!/bin/sh".to_string(), "mkdir -p models".to_string()];
    lines.extend(config.setup.iter().cloned());

    let mut trainer = config.trainer_command.clone();
    for flag in args.to_flags() {
        trainer.push(' ');
        trainer.push_str(&quote(&flag));
    }
    lines.push(trainer);

    match args.job_name {
        JobName::Ps => {
            lines.push("zip ps.zip run.out run.err".to_string());
        }
        JobName::Worker => {
            let k = args.task_index;
            lines.push(format!("zip -r m_{k}_logs.zip run.out run.err"));
            lines.push(format!("zip -r m_{k}_models.zip models/"));
            lines.push("rm -r models/".to_string());
        }
    }

    let mut contents = lines.join("\n");
    contents.push('\n');
    contents
}

/// Single-quotes `arg` for `sh` unless it only holds characters that need no quoting.
fn quote(arg: &str) -> String {
    let plain = arg
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_=.,:/+@".contains(c));

    if plain && !arg.is_empty() {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
