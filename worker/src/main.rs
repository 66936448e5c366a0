use clap::Parser;
use comms::{LocalStore, ObjectStore, S3Cli};
use log::info;

use worker::{
    Flags, LocalRuntime, Outcome, Trainer,
    data::SequenceLabelCsv,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let flags = Flags::parse();
    let args = flags.trainer_args()?;
    info!(task = args.task_index; "{} trainer starting", args.job_name);

    let store: Box<dyn ObjectStore> = match &flags.store_root {
        Some(root) => Box::new(LocalStore::new(root.clone())),
        None => Box::new(S3Cli::new()),
    };

    let mut trainer = Trainer::new(args, flags.paths(), LocalRuntime::new())?;
    match trainer.run(store.as_ref(), &SequenceLabelCsv).await? {
        Outcome::Served => info!("parameter server stopped"),
        Outcome::Trained(summary) => {
            info!(step = summary.global_step; "training finished, {} checkpoint(s) saved", summary.checkpoints.len())
        }
    }

    Ok(())
}
