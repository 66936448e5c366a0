mod local;
pub mod optimizer;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use local::{GRAPH_FILE, GraphDef, LocalRuntime, OpDef, PARAMS_FILE, Params};

use crate::{data::Batch, error::Result};

/// What the trainer learns about an imported graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphInfo {
    /// Placeholder names, fed in order: inputs, outputs, weights.
    pub placeholders: Vec<String>,
    /// The tensor the optimizer minimizes.
    pub loss: String,
}

/// The result of one synchronous training step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    /// Steps taken across the cluster so far, this one included.
    pub global_step: u64,
}

/// The engine that actually holds and trains the model.
///
/// Gradient exchange between the machines of the cluster is up to the runtime.
#[async_trait]
pub trait TrainingRuntime: Send {
    /// Loads the graph found in `dir`.
    ///
    /// # Errors
    /// `WorkerErr::GraphImport` if the graph is unreadable or has no loss op.
    async fn import_graph(&mut self, dir: &Path) -> Result<GraphInfo>;

    /// Wraps the loss in the optimizer called `name`.
    async fn attach_optimizer(&mut self, name: &str) -> Result<()>;

    /// Loads the latest weights saved in `dir`.
    async fn restore(&mut self, dir: &Path) -> Result<()>;

    /// Runs one optimization step over `batch`.
    async fn step(&mut self, batch: &Batch) -> Result<StepOutput>;

    /// Saves graph and weights under `<dir>/step_<step>/`.
    ///
    /// # Returns
    /// The checkpoint directory.
    async fn save(&self, dir: &Path, step: u64) -> Result<PathBuf>;

    /// Serves the parameters as a parameter server until shut down.
    async fn join(&mut self) -> Result<()>;
}

/// The loss op of a graph: the last op whose name contains `loss`.
pub fn find_loss<'a, I>(op_names: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    op_names.into_iter().filter(|name| name.contains("loss")).last()
}

/// The directory of checkpoint `step` under `dir`.
pub fn checkpoint_dir(dir: &Path, step: u64) -> PathBuf {
    dir.join(format!("step_{step}"))
}
