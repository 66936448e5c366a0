use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use log::info;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};

use super::{
    GraphInfo, StepOutput, TrainingRuntime, checkpoint_dir, find_loss,
    optimizer::{self, Optimizer},
};
use crate::{
    data::Batch,
    error::{Result, WorkerErr},
};

pub const GRAPH_FILE: &str = "graph.json";
pub const PARAMS_FILE: &str = "params.json";

const PLACEHOLDER: &str = "Placeholder";
const EPSILON: f32 = 1e-7;

/// A single op of a serialized graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// The serialized graph `LocalRuntime` trains: a logistic regression over
/// `input_dim` features.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphDef {
    pub ops: Vec<OpDef>,
    pub input_dim: usize,
}

impl GraphDef {
    /// The graph easydist ships for `input_dim` features.
    pub fn logistic_regression(input_dim: usize) -> Self {
        let op = |name: &str, kind: &str| OpDef {
            name: name.into(),
            kind: kind.into(),
        };

        Self {
            ops: vec![
                op("input_1", PLACEHOLDER),
                op("dense_target", PLACEHOLDER),
                op("dense_sample_weights", PLACEHOLDER),
                op("dense/MatMul", "MatMul"),
                op("dense/Sigmoid", "Sigmoid"),
                op("loss/dense_loss/binary_crossentropy", "Mean"),
            ],
            input_dim,
        }
    }
}

/// Saved weights of a `GraphDef`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Params {
    pub weights: Vec<f32>,
    pub bias: f32,
    #[serde(default)]
    pub global_step: u64,
}

/// `TrainingRuntime` that trains in process, with no parameter exchange.
///
/// Every worker trains its own copy of the model on its own data.
#[derive(Default)]
pub struct LocalRuntime {
    graph: Option<GraphDef>,
    /// The weights followed by the bias.
    params: Vec<f32>,
    optimizer: Option<Box<dyn Optimizer>>,
    global_step: u64,
}

impl LocalRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    /// The current weights, `None` before a graph is imported.
    pub fn params(&self) -> Option<Params> {
        let (bias, weights) = self.params.split_last()?;
        Some(Params {
            weights: weights.to_vec(),
            bias: *bias,
            global_step: self.global_step,
        })
    }

    fn graph(&self) -> Result<&GraphDef> {
        self.graph
            .as_ref()
            .ok_or_else(|| WorkerErr::Runtime("no graph has been imported".into()))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<T> {
    let contents = tokio::fs::read(path).await?;
    serde_json::from_slice(&contents).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let contents =
        serde_json::to_vec_pretty(value).map_err(|e| WorkerErr::Runtime(e.to_string()))?;
    tokio::fs::write(path, contents).await?;
    Ok(())
}

fn sigmoid(z: f32) -> f32 {
    1. / (1. + (-z).exp())
}

#[async_trait]
impl TrainingRuntime for LocalRuntime {
    async fn import_graph(&mut self, dir: &Path) -> Result<GraphInfo> {
        let path = dir.join(GRAPH_FILE);
        let graph: GraphDef = read_json(&path)
            .await
            .map_err(|e| WorkerErr::GraphImport(format!("{}: {e}", path.display())))?;

        let placeholders: Vec<_> = graph
            .ops
            .iter()
            .filter(|op| op.kind == PLACEHOLDER)
            .map(|op| op.name.clone())
            .collect();

        if placeholders.len() < 2 {
            return Err(WorkerErr::GraphImport(format!(
                "expected input and output placeholders, found {placeholders:?}"
            )));
        }
        if graph.input_dim == 0 {
            return Err(WorkerErr::GraphImport("input_dim must be at least 1".into()));
        }

        let loss = find_loss(graph.ops.iter().map(|op| op.name.as_str()))
            .ok_or_else(|| WorkerErr::GraphImport("no op name contains `loss`".into()))?
            .to_string();

        self.params = vec![0.; graph.input_dim + 1];
        self.graph = Some(graph);
        self.optimizer = None;

        Ok(GraphInfo { placeholders, loss })
    }

    async fn attach_optimizer(&mut self, name: &str) -> Result<()> {
        self.graph()?;
        self.optimizer = Some(optimizer::from_name(name, self.params.len())?);
        Ok(())
    }

    async fn restore(&mut self, dir: &Path) -> Result<()> {
        let input_dim = self.graph()?.input_dim;
        let path = dir.join(PARAMS_FILE);

        let params: Params = match read_json(&path).await {
            Ok(params) => params,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("no saved weights in {}, starting from zeros", dir.display());
                return Ok(());
            }
            Err(e) => {
                return Err(WorkerErr::GraphImport(format!("{}: {e}", path.display())));
            }
        };

        if params.weights.len() != input_dim {
            return Err(WorkerErr::GraphImport(format!(
                "{} weights saved for a graph with {input_dim} inputs",
                params.weights.len()
            )));
        }

        self.params = params.weights;
        self.params.push(params.bias);
        self.global_step = params.global_step;
        Ok(())
    }

    async fn step(&mut self, batch: &Batch) -> Result<StepOutput> {
        let input_dim = self.graph()?.input_dim;
        let optimizer = self
            .optimizer
            .as_mut()
            .ok_or_else(|| WorkerErr::Runtime("no optimizer has been attached".into()))?;

        let ([x], [y]) = (batch.inputs.as_slice(), batch.outputs.as_slice()) else {
            return Err(WorkerErr::Runtime(format!(
                "expected one input and one output array, got {} and {}",
                batch.inputs.len(),
                batch.outputs.len()
            )));
        };
        if x.ncols() != input_dim || y.ncols() != 1 {
            return Err(WorkerErr::Runtime(format!(
                "batch of shape {:?} -> {:?} for a graph with {input_dim} inputs",
                x.dim(),
                y.dim()
            )));
        }

        let total_weight = batch.weights.sum();
        if batch.is_empty() || total_weight <= 0. {
            return Ok(StepOutput {
                loss: 0.,
                global_step: self.global_step,
            });
        }

        let (weights, bias) = self.params.split_at(input_dim);
        let pred: Array1<f32> = (x.dot(&ArrayView1::from(weights)) + bias[0]).mapv(sigmoid);
        let target = y.column(0);

        let loss = pred
            .iter()
            .zip(target)
            .zip(&batch.weights)
            .map(|((&p, &t), &w)| {
                let p = p.clamp(EPSILON, 1. - EPSILON);
                -(w * (t * p.ln() + (1. - t) * (1. - p).ln())) as f64
            })
            .sum::<f64>()
            / total_weight as f64;

        let dz = (&pred - &target) * &batch.weights / total_weight;
        let mut grad = x.t().dot(&dz).to_vec();
        grad.push(dz.sum());

        optimizer.update_params(&mut self.params, &grad)?;
        self.global_step += 1;

        Ok(StepOutput {
            loss,
            global_step: self.global_step,
        })
    }

    async fn save(&self, dir: &Path, step: u64) -> Result<PathBuf> {
        let graph = self.graph()?;
        let params = self
            .params()
            .ok_or_else(|| WorkerErr::Runtime("no weights to save".into()))?;

        let path = checkpoint_dir(dir, step);
        tokio::fs::create_dir_all(&path).await?;
        write_json(&path.join(GRAPH_FILE), graph).await?;
        write_json(&path.join(PARAMS_FILE), &params).await?;

        Ok(path)
    }

    async fn join(&mut self) -> Result<()> {
        info!("serving parameters until interrupted");
        tokio::signal::ctrl_c().await?;
        info!("parameter server shutting down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ndarray::Array2;

    use super::*;

    async fn write_graph(dir: &Path, graph: &GraphDef) {
        write_json(&dir.join(GRAPH_FILE), graph).await.unwrap();
    }

    fn batch(rows: &[([f32; 2], f32)]) -> Batch {
        let x = Array2::from_shape_fn((rows.len(), 2), |(r, c)| rows[r].0[c]);
        let y = Array2::from_shape_fn((rows.len(), 1), |(r, _)| rows[r].1);
        Batch {
            inputs: vec![x],
            outputs: vec![y],
            weights: Array1::ones(rows.len()),
        }
    }

    #[tokio::test]
    async fn import_finds_placeholders_and_loss() {
        let dir = tempfile::tempdir().unwrap();
        write_graph(dir.path(), &GraphDef::logistic_regression(2)).await;

        let mut runtime = LocalRuntime::new();
        let info = runtime.import_graph(dir.path()).await.unwrap();

        assert_eq!(
            info.placeholders,
            ["input_1", "dense_target", "dense_sample_weights"]
        );
        assert_eq!(info.loss, "loss/dense_loss/binary_crossentropy");
        assert_eq!(runtime.params().unwrap().weights, [0., 0.]);
    }

    #[tokio::test]
    async fn graph_without_loss_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut graph = GraphDef::logistic_regression(2);
        graph.ops.retain(|op| !op.name.contains("loss"));
        write_graph(dir.path(), &graph).await;

        let err = LocalRuntime::new().import_graph(dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkerErr::GraphImport(_)));
    }

    #[tokio::test]
    async fn missing_graph_is_an_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = LocalRuntime::new().import_graph(dir.path()).await.unwrap_err();
        assert!(matches!(err, WorkerErr::GraphImport(_)));
    }

    #[tokio::test]
    async fn steps_reduce_the_loss() {
        let dir = tempfile::tempdir().unwrap();
        write_graph(dir.path(), &GraphDef::logistic_regression(2)).await;

        let mut runtime = LocalRuntime::new();
        runtime.import_graph(dir.path()).await.unwrap();
        runtime.attach_optimizer("sgd").await.unwrap();

        let batch = batch(&[([1., 0.], 1.), ([0., 1.], 0.), ([2., 0.], 1.), ([0., 2.], 0.)]);
        let first = runtime.step(&batch).await.unwrap();
        assert!((first.loss - std::f64::consts::LN_2).abs() < 1e-4);
        assert_eq!(first.global_step, 1);

        let mut last = first;
        for _ in 0..200 {
            last = runtime.step(&batch).await.unwrap();
        }
        assert!(last.loss < first.loss);
        assert_eq!(last.global_step, 201);
    }

    #[tokio::test]
    async fn step_needs_an_optimizer() {
        let dir = tempfile::tempdir().unwrap();
        write_graph(dir.path(), &GraphDef::logistic_regression(2)).await;

        let mut runtime = LocalRuntime::new();
        runtime.import_graph(dir.path()).await.unwrap();
        assert!(runtime.step(&batch(&[([1., 0.], 1.)])).await.is_err());
    }

    #[tokio::test]
    async fn save_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        write_graph(dir.path(), &GraphDef::logistic_regression(2)).await;

        let mut runtime = LocalRuntime::new();
        runtime.import_graph(dir.path()).await.unwrap();
        runtime.attach_optimizer("adam").await.unwrap();
        runtime.step(&batch(&[([1., 0.], 1.)])).await.unwrap();

        let saved = runtime.save(&dir.path().join("models"), 1).await.unwrap();
        assert_eq!(saved, dir.path().join("models/step_1"));
        assert!(saved.join(GRAPH_FILE).exists());

        let mut restored = LocalRuntime::new();
        restored.import_graph(&saved).await.unwrap();
        restored.restore(&saved).await.unwrap();
        assert_eq!(restored.params(), runtime.params());
        assert_eq!(restored.global_step(), 1);
    }

    #[tokio::test]
    async fn restore_without_weights_keeps_zeros() {
        let dir = tempfile::tempdir().unwrap();
        write_graph(dir.path(), &GraphDef::logistic_regression(3)).await;

        let mut runtime = LocalRuntime::new();
        runtime.import_graph(dir.path()).await.unwrap();
        runtime.restore(dir.path()).await.unwrap();
        assert_eq!(runtime.params().unwrap().weights, [0., 0., 0.]);
    }
}
