use comms::specs::OPTIMIZERS;

use crate::error::{Result, WorkerErr};

/// Learning rate of `Adam` when selected by name.
pub const ADAM_LEARNING_RATE: f32 = 1e-4;
/// Learning rate of `GradientDescent` when selected by name.
pub const SGD_LEARNING_RATE: f32 = 1e-2;

/// Updates a flat parameter vector from its gradient.
pub trait Optimizer: Send + Sync {
    /// # Errors
    /// `WorkerErr::Runtime` if `params` and `grad` differ in length.
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()>;
}

/// Builds the optimizer called `name` for `len` parameters.
///
/// # Errors
/// `WorkerErr::InvalidFlags` if there is no optimizer by that name.
pub fn from_name(name: &str, len: usize) -> Result<Box<dyn Optimizer>> {
    match name.to_ascii_lowercase().as_str() {
        "adam" => Ok(Box::new(Adam::new(len, ADAM_LEARNING_RATE, 0.9, 0.999, 1e-8))),
        "sgd" | "gradient_descent" => Ok(Box::new(GradientDescent::new(SGD_LEARNING_RATE))),
        other => Err(WorkerErr::InvalidFlags(format!(
            "unknown optimizer `{other}`, expected one of {}",
            OPTIMIZERS.join(", ")
        ))),
    }
}

fn check_len(params: &[f32], grad: &[f32]) -> Result<()> {
    if params.len() != grad.len() {
        return Err(WorkerErr::Runtime(format!(
            "gradient of length {} for {} parameters",
            grad.len(),
            params.len()
        )));
    }
    Ok(())
}

/// Gradient descent optimization algorithm.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    /// Returns a new `GradientDescent`.
    ///
    /// # Arguments
    /// * `learning_rate` - The *length* of the steps taken on `update_params`.
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_len(params, grad)?;
        let lr = self.learning_rate;

        for (w, g) in params.iter_mut().zip(grad) {
            *w -= lr * g;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates a new `Adam` optimizer.
    ///
    /// # Arguments
    /// * `len` - The amount of parameters this instance should hold.
    /// * `learning_rate` - The small coefficient that modulates the amount of training per update.
    /// * `beta1`, `beta2`, `epsilon` - Hyperparameters to the optimization algorithm.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, params: &mut [f32], grad: &[f32]) -> Result<()> {
        check_len(params, grad)?;
        if params.len() != self.v.len() {
            return Err(WorkerErr::Runtime(format!(
                "adam holds state for {} parameters, got {}",
                self.v.len(),
                params.len()
            )));
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}
