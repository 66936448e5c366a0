/// Decides after each epoch whether the model is worth saving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointTracker {
    best: Option<f64>,
}

impl CheckpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an epoch's loss.
    ///
    /// # Returns
    /// Whether to save: always on the first epoch, afterwards only on a strict
    /// improvement.
    pub fn observe(&mut self, epoch_loss: f64) -> bool {
        match self.best {
            Some(best) if epoch_loss >= best => false,
            _ => {
                self.best = Some(epoch_loss);
                true
            }
        }
    }

    /// The lowest epoch loss seen so far.
    pub fn best(&self) -> Option<f64> {
        self.best
    }
}
