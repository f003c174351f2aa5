//! Training orchestration: optimizers, schedules, metrics, reweighting and the session trainer

pub mod artifacts;
pub mod metrics;
pub mod optimizers;
pub mod reweighter;
pub mod schedulers;
pub mod trainer;

pub use artifacts::ArtifactStore;
pub use metrics::{GanMetrics, MeanTracker, TrainingHistory, TrainingMetrics};
pub use optimizers::{Optimizer, OptimizerConfig, RmsProp};
pub use reweighter::{Reweighter, ReweighterConfig, ReweighterReport};
pub use schedulers::{GanLrScheduler, LRScheduler, SchedulerConfig};
pub use trainer::{GanTrainer, ModelSelector, TrainerPaths};

use crate::error::PidsimResult;
use crate::gan::AdversarialModel;

/// Hooks run by [`GanTrainer::train_model`] around every epoch
pub trait TrainingCallback {
    /// Called before the first epoch
    fn on_train_begin(&mut self, _model: &mut AdversarialModel) -> PidsimResult<()> {
        Ok(())
    }

    /// Called at the start of each epoch, before any step
    fn on_epoch_begin(&mut self, _epoch: usize, _model: &mut AdversarialModel) -> PidsimResult<()> {
        Ok(())
    }

    /// Called with the epoch logs; validation metrics carry the `val_` prefix
    fn on_epoch_end(&mut self, _epoch: usize, _logs: &TrainingMetrics) -> PidsimResult<()> {
        Ok(())
    }

    /// Called once every epoch has run
    fn on_train_end(&mut self, _history: &TrainingHistory) -> PidsimResult<()> {
        Ok(())
    }
}

impl TrainingCallback for GanLrScheduler {
    fn on_epoch_begin(&mut self, epoch: usize, model: &mut AdversarialModel) -> PidsimResult<()> {
        GanLrScheduler::on_epoch_begin(self, epoch, model).map(|_| ())
    }
}
