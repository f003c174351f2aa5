//! pidsim-train - adversarial training of particle-identification response models
//!
//! Features:
//! - Conditional GAN, WGAN-GP and Cramer GAN players built on candle
//! - Optional auxiliary classifier trained alongside the critic
//! - Learning-rate schedules applied at every epoch start
//! - Column preprocessing and a reweighting network for event weights
//! - A session trainer exporting transformers, networks and histories

pub mod config;
pub mod data;
pub mod error;
pub mod gan;
pub mod nn;
pub mod preprocessing;
pub mod stats;
pub mod tensor;
pub mod training;

pub use config::{CompileConfig, ConfigBuilder, DatasetConfig, ExperimentConfig, ModelConfig, TrainConfig};
pub use data::{DataChunk, TensorDataset};
pub use error::{PidsimError, PidsimResult};
pub use gan::{AdversarialModel, Batch, Player};
pub use nn::{LayerSpec, LossKind, Sequential};
pub use preprocessing::{ColumnTransformer, ScalingStrategy};
pub use tensor::{ExecutionContext, Sampler};
pub use training::{
    GanLrScheduler, GanTrainer, ModelSelector, OptimizerConfig, Reweighter, ReweighterConfig,
    SchedulerConfig, TrainerPaths, TrainingCallback, TrainingHistory, TrainingMetrics,
};

/// Install the default `tracing` subscriber.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init() {
    if tracing_subscriber::fmt::try_init().is_ok() {
        tracing::info!("pidsim-train {} initialized", version());
    }
}

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice() {
        init();
        init();
    }

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
