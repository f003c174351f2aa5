//! Regression network predicting per-event weights from the conditions
//!
//! The reweighter learns `w(X)` by mean-squared-error regression on the
//! (sWeighted) sample; its predictions replace `w_X`, the weights carried by
//! the generated half of every batch.

use std::path::Path;
use std::time::Instant;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::coerce;
use crate::error::{PidsimError, PidsimResult};
use crate::nn::layers::{mlp_specs, Initializer};
use crate::nn::losses::{mean_squared_error, Reduction};
use crate::nn::models::{OutputHead, Sequential, SequentialBuilder};
use crate::tensor::{streams, ExecutionContext};
use crate::training::optimizers::{Optimizer, OptimizerConfig};

fn default_num_layers() -> usize {
    5
}

fn default_units() -> usize {
    32
}

fn default_alpha() -> f64 {
    0.05
}

fn default_learning_rate() -> f64 {
    5e-4
}

fn default_num_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    1024
}

/// Architecture and fit settings of the reweighting network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReweighterConfig {
    #[serde(default = "default_num_layers", deserialize_with = "coerce::count")]
    pub num_layers: usize,
    #[serde(default = "default_units", deserialize_with = "coerce::count")]
    pub units: usize,
    /// LeakyReLU slope of the hidden blocks
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_num_epochs", deserialize_with = "coerce::count")]
    pub num_epochs: usize,
    #[serde(default = "default_batch_size", deserialize_with = "coerce::count")]
    pub batch_size: usize,
}

impl Default for ReweighterConfig {
    fn default() -> Self {
        Self {
            num_layers: default_num_layers(),
            units: default_units(),
            alpha: default_alpha(),
            learning_rate: default_learning_rate(),
            num_epochs: default_num_epochs(),
            batch_size: default_batch_size(),
        }
    }
}

impl ReweighterConfig {
    pub fn validate(&self) -> PidsimResult<()> {
        for (name, value) in [
            ("units", self.units),
            ("num_epochs", self.num_epochs),
            ("batch_size", self.batch_size),
        ] {
            if value == 0 {
                return Err(PidsimError::invalid_parameter(name, value, "should be a positive integer"));
            }
        }
        if !(self.alpha >= 0.0 && self.alpha.is_finite()) {
            return Err(PidsimError::invalid_parameter("alpha", self.alpha, "should be non-negative"));
        }
        OptimizerConfig::rmsprop(self.learning_rate).validate()
    }
}

/// Outcome of [`Reweighter::fit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReweighterReport {
    /// Mean batch loss of every epoch
    pub epoch_losses: Vec<f64>,
    pub batch_size: usize,
    pub steps_per_epoch: usize,
    pub elapsed_secs: f64,
}

impl ReweighterReport {
    pub fn final_loss(&self) -> Option<f64> {
        self.epoch_losses.last().copied()
    }
}

/// Trained reweighting network
pub struct Reweighter {
    model: Sequential,
}

impl Reweighter {
    /// Regress `weights` (`[n]` or `[n, 1]`) on the conditions `x`.
    ///
    /// Batches are taken in order with the remainder dropped; a sample smaller
    /// than one batch is fitted as a single batch.
    pub fn fit(
        x: &Tensor,
        weights: &Tensor,
        config: &ReweighterConfig,
        ctx: &ExecutionContext,
    ) -> PidsimResult<(Self, ReweighterReport)> {
        config.validate()?;
        let (rows, x_dim) = x.dims2()?;
        if rows == 0 {
            return Err(PidsimError::shape_error(
                "at least one event",
                "an empty sample",
                Some("feed data before training the reweighter"),
            ));
        }
        let targets = weights.reshape((rows, 1)).map_err(|_| {
            PidsimError::shape_error(
                &format!("{} weights", rows),
                &format!("{:?}", weights.dims()),
                None,
            )
        })?;

        // the head starts at the mean weight so the ReLU output is alive
        let mean_weight = targets.mean_all()?.to_scalar::<f32>()?;
        let mut init = ctx.sampler(streams::REWEIGHTER);
        let model = SequentialBuilder::new("reweighter", x_dim)
            .layers(mlp_specs(config.num_layers, config.units, config.alpha))
            .head_kernel(Initializer::Zeros)
            .head_bias(mean_weight.max(0.0))
            .build(OutputHead::relu(), &mut init, ctx.device())?;
        let mut optimizer =
            OptimizerConfig::rmsprop(config.learning_rate).create_optimizer(model.vars())?;

        let batch_size = config.batch_size.min(rows);
        let steps_per_epoch = rows / batch_size;
        let start = Instant::now();
        let mut epoch_losses = Vec::with_capacity(config.num_epochs);

        for epoch in 0..config.num_epochs {
            let mut total = 0.0;
            for step in 0..steps_per_epoch {
                let offset = step * batch_size;
                let x_batch = x.narrow(0, offset, batch_size)?;
                let w_batch = targets.narrow(0, offset, batch_size)?;
                let loss = mean_squared_error(&model.apply(&x_batch)?, &w_batch, Reduction::Mean)?;
                optimizer.step(&loss.backward()?)?;
                total += loss.to_scalar::<f32>()? as f64;
            }
            let epoch_loss = total / steps_per_epoch as f64;
            debug!("Reweighter epoch {}/{}: mse {:.4e}", epoch + 1, config.num_epochs, epoch_loss);
            epoch_losses.push(epoch_loss);
        }

        let elapsed = start.elapsed().as_secs_f64();
        info!(
            "Reweighter training completed in {:.3} min ({} epochs, batch {})",
            elapsed / 60.0,
            config.num_epochs,
            batch_size
        );
        Ok((
            Self { model },
            ReweighterReport {
                epoch_losses,
                batch_size,
                steps_per_epoch,
                elapsed_secs: elapsed,
            },
        ))
    }

    /// Predicted weights, `[n, 1]`
    pub fn predict(&self, x: &Tensor) -> PidsimResult<Tensor> {
        self.model.apply(x)
    }

    pub fn model(&self) -> &Sequential {
        &self.model
    }

    pub fn save(&self, dir: &Path) -> PidsimResult<()> {
        self.model.save(dir)?;
        info!("Reweighter exported to {}", dir.display());
        Ok(())
    }

    pub fn load(dir: &Path, device: &Device) -> PidsimResult<Self> {
        Ok(Self {
            model: Sequential::load(dir, device)?,
        })
    }
}
