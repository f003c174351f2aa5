//! Learning rate schedulers
//!
//! Schedules are pure functions of the initial learning rate and the epoch
//! index; [`GanLrScheduler`] applies one to the discriminator and generator
//! optimizers at the start of every epoch.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::coerce;
use crate::error::{PidsimError, PidsimResult};
use crate::gan::AdversarialModel;

/// Learning rate scheduler trait
pub trait LRScheduler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Learning rate for `epoch`, starting from `lr0` at epoch 0
    fn scheduled_lr(&self, lr0: f64, epoch: usize) -> f64;
}

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerConfig {
    /// `lr0 * factor^(epoch / step)`
    Exponential {
        #[serde(default = "default_factor")]
        factor: f64,
        #[serde(default = "default_step", deserialize_with = "coerce::real")]
        step: f64,
    },
    /// Straight line from `lr0` to `lr0 * final_factor` over `num_epochs`
    Linear {
        final_factor: f64,
        #[serde(deserialize_with = "coerce::count")]
        num_epochs: usize,
    },
    /// `lr0 * gamma^floor(epoch / step_size)`
    Step {
        #[serde(deserialize_with = "coerce::count")]
        step_size: usize,
        gamma: f64,
    },
    /// Half cosine from `lr0` down to `lr0 * min_factor` over `t_max` epochs
    Cosine {
        #[serde(deserialize_with = "coerce::count")]
        t_max: usize,
        #[serde(default)]
        min_factor: f64,
    },
}

fn default_factor() -> f64 {
    0.1
}

fn default_step() -> f64 {
    1.0
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::Exponential {
            factor: default_factor(),
            step: default_step(),
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> PidsimResult<()> {
        match *self {
            SchedulerConfig::Exponential { factor, step } => {
                if !(factor > 0.0 && factor.is_finite()) {
                    return Err(PidsimError::invalid_parameter("factor", factor, "should be positive"));
                }
                if !(step > 0.0 && step.is_finite()) {
                    return Err(PidsimError::invalid_parameter("step", step, "should be positive"));
                }
            }
            SchedulerConfig::Linear { final_factor, num_epochs } => {
                if !(0.0..=1.0).contains(&final_factor) {
                    return Err(PidsimError::invalid_parameter(
                        "final_factor",
                        final_factor,
                        "should lie in [0, 1]",
                    ));
                }
                if num_epochs == 0 {
                    return Err(PidsimError::invalid_parameter("num_epochs", 0, "should be positive"));
                }
            }
            SchedulerConfig::Step { step_size, gamma } => {
                if step_size == 0 {
                    return Err(PidsimError::invalid_parameter("step_size", 0, "should be positive"));
                }
                if !(gamma > 0.0 && gamma.is_finite()) {
                    return Err(PidsimError::invalid_parameter("gamma", gamma, "should be positive"));
                }
            }
            SchedulerConfig::Cosine { t_max, min_factor } => {
                if t_max == 0 {
                    return Err(PidsimError::invalid_parameter("t_max", 0, "should be positive"));
                }
                if !(0.0..=1.0).contains(&min_factor) {
                    return Err(PidsimError::invalid_parameter(
                        "min_factor",
                        min_factor,
                        "should lie in [0, 1]",
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn create_scheduler(&self) -> PidsimResult<Box<dyn LRScheduler>> {
        self.validate()?;
        let scheduler: Box<dyn LRScheduler> = match *self {
            SchedulerConfig::Exponential { factor, step } => {
                Box::new(ExponentialDecay { factor, step })
            }
            SchedulerConfig::Linear { final_factor, num_epochs } => Box::new(LinearDecay {
                final_factor,
                num_epochs,
            }),
            SchedulerConfig::Step { step_size, gamma } => Box::new(StepDecay { step_size, gamma }),
            SchedulerConfig::Cosine { t_max, min_factor } => {
                Box::new(CosineDecay { t_max, min_factor })
            }
        };
        Ok(scheduler)
    }
}

/// Exponential decay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialDecay {
    factor: f64,
    step: f64,
}

impl LRScheduler for ExponentialDecay {
    fn name(&self) -> &'static str {
        "exponential"
    }

    fn scheduled_lr(&self, lr0: f64, epoch: usize) -> f64 {
        lr0 * self.factor.powf(epoch as f64 / self.step)
    }
}

/// Linear decay, flat after `num_epochs`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearDecay {
    final_factor: f64,
    num_epochs: usize,
}

impl LRScheduler for LinearDecay {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn scheduled_lr(&self, lr0: f64, epoch: usize) -> f64 {
        let progress = (epoch as f64 / self.num_epochs as f64).min(1.0);
        lr0 * (1.0 - (1.0 - self.final_factor) * progress)
    }
}

/// Step decay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepDecay {
    step_size: usize,
    gamma: f64,
}

impl LRScheduler for StepDecay {
    fn name(&self) -> &'static str {
        "step"
    }

    fn scheduled_lr(&self, lr0: f64, epoch: usize) -> f64 {
        lr0 * self.gamma.powi((epoch / self.step_size) as i32)
    }
}

/// Cosine annealing, flat after `t_max`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CosineDecay {
    t_max: usize,
    min_factor: f64,
}

impl LRScheduler for CosineDecay {
    fn name(&self) -> &'static str {
        "cosine"
    }

    fn scheduled_lr(&self, lr0: f64, epoch: usize) -> f64 {
        let progress = (epoch as f64 / self.t_max as f64).min(1.0);
        let lr_min = lr0 * self.min_factor;
        lr_min + (lr0 - lr_min) * (1.0 + (std::f64::consts::PI * progress).cos()) / 2.0
    }
}

/// Epoch-start callback updating the learning rates of a compiled model
pub struct GanLrScheduler {
    schedule: Box<dyn LRScheduler>,
}

impl GanLrScheduler {
    pub fn new(config: &SchedulerConfig) -> PidsimResult<Self> {
        Ok(Self {
            schedule: config.create_scheduler()?,
        })
    }

    pub fn from_schedule(schedule: Box<dyn LRScheduler>) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &dyn LRScheduler {
        self.schedule.as_ref()
    }

    /// Set the discriminator and generator rates for `epoch`; returns them
    pub fn on_epoch_begin(
        &self,
        epoch: usize,
        model: &mut AdversarialModel,
    ) -> PidsimResult<(f64, f64)> {
        let (d_lr0, g_lr0) = model.initial_learning_rates()?;
        let d_lr = self.schedule.scheduled_lr(d_lr0, epoch);
        let g_lr = self.schedule.scheduled_lr(g_lr0, epoch);
        model.set_learning_rates(d_lr, g_lr)?;
        debug!(
            "Epoch {}: {} schedule sets d_lr = {:.3e}, g_lr = {:.3e}",
            epoch,
            self.schedule.name(),
            d_lr,
            g_lr
        );
        Ok((d_lr, g_lr))
    }
}
