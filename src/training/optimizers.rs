//! Optimizers for the adversarial players
//!
//! Each optimizer owns the variables of exactly one network, so a step
//! taken on the discriminator loss never moves the generator weights.

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::{AdamW, Optimizer as CandleOptimizer, ParamsAdamW, SGD};
use serde::{Deserialize, Serialize};

use crate::error::{PidsimError, PidsimResult};

/// Optimizer trait
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &'static str;
    fn step(&mut self, grads: &GradStore) -> PidsimResult<()>;
    fn learning_rate(&self) -> f64;
    fn set_learning_rate(&mut self, lr: f64);
}

/// Optimizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    #[serde(rename = "rmsprop")]
    RmsProp {
        learning_rate: f64,
        #[serde(default = "default_rho")]
        rho: f64,
        #[serde(default = "default_rmsprop_eps")]
        epsilon: f64,
    },
    Adam {
        learning_rate: f64,
        #[serde(default = "default_beta1")]
        beta1: f64,
        #[serde(default = "default_beta2")]
        beta2: f64,
        #[serde(default = "default_adam_eps")]
        epsilon: f64,
        #[serde(default)]
        weight_decay: f64,
    },
    Sgd {
        learning_rate: f64,
    },
}

fn default_rho() -> f64 {
    0.9
}

fn default_rmsprop_eps() -> f64 {
    1e-7
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_adam_eps() -> f64 {
    1e-7
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::rmsprop(1e-3)
    }
}

impl OptimizerConfig {
    pub fn rmsprop(learning_rate: f64) -> Self {
        OptimizerConfig::RmsProp {
            learning_rate,
            rho: default_rho(),
            epsilon: default_rmsprop_eps(),
        }
    }

    pub fn adam(learning_rate: f64) -> Self {
        OptimizerConfig::Adam {
            learning_rate,
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_adam_eps(),
            weight_decay: 0.0,
        }
    }

    pub fn sgd(learning_rate: f64) -> Self {
        OptimizerConfig::Sgd { learning_rate }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerConfig::RmsProp { learning_rate, .. }
            | OptimizerConfig::Adam { learning_rate, .. }
            | OptimizerConfig::Sgd { learning_rate } => *learning_rate,
        }
    }

    pub fn validate(&self) -> PidsimResult<()> {
        let lr = self.learning_rate();
        if !lr.is_finite() || lr <= 0.0 {
            return Err(PidsimError::invalid_parameter(
                "learning_rate",
                lr,
                "should be a positive finite number",
            ));
        }
        match self {
            OptimizerConfig::RmsProp { rho, epsilon, .. } => {
                if !(0.0..1.0).contains(rho) {
                    return Err(PidsimError::invalid_parameter("rho", rho, "should lie in [0, 1)"));
                }
                if *epsilon <= 0.0 {
                    return Err(PidsimError::invalid_parameter("epsilon", epsilon, "should be positive"));
                }
            }
            OptimizerConfig::Adam { beta1, beta2, .. } => {
                if !(0.0..1.0).contains(beta1) || !(0.0..1.0).contains(beta2) {
                    return Err(PidsimError::Configuration(format!(
                        "Adam betas should lie in [0, 1), got ({}, {})",
                        beta1, beta2
                    )));
                }
            }
            OptimizerConfig::Sgd { .. } => {}
        }
        Ok(())
    }

    /// Build an optimizer updating `vars` only
    pub fn create_optimizer(&self, vars: Vec<Var>) -> PidsimResult<Box<dyn Optimizer>> {
        self.validate()?;
        let optimizer: Box<dyn Optimizer> = match *self {
            OptimizerConfig::RmsProp {
                learning_rate,
                rho,
                epsilon,
            } => Box::new(RmsProp::new(
                vars,
                ParamsRmsProp {
                    learning_rate,
                    rho,
                    epsilon,
                },
            )?),
            OptimizerConfig::Adam {
                learning_rate,
                beta1,
                beta2,
                epsilon,
                weight_decay,
            } => Box::new(AdamW::new(
                vars,
                ParamsAdamW {
                    lr: learning_rate,
                    beta1,
                    beta2,
                    eps: epsilon,
                    weight_decay,
                },
            )?),
            OptimizerConfig::Sgd { learning_rate } => Box::new(SGD::new(vars, learning_rate)?),
        };
        Ok(optimizer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamsRmsProp {
    pub learning_rate: f64,
    pub rho: f64,
    pub epsilon: f64,
}

impl Default for ParamsRmsProp {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            rho: default_rho(),
            epsilon: default_rmsprop_eps(),
        }
    }
}

#[derive(Debug)]
struct VarRmsProp {
    var: Var,
    mean_square: Var,
}

/// RMSprop without momentum:
/// `v <- rho v + (1 - rho) g^2`, `w <- w - lr g / (sqrt(v) + eps)`
#[derive(Debug)]
pub struct RmsProp {
    vars: Vec<VarRmsProp>,
    params: ParamsRmsProp,
}

impl CandleOptimizer for RmsProp {
    type Config = ParamsRmsProp;

    fn new(vars: Vec<Var>, params: ParamsRmsProp) -> candle_core::Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let mean_square = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarRmsProp { var, mean_square })
            })
            .collect::<candle_core::Result<Vec<_>>>()?;
        Ok(Self { vars, params })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        let ParamsRmsProp {
            learning_rate,
            rho,
            epsilon,
        } = self.params;
        for state in &self.vars {
            let theta = &state.var;
            if let Some(g) = grads.get(theta) {
                let mean_square = state
                    .mean_square
                    .as_tensor()
                    .affine(rho, 0.0)?
                    .add(&g.sqr()?.affine(1.0 - rho, 0.0)?)?;
                let update: Tensor = g
                    .div(&mean_square.sqrt()?.affine(1.0, epsilon)?)?
                    .affine(learning_rate, 0.0)?;
                theta.set(&theta.as_tensor().sub(&update)?)?;
                state.mean_square.set(&mean_square)?;
            }
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.learning_rate = lr;
    }
}

impl Optimizer for RmsProp {
    fn name(&self) -> &'static str {
        "RMSprop"
    }

    fn step(&mut self, grads: &GradStore) -> PidsimResult<()> {
        Ok(CandleOptimizer::step(self, grads)?)
    }

    fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(self)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(self, lr)
    }
}

impl Optimizer for AdamW {
    fn name(&self) -> &'static str {
        "Adam"
    }

    fn step(&mut self, grads: &GradStore) -> PidsimResult<()> {
        Ok(CandleOptimizer::step(self, grads)?)
    }

    fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(self)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(self, lr)
    }
}

impl Optimizer for SGD {
    fn name(&self) -> &'static str {
        "SGD"
    }

    fn step(&mut self, grads: &GradStore) -> PidsimResult<()> {
        Ok(CandleOptimizer::step(self, grads)?)
    }

    fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(self)
    }

    fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(self, lr)
    }
}
