//! Loss functions of the adversarial players
//!
//! The adversarial objectives are strategies behind [`AdversarialLoss`]; the
//! variant is picked once, at model construction, through [`LossKind`].
//! Helpers shared by every strategy live here.

pub mod adversarial;
pub mod classification;
pub mod regression;

pub use adversarial::*;
pub use classification::*;
pub use regression::*;

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::config::coerce;
use crate::error::{PidsimError, PidsimResult};
use crate::gan::samples::Sample;
use crate::nn::models::{OutputHead, Sequential};
use crate::tensor::Sampler;

/// Lower bound applied to probabilities before taking their logarithm
pub const LOG_CLIP_MIN: f64 = 1e-12;

/// Added under the square root of row norms so that a zero row has a finite gradient
pub const NORM_EPSILON: f64 = 1e-12;

/// Default weight of the gradient penalty term
pub const DEFAULT_GRAD_PENALTY: f64 = 10.0;

/// Default output width of the Cramer critic
pub const DEFAULT_CRITIC_DIM: usize = 64;

/// Reduction types for loss functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Keep one value per row
    None,
    #[default]
    Mean,
    Sum,
}

pub fn apply_reduction(values: Tensor, reduction: Reduction) -> PidsimResult<Tensor> {
    Ok(match reduction {
        Reduction::None => values,
        Reduction::Mean => values.mean_all()?,
        Reduction::Sum => values.sum_all()?,
    })
}

/// `log(clip(t, 1e-12, 1))`
pub fn clipped_log(t: &Tensor) -> PidsimResult<Tensor> {
    Ok(t.clamp(LOG_CLIP_MIN, 1.0)?.log()?)
}

/// Euclidean norm of every row, as a `[n, 1]` column
pub fn row_norm(t: &Tensor) -> PidsimResult<Tensor> {
    Ok(t
        .sqr()?
        .sum_keepdim(1)?
        .affine(1.0, NORM_EPSILON)?
        .sqrt()?)
}

/// One-sided penalty `mean(max(0, ||g|| - 1)^2)` on per-row gradients `g`
pub fn gradient_penalty(gradients: &Tensor) -> PidsimResult<Tensor> {
    let slopes = row_norm(gradients)?;
    Ok(slopes.affine(1.0, -1.0)?.relu()?.sqr()?.mean_all()?)
}

/// Objective of one adversarial variant
pub trait AdversarialLoss: Send + Sync {
    /// Human-readable loss name
    fn name(&self) -> &'static str;

    /// Scalar minimised by the discriminator updates
    fn discriminator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor>;

    /// Scalar minimised by the generator updates
    fn generator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor>;

    /// Loss value reached by a perfect generator, when the variant defines one
    fn threshold(
        &self,
        _critic: &Sequential,
        _reference: &Sample,
        _sampler: &mut Sampler,
    ) -> PidsimResult<Option<Tensor>> {
        Ok(None)
    }

    fn grad_penalty(&self) -> f64 {
        0.0
    }
}

/// Adversarial variant selected at model construction
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossKind {
    #[default]
    Standard,
    WassersteinGp,
    Cramer {
        #[serde(
            default = "default_critic_dim",
            deserialize_with = "coerce::count"
        )]
        critic_dim: usize,
    },
}

fn default_critic_dim() -> usize {
    DEFAULT_CRITIC_DIM
}

impl LossKind {
    pub fn cramer(critic_dim: usize) -> Self {
        LossKind::Cramer { critic_dim }
    }

    pub fn loss_name(&self) -> &'static str {
        match self {
            LossKind::Standard => StandardLoss::NAME,
            LossKind::WassersteinGp => WassersteinGpLoss::NAME,
            LossKind::Cramer { .. } => CramerLoss::NAME,
        }
    }

    /// Terminal layer of the discriminator for this variant
    pub fn critic_head(&self) -> OutputHead {
        match self {
            LossKind::Standard => OutputHead::sigmoid(),
            LossKind::WassersteinGp => OutputHead::linear(1),
            LossKind::Cramer { critic_dim } => OutputHead::linear(*critic_dim),
        }
    }

    pub fn critic_dim(&self) -> Option<usize> {
        match self {
            LossKind::Cramer { critic_dim } => Some(*critic_dim),
            _ => None,
        }
    }

    pub fn uses_gradient_penalty(&self) -> bool {
        !matches!(self, LossKind::Standard)
    }

    pub fn validate(&self) -> PidsimResult<()> {
        if let LossKind::Cramer { critic_dim: 0 } = self {
            return Err(PidsimError::invalid_parameter(
                "critic_dim",
                0,
                "should be a positive integer",
            ));
        }
        Ok(())
    }

    /// Instantiate the strategy with its compile-time hyper-parameters
    pub fn create_loss(
        &self,
        grad_penalty: f64,
        noise_std: f64,
    ) -> PidsimResult<Box<dyn AdversarialLoss>> {
        self.validate()?;
        if self.uses_gradient_penalty() && (!grad_penalty.is_finite() || grad_penalty < 0.0) {
            return Err(PidsimError::invalid_parameter(
                "grad_penalty",
                grad_penalty,
                "should be a non-negative finite number",
            ));
        }
        let loss: Box<dyn AdversarialLoss> = match self {
            LossKind::Standard => Box::new(StandardLoss::new(noise_std)?),
            LossKind::WassersteinGp => Box::new(WassersteinGpLoss::new(grad_penalty)),
            LossKind::Cramer { .. } => Box::new(CramerLoss::new(grad_penalty)),
        };
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::Device;

    #[test]
    fn test_clipped_log_is_finite_at_bounds() {
        let p = Tensor::new(&[0.0f32, 1.0, 0.5], &Device::Cpu).unwrap();
        let logs = clipped_log(&p).unwrap().to_vec1::<f32>().unwrap();
        assert!(logs.iter().all(|v| v.is_finite()));
        assert_relative_eq!(logs[0], (1e-12f64).ln() as f32, epsilon = 1e-3);
        assert_relative_eq!(logs[1], 0.0);

        let complement = clipped_log(&p.affine(-1.0, 1.0).unwrap()).unwrap();
        assert!(complement.to_vec1::<f32>().unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_row_norm() {
        let t = Tensor::new(&[[3.0f32, 4.0], [0.0, 0.0]], &Device::Cpu).unwrap();
        let norms = row_norm(&t).unwrap().to_vec2::<f32>().unwrap();
        assert_relative_eq!(norms[0][0], 5.0, epsilon = 1e-6);
        assert!(norms[1][0] >= 0.0 && norms[1][0] < 1e-5);
    }

    #[test]
    fn test_gradient_penalty_is_one_sided() {
        // slopes 5 and 0.5: only the first exceeds 1, (5 - 1)^2 / 2 = 8
        let g = Tensor::new(&[[3.0f32, 4.0], [0.3, 0.4]], &Device::Cpu).unwrap();
        let gp = gradient_penalty(&g).unwrap().to_scalar::<f32>().unwrap();
        assert_relative_eq!(gp, 8.0, epsilon = 1e-4);

        let mut sampler = Sampler::seeded(3);
        for _ in 0..10 {
            let g = sampler.normal(16, 5, 0.0, 2.0, &Device::Cpu).unwrap();
            assert!(gradient_penalty(&g).unwrap().to_scalar::<f32>().unwrap() >= 0.0);
        }
    }

    #[test]
    fn test_loss_kind_heads() {
        assert_eq!(LossKind::Standard.critic_head(), OutputHead::sigmoid());
        assert_eq!(LossKind::WassersteinGp.critic_head(), OutputHead::linear(1));
        assert_eq!(LossKind::cramer(16).critic_head(), OutputHead::linear(16));
        assert_eq!(LossKind::cramer(16).loss_name(), "Energy distance");
    }

    #[test]
    fn test_loss_kind_validation() {
        assert!(LossKind::cramer(0).validate().is_err());
        assert!(LossKind::WassersteinGp.create_loss(-1.0, 0.05).is_err());
        assert!(LossKind::Standard.create_loss(-1.0, 0.05).is_ok());
    }

    #[test]
    fn test_loss_kind_serde() {
        let kind: LossKind = serde_json::from_str(r#"{"type": "cramer", "critic_dim": "32"}"#).unwrap();
        assert_eq!(kind, LossKind::cramer(32));
        let kind: LossKind = serde_json::from_str(r#"{"type": "cramer"}"#).unwrap();
        assert_eq!(kind, LossKind::cramer(DEFAULT_CRITIC_DIM));
    }
}
