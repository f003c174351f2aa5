//! Adversarial loss functions for GANs

use candle_core::{DType, Module, Tensor};
use tracing::trace;

use super::{clipped_log, gradient_penalty, row_norm, AdversarialLoss};
use crate::error::{PidsimError, PidsimResult};
use crate::gan::samples::Sample;
use crate::nn::models::Sequential;
use crate::tensor::Sampler;

/// Standard deviation of the instance noise of the standard GAN
pub const DEFAULT_INSTANCE_NOISE: f64 = 0.05;

/// Binary cross-entropy GAN with instance noise.
///
/// Both samples are perturbed with gaussian noise before being scored. The
/// discriminator loss is the exact negation of the generator loss for the
/// same noise draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StandardLoss {
    noise_std: f64,
}

impl StandardLoss {
    pub const NAME: &'static str = "Loss function";

    pub fn new(noise_std: f64) -> PidsimResult<Self> {
        if !noise_std.is_finite() || noise_std < 0.0 {
            return Err(PidsimError::invalid_parameter(
                "noise_std",
                noise_std,
                "should be a non-negative finite number",
            ));
        }
        Ok(Self { noise_std })
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    fn perturb(&self, features: &Tensor, sampler: &mut Sampler) -> PidsimResult<Tensor> {
        if self.noise_std == 0.0 {
            return Ok(features.clone());
        }
        let (rows, cols) = features.dims2()?;
        let noise = sampler.normal(rows, cols, 0.0, self.noise_std as f32, features.device())?;
        Ok(features.add(&noise)?)
    }
}

impl Default for StandardLoss {
    fn default() -> Self {
        Self {
            noise_std: DEFAULT_INSTANCE_NOISE,
        }
    }
}

impl AdversarialLoss for StandardLoss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn discriminator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        Ok(self
            .generator_loss(critic, generated, reference, sampler)?
            .neg()?)
    }

    /// `mean(w_gen log(1 - D(gen)) + w_ref log D(ref))`
    fn generator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let d_gen = critic.forward(&self.perturb(&generated.features, sampler)?)?;
        let d_ref = critic.forward(&self.perturb(&reference.features, sampler)?)?;
        let gen_term = clipped_log(&d_gen.affine(-1.0, 1.0)?)?.mul(&generated.weights)?;
        let ref_term = clipped_log(&d_ref)?.mul(&reference.weights)?;
        Ok(gen_term.add(&ref_term)?.mean_all()?)
    }

    /// Loss of two halves of the reference sample scored against each other
    fn threshold(
        &self,
        critic: &Sequential,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Option<Tensor>> {
        let (first, second) = reference.split()?;
        if first.rows() == 0 {
            return Ok(None);
        }
        let d_first = critic.forward(&self.perturb(&first.features, sampler)?)?;
        let d_second = critic.forward(&self.perturb(&second.features, sampler)?)?;
        let first_term = clipped_log(&d_first)?.mul(&first.weights)?;
        let second_term = clipped_log(&d_second.affine(-1.0, 1.0)?)?.mul(&second.weights)?;
        Ok(Some(first_term.add(&second_term)?.mean_all()?))
    }
}

/// Wasserstein GAN with one-sided gradient penalty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WassersteinGpLoss {
    grad_penalty: f64,
}

impl WassersteinGpLoss {
    pub const NAME: &'static str = "Wasserstein distance";

    pub fn new(grad_penalty: f64) -> Self {
        Self { grad_penalty }
    }

    /// `mean(w_gen D(gen) - w_ref D(ref))`
    fn critic_gap(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
    ) -> PidsimResult<Tensor> {
        let d_gen = critic.forward(&generated.features)?.mul(&generated.weights)?;
        let d_ref = critic.forward(&reference.features)?.mul(&reference.weights)?;
        Ok(d_gen.sub(&d_ref)?.mean_all()?)
    }

    fn penalty(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let rows = reference.rows();
        let alpha = sampler.uniform(rows, 1, 0.0, 1.0, reference.features.device())?;
        let differences = generated.features.sub(&reference.features)?;
        let interpolates = reference
            .features
            .add(&differences.broadcast_mul(&alpha)?)?;
        let upstream = Tensor::ones((rows, 1), DType::F32, interpolates.device())?;
        let gradients = critic.input_gradient(&interpolates, &upstream)?;
        Ok(gradient_penalty(&gradients)?.affine(self.grad_penalty, 0.0)?)
    }
}

impl AdversarialLoss for WassersteinGpLoss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn discriminator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let gap = self.critic_gap(critic, generated, reference)?;
        if self.grad_penalty == 0.0 {
            return Ok(gap);
        }
        let penalty = self.penalty(critic, generated, reference, sampler)?;
        trace!("wgan-gp penalty {:?}", penalty.to_scalar::<f32>().ok());
        Ok(gap.add(&penalty)?)
    }

    fn generator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        _sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        // same sign as the critic loss, without the penalty
        self.critic_gap(critic, generated, reference)
    }

    fn grad_penalty(&self) -> f64 {
        self.grad_penalty
    }
}

/// Cramer (energy distance) GAN with a vector-valued critic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CramerLoss {
    grad_penalty: f64,
}

/// Halves of the reference and generated samples
struct CramerHalves {
    ref_1: Sample,
    gen_1: Sample,
    gen_2: Sample,
}

impl CramerLoss {
    pub const NAME: &'static str = "Energy distance";

    pub fn new(grad_penalty: f64) -> Self {
        Self { grad_penalty }
    }

    fn halves(generated: &Sample, reference: &Sample) -> PidsimResult<CramerHalves> {
        let (ref_1, _) = reference.split()?;
        let (gen_1, gen_2) = generated.split()?;
        if gen_1.rows() == 0 || ref_1.rows() == 0 {
            return Err(PidsimError::shape_error(
                "a batch of at least 4 rows",
                &format!("halves of {} rows", generated.rows()),
                Some("the Cramer critic splits each half of the batch again"),
            ));
        }
        Ok(CramerHalves { ref_1, gen_1, gen_2 })
    }

    /// `||f(x1) - f(x2)|| - ||f(x1)||`, one value per row
    fn critic_value(critic: &Sequential, x1: &Tensor, x2: &Tensor) -> PidsimResult<Tensor> {
        let f1 = critic.forward(x1)?;
        let f2 = critic.forward(x2)?;
        Ok(row_norm(&f1.sub(&f2)?)?.sub(&row_norm(&f1)?)?)
    }

    /// `w_g1 w_g2 h(g1, g2) - w_r1 w_g2 h(r1, g2)`, one value per row
    fn energy_terms(critic: &Sequential, halves: &CramerHalves) -> PidsimResult<Tensor> {
        let CramerHalves { ref_1, gen_1, gen_2 } = halves;
        let gen_gen = Self::critic_value(critic, &gen_1.features, &gen_2.features)?
            .mul(&gen_1.weights)?
            .mul(&gen_2.weights)?;
        let ref_gen = Self::critic_value(critic, &ref_1.features, &gen_2.features)?
            .mul(&ref_1.weights)?
            .mul(&gen_2.weights)?;
        Ok(gen_gen.sub(&ref_gen)?)
    }

    fn penalty(
        &self,
        critic: &Sequential,
        halves: &CramerHalves,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let CramerHalves { ref_1, gen_1, gen_2 } = halves;
        let rows = ref_1.rows();
        let alpha = sampler.uniform(rows, 1, 0.0, 1.0, ref_1.features.device())?;
        let differences = gen_1.features.sub(&ref_1.features)?;
        let interpolates = ref_1.features.add(&differences.broadcast_mul(&alpha)?)?;

        // Upstream gradient of h(x, g2) with respect to f(x)
        let f_int = critic.forward(&interpolates)?;
        let f_gen = critic.forward(&gen_2.features)?;
        let delta = f_int.sub(&f_gen)?;
        let upstream = delta
            .broadcast_div(&row_norm(&delta)?)?
            .sub(&f_int.broadcast_div(&row_norm(&f_int)?)?)?;

        let gradients = critic.input_gradient(&interpolates, &upstream)?;
        Ok(gradient_penalty(&gradients)?.affine(self.grad_penalty, 0.0)?)
    }
}

impl AdversarialLoss for CramerLoss {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn discriminator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let halves = Self::halves(generated, reference)?;
        let energy = Self::energy_terms(critic, &halves)?.mean_all()?;
        if self.grad_penalty == 0.0 {
            return Ok(energy);
        }
        Ok(energy.add(&self.penalty(critic, &halves, sampler)?)?)
    }

    fn generator_loss(
        &self,
        critic: &Sequential,
        generated: &Sample,
        reference: &Sample,
        _sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let halves = Self::halves(generated, reference)?;
        Ok(Self::energy_terms(critic, &halves)?.mean_all()?.neg()?)
    }

    fn grad_penalty(&self) -> f64 {
        self.grad_penalty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{mlp_specs, OutputHead};
    use approx::assert_relative_eq;
    use candle_core::Device;

    fn critic(head: OutputHead) -> Sequential {
        let mut sampler = Sampler::seeded(21);
        Sequential::builder("critic", 3)
            .layers(mlp_specs(2, 8, 0.1))
            .build(head, &mut sampler, &Device::Cpu)
            .unwrap()
    }

    fn samples(rows: usize) -> (Sample, Sample) {
        let mut sampler = Sampler::seeded(8);
        let generated = sampler.normal(rows, 3, 0.5, 1.0, &Device::Cpu).unwrap();
        let reference = sampler.normal(rows, 3, -0.5, 1.0, &Device::Cpu).unwrap();
        let weights = Tensor::new(
            (0..rows).map(|i| 0.5 + i as f32 / rows as f32).collect::<Vec<_>>().as_slice(),
            &Device::Cpu,
        )
        .unwrap();
        (
            Sample::new(generated, weights.clone()).unwrap(),
            Sample::new(reference, weights).unwrap(),
        )
    }

    fn scalar(t: Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_standard_discriminator_is_negated_generator() {
        let loss = StandardLoss::default();
        let critic = critic(OutputHead::sigmoid());
        let (generated, reference) = samples(8);

        let mut sampler = Sampler::seeded(99);
        let g = scalar(loss.generator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        sampler.reseed(99);
        let d = scalar(loss.discriminator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        assert_eq!(d, -g);
        assert!(g.is_finite());
    }

    #[test]
    fn test_standard_threshold_needs_two_rows() {
        let loss = StandardLoss::default();
        let critic = critic(OutputHead::sigmoid());
        let (_, reference) = samples(1);
        let mut sampler = Sampler::seeded(0);
        assert!(loss.threshold(&critic, &reference, &mut sampler).unwrap().is_none());

        let (_, reference) = samples(6);
        let th = loss.threshold(&critic, &reference, &mut sampler).unwrap().unwrap();
        assert!(scalar(th) <= 0.0);
    }

    #[test]
    fn test_wgan_without_penalty_is_critic_gap() {
        let loss = WassersteinGpLoss::new(0.0);
        let critic = critic(OutputHead::linear(1));
        let (generated, reference) = samples(6);
        let mut sampler = Sampler::seeded(0);
        let d = scalar(loss.discriminator_loss(&critic, &generated, &reference, &mut sampler).unwrap());

        let d_gen = critic.forward(&generated.features).unwrap().mul(&generated.weights).unwrap();
        let d_ref = critic.forward(&reference.features).unwrap().mul(&reference.weights).unwrap();
        let expected = scalar(d_gen.sub(&d_ref).unwrap().mean_all().unwrap());
        assert_relative_eq!(d, expected, epsilon = 1e-6);

        let g = scalar(loss.generator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        assert_relative_eq!(g, expected, epsilon = 1e-6);
        assert_eq!(d, g);
    }

    #[test]
    fn test_wgan_generator_loss_ignores_penalty() {
        let critic = critic(OutputHead::linear(1));
        let (generated, reference) = samples(6);
        let mut sampler = Sampler::seeded(3);
        let plain = scalar(
            WassersteinGpLoss::new(0.0)
                .generator_loss(&critic, &generated, &reference, &mut sampler)
                .unwrap(),
        );
        let penalised = scalar(
            WassersteinGpLoss::new(10.0)
                .generator_loss(&critic, &generated, &reference, &mut sampler)
                .unwrap(),
        );
        assert_eq!(plain, penalised);
    }

    #[test]
    fn test_wgan_penalty_increases_loss_and_reaches_critic() {
        let critic = critic(OutputHead::linear(1));
        let (generated, reference) = samples(6);
        let mut sampler = Sampler::seeded(0);
        let plain = scalar(
            WassersteinGpLoss::new(0.0)
                .discriminator_loss(&critic, &generated, &reference, &mut sampler)
                .unwrap(),
        );
        let penalised = WassersteinGpLoss::new(10.0)
            .discriminator_loss(&critic, &generated, &reference, &mut sampler)
            .unwrap();
        assert!(scalar(penalised.clone()) >= plain);

        let grads = penalised.backward().unwrap();
        for var in critic.vars() {
            assert!(grads.get(var.as_tensor()).is_some());
        }
    }

    #[test]
    fn test_cramer_losses() {
        let loss = CramerLoss::new(10.0);
        let critic = critic(OutputHead::linear(4));
        let (generated, reference) = samples(8);
        let mut sampler = Sampler::seeded(0);

        let g = scalar(loss.generator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        let d = scalar(loss.discriminator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        assert!(g.is_finite() && d.is_finite());
        // d = -g + penalty, penalty >= 0
        assert!(d + g >= -1e-6);

        let unpenalised = CramerLoss::new(0.0);
        let d0 = scalar(unpenalised.discriminator_loss(&critic, &generated, &reference, &mut sampler).unwrap());
        assert_relative_eq!(d0, -g, epsilon = 1e-6);
    }

    #[test]
    fn test_cramer_needs_four_rows() {
        let loss = CramerLoss::new(10.0);
        let critic = critic(OutputHead::linear(4));
        let (generated, reference) = samples(1);
        let mut sampler = Sampler::seeded(0);
        let result = loss.generator_loss(&critic, &generated, &reference, &mut sampler);
        assert!(matches!(result, Err(PidsimError::Shape(_))));
    }
}
