//! Seedable random source for weight initialisation, latent noise and shuffling
//!
//! The candle CPU generator cannot be seeded, so every random tensor of the
//! crate is drawn here and uploaded to the target device.

use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::PidsimResult;

#[derive(Debug, Clone)]
pub struct Sampler {
    rng: StdRng,
}

impl Sampler {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Restart the stream from `seed`
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn normal_vec(&mut self, len: usize, mean: f32, std: f32) -> Vec<f32> {
        (0..len)
            .map(|_| {
                let z: f32 = self.rng.sample(StandardNormal);
                mean + std * z
            })
            .collect()
    }

    /// Values drawn uniformly from `[low, high)`
    pub fn uniform_vec(&mut self, len: usize, low: f32, high: f32) -> Vec<f32> {
        (0..len)
            .map(|_| low + (high - low) * self.rng.gen::<f32>())
            .collect()
    }

    /// `[rows, cols]` tensor of gaussian draws
    pub fn normal(
        &mut self,
        rows: usize,
        cols: usize,
        mean: f32,
        std: f32,
        device: &Device,
    ) -> PidsimResult<Tensor> {
        let values = self.normal_vec(rows * cols, mean, std);
        Ok(Tensor::from_vec(values, (rows, cols), device)?)
    }

    /// `[rows, cols]` tensor of uniform draws in `[low, high)`
    pub fn uniform(
        &mut self,
        rows: usize,
        cols: usize,
        low: f32,
        high: f32,
        device: &Device,
    ) -> PidsimResult<Tensor> {
        let values = self.uniform_vec(rows * cols, low, high);
        Ok(Tensor::from_vec(values, (rows, cols), device)?)
    }

    /// Random permutation of `0..len`
    pub fn permutation(&mut self, len: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..len).collect();
        indices.shuffle(&mut self.rng);
        indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reseed_replays_stream() {
        let mut sampler = Sampler::seeded(5);
        let first = sampler.normal_vec(6, 0.0, 1.0);
        sampler.reseed(5);
        assert_eq!(first, sampler.normal_vec(6, 0.0, 1.0));
    }

    #[test]
    fn test_uniform_bounds() {
        let mut sampler = Sampler::seeded(1);
        let values = sampler.uniform_vec(1000, -0.5, 0.5);
        assert!(values.iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[test]
    fn test_tensor_shape() {
        let mut sampler = Sampler::seeded(1);
        let t = sampler.normal(7, 3, 0.0, 1.0, &Device::Cpu).unwrap();
        assert_eq!(t.dims2().unwrap(), (7, 3));
    }

    #[test]
    fn test_permutation() {
        let mut sampler = Sampler::seeded(2);
        let mut perm = sampler.permutation(10);
        perm.sort_unstable();
        assert_eq!(perm, (0..10).collect::<Vec<_>>());
    }
}
