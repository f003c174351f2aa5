//! Batches fed to the adversarial model and the reference/generated split
//!
//! A batch of `n` rows is cut in two halves of `h = n / 2` rows. The first
//! half provides the reference sample `[X, Y]`; the second half provides the
//! conditions for the generated sample `[X, G(X, z)]`. An odd trailing row
//! is dropped.

use candle_core::{DType, Device, Module, Tensor};

use crate::error::{PidsimError, PidsimResult};
use crate::nn::layers::ensure_f32;
use crate::nn::Sequential;
use crate::tensor::Sampler;

/// Conditions, targets and optional per-row weights
#[derive(Debug, Clone)]
pub struct Batch {
    x: Tensor,
    y: Tensor,
    weights: Option<(Tensor, Tensor)>,
}

impl Batch {
    pub fn new(x: Tensor, y: Tensor) -> PidsimResult<Self> {
        let x = ensure_f32(&x)?;
        let y = ensure_f32(&y)?;
        let (x_rows, _) = x.dims2().map_err(|_| rank_error("X", &x))?;
        let (y_rows, _) = y.dims2().map_err(|_| rank_error("Y", &y))?;
        if x_rows != y_rows {
            return Err(PidsimError::shape_error(
                &format!("{} rows of Y", x_rows),
                &format!("{} rows", y_rows),
                Some("X and Y must describe the same events"),
            ));
        }
        Ok(Self { x, y, weights: None })
    }

    /// Batch with weights for the conditions (`w_x`) and the targets (`w_y`).
    ///
    /// Weights may be given as `[n]` or `[n, 1]`.
    pub fn weighted(x: Tensor, y: Tensor, w_x: Tensor, w_y: Tensor) -> PidsimResult<Self> {
        let mut batch = Self::new(x, y)?;
        let rows = batch.rows();
        let w_x = column(&w_x, rows, "w_X")?;
        let w_y = column(&w_y, rows, "w_Y")?;
        batch.weights = Some((w_x, w_y));
        Ok(batch)
    }

    /// Batch from row-major host data
    pub fn from_rows(
        x: &[Vec<f32>],
        y: &[Vec<f32>],
        weights: Option<(&[f32], &[f32])>,
        device: &Device,
    ) -> PidsimResult<Self> {
        let x = matrix(x, device)?;
        let y = matrix(y, device)?;
        match weights {
            Some((w_x, w_y)) => Self::weighted(
                x,
                y,
                Tensor::new(w_x, device)?,
                Tensor::new(w_y, device)?,
            ),
            None => Self::new(x, y),
        }
    }

    pub fn rows(&self) -> usize {
        self.x.dims()[0]
    }

    pub fn x(&self) -> &Tensor {
        &self.x
    }

    pub fn y(&self) -> &Tensor {
        &self.y
    }

    pub fn w_x(&self) -> Option<&Tensor> {
        self.weights.as_ref().map(|(w_x, _)| w_x)
    }

    pub fn w_y(&self) -> Option<&Tensor> {
        self.weights.as_ref().map(|(_, w_y)| w_y)
    }

    pub fn half(&self) -> usize {
        self.rows() / 2
    }
}

/// Feature matrix and matching `[n, 1]` weights
#[derive(Debug, Clone)]
pub struct Sample {
    pub features: Tensor,
    pub weights: Tensor,
}

impl Sample {
    pub fn new(features: Tensor, weights: Tensor) -> PidsimResult<Self> {
        let (rows, _) = features.dims2()?;
        let weights = column(&weights, rows, "sample weights")?;
        Ok(Self { features, weights })
    }

    /// Unit-weight sample
    pub fn unweighted(features: Tensor) -> PidsimResult<Self> {
        let (rows, _) = features.dims2()?;
        let weights = Tensor::ones((rows, 1), DType::F32, features.device())?;
        Ok(Self { features, weights })
    }

    pub fn rows(&self) -> usize {
        self.features.dims()[0]
    }

    pub fn narrow(&self, start: usize, len: usize) -> PidsimResult<Self> {
        Ok(Self {
            features: self.features.narrow(0, start, len)?,
            weights: self.weights.narrow(0, start, len)?,
        })
    }

    /// Two consecutive halves of `rows / 2` rows each
    pub fn split(&self) -> PidsimResult<(Self, Self)> {
        let half = self.rows() / 2;
        Ok((self.narrow(0, half)?, self.narrow(half, half)?))
    }
}

/// Builds the reference and generated samples of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleArranger {
    latent_dim: usize,
}

impl SampleArranger {
    pub fn new(latent_dim: usize) -> Self {
        Self { latent_dim }
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    /// Split `batch` into `(reference, generated)` samples of `n / 2` rows each.
    ///
    /// Reference weights come from `w_y` on the first half, generated weights
    /// from `w_x` on the second half; without weights both are ones.
    pub fn arrange(
        &self,
        batch: &Batch,
        generator: &Sequential,
        sampler: &mut Sampler,
    ) -> PidsimResult<(Sample, Sample)> {
        let half = batch.half();
        if half == 0 {
            return Err(PidsimError::shape_error(
                "a batch of at least 2 rows",
                &format!("{} rows", batch.rows()),
                Some("the batch is split into reference and generated halves"),
            ));
        }

        let x_ref = batch.x.narrow(0, 0, half)?;
        let x_gen = batch.x.narrow(0, half, half)?;
        let y_ref = batch.y.narrow(0, 0, half)?;
        let y_gen = self.generate(generator, &x_gen, sampler)?;

        let (w_ref, w_gen) = match &batch.weights {
            Some((w_x, w_y)) => (w_y.narrow(0, 0, half)?, w_x.narrow(0, half, half)?),
            None => {
                let ones = Tensor::ones((half, 1), DType::F32, batch.x.device())?;
                (ones.clone(), ones)
            }
        };

        let reference = Sample {
            features: Tensor::cat(&[&x_ref, &y_ref], 1)?,
            weights: w_ref,
        };
        let generated = Sample {
            features: Tensor::cat(&[&x_gen, &y_gen], 1)?,
            weights: w_gen,
        };
        Ok((reference, generated))
    }

    /// `G([x, z])` with `z ~ N(0, 1)` drawn fresh from `sampler`
    pub fn generate(
        &self,
        generator: &Sequential,
        x: &Tensor,
        sampler: &mut Sampler,
    ) -> PidsimResult<Tensor> {
        let (rows, _) = x.dims2()?;
        let latent = sampler.normal(rows, self.latent_dim, 0.0, 1.0, x.device())?;
        let input = Tensor::cat(&[x, &latent], 1)?;
        if input.dims()[1] != generator.input_dim() {
            return Err(PidsimError::shape_error(
                &format!(
                    "{} condition columns",
                    generator.input_dim().saturating_sub(self.latent_dim)
                ),
                &format!("{}", x.dims()[1]),
                None,
            ));
        }
        Ok(generator.forward(&input)?)
    }
}

pub(crate) fn matrix(rows: &[Vec<f32>], device: &Device) -> PidsimResult<Tensor> {
    let n = rows.len();
    let cols = rows.first().map(|row| row.len()).unwrap_or(0);
    if rows.iter().any(|row| row.len() != cols) {
        return Err(PidsimError::Shape(
            "rows of a matrix must all have the same length".to_string(),
        ));
    }
    let flat: Vec<f32> = rows.iter().flatten().copied().collect();
    Ok(Tensor::from_vec(flat, (n, cols), device)?)
}

fn column(weights: &Tensor, rows: usize, what: &str) -> PidsimResult<Tensor> {
    let weights = ensure_f32(weights)?;
    let dims = weights.dims().to_vec();
    let reshaped = match dims.as_slice() {
        [n] if *n == rows => weights.reshape((rows, 1))?,
        [n, 1] if *n == rows => weights,
        dims => {
            return Err(PidsimError::shape_error(
                &format!("[{}] or [{}, 1] for {}", rows, rows, what),
                &format!("{:?}", dims),
                None,
            ))
        }
    };
    Ok(reshaped)
}

fn rank_error(what: &str, t: &Tensor) -> PidsimError {
    PidsimError::shape_error(
        &format!("a 2-D tensor for {}", what),
        &format!("{:?}", t.dims()),
        None,
    )
}
