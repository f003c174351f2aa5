//! In-memory data chunks and batching for adversarial training
//!
//! A [`DataChunk`] holds host-side rows as they come out of the ingestion
//! layer. [`TensorDataset`] uploads them once to the execution device and
//! serves fixed-size [`Batch`]es with the remainder dropped.

use candle_core::{Device, Tensor};
use tracing::debug;

use crate::error::{PidsimError, PidsimResult};
use crate::gan::samples::{matrix, Batch};
use crate::tensor::Sampler;

/// Conditions `X`, targets `Y` and optional event weights `w`
#[derive(Debug, Clone, PartialEq)]
pub struct DataChunk {
    x_vars: Vec<String>,
    y_vars: Vec<String>,
    w_var: Option<String>,
    x: Vec<Vec<f32>>,
    y: Vec<Vec<f32>>,
    w: Option<Vec<f32>>,
}

impl DataChunk {
    pub fn new(
        x_vars: Vec<String>,
        y_vars: Vec<String>,
        x: Vec<Vec<f32>>,
        y: Vec<Vec<f32>>,
    ) -> PidsimResult<Self> {
        if x_vars.is_empty() || y_vars.is_empty() {
            return Err(PidsimError::Configuration(
                "both the input and the output set need at least one variable".to_string(),
            ));
        }
        check_rows("X", &x, x_vars.len())?;
        check_rows("Y", &y, y_vars.len())?;
        if x.len() != y.len() {
            return Err(PidsimError::shape_error(
                &format!("{} rows of Y", x.len()),
                &format!("{} rows", y.len()),
                Some("X and Y must describe the same events"),
            ));
        }
        Ok(Self {
            x_vars,
            y_vars,
            w_var: None,
            x,
            y,
            w: None,
        })
    }

    /// Attach the per-event weights stored in the branch `w_var`
    pub fn with_weights(mut self, w_var: &str, w: Vec<f32>) -> PidsimResult<Self> {
        if w.len() != self.rows() {
            return Err(PidsimError::shape_error(
                &format!("{} weights", self.rows()),
                &format!("{}", w.len()),
                None,
            ));
        }
        if let Some(idx) = w.iter().position(|v| !v.is_finite()) {
            return Err(PidsimError::invalid_parameter(
                "weight",
                w[idx],
                &format!("should be finite (event {})", idx),
            ));
        }
        self.w_var = Some(w_var.to_string());
        self.w = Some(w);
        Ok(self)
    }

    pub fn rows(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn x_vars(&self) -> &[String] {
        &self.x_vars
    }

    pub fn y_vars(&self) -> &[String] {
        &self.y_vars
    }

    pub fn w_var(&self) -> Option<&str> {
        self.w_var.as_deref()
    }

    pub fn x(&self) -> &[Vec<f32>] {
        &self.x
    }

    pub fn y(&self) -> &[Vec<f32>] {
        &self.y
    }

    pub fn w(&self) -> Option<&[f32]> {
        self.w.as_deref()
    }

    pub fn has_weights(&self) -> bool {
        self.w.is_some()
    }

    /// Permute the events in place
    pub fn shuffle(&mut self, sampler: &mut Sampler) {
        let order = sampler.permutation(self.rows());
        self.x = order.iter().map(|&i| self.x[i].clone()).collect();
        self.y = order.iter().map(|&i| self.y[i].clone()).collect();
        if let Some(w) = &self.w {
            self.w = Some(order.iter().map(|&i| w[i]).collect());
        }
    }

    /// First `n` events, or all of them when fewer
    pub fn head(&self, n: usize) -> Self {
        let n = n.min(self.rows());
        Self {
            x_vars: self.x_vars.clone(),
            y_vars: self.y_vars.clone(),
            w_var: self.w_var.clone(),
            x: self.x[..n].to_vec(),
            y: self.y[..n].to_vec(),
            w: self.w.as_ref().map(|w| w[..n].to_vec()),
        }
    }
}

fn check_rows(name: &str, rows: &[Vec<f32>], width: usize) -> PidsimResult<()> {
    match rows.iter().position(|row| row.len() != width) {
        Some(idx) => Err(PidsimError::shape_error(
            &format!("{} columns in {}", width, name),
            &format!("{} columns in row {}", rows[idx].len(), idx),
            None,
        )),
        None => Ok(()),
    }
}

/// Device-resident `(X, Y, w_X, w_Y)` arrays
#[derive(Debug, Clone)]
pub struct TensorDataset {
    x: Tensor,
    y: Tensor,
    weights: Option<(Tensor, Tensor)>,
}

impl TensorDataset {
    pub fn from_rows(
        x: &[Vec<f32>],
        y: &[Vec<f32>],
        weights: Option<(&[f32], &[f32])>,
        device: &Device,
    ) -> PidsimResult<Self> {
        if x.len() != y.len() {
            return Err(PidsimError::shape_error(
                &format!("{} rows of Y", x.len()),
                &format!("{} rows", y.len()),
                None,
            ));
        }
        let weights = match weights {
            Some((w_x, w_y)) => {
                for (name, w) in [("w_X", w_x), ("w_Y", w_y)] {
                    if w.len() != x.len() {
                        return Err(PidsimError::shape_error(
                            &format!("{} entries in {}", x.len(), name),
                            &format!("{}", w.len()),
                            None,
                        ));
                    }
                }
                Some((
                    Tensor::from_slice(w_x, (w_x.len(), 1), device)?,
                    Tensor::from_slice(w_y, (w_y.len(), 1), device)?,
                ))
            }
            None => None,
        };
        Ok(Self {
            x: matrix(x, device)?,
            y: matrix(y, device)?,
            weights,
        })
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

    /// Events `[start, start + len)`
    pub fn slice(&self, start: usize, len: usize) -> PidsimResult<Self> {
        Ok(Self {
            x: self.x.narrow(0, start, len)?,
            y: self.y.narrow(0, start, len)?,
            weights: match &self.weights {
                Some((w_x, w_y)) => Some((w_x.narrow(0, start, len)?, w_y.narrow(0, start, len)?)),
                None => None,
            },
        })
    }

    /// `(first rows - n_val, last n_val)` split, as used for validation
    pub fn split_tail(&self, n_val: usize) -> PidsimResult<(Self, Self)> {
        let n_val = n_val.min(self.rows());
        let n_train = self.rows() - n_val;
        Ok((self.slice(0, n_train)?, self.slice(n_train, n_val)?))
    }

    /// Batches of exactly `batch_size` rows, in order
    pub fn batches(&self, batch_size: usize) -> PidsimResult<BatchIterator<'_>> {
        if batch_size == 0 {
            return Err(PidsimError::invalid_parameter("batch_size", 0, "should be a positive integer"));
        }
        let num_batches = self.rows() / batch_size;
        debug!(
            "{} batches of {} rows ({} rows dropped)",
            num_batches,
            batch_size,
            self.rows() % batch_size
        );
        Ok(BatchIterator {
            dataset: self,
            batch_size,
            position: 0,
            num_batches,
        })
    }
}

/// Iterator over the full batches of a [`TensorDataset`]
pub struct BatchIterator<'a> {
    dataset: &'a TensorDataset,
    batch_size: usize,
    position: usize,
    num_batches: usize,
}

impl BatchIterator<'_> {
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }
}

impl Iterator for BatchIterator<'_> {
    type Item = PidsimResult<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.num_batches {
            return None;
        }
        let start = self.position * self.batch_size;
        self.position += 1;
        Some(self.dataset.slice(start, self.batch_size).and_then(|part| match part.weights {
            Some((w_x, w_y)) => Batch::weighted(part.x, part.y, w_x, w_y),
            None => Batch::new(part.x, part.y),
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.num_batches - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for BatchIterator<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn chunk(rows: usize) -> DataChunk {
        let x = (0..rows).map(|i| vec![i as f32, -(i as f32)]).collect();
        let y = (0..rows).map(|i| vec![10.0 * i as f32]).collect();
        DataChunk::new(vars(&["p", "eta"]), vars(&["dllk"]), x, y)
            .unwrap()
            .with_weights("sw", (0..rows).map(|i| i as f32).collect())
            .unwrap()
    }

    #[test]
    fn test_chunk_validation() {
        assert!(DataChunk::new(vars(&["p"]), vars(&["y"]), vec![vec![1.0]], vec![]).is_err());
        assert!(DataChunk::new(vars(&["p"]), vars(&["y"]), vec![vec![1.0, 2.0]], vec![vec![0.0]]).is_err());
        assert!(chunk(3).with_weights("sw", vec![1.0]).is_err());
        assert!(chunk(2).with_weights("sw", vec![1.0, f32::NAN]).is_err());
        assert_eq!(chunk(4).w_var(), Some("sw"));
    }

    #[test]
    fn test_shuffle_keeps_rows_aligned() {
        let mut data = chunk(20);
        data.shuffle(&mut Sampler::seeded(9));
        assert_ne!(data.x()[..5], chunk(20).x()[..5]);
        for ((x, y), w) in data.x().iter().zip(data.y()).zip(data.w().unwrap()) {
            assert_eq!(y[0], 10.0 * x[0]);
            assert_eq!(*w, x[0]);
        }
        assert_eq!(data.head(3).rows(), 3);
        assert_eq!(data.head(100).rows(), 20);
    }

    #[test]
    fn test_batches_drop_remainder() {
        let data = chunk(11);
        let w = data.w().unwrap();
        let ds = TensorDataset::from_rows(data.x(), data.y(), Some((w, w)), &Device::Cpu).unwrap();
        let batches = ds.batches(4).unwrap();
        assert_eq!(batches.len(), 2);
        let batches: Vec<Batch> = batches.collect::<PidsimResult<_>>().unwrap();
        assert_eq!(batches[1].rows(), 4);
        assert_eq!(batches[1].x().to_vec2::<f32>().unwrap()[0], vec![4.0, -4.0]);
        assert!(batches[0].w_x().is_some());
        assert!(ds.batches(0).is_err());
    }

    #[test]
    fn test_split_tail() {
        let data = chunk(10);
        let ds = TensorDataset::from_rows(data.x(), data.y(), None, &Device::Cpu).unwrap();
        let (train, val) = ds.split_tail(3).unwrap();
        assert_eq!(train.rows(), 7);
        assert_eq!(val.rows(), 3);
        assert_eq!(val.y().to_vec2::<f32>().unwrap()[0], vec![70.0]);
    }
}
