//! Per-column scaling of the input and output sets
//!
//! A [`ColumnTransformer`] is fitted on a subsample of a row-major matrix and
//! then applied to the whole matrix. Columns outside the selected subset pass
//! through untouched. Fitted transformers are stored as JSON so that a saved
//! generator can later be fed and read in physical units.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PidsimError, PidsimResult};

/// Maximum number of quantiles kept by the quantile strategy
pub const MAX_QUANTILES: usize = 1000;

/// Scaling strategy selected for a feature set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingStrategy {
    /// Map `[min, max]` onto `[0, 1]`
    #[serde(rename = "minmax")]
    MinMax,
    /// Zero mean and unit variance
    Standard,
    /// Empirical CDF, uniform output in `[0, 1]`
    Quantile,
}

impl ScalingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingStrategy::MinMax => "minmax",
            ScalingStrategy::Standard => "standard",
            ScalingStrategy::Quantile => "quantile",
        }
    }
}

/// Fitted scaling of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ColumnScaler {
    #[serde(rename = "minmax")]
    MinMax { min: f64, scale: f64 },
    Standard { mean: f64, std: f64 },
    /// `quantiles[k]` is the value at probability `k / (len - 1)`
    Quantile { quantiles: Vec<f64> },
}

impl ColumnScaler {
    fn fit(strategy: ScalingStrategy, values: &mut [f64]) -> Self {
        match strategy {
            ScalingStrategy::MinMax => {
                let min = values.iter().copied().fold(f64::INFINITY, f64::min);
                let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let range = max - min;
                ColumnScaler::MinMax {
                    min,
                    scale: if range > 0.0 { range } else { 1.0 },
                }
            }
            ScalingStrategy::Standard => {
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
                let std = var.sqrt();
                ColumnScaler::Standard {
                    mean,
                    std: if std > 0.0 { std } else { 1.0 },
                }
            }
            ScalingStrategy::Quantile => {
                values.sort_by(f64::total_cmp);
                let n_quantiles = values.len().min(MAX_QUANTILES);
                let quantiles = (0..n_quantiles)
                    .map(|k| {
                        let p = if n_quantiles > 1 {
                            k as f64 / (n_quantiles - 1) as f64
                        } else {
                            0.0
                        };
                        percentile(values, p)
                    })
                    .collect();
                ColumnScaler::Quantile { quantiles }
            }
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        match self {
            ColumnScaler::MinMax { min, scale } => (value - min) / scale,
            ColumnScaler::Standard { mean, std } => (value - mean) / std,
            ColumnScaler::Quantile { quantiles } => cdf(quantiles, value),
        }
    }

    pub fn inverse_transform(&self, value: f64) -> f64 {
        match self {
            ColumnScaler::MinMax { min, scale } => value * scale + min,
            ColumnScaler::Standard { mean, std } => value * std + mean,
            ColumnScaler::Quantile { quantiles } => inverse_cdf(quantiles, value),
        }
    }
}

/// Linear interpolation between the closest ranks of a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let pos = p * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn cdf(quantiles: &[f64], value: f64) -> f64 {
    let n = quantiles.len();
    if n < 2 {
        return 0.0;
    }
    if value <= quantiles[0] {
        return 0.0;
    }
    if value >= quantiles[n - 1] {
        return 1.0;
    }
    // first quantile strictly above `value`
    let hi = quantiles.partition_point(|q| *q <= value);
    let lo = hi - 1;
    let width = quantiles[hi] - quantiles[lo];
    let frac = if width > 0.0 { (value - quantiles[lo]) / width } else { 0.0 };
    (lo as f64 + frac) / (n - 1) as f64
}

fn inverse_cdf(quantiles: &[f64], p: f64) -> f64 {
    let n = quantiles.len();
    if n < 2 {
        return quantiles.first().copied().unwrap_or(0.0);
    }
    percentile(quantiles, p.clamp(0.0, 1.0))
}

/// Scalers for a subset of the columns of a feature matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformer {
    n_features: usize,
    strategy: Option<ScalingStrategy>,
    /// `(column index, scaler)` pairs, sorted by column
    scalers: Vec<(usize, ColumnScaler)>,
}

impl ColumnTransformer {
    /// Transformer that leaves every column untouched
    pub fn identity(n_features: usize) -> Self {
        Self {
            n_features,
            strategy: None,
            scalers: Vec::new(),
        }
    }

    /// Fit `strategy` on `rows`, restricted to `columns` when given
    pub fn fit(
        rows: &[Vec<f32>],
        strategy: ScalingStrategy,
        columns: Option<&[usize]>,
    ) -> PidsimResult<Self> {
        let n_features = match rows.first() {
            Some(row) => row.len(),
            None => {
                return Err(PidsimError::shape_error(
                    "at least one row",
                    "an empty matrix",
                    Some("feed data before fitting a transformer"),
                ))
            }
        };
        check_width(rows, n_features)?;

        let mut selected: Vec<usize> = match columns {
            Some(columns) => columns.to_vec(),
            None => (0..n_features).collect(),
        };
        selected.sort_unstable();
        selected.dedup();
        if let Some(&col) = selected.iter().find(|&&col| col >= n_features) {
            return Err(PidsimError::invalid_parameter(
                "column",
                col,
                &format!("should be lower than {}", n_features),
            ));
        }

        let scalers = selected
            .into_iter()
            .map(|col| {
                let mut values: Vec<f64> = rows.iter().map(|row| row[col] as f64).collect();
                (col, ColumnScaler::fit(strategy, &mut values))
            })
            .collect::<Vec<_>>();
        debug!(
            "Fitted {} transformer on {} rows, {} of {} columns",
            strategy.as_str(),
            rows.len(),
            scalers.len(),
            n_features
        );
        Ok(Self {
            n_features,
            strategy: Some(strategy),
            scalers,
        })
    }

    /// Fit with the strategy of `strategy`, or the identity when `None`
    pub fn fit_or_identity(
        rows: &[Vec<f32>],
        n_features: usize,
        strategy: Option<ScalingStrategy>,
        columns: Option<&[usize]>,
    ) -> PidsimResult<Self> {
        match strategy {
            Some(strategy) => Self::fit(rows, strategy, columns),
            None => Ok(Self::identity(n_features)),
        }
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn strategy(&self) -> Option<ScalingStrategy> {
        self.strategy
    }

    pub fn is_identity(&self) -> bool {
        self.scalers.is_empty()
    }

    /// Indices of the transformed columns
    pub fn columns(&self) -> Vec<usize> {
        self.scalers.iter().map(|(col, _)| *col).collect()
    }

    pub fn transform(&self, rows: &[Vec<f32>]) -> PidsimResult<Vec<Vec<f32>>> {
        self.apply(rows, ColumnScaler::transform)
    }

    pub fn inverse_transform(&self, rows: &[Vec<f32>]) -> PidsimResult<Vec<Vec<f32>>> {
        self.apply(rows, ColumnScaler::inverse_transform)
    }

    fn apply(
        &self,
        rows: &[Vec<f32>],
        f: fn(&ColumnScaler, f64) -> f64,
    ) -> PidsimResult<Vec<Vec<f32>>> {
        check_width(rows, self.n_features)?;
        Ok(rows
            .iter()
            .map(|row| {
                let mut out = row.clone();
                for (col, scaler) in &self.scalers {
                    out[*col] = f(scaler, row[*col] as f64) as f32;
                }
                out
            })
            .collect())
    }

    pub fn save(&self, path: &Path) -> PidsimResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Transformer exported to {}", path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> PidsimResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PidsimError::Io(format!("Failed to read transformer {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Indices of `selection` within `vars`; every column when `selection` is `None`
pub fn column_indices(vars: &[String], selection: Option<&[String]>) -> PidsimResult<Option<Vec<usize>>> {
    let Some(selection) = selection else {
        return Ok(None);
    };
    selection
        .iter()
        .map(|name| {
            vars.iter().position(|var| var == name).ok_or_else(|| {
                PidsimError::Configuration(format!(
                    "`{}` is not one of the variables {:?}",
                    name, vars
                ))
            })
        })
        .collect::<PidsimResult<Vec<_>>>()
        .map(Some)
}

fn check_width(rows: &[Vec<f32>], n_features: usize) -> PidsimResult<()> {
    match rows.iter().position(|row| row.len() != n_features) {
        Some(idx) => Err(PidsimError::shape_error(
            &format!("{} columns", n_features),
            &format!("{} columns in row {}", rows[idx].len(), idx),
            None,
        )),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn rows() -> Vec<Vec<f32>> {
        (0..11).map(|i| vec![i as f32, 2.0 * i as f32 - 5.0, 7.0]).collect()
    }

    #[test]
    fn test_minmax_maps_to_unit_interval() {
        let t = ColumnTransformer::fit(&rows(), ScalingStrategy::MinMax, None).unwrap();
        let scaled = t.transform(&rows()).unwrap();
        assert_relative_eq!(scaled[0][0], 0.0);
        assert_relative_eq!(scaled[10][1], 1.0);
        // constant column keeps a unit scale
        assert_relative_eq!(scaled[3][2], 0.0);
    }

    #[test]
    fn test_standard_inverse_restores_values() {
        let t = ColumnTransformer::fit(&rows(), ScalingStrategy::Standard, None).unwrap();
        let scaled = t.transform(&rows()).unwrap();
        let mean: f32 = scaled.iter().map(|r| r[1]).sum::<f32>() / scaled.len() as f32;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-5);
        let restored = t.inverse_transform(&scaled).unwrap();
        for (a, b) in restored.iter().zip(rows()) {
            assert_relative_eq!(a[1], b[1], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_quantile_is_uniform_on_fit_data() {
        let t = ColumnTransformer::fit(&rows(), ScalingStrategy::Quantile, Some(&[0])).unwrap();
        let scaled = t.transform(&rows()).unwrap();
        for (i, row) in scaled.iter().enumerate() {
            assert_relative_eq!(row[0], i as f32 / 10.0, epsilon = 1e-6);
            assert_eq!(row[1], rows()[i][1]);
        }
        assert_eq!(t.transform(&[vec![-3.0, 0.0, 0.0]]).unwrap()[0][0], 0.0);
        assert_eq!(t.transform(&[vec![30.0, 0.0, 0.0]]).unwrap()[0][0], 1.0);
        assert_relative_eq!(t.inverse_transform(&[vec![0.25, 0.0, 0.0]]).unwrap()[0][0], 2.5);
    }

    #[test]
    fn test_identity_and_width_checks() {
        let t = ColumnTransformer::identity(3);
        assert!(t.is_identity());
        assert_eq!(t.transform(&rows()).unwrap(), rows());
        assert!(matches!(t.transform(&[vec![1.0]]), Err(PidsimError::Shape(_))));
        assert!(ColumnTransformer::fit(&rows(), ScalingStrategy::MinMax, Some(&[5])).is_err());
        assert!(ColumnTransformer::fit(&[], ScalingStrategy::MinMax, None).is_err());
    }

    #[test]
    fn test_column_indices() {
        let vars: Vec<String> = ["p", "eta", "nTracks"].iter().map(|s| s.to_string()).collect();
        assert_eq!(column_indices(&vars, None).unwrap(), None);
        let picked = column_indices(&vars, Some(&["nTracks".to_string(), "p".to_string()])).unwrap();
        assert_eq!(picked, Some(vec![2, 0]));
        assert!(column_indices(&vars, Some(&["pt".to_string()])).is_err());
    }

    #[test]
    fn test_transformer_file_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transform_X.json");
        let t = ColumnTransformer::fit(&rows(), ScalingStrategy::Quantile, None).unwrap();
        t.save(&path).unwrap();
        assert_eq!(ColumnTransformer::load(&path).unwrap(), t);
        assert!(ColumnTransformer::load(&dir.path().join("missing.json")).is_err());
    }
}
