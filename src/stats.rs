//! Two-sample compatibility tests on weighted, one-dimensional samples

use crate::error::{PidsimError, PidsimResult};

/// Pearson χ² between the normalised histograms of `x_obs` and `x_exp`.
///
/// Both samples are binned with `bins` equal-width bins over their common
/// range. Bins left empty by the expected sample do not contribute.
pub fn chi2_test(
    x_obs: &[f64],
    x_exp: &[f64],
    bins: usize,
    w_obs: Option<&[f64]>,
    w_exp: Option<&[f64]>,
) -> PidsimResult<f64> {
    if bins == 0 {
        return Err(PidsimError::invalid_parameter("bins", 0, "should be a positive integer"));
    }
    check_weights(x_obs, w_obs, "w_obs")?;
    check_weights(x_exp, w_exp, "w_exp")?;
    let (low, high) = common_range(x_obs, x_exp)?;

    let f = normalise(histogram(x_obs, w_obs, bins, low, high));
    let g = normalise(histogram(x_exp, w_exp, bins, low, high));
    Ok(f.iter()
        .zip(&g)
        .filter(|(_, g)| **g > 0.0)
        .map(|(f, g)| (f - g).powi(2) / g)
        .sum())
}

/// Weighted two-sample Kolmogorov-Smirnov statistic
pub fn ks_test(
    x_obs: &[f64],
    x_exp: &[f64],
    w_obs: Option<&[f64]>,
    w_exp: Option<&[f64]>,
) -> PidsimResult<f64> {
    check_weights(x_obs, w_obs, "w_obs")?;
    check_weights(x_exp, w_exp, "w_exp")?;
    if x_obs.is_empty() || x_exp.is_empty() {
        return Err(PidsimError::shape_error("two non-empty samples", "an empty sample", None));
    }
    let obs = sorted_pairs(x_obs, w_obs);
    let exp = sorted_pairs(x_exp, w_exp);
    let total_obs: f64 = obs.iter().map(|(_, w)| w).sum();
    let total_exp: f64 = exp.iter().map(|(_, w)| w).sum();
    if total_obs <= 0.0 || total_exp <= 0.0 {
        return Err(PidsimError::invalid_parameter(
            "weights",
            format!("{} / {}", total_obs, total_exp),
            "should sum to a positive value",
        ));
    }

    let (mut i, mut j) = (0, 0);
    let (mut cdf_obs, mut cdf_exp) = (0.0f64, 0.0f64);
    let mut statistic = 0.0f64;
    while i < obs.len() || j < exp.len() {
        let next = match (obs.get(i), exp.get(j)) {
            (Some(a), Some(b)) => a.0.min(b.0),
            (Some(a), None) => a.0,
            (None, Some(b)) => b.0,
            (None, None) => break,
        };
        // step both CDFs past every copy of `next`
        while i < obs.len() && obs[i].0 <= next {
            cdf_obs += obs[i].1 / total_obs;
            i += 1;
        }
        while j < exp.len() && exp[j].0 <= next {
            cdf_exp += exp[j].1 / total_exp;
            j += 1;
        }
        statistic = statistic.max((cdf_obs - cdf_exp).abs());
    }
    Ok(statistic)
}

/// KS statistic of every column of two row-major matrices
pub fn column_ks_tests(
    obs: &[Vec<f32>],
    exp: &[Vec<f32>],
    w_obs: Option<&[f64]>,
    w_exp: Option<&[f64]>,
) -> PidsimResult<Vec<f64>> {
    let width = obs.first().map(Vec::len).unwrap_or(0);
    (0..width)
        .map(|col| ks_test(&column(obs, col), &column(exp, col), w_obs, w_exp))
        .collect()
}

fn column(rows: &[Vec<f32>], col: usize) -> Vec<f64> {
    rows.iter().map(|row| row.get(col).copied().unwrap_or(f32::NAN) as f64).collect()
}

fn check_weights(values: &[f64], weights: Option<&[f64]>, name: &str) -> PidsimResult<()> {
    match weights {
        Some(w) if w.len() != values.len() => Err(PidsimError::shape_error(
            &format!("{} {}", values.len(), name),
            &format!("{}", w.len()),
            None,
        )),
        _ => Ok(()),
    }
}

fn common_range(a: &[f64], b: &[f64]) -> PidsimResult<(f64, f64)> {
    let (low, high) = a
        .iter()
        .chain(b)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    if low > high {
        return Err(PidsimError::shape_error("finite values", "no finite value", None));
    }
    Ok((low, high))
}

fn histogram(values: &[f64], weights: Option<&[f64]>, bins: usize, low: f64, high: f64) -> Vec<f64> {
    let mut counts = vec![0.0; bins];
    let width = (high - low) / bins as f64;
    for (idx, value) in values.iter().enumerate() {
        if !value.is_finite() {
            continue;
        }
        let bin = if width > 0.0 {
            (((value - low) / width) as usize).min(bins - 1)
        } else {
            0
        };
        counts[bin] += weights.map_or(1.0, |w| w[idx]);
    }
    counts
}

fn normalise(counts: Vec<f64>) -> Vec<f64> {
    let total: f64 = counts.iter().sum();
    if total == 0.0 {
        return counts;
    }
    counts.into_iter().map(|c| c / total).collect()
}

fn sorted_pairs(values: &[f64], weights: Option<&[f64]>) -> Vec<(f64, f64)> {
    let mut pairs: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(idx, v)| (*v, weights.map_or(1.0, |w| w[idx])))
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_identical_samples() {
        let a: Vec<f64> = (0..100).map(|i| i as f64 / 10.0).collect();
        assert_relative_eq!(chi2_test(&a, &a, 10, None, None).unwrap(), 0.0);
        assert_relative_eq!(ks_test(&a, &a, None, None).unwrap(), 0.0);
    }

    #[test]
    fn test_disjoint_samples() {
        let a = [0.0, 1.0, 2.0];
        let b = [10.0, 11.0, 12.0];
        assert_relative_eq!(ks_test(&a, &b, None, None).unwrap(), 1.0);
        // expected counts are empty where the observed ones live
        assert_relative_eq!(chi2_test(&a, &b, 4, None, None).unwrap(), 1.0);
    }

    #[test]
    fn test_weights_move_the_cdf() {
        let x = [0.0, 1.0];
        let ks = ks_test(&x, &x, Some(&[3.0, 1.0]), Some(&[1.0, 1.0])).unwrap();
        assert_relative_eq!(ks, 0.25);
        assert!(ks_test(&x, &x, Some(&[1.0]), None).is_err());
        assert!(ks_test(&x, &x, Some(&[0.0, 0.0]), None).is_err());
    }

    #[test]
    fn test_chi2_counts() {
        let obs = [0.1, 0.2, 0.8];
        let exp = [0.1, 0.8, 0.9];
        // f = [2/3, 1/3], g = [1/3, 2/3] over [0.1, 0.9] in two bins
        let chi2 = chi2_test(&obs, &exp, 2, None, None).unwrap();
        assert_relative_eq!(chi2, (1.0 / 9.0) / (1.0 / 3.0) + (1.0 / 9.0) / (2.0 / 3.0), epsilon = 1e-12);
        assert!(chi2_test(&obs, &exp, 0, None, None).is_err());
    }

    #[test]
    fn test_column_ks_tests() {
        let obs = vec![vec![0.0f32, 5.0], vec![1.0, 6.0]];
        let exp = vec![vec![0.0f32, 50.0], vec![1.0, 60.0]];
        let ks = column_ks_tests(&obs, &exp, None, None).unwrap();
        assert_relative_eq!(ks[0], 0.0);
        assert_relative_eq!(ks[1], 1.0);
    }
}
