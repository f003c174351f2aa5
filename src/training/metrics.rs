//! Training metrics and tracking

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{PidsimError, PidsimResult};

/// Scalar metrics reported by a training or test step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    scalars: HashMap<String, f64>,
}

impl TrainingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_scalar(&mut self, name: &str, value: f64) {
        self.scalars.insert(name.to_string(), value);
    }

    pub fn get_scalar(&self, name: &str) -> Option<f64> {
        self.scalars.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scalars.contains_key(name)
    }

    pub fn all_scalars(&self) -> &HashMap<String, f64> {
        &self.scalars
    }

    /// Metric names in alphabetical order
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.scalars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// One-line `name: value` rendering, sorted by name
    pub fn describe(&self) -> String {
        self.names()
            .into_iter()
            .map(|name| format!("{}: {:.4e}", name, self.scalars[name]))
            .collect::<Vec<_>>()
            .join(" - ")
    }
}

/// Running (optionally weighted) mean, reset explicitly
#[derive(Debug, Clone, PartialEq)]
pub struct MeanTracker {
    name: String,
    total: f64,
    weight: f64,
}

impl MeanTracker {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total: 0.0,
            weight: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn update(&mut self, value: f64) {
        self.total += value;
        self.weight += 1.0;
    }

    /// Accumulate `values` with per-value `weights`
    pub fn update_weighted(&mut self, values: &[f64], weights: &[f64]) -> PidsimResult<()> {
        if values.len() != weights.len() {
            return Err(PidsimError::shape_error(
                &format!("{} weights", values.len()),
                &format!("{}", weights.len()),
                None,
            ));
        }
        for (value, weight) in values.iter().zip(weights) {
            self.total += value * weight;
            self.weight += weight;
        }
        Ok(())
    }

    /// Current mean, 0 before the first update
    pub fn result(&self) -> f64 {
        if self.weight == 0.0 {
            0.0
        } else {
            self.total / self.weight
        }
    }

    pub fn reset(&mut self) {
        self.total = 0.0;
        self.weight = 0.0;
    }
}

/// Trackers owned by the adversarial model
#[derive(Debug, Clone, PartialEq)]
pub struct GanMetrics {
    pub mse: MeanTracker,
    pub d_loss: MeanTracker,
    pub g_loss: MeanTracker,
    pub c_loss: MeanTracker,
}

impl GanMetrics {
    pub fn new() -> Self {
        Self {
            mse: MeanTracker::new("mse"),
            d_loss: MeanTracker::new("d_loss"),
            g_loss: MeanTracker::new("g_loss"),
            c_loss: MeanTracker::new("c_loss"),
        }
    }

    pub fn reset(&mut self) {
        self.mse.reset();
        self.d_loss.reset();
        self.g_loss.reset();
        self.c_loss.reset();
    }
}

impl Default for GanMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-epoch record of the metrics of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingHistory {
    series: BTreeMap<String, Vec<f64>>,
    epoch_durations: Vec<Duration>,
    #[serde(skip, default = "Instant::now")]
    start_time: Instant,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self {
            series: BTreeMap::new(),
            epoch_durations: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Append every scalar of `metrics`, its name prefixed with `prefix`
    pub fn record(&mut self, metrics: &TrainingMetrics, prefix: &str) {
        for (name, value) in metrics.all_scalars() {
            self.series
                .entry(format!("{}{}", prefix, name))
                .or_default()
                .push(*value);
        }
    }

    pub fn record_epoch_duration(&mut self, duration: Duration) {
        self.epoch_durations.push(duration);
    }

    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.series.get(name).map(Vec::as_slice)
    }

    pub fn last(&self, name: &str) -> Option<f64> {
        self.series.get(name).and_then(|values| values.last().copied())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn num_epochs(&self) -> usize {
        self.epoch_durations.len()
    }

    pub fn epoch_durations(&self) -> &[Duration] {
        &self.epoch_durations
    }

    pub fn total_time(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn save(&self, path: &Path) -> PidsimResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> PidsimResult<Self> {
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

impl Default for TrainingHistory {
    fn default() -> Self {
        Self::new()
    }
}
