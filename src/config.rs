//! Configuration of models, optimisation and training sessions
//!
//! Every section can be built in code or read from a JSON document.
//! Integer hyper-parameters are coerced the lenient way: an integral float
//! or a numeric string is accepted, a fractional value is rejected.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PidsimError, PidsimResult};
use crate::nn::layers::{mlp_specs, LayerSpec};
use crate::nn::losses::{LossKind, DEFAULT_GRAD_PENALTY};
use crate::nn::losses::adversarial::DEFAULT_INSTANCE_NOISE;
use crate::preprocessing::ScalingStrategy;
use crate::training::optimizers::OptimizerConfig;
use crate::training::reweighter::ReweighterConfig;
use crate::training::schedulers::SchedulerConfig;

/// Lenient deserializers for numeric hyper-parameters
pub mod coerce {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    struct CountVisitor;

    impl<'de> Visitor<'de> for CountVisitor {
        type Value = usize;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a non-negative integer, a float or a numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<usize, E> {
            usize::try_from(v).map_err(E::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<usize, E> {
            if v < 0 {
                return Err(E::custom(format!("expected a positive integer, got {}", v)));
            }
            self.visit_u64(v as u64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<usize, E> {
            if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
                return Err(E::custom(format!("expected a positive integer, got {}", v)));
            }
            Ok(v as usize)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<usize, E> {
            let trimmed = v.trim();
            if let Ok(int) = trimmed.parse::<i64>() {
                return self.visit_i64(int);
            }
            match trimmed.parse::<f64>() {
                Ok(float) => self.visit_f64(float),
                Err(_) => Err(E::custom(format!("`{}` is not a number", v))),
            }
        }
    }

    /// Integer that also accepts floats and numeric strings
    pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
        deserializer.deserialize_any(CountVisitor)
    }

    struct RealVisitor;

    impl<'de> Visitor<'de> for RealVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or a numeric string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            v.trim()
                .parse::<f64>()
                .map_err(|_| E::custom(format!("`{}` is not a number", v)))
        }
    }

    /// Float that also accepts numeric strings
    pub fn real<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        deserializer.deserialize_any(RealVisitor)
    }
}

fn default_latent_dim() -> usize {
    64
}

fn default_hidden_layers() -> Vec<LayerSpec> {
    mlp_specs(5, 128, 0.1)
}

/// Architecture of the adversarial model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(deserialize_with = "coerce::count")]
    pub x_dim: usize,
    #[serde(deserialize_with = "coerce::count")]
    pub y_dim: usize,
    #[serde(default = "default_latent_dim", deserialize_with = "coerce::count")]
    pub latent_dim: usize,
    #[serde(default)]
    pub loss: LossKind,
    /// Hidden layers of the discriminator; the head depends on `loss`
    #[serde(default = "default_hidden_layers")]
    pub discriminator: Vec<LayerSpec>,
    /// Hidden layers of the generator; the head is linear with `y_dim` units
    #[serde(default = "default_hidden_layers")]
    pub generator: Vec<LayerSpec>,
    /// Hidden layers of the optional auxiliary classifier
    #[serde(default)]
    pub classifier: Option<Vec<LayerSpec>>,
}

impl ModelConfig {
    pub fn new(x_dim: usize, y_dim: usize) -> Self {
        Self {
            x_dim,
            y_dim,
            latent_dim: default_latent_dim(),
            loss: LossKind::default(),
            discriminator: default_hidden_layers(),
            generator: default_hidden_layers(),
            classifier: None,
        }
    }

    pub fn validate(&self) -> PidsimResult<()> {
        for (name, value) in [
            ("x_dim", self.x_dim),
            ("y_dim", self.y_dim),
            ("latent_dim", self.latent_dim),
        ] {
            if value == 0 {
                return Err(PidsimError::invalid_parameter(
                    name,
                    value,
                    "should be a positive integer",
                ));
            }
        }
        self.loss.validate()?;
        self.discriminator
            .iter()
            .chain(self.generator.iter())
            .chain(self.classifier.iter().flatten())
            .try_for_each(|spec| spec.validate())
    }
}

fn default_updates() -> usize {
    1
}

fn default_grad_penalty() -> f64 {
    DEFAULT_GRAD_PENALTY
}

fn default_noise_std() -> f64 {
    DEFAULT_INSTANCE_NOISE
}

/// Optimisation settings bound to a model by `compile`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub d_optimizer: OptimizerConfig,
    pub g_optimizer: OptimizerConfig,
    #[serde(default)]
    pub c_optimizer: Option<OptimizerConfig>,
    #[serde(default = "default_updates", deserialize_with = "coerce::count")]
    pub d_updt_per_batch: usize,
    #[serde(default = "default_updates", deserialize_with = "coerce::count")]
    pub g_updt_per_batch: usize,
    /// Ignored by the standard GAN
    #[serde(default = "default_grad_penalty", deserialize_with = "coerce::real")]
    pub grad_penalty: f64,
    /// Instance noise of the standard GAN
    #[serde(default = "default_noise_std", deserialize_with = "coerce::real")]
    pub noise_std: f64,
}

impl CompileConfig {
    pub fn new(d_optimizer: OptimizerConfig, g_optimizer: OptimizerConfig) -> Self {
        Self {
            d_optimizer,
            g_optimizer,
            c_optimizer: None,
            d_updt_per_batch: default_updates(),
            g_updt_per_batch: default_updates(),
            grad_penalty: default_grad_penalty(),
            noise_std: default_noise_std(),
        }
    }

    pub fn with_classifier_optimizer(mut self, c_optimizer: OptimizerConfig) -> Self {
        self.c_optimizer = Some(c_optimizer);
        self
    }

    pub fn with_updates(mut self, d_updt_per_batch: usize, g_updt_per_batch: usize) -> Self {
        self.d_updt_per_batch = d_updt_per_batch;
        self.g_updt_per_batch = g_updt_per_batch;
        self
    }

    pub fn with_grad_penalty(mut self, grad_penalty: f64) -> Self {
        self.grad_penalty = grad_penalty;
        self
    }

    pub fn validate(&self) -> PidsimResult<()> {
        for (name, value) in [
            ("d_updt_per_batch", self.d_updt_per_batch),
            ("g_updt_per_batch", self.g_updt_per_batch),
        ] {
            if value == 0 {
                return Err(PidsimError::invalid_parameter(
                    name,
                    value,
                    "should be a positive integer",
                ));
            }
        }
        self.d_optimizer.validate()?;
        self.g_optimizer.validate()?;
        if let Some(c_optimizer) = &self.c_optimizer {
            c_optimizer.validate()?;
        }
        Ok(())
    }
}

fn default_subsample_size() -> usize {
    500_000
}

fn enabled() -> bool {
    true
}

/// Preprocessing applied by `GanTrainer::prepare_dataset`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default)]
    pub x_preprocessing: Option<ScalingStrategy>,
    #[serde(default)]
    pub y_preprocessing: Option<ScalingStrategy>,
    /// Columns to transform; all columns when absent
    #[serde(default)]
    pub x_vars_to_preprocess: Option<Vec<String>>,
    #[serde(default)]
    pub y_vars_to_preprocess: Option<Vec<String>>,
    #[serde(default = "default_subsample_size", deserialize_with = "coerce::count")]
    pub subsample_size: usize,
    /// Learn `w_X` with the reweighting network
    #[serde(default = "enabled")]
    pub enable_reweights: bool,
    #[serde(default = "enabled")]
    pub save_transformer: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            x_preprocessing: None,
            y_preprocessing: None,
            x_vars_to_preprocess: None,
            y_vars_to_preprocess: None,
            subsample_size: default_subsample_size(),
            enable_reweights: true,
            save_transformer: true,
        }
    }
}

impl DatasetConfig {
    pub fn validate(&self) -> PidsimResult<()> {
        if self.subsample_size == 0 {
            return Err(PidsimError::invalid_parameter(
                "subsample_size",
                0,
                "should be a positive integer",
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    1
}

fn default_num_epochs() -> usize {
    1
}

/// Settings of `GanTrainer::train_model`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Rows per half-batch; the model sees batches twice as large
    #[serde(default = "default_batch_size", deserialize_with = "coerce::count")]
    pub batch_size: usize,
    #[serde(default = "default_num_epochs", deserialize_with = "coerce::count")]
    pub num_epochs: usize,
    #[serde(default, deserialize_with = "coerce::real")]
    pub validation_split: f64,
    #[serde(default = "enabled")]
    pub save_model: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_epochs: default_num_epochs(),
            validation_split: 0.0,
            save_model: true,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> PidsimResult<()> {
        if self.batch_size == 0 {
            return Err(PidsimError::invalid_parameter("batch_size", 0, "should be a positive integer"));
        }
        if self.num_epochs == 0 {
            return Err(PidsimError::invalid_parameter("num_epochs", 0, "should be a positive integer"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(PidsimError::invalid_parameter(
                "validation_split",
                self.validation_split,
                "should lie in [0, 1)",
            ));
        }
        Ok(())
    }
}

/// Complete description of a training session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub model: ModelConfig,
    pub compile: CompileConfig,
    #[serde(default)]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub training: TrainConfig,
    #[serde(default)]
    pub reweighter: ReweighterConfig,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ExperimentConfig {
    pub fn from_json_str(content: &str) -> PidsimResult<Self> {
        let config: ExperimentConfig = serde_json::from_str(content)
            .map_err(|e| PidsimError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> PidsimResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PidsimError::Io(format!("Failed to read config file {}: {}", path.display(), e)))?;
        let config = Self::from_json_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> PidsimResult<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> PidsimResult<()> {
        self.model.validate()?;
        self.compile.validate()?;
        if let Some(scheduler) = &self.scheduler {
            scheduler.validate()?;
        }
        self.dataset.validate()?;
        self.training.validate()?;
        self.reweighter.validate()
    }
}

/// Builder for an [`ExperimentConfig`]
pub struct ConfigBuilder {
    config: ExperimentConfig,
}

impl ConfigBuilder {
    pub fn new(x_dim: usize, y_dim: usize) -> Self {
        Self {
            config: ExperimentConfig {
                model: ModelConfig::new(x_dim, y_dim),
                compile: CompileConfig::new(OptimizerConfig::default(), OptimizerConfig::default()),
                scheduler: None,
                dataset: DatasetConfig::default(),
                training: TrainConfig::default(),
                reweighter: ReweighterConfig::default(),
                seed: None,
            },
        }
    }

    pub fn model(mut self, f: impl FnOnce(&mut ModelConfig)) -> Self {
        f(&mut self.config.model);
        self
    }

    pub fn compile(mut self, f: impl FnOnce(&mut CompileConfig)) -> Self {
        f(&mut self.config.compile);
        self
    }

    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.config.scheduler = Some(scheduler);
        self
    }

    pub fn dataset(mut self, f: impl FnOnce(&mut DatasetConfig)) -> Self {
        f(&mut self.config.dataset);
        self
    }

    pub fn training(mut self, f: impl FnOnce(&mut TrainConfig)) -> Self {
        f(&mut self.config.training);
        self
    }

    pub fn reweighter(mut self, f: impl FnOnce(&mut ReweighterConfig)) -> Self {
        f(&mut self.config.reweighter);
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    pub fn build(self) -> PidsimResult<ExperimentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new(3, 1)
            .model(|m| {
                m.latent_dim = 4;
                m.loss = LossKind::WassersteinGp;
            })
            .compile(|c| c.d_updt_per_batch = 5)
            .training(|t| t.batch_size = 256)
            .build()
            .unwrap();

        assert_eq!(config.model.latent_dim, 4);
        assert_eq!(config.compile.d_updt_per_batch, 5);
        assert_eq!(config.training.batch_size, 256);
    }

    #[test]
    fn test_zero_updates_rejected() {
        let result = ConfigBuilder::new(3, 1)
            .compile(|c| c.g_updt_per_batch = 0)
            .build();
        assert!(matches!(result, Err(PidsimError::Configuration(_))));
    }

    #[test]
    fn test_lenient_integers() {
        let json = r#"{
            "model": {"x_dim": 3.0, "y_dim": "2", "latent_dim": "8.0"},
            "compile": {
                "d_optimizer": {"type": "rmsprop", "learning_rate": 0.001},
                "g_optimizer": {"type": "adam", "learning_rate": "0.0005"},
                "d_updt_per_batch": "5",
                "grad_penalty": "10"
            }
        }"#;
        // "0.0005" is a string for a plain f64 field and must be rejected
        assert!(ExperimentConfig::from_json_str(json).is_err());

        let json = json.replace(r#""learning_rate": "0.0005""#, r#""learning_rate": 0.0005"#);
        let config = ExperimentConfig::from_json_str(&json).unwrap();
        assert_eq!(config.model.x_dim, 3);
        assert_eq!(config.model.y_dim, 2);
        assert_eq!(config.model.latent_dim, 8);
        assert_eq!(config.compile.d_updt_per_batch, 5);
        assert_eq!(config.compile.g_updt_per_batch, 1);
        assert_eq!(config.compile.grad_penalty, 10.0);
    }

    #[test]
    fn test_fractional_counts_rejected() {
        for latent in ["3.5", r#""3.5""#, "0.2"] {
            let json = format!(
                r#"{{"model": {{"x_dim": 3, "y_dim": 1, "latent_dim": {}}},
                    "compile": {{"d_optimizer": {{"type": "sgd", "learning_rate": 0.1}},
                                "g_optimizer": {{"type": "sgd", "learning_rate": 0.1}}}}}}"#,
                latent
            );
            assert!(
                matches!(ExperimentConfig::from_json_str(&json), Err(PidsimError::Configuration(_))),
                "latent_dim {} was accepted",
                latent
            );
        }
        let model: ModelConfig = serde_json::from_str(r#"{"x_dim": 3, "y_dim": 1, "latent_dim": 4.0}"#).unwrap();
        assert_eq!(model.latent_dim, 4);
    }

    #[test]
    fn test_negative_and_unparsable_values() {
        let negative = r#"{"model": {"x_dim": -3, "y_dim": 1},
            "compile": {"d_optimizer": {"type": "sgd", "learning_rate": 0.1},
                        "g_optimizer": {"type": "sgd", "learning_rate": 0.1}}}"#;
        assert!(matches!(
            ExperimentConfig::from_json_str(negative),
            Err(PidsimError::Configuration(_))
        ));

        let garbage = negative.replace("-3", r#""three""#);
        assert!(ExperimentConfig::from_json_str(&garbage).is_err());
    }

    #[test]
    fn test_config_file_io() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("experiment.json");

        let config = ConfigBuilder::new(4, 2)
            .model(|m| m.loss = LossKind::cramer(16))
            .seed(7)
            .build()
            .unwrap();
        config.save_to_file(&config_path).unwrap();

        let loaded = ExperimentConfig::from_json_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }
}
