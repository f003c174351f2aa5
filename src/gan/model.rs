//! Adversarial model: networks, optimizers and the alternating update schedule
//!
//! One call to [`AdversarialModel::train_step`] runs `d_updt_per_batch`
//! discriminator updates, then `g_updt_per_batch` generator updates, then one
//! classifier update when a classifier is configured, and finally evaluates
//! the losses on fresh samples to update the running metrics.

use std::path::Path;

use candle_core::{Device, Tensor};
use tracing::{debug, info};

use crate::config::{CompileConfig, ModelConfig};
use crate::error::{PidsimError, PidsimResult};
use crate::gan::samples::{Batch, SampleArranger};
use crate::nn::losses::{classifier_loss, mean_squared_error, AdversarialLoss, LossKind, Reduction};
use crate::nn::layers::Layer;
use crate::nn::models::{OutputHead, Sequential, SequentialBuilder};
use crate::tensor::{streams, ExecutionContext, Sampler};
use crate::training::metrics::{GanMetrics, TrainingMetrics};
use crate::training::optimizers::Optimizer;

/// Networks that can be saved or loaded individually
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Player {
    Generator,
    Discriminator,
    Classifier,
}

impl Player {
    pub fn as_str(&self) -> &'static str {
        match self {
            Player::Generator => "generator",
            Player::Discriminator => "discriminator",
            Player::Classifier => "classifier",
        }
    }
}

/// State bound by `compile`
struct Compiled {
    loss: Box<dyn AdversarialLoss>,
    d_optimizer: Box<dyn Optimizer>,
    g_optimizer: Box<dyn Optimizer>,
    c_optimizer: Option<Box<dyn Optimizer>>,
    d_lr0: f64,
    g_lr0: f64,
    c_lr0: Option<f64>,
    d_updt_per_batch: usize,
    g_updt_per_batch: usize,
}

/// Conditional GAN with an optional auxiliary classifier
pub struct AdversarialModel {
    x_dim: usize,
    y_dim: usize,
    kind: LossKind,
    arranger: SampleArranger,
    discriminator: Sequential,
    generator: Sequential,
    classifier: Option<Sequential>,
    sampler: Sampler,
    device: Device,
    compiled: Option<Compiled>,
    metrics: GanMetrics,
}

impl AdversarialModel {
    /// Build the networks; weights are drawn from the context seed when set
    pub fn new(config: &ModelConfig, ctx: &ExecutionContext) -> PidsimResult<Self> {
        Self::build(config, ctx, None)
    }

    /// Build the networks with `layers` placed in front of the configured
    /// hidden layers of `player`.
    ///
    /// The layers keep their variables and trainable flags, so a frozen layer
    /// is never touched by the optimizer bound in `compile`.
    pub fn with_pretrained(
        config: &ModelConfig,
        ctx: &ExecutionContext,
        player: Player,
        layers: Vec<Layer>,
    ) -> PidsimResult<Self> {
        if player == Player::Classifier && config.classifier.is_none() {
            return Err(PidsimError::Configuration(
                "pretrained classifier layers given but no classifier is configured".to_string(),
            ));
        }
        Self::build(config, ctx, Some((player, layers)))
    }

    fn build(
        config: &ModelConfig,
        ctx: &ExecutionContext,
        mut pretrained: Option<(Player, Vec<Layer>)>,
    ) -> PidsimResult<Self> {
        config.validate()?;
        let device = ctx.device().clone();
        let mut init = ctx.sampler(streams::WEIGHT_INIT);
        let mut base_for = |player: Player| match pretrained.take() {
            Some((target, layers)) if target == player => {
                debug!("Placing {} pretrained layers in the {}", layers.len(), player.as_str());
                layers
            }
            other => {
                pretrained = other;
                Vec::new()
            }
        };

        let discriminator = SequentialBuilder::new("discriminator", config.x_dim + config.y_dim)
            .pretrained(base_for(Player::Discriminator))
            .layers(config.discriminator.clone())
            .build(config.loss.critic_head(), &mut init, &device)?;
        let generator = SequentialBuilder::new("generator", config.x_dim + config.latent_dim)
            .pretrained(base_for(Player::Generator))
            .layers(config.generator.clone())
            .build(OutputHead::linear(config.y_dim), &mut init, &device)?;
        let classifier = match &config.classifier {
            Some(specs) => Some(
                SequentialBuilder::new("classifier", config.x_dim + config.y_dim)
                    .pretrained(base_for(Player::Classifier))
                    .layers(specs.clone())
                    .build(OutputHead::sigmoid(), &mut init, &device)?,
            ),
            None => None,
        };

        info!(
            "Built {} model: discriminator {} params, generator {} params{}",
            config.loss.loss_name(),
            discriminator.num_parameters(),
            generator.num_parameters(),
            classifier
                .as_ref()
                .map(|c| format!(", classifier {} params", c.num_parameters()))
                .unwrap_or_default()
        );

        Ok(Self {
            x_dim: config.x_dim,
            y_dim: config.y_dim,
            kind: config.loss,
            arranger: SampleArranger::new(config.latent_dim),
            discriminator,
            generator,
            classifier,
            sampler: ctx.sampler(streams::LATENT_NOISE),
            device,
            compiled: None,
            metrics: GanMetrics::new(),
        })
    }

    /// Bind optimizers, update counts and loss hyper-parameters
    pub fn compile(&mut self, config: &CompileConfig) -> PidsimResult<()> {
        config.validate()?;
        let loss = self.kind.create_loss(config.grad_penalty, config.noise_std)?;

        let c_optimizer = match (&self.classifier, &config.c_optimizer) {
            (Some(classifier), Some(c_config)) => {
                Some(c_config.create_optimizer(classifier.vars())?)
            }
            (Some(_), None) => {
                return Err(PidsimError::Configuration(
                    "a classifier is configured but no classifier optimizer was given".to_string(),
                ))
            }
            (None, Some(_)) => {
                debug!("Classifier optimizer ignored: the model has no classifier");
                None
            }
            (None, None) => None,
        };

        self.compiled = Some(Compiled {
            loss,
            d_optimizer: config.d_optimizer.create_optimizer(self.discriminator.vars())?,
            g_optimizer: config.g_optimizer.create_optimizer(self.generator.vars())?,
            c_lr0: c_optimizer.as_ref().map(|opt| opt.learning_rate()),
            c_optimizer,
            d_lr0: config.d_optimizer.learning_rate(),
            g_lr0: config.g_optimizer.learning_rate(),
            d_updt_per_batch: config.d_updt_per_batch,
            g_updt_per_batch: config.g_updt_per_batch,
        });
        self.metrics.reset();
        info!(
            "Compiled {} model ({} d-updates, {} g-updates per batch)",
            self.kind.loss_name(),
            config.d_updt_per_batch,
            config.g_updt_per_batch
        );
        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Alternating updates on one batch, then metrics on fresh samples
    pub fn train_step(&mut self, batch: &Batch) -> PidsimResult<TrainingMetrics> {
        self.check_batch(batch)?;
        let compiled = self
            .compiled
            .as_mut()
            .ok_or_else(|| PidsimError::not_compiled("train_step"))?;

        for _ in 0..compiled.d_updt_per_batch {
            let (reference, generated) =
                self.arranger.arrange(batch, &self.generator, &mut self.sampler)?;
            let d_loss = compiled.loss.discriminator_loss(
                &self.discriminator,
                &generated,
                &reference,
                &mut self.sampler,
            )?;
            compiled.d_optimizer.step(&d_loss.backward()?)?;
        }

        for _ in 0..compiled.g_updt_per_batch {
            let (reference, generated) =
                self.arranger.arrange(batch, &self.generator, &mut self.sampler)?;
            let g_loss = compiled.loss.generator_loss(
                &self.discriminator,
                &generated,
                &reference,
                &mut self.sampler,
            )?;
            compiled.g_optimizer.step(&g_loss.backward()?)?;
        }

        if let (Some(classifier), Some(c_optimizer)) =
            (&self.classifier, compiled.c_optimizer.as_mut())
        {
            let (reference, generated) =
                self.arranger.arrange(batch, &self.generator, &mut self.sampler)?;
            let c_loss = classifier_loss(classifier, &generated, &reference)?;
            c_optimizer.step(&c_loss.backward()?)?;
        }

        self.evaluate(batch)
    }

    /// Metrics on one batch, without touching any weight
    pub fn test_step(&mut self, batch: &Batch) -> PidsimResult<TrainingMetrics> {
        self.check_batch(batch)?;
        if self.compiled.is_none() {
            return Err(PidsimError::not_compiled("test_step"));
        }
        self.evaluate(batch)
    }

    fn evaluate(&mut self, batch: &Batch) -> PidsimResult<TrainingMetrics> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| PidsimError::not_compiled("evaluate"))?;

        let (reference, generated) =
            self.arranger.arrange(batch, &self.generator, &mut self.sampler)?;
        let d_loss = scalar(&compiled.loss.discriminator_loss(
            &self.discriminator,
            &generated,
            &reference,
            &mut self.sampler,
        )?)?;
        let g_loss = scalar(&compiled.loss.generator_loss(
            &self.discriminator,
            &generated,
            &reference,
            &mut self.sampler,
        )?)?;
        let threshold = match compiled
            .loss
            .threshold(&self.discriminator, &reference, &mut self.sampler)?
        {
            Some(th) => scalar(&th)?,
            None => 0.0,
        };
        self.metrics.d_loss.update(d_loss + threshold);
        self.metrics.g_loss.update(g_loss - threshold);

        let y_gen = self.arranger.generate(&self.generator, batch.x(), &mut self.sampler)?;
        let squared = column_values(&mean_squared_error(&y_gen, batch.y(), Reduction::None)?)?;
        let weights = match batch.w_y() {
            Some(w_y) => column_values(w_y)?,
            None => vec![1.0; squared.len()],
        };
        self.metrics.mse.update_weighted(&squared, &weights)?;

        if let Some(classifier) = &self.classifier {
            let c_loss = scalar(&classifier_loss(classifier, &generated, &reference)?)?;
            self.metrics.c_loss.update(c_loss);
        }

        let mut metrics = TrainingMetrics::new();
        metrics.record_scalar("mse", self.metrics.mse.result());
        metrics.record_scalar("d_loss", self.metrics.d_loss.result());
        metrics.record_scalar("g_loss", self.metrics.g_loss.result());
        metrics.record_scalar("d_lr", compiled.d_optimizer.learning_rate());
        metrics.record_scalar("g_lr", compiled.g_optimizer.learning_rate());
        if let (Some(_), Some(c_optimizer)) = (&self.classifier, &compiled.c_optimizer) {
            metrics.record_scalar("c_loss", self.metrics.c_loss.result());
            metrics.record_scalar("c_lr", c_optimizer.learning_rate());
        }
        Ok(metrics)
    }

    /// `G([x, z])` with fresh latent noise
    pub fn generate(&mut self, x: &Tensor) -> PidsimResult<Tensor> {
        if self.compiled.is_none() {
            return Err(PidsimError::not_compiled("generate"));
        }
        let (_, cols) = x.dims2()?;
        if cols != self.x_dim {
            return Err(PidsimError::shape_error(
                &format!("[batch, {}]", self.x_dim),
                &format!("{:?}", x.dims()),
                None,
            ));
        }
        self.arranger.generate(&self.generator, x, &mut self.sampler)
    }

    /// Restart the latent noise stream
    pub fn set_seed(&mut self, seed: u64) {
        self.sampler.reseed(seed ^ streams::LATENT_NOISE);
    }

    /// Clear the running means behind the reported metrics
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    pub fn metrics(&self) -> &GanMetrics {
        &self.metrics
    }

    /// Learning rates given at compile time, for the discriminator and the generator
    pub fn initial_learning_rates(&self) -> PidsimResult<(f64, f64)> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| PidsimError::not_compiled("initial_learning_rates"))?;
        Ok((compiled.d_lr0, compiled.g_lr0))
    }

    pub fn classifier_initial_learning_rate(&self) -> Option<f64> {
        self.compiled.as_ref().and_then(|c| c.c_lr0)
    }

    pub fn learning_rates(&self) -> PidsimResult<(f64, f64)> {
        let compiled = self
            .compiled
            .as_ref()
            .ok_or_else(|| PidsimError::not_compiled("learning_rates"))?;
        Ok((
            compiled.d_optimizer.learning_rate(),
            compiled.g_optimizer.learning_rate(),
        ))
    }

    pub fn set_learning_rates(&mut self, d_lr: f64, g_lr: f64) -> PidsimResult<()> {
        for (name, lr) in [("d_lr", d_lr), ("g_lr", g_lr)] {
            if !lr.is_finite() || lr <= 0.0 {
                return Err(PidsimError::invalid_parameter(name, lr, "should be a positive finite number"));
            }
        }
        let compiled = self
            .compiled
            .as_mut()
            .ok_or_else(|| PidsimError::not_compiled("set_learning_rates"))?;
        compiled.d_optimizer.set_learning_rate(d_lr);
        compiled.g_optimizer.set_learning_rate(g_lr);
        Ok(())
    }

    pub fn loss_name(&self) -> &'static str {
        self.kind.loss_name()
    }

    pub fn loss_kind(&self) -> LossKind {
        self.kind
    }

    pub fn grad_penalty(&self) -> Option<f64> {
        self.compiled
            .as_ref()
            .filter(|_| self.kind.uses_gradient_penalty())
            .map(|c| c.loss.grad_penalty())
    }

    pub fn critic_dim(&self) -> Option<usize> {
        self.kind.critic_dim()
    }

    pub fn x_dim(&self) -> usize {
        self.x_dim
    }

    pub fn y_dim(&self) -> usize {
        self.y_dim
    }

    pub fn latent_dim(&self) -> usize {
        self.arranger.latent_dim()
    }

    pub fn d_updt_per_batch(&self) -> Option<usize> {
        self.compiled.as_ref().map(|c| c.d_updt_per_batch)
    }

    pub fn g_updt_per_batch(&self) -> Option<usize> {
        self.compiled.as_ref().map(|c| c.g_updt_per_batch)
    }

    pub fn discriminator(&self) -> &Sequential {
        &self.discriminator
    }

    pub fn generator(&self) -> &Sequential {
        &self.generator
    }

    pub fn classifier(&self) -> Option<&Sequential> {
        self.classifier.as_ref()
    }

    pub fn player(&self, player: Player) -> Option<&Sequential> {
        match player {
            Player::Generator => Some(&self.generator),
            Player::Discriminator => Some(&self.discriminator),
            Player::Classifier => self.classifier.as_ref(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn summary(&self) -> String {
        let mut sections = vec![
            format!("{} ({})", self.loss_name(), if self.is_compiled() { "compiled" } else { "not compiled" }),
            self.generator.summary(),
            self.discriminator.summary(),
        ];
        if let Some(classifier) = &self.classifier {
            sections.push(classifier.summary());
        }
        sections.join("\n\n")
    }

    /// Save every network under `dir/saved_<player>`
    pub fn save(&self, dir: &Path) -> PidsimResult<()> {
        for player in [Player::Generator, Player::Discriminator, Player::Classifier] {
            if let Some(model) = self.player(player) {
                model.save(&dir.join(format!("saved_{}", player.as_str())))?;
            }
        }
        info!("Saved {} model to {}", self.loss_name(), dir.display());
        Ok(())
    }

    /// Overwrite the weights of one network with those saved under `dir`
    pub fn load_player(&mut self, player: Player, dir: &Path) -> PidsimResult<()> {
        let target = self.player(player).ok_or_else(|| {
            PidsimError::IllegalState(format!("the model has no {}", player.as_str()))
        })?;
        let loaded = Sequential::load(dir, &self.device)?;
        if loaded.architecture() != target.architecture() {
            return Err(PidsimError::Configuration(format!(
                "saved {} does not match the model architecture",
                player.as_str()
            )));
        }
        for ((_, src), (_, dst)) in loaded.named_vars().iter().zip(target.named_vars().iter()) {
            dst.set(src.as_tensor())?;
        }
        Ok(())
    }

    fn check_batch(&self, batch: &Batch) -> PidsimResult<()> {
        let x_cols = batch.x().dims()[1];
        let y_cols = batch.y().dims()[1];
        if x_cols != self.x_dim || y_cols != self.y_dim {
            return Err(PidsimError::shape_error(
                &format!("X with {} and Y with {} columns", self.x_dim, self.y_dim),
                &format!("{} and {}", x_cols, y_cols),
                None,
            ));
        }
        Ok(())
    }
}

fn scalar(t: &Tensor) -> PidsimResult<f64> {
    Ok(t.to_scalar::<f32>()? as f64)
}

fn column_values(t: &Tensor) -> PidsimResult<Vec<f64>> {
    Ok(t.flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(f64::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::mlp_specs;
    use crate::training::optimizers::OptimizerConfig;
    use candle_core::DType;

    fn config(loss: LossKind) -> ModelConfig {
        ModelConfig {
            latent_dim: 4,
            loss,
            discriminator: mlp_specs(2, 16, 0.1),
            generator: mlp_specs(2, 16, 0.1),
            ..ModelConfig::new(3, 1)
        }
    }

    fn compiled(loss: LossKind) -> AdversarialModel {
        let ctx = ExecutionContext::cpu().with_seed(42);
        let mut model = AdversarialModel::new(&config(loss), &ctx).unwrap();
        model
            .compile(&CompileConfig::new(
                OptimizerConfig::rmsprop(1e-3),
                OptimizerConfig::rmsprop(1e-3),
            ))
            .unwrap();
        model
    }

    fn batch(rows: usize) -> Batch {
        let mut sampler = Sampler::seeded(1);
        let x = sampler.normal(rows, 3, 0.0, 1.0, &Device::Cpu).unwrap();
        let y = sampler.normal(rows, 1, 1.0, 0.5, &Device::Cpu).unwrap();
        Batch::new(x, y).unwrap()
    }

    #[test]
    fn test_uncompiled_model_rejects_steps() {
        let ctx = ExecutionContext::cpu().with_seed(0);
        let mut model = AdversarialModel::new(&config(LossKind::Standard), &ctx).unwrap();
        assert!(matches!(model.train_step(&batch(8)), Err(PidsimError::IllegalState(_))));
        assert!(matches!(model.test_step(&batch(8)), Err(PidsimError::IllegalState(_))));
        let x = Tensor::zeros((2, 3), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(model.generate(&x), Err(PidsimError::IllegalState(_))));
    }

    #[test]
    fn test_critic_heads_follow_loss() {
        assert_eq!(compiled(LossKind::Standard).discriminator().output_dim(), 1);
        assert_eq!(compiled(LossKind::WassersteinGp).discriminator().output_dim(), 1);
        let cramer = compiled(LossKind::cramer(8));
        assert_eq!(cramer.discriminator().output_dim(), 8);
        assert_eq!(cramer.critic_dim(), Some(8));
        assert_eq!(cramer.grad_penalty(), Some(10.0));
        assert_eq!(compiled(LossKind::Standard).grad_penalty(), None);
    }

    #[test]
    fn test_generate_is_reproducible_under_seed() {
        let mut model = compiled(LossKind::Standard);
        let x = batch(5).x().clone();
        model.set_seed(7);
        let first = model.generate(&x).unwrap().to_vec2::<f32>().unwrap();
        model.set_seed(7);
        let second = model.generate(&x).unwrap().to_vec2::<f32>().unwrap();
        let third = model.generate(&x).unwrap().to_vec2::<f32>().unwrap();
        assert_eq!(first, second);
        assert_ne!(first, third);
        assert_eq!(first.len(), 5);
        assert_eq!(first[0].len(), 1);
    }

    #[test]
    fn test_generate_rejects_wrong_width() {
        let mut model = compiled(LossKind::Standard);
        let x = Tensor::zeros((2, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(model.generate(&x), Err(PidsimError::Shape(_))));
    }

    #[test]
    fn test_test_step_leaves_weights_untouched() {
        let mut model = compiled(LossKind::WassersteinGp);
        let before = model.discriminator().parameters_flat().unwrap();
        let metrics = model.test_step(&batch(8)).unwrap();
        assert!(metrics.contains("d_loss"));
        assert_eq!(model.discriminator().parameters_flat().unwrap(), before);
    }

    #[test]
    fn test_learning_rates() {
        let mut model = compiled(LossKind::Standard);
        assert_eq!(model.initial_learning_rates().unwrap(), (1e-3, 1e-3));
        model.set_learning_rates(1e-4, 2e-4).unwrap();
        assert_eq!(model.learning_rates().unwrap(), (1e-4, 2e-4));
        assert_eq!(model.initial_learning_rates().unwrap(), (1e-3, 1e-3));
        assert!(model.set_learning_rates(0.0, 1e-4).is_err());
    }

    #[test]
    fn test_classifier_requires_optimizer() {
        let ctx = ExecutionContext::cpu().with_seed(0);
        let mut cfg = config(LossKind::Standard);
        cfg.classifier = Some(mlp_specs(1, 8, 0.1));
        let mut model = AdversarialModel::new(&cfg, &ctx).unwrap();
        let compile = CompileConfig::new(OptimizerConfig::rmsprop(1e-3), OptimizerConfig::rmsprop(1e-3));
        assert!(matches!(model.compile(&compile), Err(PidsimError::Configuration(_))));
        model
            .compile(&compile.with_classifier_optimizer(OptimizerConfig::rmsprop(1e-3)))
            .unwrap();
        assert_eq!(model.classifier_initial_learning_rate(), Some(1e-3));
    }

    #[test]
    fn test_zero_updates_rejected() {
        let ctx = ExecutionContext::cpu().with_seed(0);
        let mut model = AdversarialModel::new(&config(LossKind::Standard), &ctx).unwrap();
        let compile = CompileConfig::new(OptimizerConfig::rmsprop(1e-3), OptimizerConfig::rmsprop(1e-3))
            .with_updates(0, 1);
        assert!(matches!(model.compile(&compile), Err(PidsimError::Configuration(_))));
    }

    fn dense_values(model: &Sequential, index: usize) -> Vec<f32> {
        match &model.layers()[index] {
            Layer::Dense(dense) => dense.weight().as_tensor().flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            other => panic!("expected a dense layer, got {}", other.kind()),
        }
    }

    #[test]
    fn test_frozen_pretrained_layers_survive_training() {
        let source = compiled(LossKind::Standard);
        let mut layers = source.generator().hidden_layers().to_vec();
        // first block frozen, second block fine-tuned
        layers[0].set_trainable(false);

        let ctx = ExecutionContext::cpu().with_seed(11);
        let cfg = ModelConfig { generator: mlp_specs(1, 8, 0.1), ..config(LossKind::Standard) };
        let mut model = AdversarialModel::with_pretrained(&cfg, &ctx, Player::Generator, layers).unwrap();
        assert_eq!(model.generator().architecture().layers.len(), 6);
        model
            .compile(&CompileConfig::new(
                OptimizerConfig::rmsprop(1e-2),
                OptimizerConfig::rmsprop(1e-2),
            ))
            .unwrap();

        let frozen = dense_values(model.generator(), 0);
        let tuned = dense_values(model.generator(), 2);
        model.train_step(&batch(8)).unwrap();
        assert_eq!(dense_values(model.generator(), 0), frozen);
        assert_ne!(dense_values(model.generator(), 2), tuned);
        // the source network shares the variables
        assert_eq!(dense_values(source.generator(), 0), frozen);
    }

    #[test]
    fn test_pretrained_classifier_needs_a_classifier() {
        let source = compiled(LossKind::Standard);
        let ctx = ExecutionContext::cpu().with_seed(0);
        let layers = source.discriminator().hidden_layers().to_vec();
        let result = AdversarialModel::with_pretrained(
            &config(LossKind::Standard),
            &ctx,
            Player::Classifier,
            layers,
        );
        assert!(matches!(result, Err(PidsimError::Configuration(_))));
    }

    #[test]
    fn test_save_and_load_player() {
        let dir = tempfile::tempdir().unwrap();
        let trained = compiled(LossKind::Standard);
        trained.save(dir.path()).unwrap();

        let ctx = ExecutionContext::cpu().with_seed(1234);
        let mut fresh = AdversarialModel::new(&config(LossKind::Standard), &ctx).unwrap();
        assert_ne!(
            fresh.generator().parameters_flat().unwrap(),
            trained.generator().parameters_flat().unwrap()
        );
        fresh
            .load_player(Player::Generator, &dir.path().join("saved_generator"))
            .unwrap();
        assert_eq!(
            fresh.generator().parameters_flat().unwrap(),
            trained.generator().parameters_flat().unwrap()
        );
        assert!(fresh.load_player(Player::Classifier, dir.path()).is_err());
    }
}
