//! End-to-end training of every adversarial variant through the public API

use candle_core::{Device, Tensor};
use pidsim_train::nn::mlp_specs;
use pidsim_train::training::TrainingCallback;
use pidsim_train::{
    AdversarialModel, Batch, CompileConfig, ConfigBuilder, DataChunk, ExecutionContext,
    ExperimentConfig, GanLrScheduler, GanTrainer, LossKind, ModelConfig, OptimizerConfig,
    PidsimResult, Sampler, ScalingStrategy, TrainerPaths, TrainingMetrics,
};
use tempfile::tempdir;

fn model(loss: LossKind, classifier: bool) -> AdversarialModel {
    let config = ModelConfig {
        latent_dim: 4,
        loss,
        discriminator: mlp_specs(2, 16, 0.1),
        generator: mlp_specs(2, 16, 0.1),
        classifier: classifier.then(|| mlp_specs(1, 8, 0.1)),
        ..ModelConfig::new(3, 1)
    };
    let mut model = AdversarialModel::new(&config, &ExecutionContext::cpu().with_seed(7)).unwrap();
    let mut compile = CompileConfig::new(OptimizerConfig::rmsprop(1e-3), OptimizerConfig::rmsprop(1e-3))
        .with_updates(2, 1);
    if classifier {
        compile = compile.with_classifier_optimizer(OptimizerConfig::adam(1e-3));
    }
    model.compile(&compile).unwrap();
    model
}

fn batch(rows: usize, seed: u64) -> Batch {
    let mut sampler = Sampler::seeded(seed);
    let x = sampler.normal(rows, 3, 0.0, 1.0, &Device::Cpu).unwrap();
    let y = sampler.normal(rows, 1, 2.0, 0.5, &Device::Cpu).unwrap();
    let w = Tensor::ones((rows, 1), candle_core::DType::F32, &Device::Cpu).unwrap();
    Batch::weighted(x, y, w.clone(), w).unwrap()
}

#[test]
fn every_variant_trains_and_reports_finite_metrics() {
    for loss in [LossKind::Standard, LossKind::WassersteinGp, LossKind::cramer(4)] {
        let mut model = model(loss, false);
        let before = model.generator().parameters_flat().unwrap();
        let critic_before = model.discriminator().parameters_flat().unwrap();

        let mut metrics = TrainingMetrics::new();
        for step in 0..3 {
            metrics = model.train_step(&batch(16, step)).unwrap();
        }
        for key in ["mse", "d_loss", "g_loss", "d_lr", "g_lr"] {
            let value = metrics.get_scalar(key).unwrap();
            assert!(value.is_finite(), "{} is {} for {}", key, value, model.loss_name());
        }
        assert!(!metrics.contains("c_loss"));
        assert_ne!(model.generator().parameters_flat().unwrap(), before);
        assert_ne!(model.discriminator().parameters_flat().unwrap(), critic_before);
    }
}

#[test]
fn single_step_on_eight_rows_moves_both_players() {
    for loss in [LossKind::Standard, LossKind::WassersteinGp, LossKind::cramer(4)] {
        let mut model = model(loss, false);
        let generator = model.generator().parameters_flat().unwrap();
        let critic = model.discriminator().parameters_flat().unwrap();

        let metrics = model.train_step(&batch(8, 21)).unwrap();
        let keys = metrics.names();
        assert_eq!(keys, ["d_loss", "d_lr", "g_loss", "g_lr", "mse"]);
        for key in keys {
            let value = metrics.get_scalar(key).unwrap();
            assert!(value.is_finite(), "{} is {} for {}", key, value, model.loss_name());
        }
        assert_ne!(model.generator().parameters_flat().unwrap(), generator);
        assert_ne!(model.discriminator().parameters_flat().unwrap(), critic);
    }
}

#[test]
fn classifier_reports_its_own_metrics() {
    let mut model = model(LossKind::WassersteinGp, true);
    let before = model.classifier().unwrap().parameters_flat().unwrap();
    let metrics = model.train_step(&batch(16, 3)).unwrap();
    assert!(metrics.get_scalar("c_loss").unwrap().is_finite());
    assert!((metrics.get_scalar("c_lr").unwrap() - 1e-3).abs() < 1e-9);
    assert_ne!(model.classifier().unwrap().parameters_flat().unwrap(), before);
}

struct LearningRates(Vec<f64>);

impl TrainingCallback for LearningRates {
    fn on_epoch_end(&mut self, _epoch: usize, logs: &TrainingMetrics) -> PidsimResult<()> {
        if let Some(lr) = logs.get_scalar("d_lr") {
            self.0.push(lr);
        }
        Ok(())
    }
}

#[test]
fn experiment_config_drives_a_full_session() {
    let json = r#"{
        "model": {
            "x_dim": 2, "y_dim": 2, "latent_dim": 3,
            "loss": {"type": "cramer", "critic_dim": 4},
            "discriminator": [{"type": "dense", "units": 8}, {"type": "leaky_relu", "alpha": 0.1}],
            "generator": [{"type": "dense", "units": 8}, {"type": "leaky_relu", "alpha": 0.1}]
        },
        "compile": {
            "d_optimizer": {"type": "rmsprop", "learning_rate": 0.001},
            "g_optimizer": {"type": "rmsprop", "learning_rate": 0.001},
            "grad_penalty": 5
        },
        "scheduler": {"type": "step", "step_size": 1, "gamma": 0.5},
        "dataset": {"y_preprocessing": "standard", "enable_reweights": false},
        "training": {"batch_size": 4, "num_epochs": 3, "validation_split": 0.2, "save_model": false},
        "seed": 11
    }"#;
    let config = ExperimentConfig::from_json_str(json).unwrap();
    let ctx = ExecutionContext::cpu().with_seed(config.seed.unwrap());

    let root = tempdir().unwrap();
    let paths = TrainerPaths::new()
        .export_dir(root.path().join("models"))
        .export_name("cramer")
        .report_dir(root.path().join("reports"))
        .report_name("cramer");
    let mut trainer = GanTrainer::new("cramer", paths, ctx.clone()).unwrap();

    let rows = 40;
    let x = (0..rows).map(|i| vec![i as f32, (i % 5) as f32]).collect();
    let y = (0..rows).map(|i| vec![i as f32 * 0.1, 50.0 - i as f32]).collect();
    let vars = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    trainer.feed(DataChunk::new(vars(&["p", "eta"]), vars(&["dllk", "dllp"]), x, y).unwrap());
    trainer.prepare_dataset(&config.dataset).unwrap();
    assert_eq!(trainer.scalers().unwrap().1.strategy(), Some(ScalingStrategy::Standard));
    // transformers are exported even without a trained model
    assert!(trainer.artifacts().dir().join("transform_Y.json").is_file());

    let mut model = AdversarialModel::new(&config.model, &ctx).unwrap();
    model.compile(&config.compile).unwrap();
    let scheduler = GanLrScheduler::new(&config.scheduler.unwrap()).unwrap();
    let history = trainer.train_model(model, &config.training, Some(&scheduler)).unwrap();

    let d_lr = history.get("d_lr").unwrap();
    assert_eq!(d_lr.len(), 3);
    assert!((d_lr[2] - 2.5e-4).abs() < 1e-9);
    assert!(history.get("val_g_loss").is_some());
    assert!(!trainer.artifacts().dir().join("saved_generator").exists());
    assert!(root.path().join("reports").join("cramer.json").is_file());

    let y_gen = trainer.generate(&[vec![3.0, 1.0]]).unwrap();
    assert_eq!(y_gen[0].len(), 2);
    assert!(y_gen[0].iter().all(|v| v.is_finite()));
}

#[test]
fn callbacks_see_every_epoch() {
    let root = tempdir().unwrap();
    let ctx = ExecutionContext::cpu().with_seed(5);
    let config = ConfigBuilder::new(3, 1)
        .model(|m| {
            m.latent_dim = 2;
            m.loss = LossKind::Standard;
            m.discriminator = mlp_specs(1, 8, 0.1);
            m.generator = mlp_specs(1, 8, 0.1);
        })
        .training(|t| {
            t.batch_size = 8;
            t.num_epochs = 2;
            t.save_model = true;
        })
        .dataset(|d| d.enable_reweights = false)
        .build()
        .unwrap();

    let paths = TrainerPaths::new().export_dir(root.path()).report_dir(root.path()).report_name("history");
    let mut trainer = GanTrainer::new("std", paths, ctx.clone()).unwrap();
    let x = (0..32).map(|i| vec![i as f32, 1.0, -(i as f32)]).collect();
    let y = (0..32).map(|i| vec![(i % 4) as f32]).collect();
    let vars = |names: &[&str]| names.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    trainer.feed(DataChunk::new(vars(&["a", "b", "c"]), vars(&["d"]), x, y).unwrap());
    trainer.prepare_dataset(&config.dataset).unwrap();

    let mut model = AdversarialModel::new(&config.model, &ctx).unwrap();
    model.compile(&config.compile).unwrap();
    trainer.add_callback(Box::new(LearningRates(Vec::new())));
    let history = trainer.train_model(model, &config.training, None).unwrap();
    assert_eq!(history.num_epochs(), 2);
    // no validation split, no validation series
    assert!(history.get("val_mse").is_none());
    assert!(trainer.artifacts().dir().join("saved_discriminator").is_dir());
    assert!(trainer.artifacts().history_path().is_file());
}
