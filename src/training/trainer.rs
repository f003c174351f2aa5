//! Session trainer: data preparation, reweighting, training loop and export
//!
//! A [`GanTrainer`] owns one training session. Data is fed as a
//! [`DataChunk`], prepared once (shuffle, scaling, weights), and then used to
//! train an [`AdversarialModel`]. Every artifact of the session is written
//! under `export_dir/export_name`; the epoch history is also written to
//! `report_dir/report_name.json`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use candle_core::Tensor;
use tracing::{debug, info, warn};

use crate::config::{DatasetConfig, TrainConfig};
use crate::data::{DataChunk, TensorDataset};
use crate::error::{PidsimError, PidsimResult};
use crate::gan::samples::matrix;
use crate::gan::{AdversarialModel, Player};
use crate::nn::layers::Layer;
use crate::nn::Sequential;
use crate::preprocessing::{column_indices, ColumnTransformer};
use crate::stats::column_ks_tests;
use crate::tensor::{streams, ExecutionContext};
use crate::training::artifacts::{ArtifactStore, TRANSFORM_X, TRANSFORM_Y};
use crate::training::metrics::TrainingHistory;
use crate::training::reweighter::{Reweighter, ReweighterConfig};
use crate::training::schedulers::GanLrScheduler;
use crate::training::TrainingCallback;

const DEFAULT_EXPORT_DIR: &str = "./models";
const DEFAULT_REPORT_DIR: &str = "./reports";
const REWEIGHTER_NAME: &str = "reweighter";

/// Where the session writes its artifacts; unset fields get defaults
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainerPaths {
    pub export_dir: Option<PathBuf>,
    pub export_name: Option<String>,
    pub report_dir: Option<PathBuf>,
    pub report_name: Option<String>,
}

impl TrainerPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn export_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn export_name(mut self, name: &str) -> Self {
        self.export_name = Some(name.to_string());
        self
    }

    pub fn report_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn report_name(mut self, name: &str) -> Self {
        self.report_name = Some(name.to_string());
        self
    }
}

/// Networks restored by [`GanTrainer::load_model`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelector {
    Generator,
    Discriminator,
    All,
}

impl ModelSelector {
    pub fn players(&self) -> &'static [Player] {
        match self {
            ModelSelector::Generator => &[Player::Generator],
            ModelSelector::Discriminator => &[Player::Discriminator],
            ModelSelector::All => &[Player::Generator, Player::Discriminator],
        }
    }
}

impl FromStr for ModelSelector {
    type Err = PidsimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gen" => Ok(ModelSelector::Generator),
            "disc" => Ok(ModelSelector::Discriminator),
            "all" => Ok(ModelSelector::All),
            other => Err(PidsimError::Configuration(format!(
                "model selector should be one of `gen`, `disc` or `all`, got `{}`",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelSelector::Generator => "gen",
            ModelSelector::Discriminator => "disc",
            ModelSelector::All => "all",
        };
        f.write_str(name)
    }
}

/// Scaled arrays and weights produced by the dataset preparation
struct Prepared {
    x_scaled: Vec<Vec<f32>>,
    y_scaled: Vec<Vec<f32>>,
    w_x: Option<Vec<f32>>,
    w_y: Option<Vec<f32>>,
    scaler_x: ColumnTransformer,
    scaler_y: ColumnTransformer,
    reweighted: bool,
}

/// Networks restored from a previous session
struct Loaded {
    dir: PathBuf,
    selector: ModelSelector,
    generator: Option<Sequential>,
    discriminator: Option<Sequential>,
}

/// Orchestrates one GAN training session
pub struct GanTrainer {
    name: String,
    export_dir: PathBuf,
    export_name: String,
    report_dir: PathBuf,
    report_name: String,
    artifacts: ArtifactStore,
    ctx: ExecutionContext,
    reweighter_config: ReweighterConfig,
    callbacks: Vec<Box<dyn TrainingCallback>>,
    chunk: Option<DataChunk>,
    prepared: Option<Prepared>,
    reweighter: Option<Reweighter>,
    loaded: Option<Loaded>,
    model: Option<AdversarialModel>,
}

impl GanTrainer {
    /// Resolve the session paths and create the missing directories.
    ///
    /// Unset names default to `{name}_{YYYY-MM-DD_HHhMMmSSs}`.
    pub fn new(name: &str, paths: TrainerPaths, ctx: ExecutionContext) -> PidsimResult<Self> {
        let version = chrono::Local::now().format("%Y-%m-%d_%Hh%Mm%Ss").to_string();
        let default_name = format!("{}_{}", name, version);

        let export_dir = resolve_dir(paths.export_dir, DEFAULT_EXPORT_DIR, "export dirname")?;
        let export_name = resolve_name(paths.export_name, &default_name, "export filename");
        let report_dir = resolve_dir(paths.report_dir, DEFAULT_REPORT_DIR, "report dirname")?;
        let report_name = resolve_name(paths.report_name, &default_name, "report filename");

        info!("Trainer `{}` on {}", name, ctx.describe());
        Ok(Self {
            name: name.to_string(),
            artifacts: ArtifactStore::new(&export_dir, &export_name),
            export_dir,
            export_name,
            report_dir,
            report_name,
            ctx,
            reweighter_config: ReweighterConfig::default(),
            callbacks: Vec::new(),
            chunk: None,
            prepared: None,
            reweighter: None,
            loaded: None,
            model: None,
        })
    }

    pub fn with_reweighter_config(mut self, config: ReweighterConfig) -> Self {
        self.reweighter_config = config;
        self
    }

    pub fn add_callback(&mut self, callback: Box<dyn TrainingCallback>) {
        self.callbacks.push(callback);
    }

    /// Replace the session data; any previous preparation is discarded
    pub fn feed(&mut self, chunk: DataChunk) {
        debug!(
            "Fed {} events: X = {:?}, Y = {:?}, w = {:?}",
            chunk.rows(),
            chunk.x_vars(),
            chunk.y_vars(),
            chunk.w_var()
        );
        self.chunk = Some(chunk);
        self.prepared = None;
        self.reweighter = None;
        self.loaded = None;
    }

    /// Shuffle, fit the transformers and set the event weights
    pub fn prepare_dataset(&mut self, config: &DatasetConfig) -> PidsimResult<()> {
        config.validate()?;
        if self.prepared.is_some() {
            return Err(PidsimError::IllegalState("the dataset is already prepared".to_string()));
        }
        self.shuffle_chunk()?;
        let chunk = self.chunk()?;

        let start = Instant::now();
        let subsample = chunk.head(config.subsample_size);
        let x_cols = column_indices(chunk.x_vars(), config.x_vars_to_preprocess.as_deref())?;
        let scaler_x = ColumnTransformer::fit_or_identity(
            subsample.x(),
            chunk.x_vars().len(),
            config.x_preprocessing,
            x_cols.as_deref(),
        )?;
        let y_cols = column_indices(chunk.y_vars(), config.y_vars_to_preprocess.as_deref())?;
        let scaler_y = ColumnTransformer::fit_or_identity(
            subsample.y(),
            chunk.y_vars().len(),
            config.y_preprocessing,
            y_cols.as_deref(),
        )?;
        debug!("Preprocessing fitted in {:.3} s", start.elapsed().as_secs_f64());

        if config.save_transformer {
            self.artifacts.save_transformer(TRANSFORM_X, &scaler_x)?;
            self.artifacts.save_transformer(TRANSFORM_Y, &scaler_y)?;
        }
        self.finish_preparation(scaler_x, scaler_y, config)
    }

    /// Prepare the fed data with the transformers of a previous session and
    /// restore its networks.
    ///
    /// Transformers are optional but come in pairs; missing ones mean the
    /// identity. The selected networks must be present.
    pub fn load_model(
        &mut self,
        dir: &Path,
        selector: ModelSelector,
        config: &DatasetConfig,
    ) -> PidsimResult<()> {
        if self.chunk.is_none() {
            return Err(PidsimError::IllegalState("feed data before loading a model".to_string()));
        }
        if self.prepared.is_some() {
            return Err(PidsimError::IllegalState(
                "cannot load a model once the dataset is prepared".to_string(),
            ));
        }
        let source = ArtifactStore::open(dir)?;
        for player in selector.players() {
            if !source.has_model(player.as_str()) {
                return Err(PidsimError::Io(format!(
                    "no saved {} in {}",
                    player.as_str(),
                    dir.display()
                )));
            }
        }
        let (scaler_x, scaler_y) = match (source.has_transformer(TRANSFORM_X), source.has_transformer(TRANSFORM_Y)) {
            (true, true) => (source.load_transformer(TRANSFORM_X)?, source.load_transformer(TRANSFORM_Y)?),
            (false, false) => {
                let chunk = self.chunk()?;
                (
                    ColumnTransformer::identity(chunk.x_vars().len()),
                    ColumnTransformer::identity(chunk.y_vars().len()),
                )
            }
            _ => {
                return Err(PidsimError::Io(format!(
                    "{} holds only one of {}.json and {}.json",
                    dir.display(),
                    TRANSFORM_X,
                    TRANSFORM_Y
                )))
            }
        };
        let chunk = self.chunk()?;
        if scaler_x.n_features() != chunk.x_vars().len() || scaler_y.n_features() != chunk.y_vars().len() {
            return Err(PidsimError::shape_error(
                &format!("transformers for {} and {} columns", chunk.x_vars().len(), chunk.y_vars().len()),
                &format!("{} and {}", scaler_x.n_features(), scaler_y.n_features()),
                None,
            ));
        }

        let mut generator = None;
        let mut discriminator = None;
        for player in selector.players() {
            let network = Sequential::load(&source.model_dir(player.as_str()), self.ctx.device())?;
            info!("Loaded {} ({} params) from {}", player.as_str(), network.num_parameters(), dir.display());
            match player {
                Player::Generator => generator = Some(network),
                _ => discriminator = Some(network),
            }
        }

        self.shuffle_chunk()?;
        if config.save_transformer {
            self.artifacts.save_transformer(TRANSFORM_X, &scaler_x)?;
            self.artifacts.save_transformer(TRANSFORM_Y, &scaler_y)?;
        }
        self.finish_preparation(scaler_x, scaler_y, config)?;
        self.loaded = Some(Loaded {
            dir: dir.to_path_buf(),
            selector,
            generator,
            discriminator,
        });
        Ok(())
    }

    /// Network restored by [`GanTrainer::load_model`]
    pub fn loaded_player(&self, player: Player) -> PidsimResult<&Sequential> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| PidsimError::IllegalState("no model was loaded".to_string()))?;
        let network = match player {
            Player::Generator => loaded.generator.as_ref(),
            Player::Discriminator => loaded.discriminator.as_ref(),
            Player::Classifier => None,
        };
        network.ok_or_else(|| {
            PidsimError::IllegalState(format!(
                "the {} was not loaded (selector `{}`)",
                player.as_str(),
                loaded.selector
            ))
        })
    }

    /// Hidden layers of a loaded network, ready to seed a new model through
    /// [`AdversarialModel::with_pretrained`].
    ///
    /// Only the last `fine_tuned_layers` entries (all of them by default) stay
    /// trainable; `freeze` freezes every one. Activations count as layers.
    pub fn extract_layers(
        &self,
        player: Player,
        fine_tuned_layers: Option<usize>,
        freeze: bool,
    ) -> PidsimResult<Vec<Layer>> {
        if player == Player::Classifier {
            return Err(PidsimError::Configuration(
                "layers can only be extracted from the generator or the discriminator".to_string(),
            ));
        }
        let mut layers = self.loaded_player(player)?.hidden_layers().to_vec();
        let num_layers = layers.len();
        let frozen = num_layers.saturating_sub(fine_tuned_layers.unwrap_or(num_layers));
        for (idx, layer) in layers.iter_mut().enumerate() {
            layer.set_trainable(!freeze && idx >= frozen);
        }
        debug!(
            "Extracted {} layers from the loaded {} ({} frozen)",
            num_layers,
            player.as_str(),
            if freeze { num_layers } else { frozen }
        );
        Ok(layers)
    }

    /// Copy the loaded weights into `model`, whose architecture must match
    pub fn warm_start(&self, model: &mut AdversarialModel) -> PidsimResult<()> {
        let loaded = self
            .loaded
            .as_ref()
            .ok_or_else(|| PidsimError::IllegalState("no model was loaded".to_string()))?;
        let source = ArtifactStore::open(&loaded.dir)?;
        for player in loaded.selector.players() {
            model.load_player(*player, &source.model_dir(player.as_str()))?;
        }
        Ok(())
    }

    /// Train `model` on the prepared data.
    ///
    /// The model sees batches of `2 * batch_size` rows. The last
    /// `validation_split` of the events is held out and evaluated with
    /// `test_step` after every epoch.
    pub fn train_model(
        &mut self,
        mut model: AdversarialModel,
        config: &TrainConfig,
        scheduler: Option<&GanLrScheduler>,
    ) -> PidsimResult<TrainingHistory> {
        config.validate()?;
        if !model.is_compiled() {
            return Err(PidsimError::not_compiled("train_model"));
        }
        let prepared = self
            .prepared
            .as_ref()
            .ok_or_else(|| PidsimError::IllegalState("prepare the dataset before training".to_string()))?;
        let x_dim = prepared.scaler_x.n_features();
        let y_dim = prepared.scaler_y.n_features();
        if model.x_dim() != x_dim || model.y_dim() != y_dim {
            return Err(PidsimError::shape_error(
                &format!("a model for {} conditions and {} targets", x_dim, y_dim),
                &format!("{} and {}", model.x_dim(), model.y_dim()),
                None,
            ));
        }

        let weights = match (&prepared.w_x, &prepared.w_y) {
            (Some(w_x), Some(w_y)) => Some((w_x.as_slice(), w_y.as_slice())),
            _ => None,
        };
        let dataset = TensorDataset::from_rows(
            &prepared.x_scaled,
            &prepared.y_scaled,
            weights,
            model.device(),
        )?;

        let batch_size = 2 * config.batch_size;
        let sample_size = dataset.rows();
        let trainset_size = ((1.0 - config.validation_split) * sample_size as f64) as usize;
        let steps_per_epoch = (trainset_size / batch_size).max(1);
        let (trainset, valset) = dataset.split_tail(sample_size - trainset_size)?;
        if trainset.rows() < 2 {
            return Err(PidsimError::shape_error(
                "at least 2 training events",
                &format!("{}", trainset.rows()),
                Some("lower the validation split or feed more data"),
            ));
        }
        let train_batch = batch_size.min(trainset.rows());
        let val_batch = batch_size.min(valset.rows());
        info!(
            "Training {} for {} epochs: {} steps of {} events, {} validation events",
            model.loss_name(),
            config.num_epochs,
            steps_per_epoch,
            train_batch,
            valset.rows()
        );

        for callback in self.callbacks.iter_mut() {
            callback.on_train_begin(&mut model)?;
        }
        let mut history = TrainingHistory::new();
        let start = Instant::now();
        for epoch in 0..config.num_epochs {
            let epoch_start = Instant::now();
            if let Some(scheduler) = scheduler {
                scheduler.on_epoch_begin(epoch, &mut model)?;
            }
            for callback in self.callbacks.iter_mut() {
                callback.on_epoch_begin(epoch, &mut model)?;
            }

            model.reset_metrics();
            let mut train_metrics = None;
            for batch in trainset.batches(train_batch)?.take(steps_per_epoch) {
                train_metrics = Some(model.train_step(&batch?)?);
            }
            let train_metrics = train_metrics
                .ok_or_else(|| PidsimError::IllegalState("no training step was run".to_string()))?;
            history.record(&train_metrics, "");
            let mut logs = train_metrics.clone();

            if val_batch >= 2 {
                model.reset_metrics();
                let mut val_metrics = None;
                for batch in valset.batches(val_batch)? {
                    val_metrics = Some(model.test_step(&batch?)?);
                }
                if let Some(val_metrics) = val_metrics {
                    history.record(&val_metrics, "val_");
                    for (name, value) in val_metrics.all_scalars() {
                        logs.record_scalar(&format!("val_{}", name), *value);
                    }
                }
            }

            history.record_epoch_duration(epoch_start.elapsed());
            info!("Epoch {}/{} - {}", epoch + 1, config.num_epochs, logs.describe());
            for callback in self.callbacks.iter_mut() {
                callback.on_epoch_end(epoch, &logs)?;
            }
        }
        info!("Model training completed in {}", format_duration(start.elapsed()));
        for callback in self.callbacks.iter_mut() {
            callback.on_train_end(&history)?;
        }

        if config.save_model {
            model.save(self.artifacts.dir())?;
            self.artifacts.save_history(&history)?;
        }
        let report = self.report_dir.join(format!("{}.json", self.report_name));
        history.save(&report)?;
        info!("Training history exported to {}", report.display());

        self.model = Some(model);
        Ok(history)
    }

    /// Targets in physical units for conditions in physical units
    pub fn generate(&mut self, x: &[Vec<f32>]) -> PidsimResult<Vec<Vec<f32>>> {
        let (scaler_x, scaler_y) = match &self.prepared {
            Some(prepared) => (&prepared.scaler_x, &prepared.scaler_y),
            None => {
                return Err(PidsimError::IllegalState(
                    "prepare the dataset before generating".to_string(),
                ))
            }
        };
        let x_scaled = matrix(&scaler_x.transform(x)?, self.ctx.device())?;
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| PidsimError::IllegalState("train a model before generating".to_string()))?;
        let y_scaled = model.generate(&x_scaled)?.to_vec2::<f32>()?;
        scaler_y.inverse_transform(&y_scaled)
    }

    /// Scaled targets for scaled conditions
    pub fn generate_scaled(&mut self, x_scaled: &Tensor) -> PidsimResult<Tensor> {
        self.model
            .as_mut()
            .ok_or_else(|| PidsimError::IllegalState("train a model before generating".to_string()))?
            .generate(x_scaled)
    }

    fn chunk(&self) -> PidsimResult<&DataChunk> {
        self.chunk
            .as_ref()
            .ok_or_else(|| PidsimError::IllegalState("no data was fed".to_string()))
    }

    fn shuffle_chunk(&mut self) -> PidsimResult<()> {
        let mut sampler = self.ctx.sampler(streams::SHUFFLE);
        let chunk = self
            .chunk
            .as_mut()
            .ok_or_else(|| PidsimError::IllegalState("no data was fed".to_string()))?;
        let start = Instant::now();
        chunk.shuffle(&mut sampler);
        debug!("Shuffle-time: {:.3} s", start.elapsed().as_secs_f64());
        Ok(())
    }

    /// Scale the chunk, set `w_X = w_Y = w`, then reweight `w_X` when asked
    fn finish_preparation(
        &mut self,
        scaler_x: ColumnTransformer,
        scaler_y: ColumnTransformer,
        config: &DatasetConfig,
    ) -> PidsimResult<()> {
        let chunk = self.chunk()?;
        let x_scaled = scaler_x.transform(chunk.x())?;
        let y_scaled = scaler_y.transform(chunk.y())?;
        let w = chunk.w().map(<[f32]>::to_vec);

        let mut w_x = w.clone();
        let mut reweighted = false;
        if config.enable_reweights {
            match &w {
                Some(w) => {
                    w_x = Some(self.reweight(&x_scaled, w, config.save_transformer)?);
                    reweighted = true;
                }
                None => warn!("No reweighting available: the dataset has no weights to reweight"),
            }
        }

        self.prepared = Some(Prepared {
            x_scaled,
            y_scaled,
            w_x,
            w_y: w,
            scaler_x,
            scaler_y,
            reweighted,
        });
        Ok(())
    }

    fn reweight(&mut self, x_scaled: &[Vec<f32>], w: &[f32], save: bool) -> PidsimResult<Vec<f32>> {
        let device = self.ctx.device();
        let x = matrix(x_scaled, device)?;
        let targets = Tensor::from_slice(w, w.len(), device)?;
        let (reweighter, report) = Reweighter::fit(&x, &targets, &self.reweighter_config, &self.ctx)?;
        let predicted = reweighter.predict(&x)?.flatten_all()?.to_vec1::<f32>()?;
        debug!("Reweighter final mse: {:?}", report.final_loss());

        if tracing::enabled!(tracing::Level::DEBUG) {
            let w_obs: Vec<f64> = predicted.iter().map(|&v| v as f64).collect();
            let w_exp: Vec<f64> = w.iter().map(|&v| v as f64).collect();
            match column_ks_tests(x_scaled, x_scaled, Some(&w_obs), Some(&w_exp)) {
                Ok(ks) => debug!(
                    "Worst reweighter performance: {:.4} (K-S test)",
                    ks.iter().copied().fold(0.0, f64::max)
                ),
                Err(err) => debug!("K-S test of the reweighter skipped: {}", err),
            }
        }

        if save {
            reweighter.save(&self.artifacts.model_dir(REWEIGHTER_NAME))?;
        }
        self.reweighter = Some(reweighter);
        Ok(predicted)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }

    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    pub fn report_dir(&self) -> &Path {
        &self.report_dir
    }

    pub fn report_name(&self) -> &str {
        &self.report_name
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    pub fn datachunk(&self) -> Option<&DataChunk> {
        self.chunk.as_ref()
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared.is_some()
    }

    pub fn is_reweighted(&self) -> bool {
        self.prepared.as_ref().is_some_and(|p| p.reweighted)
    }

    pub fn x_scaled(&self) -> Option<&[Vec<f32>]> {
        self.prepared.as_ref().map(|p| p.x_scaled.as_slice())
    }

    pub fn y_scaled(&self) -> Option<&[Vec<f32>]> {
        self.prepared.as_ref().map(|p| p.y_scaled.as_slice())
    }

    pub fn w_x(&self) -> Option<&[f32]> {
        self.prepared.as_ref().and_then(|p| p.w_x.as_deref())
    }

    pub fn w_y(&self) -> Option<&[f32]> {
        self.prepared.as_ref().and_then(|p| p.w_y.as_deref())
    }

    pub fn scalers(&self) -> Option<(&ColumnTransformer, &ColumnTransformer)> {
        self.prepared.as_ref().map(|p| (&p.scaler_x, &p.scaler_y))
    }

    pub fn reweighter(&self) -> Option<&Reweighter> {
        self.reweighter.as_ref()
    }

    pub fn model(&self) -> Option<&AdversarialModel> {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> Option<&mut AdversarialModel> {
        self.model.as_mut()
    }

    pub fn take_model(&mut self) -> Option<AdversarialModel> {
        self.model.take()
    }
}

fn resolve_dir(dir: Option<PathBuf>, default: &str, what: &str) -> PidsimResult<PathBuf> {
    let dir = dir.unwrap_or_else(|| {
        warn!("No {} passed, {} will be used", what, default);
        PathBuf::from(default)
    });
    if !dir.exists() {
        warn!("Directory {} not found, it will be created", dir.display());
        fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

fn resolve_name(name: Option<String>, default: &str, what: &str) -> String {
    name.unwrap_or_else(|| {
        warn!("No {} passed, {} will be used", what, default);
        default.to_string()
    })
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {}min {}s", secs / 3600, (secs / 60) % 60, secs % 60)
}
