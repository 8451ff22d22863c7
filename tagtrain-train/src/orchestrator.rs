//! Top-level training driver.
//!
//! [`Orchestrator::run`] validates the run, builds the reference pipeline and
//! corpus, then hands off to [`train_loop`], which works against any
//! [`TrainablePipeline`] / [`Corpus`] pair.

use crate::checkpoint::CheckpointManager;
use crate::compose::{FINAL_DIR, META_FILE, collate_best_model};
use crate::epoch::{EpochTrainer, add_multitask_objectives};
use crate::error::TrainError;
use crate::meta::{EpochRecord, ModelMeta};
use crate::progress::{PROGRESS_HEADER, format_progress_row};
use crate::schedule::{batch_size_schedule, dropout_schedule};
use std::path::{Path, PathBuf};
use tagtrain_core::persistence::atomic_write_json;
use tagtrain_core::pipeline::components::MergeSubtokens;
use tagtrain_core::{
    Backend, Corpus, DeviceScope, GoldCorpus, Language, Optimizer, TrainSettings,
    TrainablePipeline, VerbosityControl,
};
use tracing::{error, info, warn};

pub const DEFAULT_PIPELINE: &str = "tagger,parser,ner";

/// Everything the command line controls.
#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub lang: String,
    pub output_path: PathBuf,
    pub train_path: PathBuf,
    pub dev_path: PathBuf,
    pub base_model: Option<PathBuf>,
    pub pipeline: Vec<String>,
    pub vectors: Option<PathBuf>,
    pub n_iter: usize,
    /// Cap on training documents; 0 keeps all.
    pub n_examples: usize,
    /// Device id; negative selects the baseline backend.
    pub use_gpu: i32,
    pub version: String,
    pub meta_path: Option<PathBuf>,
    pub parser_multitasks: String,
    pub entity_multitasks: String,
    pub noise_level: f64,
    pub gold_preproc: bool,
    pub learn_tokens: bool,
    pub verbose: bool,
    pub debug: bool,
    /// Show the progress bar and results table.
    pub show_progress: bool,
}

impl TrainOptions {
    pub fn new(
        lang: impl Into<String>,
        output_path: impl Into<PathBuf>,
        train_path: impl Into<PathBuf>,
        dev_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lang: lang.into(),
            output_path: output_path.into(),
            train_path: train_path.into(),
            dev_path: dev_path.into(),
            base_model: None,
            pipeline: parse_pipeline(DEFAULT_PIPELINE),
            vectors: None,
            n_iter: 30,
            n_examples: 0,
            use_gpu: -1,
            version: "0.0.0".to_string(),
            meta_path: None,
            parser_multitasks: String::new(),
            entity_multitasks: String::new(),
            noise_level: 0.0,
            gold_preproc: false,
            learn_tokens: false,
            verbose: false,
            debug: false,
            show_progress: true,
        }
    }

    pub fn backend(&self) -> Backend {
        Backend::from_device_id(self.use_gpu)
    }

    /// Check the input locations exist. Runs before anything is written.
    pub fn validate(&self) -> Result<(), TrainError> {
        if !self.train_path.exists() {
            return Err(TrainError::config(format!(
                "Training data not found: {}",
                self.train_path.display()
            )));
        }
        if !self.dev_path.exists() {
            return Err(TrainError::config(format!(
                "Development data not found: {}",
                self.dev_path.display()
            )));
        }
        if let Some(meta_path) = &self.meta_path {
            if !meta_path.exists() {
                return Err(TrainError::config(format!(
                    "Can't find meta file: {}",
                    meta_path.display()
                )));
            }
        }
        Ok(())
    }

    /// User-supplied meta, or an empty one.
    pub fn load_meta(&self) -> Result<ModelMeta, TrainError> {
        match &self.meta_path {
            Some(path) => ModelMeta::from_file(path),
            None => Ok(ModelMeta::default()),
        }
    }
}

/// Split a comma-separated component list, dropping blanks.
pub fn parse_pipeline(pipeline: &str) -> Vec<String> {
    pipeline
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Where a finished (or aborted) run left its artifacts.
#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub epochs: Vec<EpochRecord>,
    pub final_dir: PathBuf,
    pub best_dir: Option<PathBuf>,
}

pub struct Orchestrator<'a> {
    options: TrainOptions,
    settings: TrainSettings,
    verbosity: &'a dyn VerbosityControl,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        options: TrainOptions,
        settings: TrainSettings,
        verbosity: &'a dyn VerbosityControl,
    ) -> Self {
        Self {
            options,
            settings,
            verbosity,
        }
    }

    /// Validate, set up the pipeline and corpus, and train.
    pub fn run(&self) -> Result<TrainSummary, TrainError> {
        let options = &self.options;
        options.validate()?;
        let meta = options.load_meta()?;

        let backend = options.backend();
        let _device = DeviceScope::enter(backend);
        info!(%backend, lang = %options.lang, pipeline = ?options.pipeline, "Starting training");

        let mut corpus = GoldCorpus::new(
            &options.train_path,
            &options.dev_path,
            options.n_examples,
            self.settings.seed,
        )?;
        let mut nlp = self.build_pipeline()?;
        add_multitask_objectives(
            &mut nlp,
            &options.parser_multitasks,
            &options.entity_multitasks,
        )?;

        let mut sgd = if options.base_model.is_some() {
            Optimizer::default()
        } else {
            nlp.begin_training(&corpus.train_examples(), backend)?
        };

        if !options.output_path.exists() {
            std::fs::create_dir_all(&options.output_path)?;
        }
        train_loop(
            &mut nlp,
            &mut corpus,
            &mut sgd,
            meta,
            options,
            &self.settings,
            self.verbosity,
        )
    }

    /// Load the base model (or start blank) and shape it to `pipeline`.
    fn build_pipeline(&self) -> Result<Language, TrainError> {
        let options = &self.options;
        let mut nlp = match &options.base_model {
            Some(base) => {
                info!(path = %base.display(), "Loading base model");
                let mut nlp = Language::from_disk(base)?;
                if nlp.lang() != options.lang {
                    return Err(TrainError::config(format!(
                        "Model language ('{}') doesn't match language specified as `lang` argument ('{}')",
                        nlp.lang(),
                        options.lang
                    )));
                }
                let extra: Vec<String> = nlp
                    .pipe_names()
                    .into_iter()
                    .filter(|name| !options.pipeline.contains(name))
                    .collect();
                nlp.disable_pipes(&extra);
                for name in &options.pipeline {
                    if !nlp.has_pipe(name) {
                        nlp.add_pipe(name)?;
                    }
                }
                nlp
            }
            None => {
                let mut nlp = Language::new(&options.lang)?;
                for name in &options.pipeline {
                    nlp.add_pipe(name)?;
                }
                nlp
            }
        };
        if options.learn_tokens && !nlp.has_pipe(MergeSubtokens::NAME) {
            nlp.add_pipe(MergeSubtokens::NAME)?;
        }
        if let Some(vectors) = &options.vectors {
            nlp.load_vectors(vectors)?;
        }
        nlp.set_seed(self.settings.seed);
        Ok(nlp)
    }
}

/// Run every epoch, then save `model-final` whatever happened, then compose
/// `model-best` if all epochs succeeded.
///
/// An error inside an epoch stops training; `model-final` is still written
/// from the averaged parameters at that point, the composer is skipped and
/// the epoch error is returned.
pub fn train_loop<P: TrainablePipeline, C: Corpus>(
    nlp: &mut P,
    corpus: &mut C,
    sgd: &mut Optimizer,
    mut meta: ModelMeta,
    options: &TrainOptions,
    settings: &TrainSettings,
    verbosity: &dyn VerbosityControl,
) -> Result<TrainSummary, TrainError> {
    let mut trainer = EpochTrainer::new(dropout_schedule(settings), batch_size_schedule(settings))
        .with_progress(options.show_progress);
    let checkpoints = CheckpointManager::new(&options.output_path, options.backend(), verbosity)
        .verbose(options.verbose)
        .gold_preproc(options.gold_preproc)
        .debug(options.debug)
        .version(options.version.clone());
    let n_train_words = corpus.count_train();
    let mut epochs = Vec::new();

    let outcome = run_epochs(
        nlp,
        corpus,
        sgd,
        &mut meta,
        options,
        &mut trainer,
        &checkpoints,
        n_train_words,
        &mut epochs,
    );

    let final_dir = options.output_path.join(FINAL_DIR);
    let saved = save_final(nlp, sgd, &meta, &final_dir);
    if let Err(err) = outcome {
        if let Err(save_err) = &saved {
            error!(error = %save_err, "Failed to save final model");
        }
        return Err(err);
    }
    saved?;
    info!(path = %final_dir.display(), "Saved final model");

    let best_dir = collate_best_model(
        &options.output_path,
        &nlp.pipe_kinds(),
        &meta,
        options.n_iter,
    )?;
    info!(path = %best_dir.display(), "Saved best model");
    Ok(TrainSummary {
        epochs,
        final_dir,
        best_dir: Some(best_dir),
    })
}

#[allow(clippy::too_many_arguments)]
fn run_epochs<P: TrainablePipeline, C: Corpus>(
    nlp: &mut P,
    corpus: &mut C,
    sgd: &mut Optimizer,
    meta: &mut ModelMeta,
    options: &TrainOptions,
    trainer: &mut EpochTrainer,
    checkpoints: &CheckpointManager<'_>,
    n_train_words: usize,
    epochs: &mut Vec<EpochRecord>,
) -> Result<(), TrainError> {
    if options.show_progress {
        println!("{PROGRESS_HEADER}");
    }
    for i in 0..options.n_iter {
        let train_docs = corpus.train_docs(nlp, options.noise_level, options.gold_preproc)?;
        if train_docs.is_empty() {
            warn!(epoch = i, "No training documents");
        }
        let losses = trainer.train_epoch(nlp, sgd, train_docs, n_train_words)?;
        let record = checkpoints.checkpoint(i, nlp, sgd, corpus, &losses, meta)?;
        if options.show_progress {
            let speed = record.meta.speed.as_ref();
            println!(
                "{}",
                format_progress_row(
                    i,
                    &losses,
                    &record.accuracy,
                    speed.map_or(0.0, |s| s.cpu),
                    speed.and_then(|s| s.gpu),
                )
            );
        }
        info!(epoch = i, ?losses, "Epoch complete");
        epochs.push(record);
    }
    Ok(())
}

fn save_final<P: TrainablePipeline>(
    nlp: &mut P,
    sgd: &Optimizer,
    meta: &ModelMeta,
    final_dir: &Path,
) -> Result<(), TrainError> {
    let averages = sgd.averages();
    let averaged = nlp.use_params(&averages);
    averaged.to_disk(final_dir)?;
    atomic_write_json(&final_dir.join(META_FILE), meta)?;
    Ok(())
}
