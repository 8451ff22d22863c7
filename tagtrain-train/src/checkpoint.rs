//! Per-epoch checkpoint, evaluation and throughput benchmark.

use crate::compose::{ACCURACY_FILE, META_FILE};
use crate::error::TrainError;
use crate::meta::{EpochRecord, ModelMeta, SpeedRecord};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tagtrain_core::persistence::atomic_write_json;
use tagtrain_core::{
    Backend, Corpus, DeviceScope, Losses, Optimizer, QuietScope, Scores, TrainablePipeline,
    VerbosityControl,
};
use tracing::debug;

/// Writes `model<i>` snapshots and scores them on the dev set.
pub struct CheckpointManager<'a> {
    output_path: PathBuf,
    backend: Backend,
    verbosity: &'a dyn VerbosityControl,
    verbose: bool,
    gold_preproc: bool,
    debug: bool,
    version: String,
}

/// Outcome of one timed evaluation.
struct Timed {
    scores: Scores,
    nwords: usize,
    wps: f64,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(output_path: &Path, backend: Backend, verbosity: &'a dyn VerbosityControl) -> Self {
        Self {
            output_path: output_path.to_path_buf(),
            backend,
            verbosity,
            verbose: false,
            gold_preproc: false,
            debug: false,
            version: "0.0.0".to_string(),
        }
    }

    /// Verbosity to restore once a checkpoint is done.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn gold_preproc(mut self, gold_preproc: bool) -> Self {
        self.gold_preproc = gold_preproc;
        self
    }

    /// Log per-document evaluation mismatches.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Model version recorded in meta when none was supplied.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn epoch_dir(&self, epoch: usize) -> PathBuf {
        self.output_path.join(format!("model{epoch}"))
    }

    /// Save, reload, evaluate and benchmark the averaged view of `nlp`, then
    /// write `accuracy.json` and `meta.json` into the epoch directory.
    ///
    /// The averaged parameters and the quieted log level are both scoped to
    /// this call and restored on every return path.
    pub fn checkpoint<P: TrainablePipeline, C: Corpus>(
        &self,
        epoch: usize,
        nlp: &mut P,
        sgd: &Optimizer,
        corpus: &C,
        losses: &Losses,
        meta: &mut ModelMeta,
    ) -> Result<EpochRecord, TrainError> {
        let location = self.epoch_dir(epoch);
        let averages = sgd.averages();
        let averaged = nlp.use_params(&averages);
        let _quiet = QuietScope::enter(self.verbosity, self.verbose);

        averaged.to_disk(&location)?;
        let first = self.timed_evaluation::<P, C>(&location, corpus)?;
        let (accuracy, speed) = if self.backend.is_accelerated() {
            let _baseline = DeviceScope::enter(Backend::Baseline);
            let baseline = self.timed_evaluation::<P, C>(&location, corpus)?;
            let speed = SpeedRecord {
                nwords: baseline.nwords,
                cpu: baseline.wps,
                gpu: Some(first.wps),
            };
            (baseline.scores, speed)
        } else {
            let speed = SpeedRecord {
                nwords: first.nwords,
                cpu: first.wps,
                gpu: None,
            };
            (first.scores, speed)
        };

        atomic_write_json(&location.join(ACCURACY_FILE), &accuracy)?;
        meta.accuracy = accuracy.clone();
        meta.speed = Some(speed);
        meta.lang = averaged.lang().to_string();
        meta.pipeline = averaged.pipe_names();
        meta.vectors = Some(averaged.vectors_info());
        meta.tagtrain_version = Some(ModelMeta::version_requirement());
        meta.name.get_or_insert_with(|| format!("model{epoch}"));
        meta.version.get_or_insert_with(|| self.version.clone());
        atomic_write_json(&location.join(META_FILE), &*meta)?;
        debug!(epoch, path = %location.display(), "Checkpoint written");

        Ok(EpochRecord {
            epoch,
            location,
            accuracy,
            losses: losses.clone(),
            meta: meta.clone(),
        })
    }

    /// Reload the snapshot under the current backend and time its evaluation.
    fn timed_evaluation<P: TrainablePipeline, C: Corpus>(
        &self,
        location: &Path,
        corpus: &C,
    ) -> Result<Timed, TrainError> {
        let loaded = P::from_disk(location)?;
        let dev = corpus.dev_docs(&loaded, self.gold_preproc)?;
        let nwords: usize = dev.iter().map(|ex| ex.doc.len()).sum();
        let start = Instant::now();
        let scores = loaded.evaluate(&dev, self.debug)?;
        let elapsed = start.elapsed().as_secs_f64().max(1e-9);
        Ok(Timed {
            scores,
            nwords,
            wps: nwords as f64 / elapsed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tagtrain_core::{GoldCorpus, GoldParse, Language, NoopVerbosity, Verbosity};
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingVerbosity(RefCell<Vec<Verbosity>>);

    impl VerbosityControl for RecordingVerbosity {
        fn set_verbosity(&self, level: Verbosity) {
            self.0.borrow_mut().push(level);
        }
    }

    fn gold() -> GoldParse {
        GoldParse {
            words: vec!["the".into(), "cat".into()],
            tags: Some(vec!["DT".into(), "NN".into()]),
            ..Default::default()
        }
    }

    fn trained() -> (Language, Optimizer, GoldCorpus) {
        let corpus = GoldCorpus::from_golds(vec![gold()], vec![gold()], 0);
        let mut nlp = Language::new("en").unwrap();
        nlp.add_pipe("tagger").unwrap();
        let train = corpus.train_examples();
        let mut sgd = nlp.begin_training(&train, Backend::Baseline).unwrap();
        let mut losses = Losses::new();
        nlp.update(&train, &mut sgd, 0.0, &mut losses).unwrap();
        (nlp, sgd, corpus)
    }

    #[test]
    fn test_baseline_checkpoint_writes_files() {
        let dir = TempDir::new().unwrap();
        let (mut nlp, sgd, corpus) = trained();
        let manager = CheckpointManager::new(dir.path(), Backend::Baseline, &NoopVerbosity)
            .version("1.2.3");
        let mut meta = ModelMeta::default();

        let record = manager
            .checkpoint(0, &mut nlp, &sgd, &corpus, &Losses::new(), &mut meta)
            .unwrap();

        assert_eq!(record.location, dir.path().join("model0"));
        assert!(record.location.join(ACCURACY_FILE).exists());
        assert!(record.location.join(META_FILE).exists());
        let speed = meta.speed.clone().unwrap();
        assert_eq!(speed.nwords, 2);
        assert!(speed.gpu.is_none());
        assert_eq!(meta.name.as_deref(), Some("model0"));
        assert_eq!(meta.version.as_deref(), Some("1.2.3"));
        assert_eq!(meta.pipeline, vec!["tagger"]);
    }

    #[test]
    fn test_accelerated_checkpoint_reports_both_speeds() {
        let dir = TempDir::new().unwrap();
        let (mut nlp, sgd, corpus) = trained();
        let backend = Backend::Accelerated { device: 0 };
        let _device = DeviceScope::enter(backend);
        let manager = CheckpointManager::new(dir.path(), backend, &NoopVerbosity);
        let mut meta = ModelMeta::default();

        manager
            .checkpoint(3, &mut nlp, &sgd, &corpus, &Losses::new(), &mut meta)
            .unwrap();

        let speed = meta.speed.unwrap();
        assert!(speed.gpu.is_some());
        assert!(speed.cpu > 0.0);
        assert!(tagtrain_core::backend::current().is_accelerated());
    }

    #[test]
    fn test_meta_name_is_kept_across_epochs() {
        let dir = TempDir::new().unwrap();
        let (mut nlp, sgd, corpus) = trained();
        let manager = CheckpointManager::new(dir.path(), Backend::Baseline, &NoopVerbosity);
        let mut meta = ModelMeta::default();
        for epoch in 0..2 {
            manager
                .checkpoint(epoch, &mut nlp, &sgd, &corpus, &Losses::new(), &mut meta)
                .unwrap();
        }
        assert_eq!(meta.name.as_deref(), Some("model0"));
        assert!(dir.path().join("model1").join(META_FILE).exists());
    }

    #[test]
    fn test_failed_save_restores_params_and_verbosity() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let (mut nlp, mut sgd, corpus) = trained();
        let train = corpus.train_examples();
        let mut losses = Losses::new();
        nlp.update(&train, &mut sgd, 0.0, &mut losses).unwrap();

        let dev = corpus.dev_docs(&nlp, false).unwrap();
        let scores_before = nlp.evaluate(&dev, false).unwrap();
        let weights_before = nlp.get_pipe("tagger").unwrap().to_snapshot().unwrap();

        let recorder = RecordingVerbosity::default();
        let manager = CheckpointManager::new(&blocker, Backend::Baseline, &recorder).verbose(true);
        let mut meta = ModelMeta::default();
        let result = manager.checkpoint(0, &mut nlp, &sgd, &corpus, &losses, &mut meta);

        assert!(result.is_err());
        assert_eq!(
            *recorder.0.borrow(),
            vec![Verbosity::Quiet, Verbosity::Verbose]
        );
        assert_eq!(nlp.evaluate(&dev, false).unwrap(), scores_before);
        assert_eq!(
            nlp.get_pipe("tagger").unwrap().to_snapshot().unwrap(),
            weights_before
        );
        assert!(meta.speed.is_none());
    }
}
