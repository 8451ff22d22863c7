//! Reference pipeline: a language code, a vector table and an ordered list of
//! registry-created components.
//!
//! On-disk layout of a snapshot directory:
//!
//! ```text
//! <loc>/config.json            lang + ordered (name, factory) pairs
//! <loc>/vocab/vectors.json     vector table
//! <loc>/<name>/model.json      one directory per component
//! <loc>/<name>/model.sha256
//! ```
//!
//! Each component's state lives entirely under its own directory, so a
//! composite model can be assembled by swapping component directories.

use super::registry::ComponentRegistry;
use super::{ComponentKind, Losses, TrainableComponent, TrainablePipeline};
use crate::backend::{self, Backend};
use crate::doc::{Doc, Example};
use crate::error::CoreError;
use crate::optimizer::{Optimizer, ParamAverages, ParamStash, swap_in_averages};
use crate::persistence::{atomic_write, atomic_write_json, load_json, sha256_hex};
use crate::scorer::{Scorer, Scores};
use crate::vectors::{Vectors, VectorsInfo};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.json";
const MODEL_FILE: &str = "model.json";
const DIGEST_FILE: &str = "model.sha256";

#[derive(Debug, Serialize, Deserialize)]
struct PipeEntry {
    name: String,
    factory: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PipelineConfig {
    lang: String,
    pipeline: Vec<PipeEntry>,
}

pub struct Language {
    lang: String,
    components: Vec<Box<dyn TrainableComponent>>,
    disabled: Vec<Box<dyn TrainableComponent>>,
    vectors: Vectors,
    registry: ComponentRegistry,
    rng: StdRng,
}

impl Language {
    /// Blank pipeline for `lang`, using the default component registry.
    pub fn new(lang: &str) -> Result<Self, CoreError> {
        Self::with_registry(lang, ComponentRegistry::with_defaults())
    }

    pub fn with_registry(lang: &str, registry: ComponentRegistry) -> Result<Self, CoreError> {
        let valid = (2..=3).contains(&lang.len()) && lang.chars().all(|c| c.is_ascii_lowercase());
        if !valid {
            return Err(CoreError::config(format!(
                "'{lang}' is not a language code (expected e.g. 'en', 'de', 'xx')"
            )));
        }
        Ok(Self {
            lang: lang.to_string(),
            components: Vec::new(),
            disabled: Vec::new(),
            vectors: Vectors::default(),
            registry,
            rng: StdRng::seed_from_u64(0),
        })
    }

    /// Reseed the dropout RNG.
    pub fn set_seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub fn vectors(&self) -> &Vectors {
        &self.vectors
    }

    pub fn set_vectors(&mut self, vectors: Vectors) {
        self.vectors = vectors;
    }

    /// Load a text-format vector table into the vocabulary.
    pub fn load_vectors(&mut self, path: &Path) -> Result<(), CoreError> {
        info!(path = %path.display(), "Loading vectors");
        self.vectors = Vectors::from_text_file(path)?;
        Ok(())
    }

    pub fn get_pipe(&self, name: &str) -> Option<&dyn TrainableComponent> {
        self.components
            .iter()
            .find(|c| c.name() == name)
            .map(|c| c.as_ref())
    }

    /// Names of components removed by [`TrainablePipeline::disable_pipes`].
    pub fn disabled_names(&self) -> Vec<String> {
        self.disabled.iter().map(|c| c.name().to_string()).collect()
    }

    /// Annotate a single document with every active component, in order.
    pub fn predict(&self, doc: &mut Doc) {
        for component in &self.components {
            component.predict(doc);
        }
    }

    /// Annotate documents on the current backend.
    pub fn pipe(&self, docs: &mut [Doc]) {
        match backend::current() {
            Backend::Baseline => docs.iter_mut().for_each(|doc| self.predict(doc)),
            Backend::Accelerated { .. } => docs.par_iter_mut().for_each(|doc| self.predict(doc)),
        }
    }

    fn load_component(&self, dir: &Path, entry: &PipeEntry) -> Result<Box<dyn TrainableComponent>, CoreError> {
        let mut component = self.registry.create(&entry.factory)?;
        if component.name() != entry.name {
            return Err(CoreError::model(format!(
                "factory '{}' creates '{}', snapshot expects '{}'",
                entry.factory,
                component.name(),
                entry.name
            )));
        }
        let model_path = dir.join(MODEL_FILE);
        let bytes = std::fs::read(&model_path)?;
        let expected = std::fs::read_to_string(dir.join(DIGEST_FILE)).unwrap_or_default();
        if sha256_hex(&bytes) != expected.trim() {
            return Err(CoreError::CorruptSnapshot { path: model_path });
        }
        component.from_snapshot(serde_json::from_slice(&bytes)?)?;
        Ok(component)
    }
}

impl TrainablePipeline for Language {
    fn lang(&self) -> &str {
        &self.lang
    }

    fn pipe_kinds(&self) -> Vec<(String, ComponentKind)> {
        self.components
            .iter()
            .map(|c| (c.name().to_string(), c.kind()))
            .collect()
    }

    fn add_pipe(&mut self, factory: &str) -> Result<(), CoreError> {
        let component = self.registry.create(factory)?;
        if self.has_pipe(component.name()) {
            return Err(CoreError::config(format!(
                "pipeline already has a component named '{}'",
                component.name()
            )));
        }
        debug!(component = %component.name(), "Adding pipe");
        self.components.push(component);
        Ok(())
    }

    fn get_pipe_mut(&mut self, name: &str) -> Option<&mut dyn TrainableComponent> {
        for component in self.components.iter_mut() {
            if component.name() == name {
                return Some(component.as_mut());
            }
        }
        None
    }

    fn disable_pipes(&mut self, names: &[String]) {
        let (disabled, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.components)
            .into_iter()
            .partition(|c| names.iter().any(|n| n == c.name()));
        for component in &disabled {
            info!(component = %component.name(), "Disabling pipe");
        }
        self.components = kept;
        self.disabled.extend(disabled);
    }

    fn make_doc(&self, text: &str) -> Doc {
        Doc::from_words(text.split_whitespace())
    }

    fn begin_training(
        &mut self,
        examples: &[Example],
        backend: Backend,
    ) -> Result<Optimizer, CoreError> {
        info!(%backend, examples = examples.len(), "Beginning training");
        for component in self.components.iter_mut() {
            component.begin_training(examples)?;
        }
        Ok(Optimizer::default())
    }

    fn update(
        &mut self,
        batch: &[Example],
        sgd: &mut Optimizer,
        drop: f64,
        losses: &mut Losses,
    ) -> Result<(), CoreError> {
        sgd.begin_update();
        for component in self.components.iter_mut().filter(|c| c.is_trainable()) {
            component.update(batch, sgd, drop, &mut self.rng, losses)?;
        }
        Ok(())
    }

    fn swap_params(&mut self, averages: &ParamAverages) -> ParamStash {
        let mut stash = ParamStash::new();
        for component in self.components.iter_mut() {
            for (namespace, table) in component.param_tables() {
                if let Some(current) = swap_in_averages(&namespace, table, averages) {
                    stash.push((namespace, current));
                }
            }
        }
        stash
    }

    fn restore_params(&mut self, stash: ParamStash) {
        let mut stash: HashMap<String, _> = stash.into_iter().collect();
        for component in self.components.iter_mut() {
            for (namespace, table) in component.param_tables() {
                if let Some(weights) = stash.remove(&namespace) {
                    *table = weights;
                }
            }
        }
    }

    fn to_disk(&self, path: &Path) -> Result<(), CoreError> {
        std::fs::create_dir_all(path)?;
        let config = PipelineConfig {
            lang: self.lang.clone(),
            pipeline: self
                .components
                .iter()
                .map(|c| PipeEntry {
                    name: c.name().to_string(),
                    factory: c.factory().to_string(),
                })
                .collect(),
        };
        atomic_write_json(&path.join(CONFIG_FILE), &config)?;
        atomic_write_json(&path.join("vocab").join("vectors.json"), &self.vectors)?;
        for component in &self.components {
            let dir = path.join(component.name());
            let bytes = serde_json::to_vec(&component.to_snapshot()?)?;
            atomic_write(&dir.join(MODEL_FILE), &bytes)?;
            atomic_write(&dir.join(DIGEST_FILE), sha256_hex(&bytes).as_bytes())?;
        }
        debug!(path = %path.display(), "Saved pipeline");
        Ok(())
    }

    fn from_disk(path: &Path) -> Result<Self, CoreError> {
        let config: PipelineConfig = load_json(&path.join(CONFIG_FILE))?
            .ok_or_else(|| CoreError::NotFound(path.join(CONFIG_FILE)))?;
        let mut nlp = Self::new(&config.lang)?;
        if let Some(vectors) = load_json(&path.join("vocab").join("vectors.json"))? {
            nlp.vectors = vectors;
        }
        for entry in &config.pipeline {
            let component = nlp.load_component(&path.join(&entry.name), entry)?;
            nlp.components.push(component);
        }
        debug!(path = %path.display(), components = nlp.components.len(), "Loaded pipeline");
        Ok(nlp)
    }

    fn evaluate(&self, dev: &[Example], verbose: bool) -> Result<Scores, CoreError> {
        let mut docs: Vec<Doc> = dev
            .iter()
            .map(|example| {
                let mut doc = example.doc.clone();
                doc.clear_annotations();
                doc
            })
            .collect();
        self.pipe(&mut docs);
        let mut scorer = Scorer::new();
        for (doc, example) in docs.iter().zip(dev) {
            scorer.score(doc, &example.gold, verbose);
        }
        Ok(scorer.scores())
    }

    fn vectors_info(&self) -> VectorsInfo {
        self.vectors.info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_bad_language_code() {
        assert!(matches!(Language::new("English"), Err(CoreError::Config(_))));
        assert!(Language::new("en").is_ok());
    }

    #[test]
    fn test_add_and_disable_pipes() {
        let mut nlp = Language::new("en").unwrap();
        for name in ["tagger", "parser", "ner"] {
            nlp.add_pipe(name).unwrap();
        }
        assert!(nlp.add_pipe("tagger").is_err());

        nlp.disable_pipes(&["parser".to_string()]);
        assert_eq!(nlp.pipe_names(), vec!["tagger", "ner"]);
        assert_eq!(nlp.disabled_names(), vec!["parser"]);
        assert!(nlp.get_pipe_mut("parser").is_none());
        assert!(nlp.get_pipe("ner").is_some());
    }

    #[test]
    fn test_make_doc_splits_on_whitespace() {
        let nlp = Language::new("en").unwrap();
        assert_eq!(nlp.make_doc("a  b\tc").words, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_tampered_snapshot_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut nlp = Language::new("en").unwrap();
        nlp.add_pipe("tagger").unwrap();
        nlp.to_disk(dir.path()).unwrap();

        std::fs::write(dir.path().join("tagger").join(MODEL_FILE), b"{}").unwrap();
        assert!(matches!(
            Language::from_disk(dir.path()),
            Err(CoreError::CorruptSnapshot { .. })
        ));
    }

    #[test]
    fn test_from_disk_missing_location() {
        assert!(matches!(
            Language::from_disk(Path::new("/nonexistent/model0")),
            Err(CoreError::NotFound(_))
        ));
    }
}
