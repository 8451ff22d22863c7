//! Gold-standard corpus reader.
//!
//! A corpus location is either a single file or a directory walked for
//! `.json` / `.jsonl` files. A file holds a JSON array of [`GoldParse`]
//! objects or one object per line.

use crate::doc::{Doc, Example, GoldParse};
use crate::error::CoreError;
use crate::pipeline::TrainablePipeline;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Source of training and development examples.
pub trait Corpus {
    /// Total number of words in the training set.
    fn count_train(&self) -> usize;

    /// Training examples in corpus order, gold-tokenized, for label discovery.
    fn train_examples(&self) -> Vec<Example>;

    /// One epoch's worth of training examples, shuffled.
    fn train_docs<P: TrainablePipeline>(
        &mut self,
        nlp: &P,
        noise_level: f64,
        gold_preproc: bool,
    ) -> Result<Vec<Example>, CoreError>;

    fn dev_docs<P: TrainablePipeline>(
        &self,
        nlp: &P,
        gold_preproc: bool,
    ) -> Result<Vec<Example>, CoreError>;
}

#[derive(Debug, Clone)]
pub struct GoldCorpus {
    train: Vec<GoldParse>,
    dev: Vec<GoldParse>,
    rng: StdRng,
}

impl GoldCorpus {
    /// Read both sets. `limit` caps the number of training documents
    /// (`0` keeps all of them).
    pub fn new(train_path: &Path, dev_path: &Path, limit: usize, seed: u64) -> Result<Self, CoreError> {
        let mut train = read_golds(train_path)?;
        if limit > 0 {
            train.truncate(limit);
        }
        let dev = read_golds(dev_path)?;
        info!(train = train.len(), dev = dev.len(), "Loaded corpus");
        Ok(Self::from_golds(train, dev, seed))
    }

    pub fn from_golds(train: Vec<GoldParse>, dev: Vec<GoldParse>, seed: u64) -> Self {
        Self {
            train,
            dev,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn train_golds(&self) -> &[GoldParse] {
        &self.train
    }

    pub fn dev_golds(&self) -> &[GoldParse] {
        &self.dev
    }
}

impl Corpus for GoldCorpus {
    fn count_train(&self) -> usize {
        self.train.iter().map(GoldParse::len).sum()
    }

    fn train_examples(&self) -> Vec<Example> {
        self.train.iter().cloned().map(Example::from_gold).collect()
    }

    fn train_docs<P: TrainablePipeline>(
        &mut self,
        nlp: &P,
        noise_level: f64,
        gold_preproc: bool,
    ) -> Result<Vec<Example>, CoreError> {
        let mut golds = self.train.clone();
        golds.shuffle(&mut self.rng);
        let mut examples = materialize(nlp, golds, gold_preproc);
        if noise_level > 0.0 {
            for example in &mut examples {
                add_noise(&mut example.doc, noise_level, &mut self.rng);
            }
        }
        Ok(examples)
    }

    fn dev_docs<P: TrainablePipeline>(
        &self,
        nlp: &P,
        gold_preproc: bool,
    ) -> Result<Vec<Example>, CoreError> {
        Ok(materialize(nlp, self.dev.clone(), gold_preproc))
    }
}

/// Pair each gold with a document. Without gold preprocessing the document
/// is re-tokenized from raw text; golds whose tokenization then disagrees
/// are skipped.
fn materialize<P: TrainablePipeline>(nlp: &P, golds: Vec<GoldParse>, gold_preproc: bool) -> Vec<Example> {
    let mut skipped = 0usize;
    let examples: Vec<Example> = golds
        .into_iter()
        .filter_map(|gold| {
            if gold_preproc {
                return Some(Example::from_gold(gold));
            }
            let doc = nlp.make_doc(&gold.text());
            if doc.words == gold.words {
                Some(Example::new(doc, gold))
            } else {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        warn!(skipped, "Skipped documents whose tokenization does not match the gold");
    }
    examples
}

/// Corrupt each token with probability `noise_level`: lowercase it and strip
/// trailing sentence punctuation. Token count is unchanged.
fn add_noise(doc: &mut Doc, noise_level: f64, rng: &mut StdRng) {
    let p = noise_level.clamp(0.0, 1.0);
    for word in doc.words.iter_mut() {
        if !rng.gen_bool(p) {
            continue;
        }
        let stripped = word.trim_end_matches(['.', '\'', '!', '?']);
        let kept = if stripped.is_empty() { word.as_str() } else { stripped };
        *word = kept.to_lowercase();
    }
}

/// Read every gold document under `path`.
pub fn read_golds(path: &Path) -> Result<Vec<GoldParse>, CoreError> {
    if !path.exists() {
        return Err(CoreError::NotFound(path.to_path_buf()));
    }
    let mut golds = Vec::new();
    for file in corpus_files(path) {
        let content = std::fs::read_to_string(&file)?;
        let parsed = parse_golds(&content)
            .map_err(|e| CoreError::corpus(format!("{}: {e}", file.display())))?;
        debug!(path = %file.display(), docs = parsed.len(), "Read corpus file");
        golds.extend(parsed);
    }
    Ok(golds)
}

fn corpus_files(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .is_some_and(|ext| ext == "json" || ext == "jsonl")
        })
        .collect();
    files.sort();
    files
}

/// Parse a JSON array or JSON-lines document list and validate each entry.
pub fn parse_golds(content: &str) -> Result<Vec<GoldParse>, CoreError> {
    let golds: Vec<GoldParse> = if content.trim_start().starts_with('[') {
        serde_json::from_str(content)?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .map_err(|e| CoreError::corpus(format!("line {}: {e}", i + 1)))
            })
            .collect::<Result<_, _>>()?
    };
    for (i, gold) in golds.iter().enumerate() {
        gold.validate()
            .map_err(|e| CoreError::corpus(format!("document {i}: {e}")))?;
    }
    Ok(golds)
}
