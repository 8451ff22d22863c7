//! Documents, gold annotations and training examples.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};

/// Dependency label marking a token that belongs to the same word as its head.
pub const SUBTOK_LABEL: &str = "subtok";

/// A tokenized document plus whatever the pipeline predicted for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Doc {
    pub words: Vec<String>,
    pub tags: Vec<Option<String>>,
    pub heads: Vec<Option<usize>>,
    pub deps: Vec<Option<String>>,
    pub ents: Vec<Option<String>>,
    /// `merged[i]` is set when token `i` was merged into token `i + 1`.
    pub merged: Vec<bool>,
}

impl Doc {
    pub fn from_words<S: Into<String>>(words: impl IntoIterator<Item = S>) -> Self {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        let n = words.len();
        Self {
            words,
            tags: vec![None; n],
            heads: vec![None; n],
            deps: vec![None; n],
            ents: vec![None; n],
            merged: vec![false; n],
        }
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Drop all predicted annotation, keeping the tokens.
    pub fn clear_annotations(&mut self) {
        *self = Self::from_words(std::mem::take(&mut self.words));
    }
}

/// Reference annotation for one document. Each layer is optional so corpora
/// that only carry some layers (e.g. entities only) are accepted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoldParse {
    pub words: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heads: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deps: Option<Vec<String>>,
    /// Per-token IOB entity tags (`O`, `B-PER`, `I-PER`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<String>>,
}

impl GoldParse {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Raw text the document was tokenized from.
    pub fn text(&self) -> String {
        self.words.join(" ")
    }

    /// Check every present layer is aligned with the tokens.
    pub fn validate(&self) -> Result<(), CoreError> {
        let n = self.words.len();
        let check = |layer: &str, len: Option<usize>| match len {
            Some(len) if len != n => Err(CoreError::corpus(format!(
                "{layer} layer has {len} entries for {n} words"
            ))),
            _ => Ok(()),
        };
        check("tags", self.tags.as_ref().map(Vec::len))?;
        check("heads", self.heads.as_ref().map(Vec::len))?;
        check("deps", self.deps.as_ref().map(Vec::len))?;
        check("entities", self.entities.as_ref().map(Vec::len))?;
        if let Some(heads) = &self.heads {
            if let Some(bad) = heads.iter().find(|&&h| h >= n) {
                return Err(CoreError::corpus(format!(
                    "head index {bad} out of range for {n} words"
                )));
            }
        }
        if self.heads.is_some() != self.deps.is_some() {
            return Err(CoreError::corpus("heads and deps must be given together"));
        }
        Ok(())
    }

    /// Gold merge boundaries: token `i` joins token `i + 1` when it is a
    /// `subtok` dependent of that token.
    pub fn merges(&self) -> Vec<bool> {
        match (&self.heads, &self.deps) {
            (Some(heads), Some(deps)) => heads
                .iter()
                .zip(deps)
                .enumerate()
                .map(|(i, (&head, dep))| dep == SUBTOK_LABEL && head == i + 1)
                .collect(),
            _ => vec![false; self.words.len()],
        }
    }
}

/// A (document, gold) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub doc: Doc,
    pub gold: GoldParse,
}

impl Example {
    pub fn new(doc: Doc, gold: GoldParse) -> Self {
        Self { doc, gold }
    }

    /// Example whose document uses the gold tokenization.
    pub fn from_gold(gold: GoldParse) -> Self {
        Self {
            doc: Doc::from_words(gold.words.iter().cloned()),
            gold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gold() -> GoldParse {
        GoldParse {
            words: vec!["New".into(), "York".into(), "rocks".into()],
            tags: Some(vec!["NNP".into(), "NNP".into(), "VBZ".into()]),
            heads: Some(vec![1, 2, 2]),
            deps: Some(vec!["compound".into(), "nsubj".into(), "ROOT".into()]),
            entities: Some(vec!["B-GPE".into(), "I-GPE".into(), "O".into()]),
        }
    }

    #[test]
    fn test_validate_accepts_aligned_layers() {
        assert!(gold().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_misaligned_tags() {
        let mut g = gold();
        g.tags = Some(vec!["NNP".into()]);
        assert!(matches!(g.validate(), Err(CoreError::Corpus(_))));
    }

    #[test]
    fn test_validate_rejects_out_of_range_head() {
        let mut g = gold();
        g.heads = Some(vec![1, 2, 7]);
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_merges_from_subtok_arcs() {
        let mut g = gold();
        g.deps = Some(vec![SUBTOK_LABEL.into(), "nsubj".into(), "ROOT".into()]);
        assert_eq!(g.merges(), vec![true, false, false]);
    }

    #[test]
    fn test_doc_from_words_has_empty_annotation() {
        let doc = Doc::from_words(["a", "b"]);
        assert_eq!(doc.len(), 2);
        assert_eq!(doc.tags, vec![None, None]);
        assert_eq!(doc.merged, vec![false, false]);
    }

    #[test]
    fn test_gold_json_layers_are_optional() {
        let g: GoldParse = serde_json::from_str(r#"{"words": ["hi"]}"#).unwrap();
        assert!(g.tags.is_none());
        assert!(g.validate().is_ok());
    }
}
