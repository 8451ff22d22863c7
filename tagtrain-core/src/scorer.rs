//! Accuracy metrics for predicted documents against gold annotation.
//!
//! All scores are percentages in `0.0..=100.0`. Every metric key is always
//! present in [`Scorer::scores`]; a layer with no gold annotation scores 0.

use crate::doc::{Doc, GoldParse};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Metric name → value.
pub type Scores = BTreeMap<String, f64>;

pub const TAGS_ACC: &str = "tags_acc";
pub const TOKEN_ACC: &str = "token_acc";
pub const UAS: &str = "uas";
pub const LAS: &str = "las";
pub const ENTS_P: &str = "ents_p";
pub const ENTS_R: &str = "ents_r";
pub const ENTS_F: &str = "ents_f";

#[derive(Debug, Default, Clone, Copy)]
struct Ratio {
    hits: usize,
    total: usize,
}

impl Ratio {
    fn add(&mut self, hit: bool) {
        self.total += 1;
        if hit {
            self.hits += 1;
        }
    }

    fn percent(&self) -> f64 {
        percent(self.hits, self.total)
    }
}

fn percent(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * hits as f64 / total as f64
    }
}

#[derive(Debug, Default, Clone)]
pub struct Scorer {
    tags: Ratio,
    tokens: Ratio,
    unlabeled: Ratio,
    labeled: Ratio,
    ents_tp: usize,
    ents_fp: usize,
    ents_fn: usize,
}

type Span = (usize, usize, String);

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score one predicted document. With `verbose`, mismatches are logged at
    /// debug level.
    pub fn score(&mut self, doc: &Doc, gold: &GoldParse, verbose: bool) {
        if doc.len() != gold.len() {
            debug!(
                predicted = doc.len(),
                gold = gold.len(),
                "Token count mismatch, document counted as fully wrong"
            );
            for _ in 0..gold.len() {
                self.tokens.add(false);
            }
            return;
        }

        let gold_merges = gold.merges();
        for (i, (&pred, &want)) in doc.merged.iter().zip(&gold_merges).enumerate() {
            self.tokens.add(pred == want);
            if verbose && pred != want {
                debug!(token = i, word = %doc.words[i], "Tokenization mismatch");
            }
        }

        if let Some(tags) = &gold.tags {
            for (i, want) in tags.iter().enumerate() {
                let hit = doc.tags[i].as_deref() == Some(want.as_str());
                self.tags.add(hit);
                if verbose && !hit {
                    debug!(token = i, word = %doc.words[i], gold = %want, predicted = ?doc.tags[i], "Tag mismatch");
                }
            }
        }

        if let (Some(heads), Some(deps)) = (&gold.heads, &gold.deps) {
            for i in 0..heads.len() {
                let head_hit = doc.heads[i] == Some(heads[i]);
                self.unlabeled.add(head_hit);
                self.labeled
                    .add(head_hit && doc.deps[i].as_deref() == Some(deps[i].as_str()));
            }
        }

        if let Some(entities) = &gold.entities {
            let gold_spans: HashSet<Span> = iob_spans(entities.iter().map(String::as_str))
                .into_iter()
                .collect();
            let pred_spans: HashSet<Span> =
                iob_spans(doc.ents.iter().map(|e| e.as_deref().unwrap_or("O")))
                    .into_iter()
                    .collect();
            let tp = gold_spans.intersection(&pred_spans).count();
            self.ents_tp += tp;
            self.ents_fp += pred_spans.len() - tp;
            self.ents_fn += gold_spans.len() - tp;
            if verbose {
                for missed in gold_spans.difference(&pred_spans) {
                    debug!(span = ?missed, "Missed entity");
                }
            }
        }
    }

    pub fn scores(&self) -> Scores {
        let p = percent(self.ents_tp, self.ents_tp + self.ents_fp);
        let r = percent(self.ents_tp, self.ents_tp + self.ents_fn);
        let f = if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        };
        Scores::from([
            (TAGS_ACC.to_string(), self.tags.percent()),
            (TOKEN_ACC.to_string(), self.tokens.percent()),
            (UAS.to_string(), self.unlabeled.percent()),
            (LAS.to_string(), self.labeled.percent()),
            (ENTS_P.to_string(), p),
            (ENTS_R.to_string(), r),
            (ENTS_F.to_string(), f),
        ])
    }
}

/// Decode IOB or BILUO tags into `(start, end, label)` spans, `end`
/// exclusive. An `I-` or `L-` tag that does not continue a span of the same
/// label opens a new one; `L-` and `U-` close their span on that token.
pub fn iob_spans<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, String)> = None;
    let mut n = 0;
    for (i, tag) in tags.into_iter().enumerate() {
        n = i + 1;
        let (prefix, label) = match tag.split_once('-') {
            Some((p, l)) if matches!(p, "B" | "I" | "L" | "U") => (p, l),
            _ => ("O", ""),
        };
        let continues = matches!(prefix, "I" | "L")
            && open.as_ref().is_some_and(|(_, l)| l == label);
        if !continues {
            if let Some((start, l)) = open.take() {
                spans.push((start, i, l));
            }
            if prefix != "O" {
                open = Some((i, label.to_string()));
            }
        }
        if matches!(prefix, "L" | "U") {
            if let Some((start, l)) = open.take() {
                spans.push((start, n, l));
            }
        }
    }
    if let Some((start, l)) = open {
        spans.push((start, n, l));
    }
    spans
}
