//! Sparse linear token classifier.
//!
//! Weight updates go through the shared [`Optimizer`] so that the averaged
//! view of every head is available at checkpoint time.

use crate::error::CoreError;
use crate::optimizer::{Optimizer, ParamKey, Weights};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Context features for token `i`.
pub fn token_features(words: &[String], i: usize) -> Vec<String> {
    let word = |j: isize| -> String {
        usize::try_from(j)
            .ok()
            .and_then(|j| words.get(j))
            .map(|w| w.to_lowercase())
            .unwrap_or_else(|| if j < 0 { "-START-".into() } else { "-END-".into() })
    };
    let i = i as isize;
    let current = word(i);
    let original = &words[i as usize];
    let chars: Vec<char> = current.chars().collect();
    let suffix: String = chars[chars.len().saturating_sub(3)..].iter().collect();
    let prefix: String = chars.iter().take(1).collect();

    vec![
        "bias".to_string(),
        format!("w={current}"),
        format!("suf={suffix}"),
        format!("pre={prefix}"),
        format!("shape={}", word_shape(original)),
        format!("w-1={}", word(i - 1)),
        format!("w+1={}", word(i + 1)),
        format!("w-2={}", word(i - 2)),
        format!("w+2={}", word(i + 2)),
        format!("w-1,w={},{current}", word(i - 1)),
        format!("w,w+1={current},{}", word(i + 1)),
        format!("pos={}", i.min(3)),
    ]
}

/// Collapsed orthographic shape, e.g. `Xxxx` → `Xx`, `1984` → `d`.
fn word_shape(word: &str) -> String {
    let mut shape = String::new();
    for c in word.chars() {
        let class = if c.is_uppercase() {
            'X'
        } else if c.is_lowercase() {
            'x'
        } else if c.is_ascii_digit() {
            'd'
        } else {
            c
        };
        if !shape.ends_with(class) {
            shape.push(class);
        }
    }
    shape
}

#[derive(Debug, Clone, Default)]
pub struct Perceptron {
    classes: Vec<String>,
    class_index: HashMap<String, u32>,
    pub(crate) weights: Weights,
}

/// Serialized form: sorted so identical models produce identical bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptronSnapshot {
    pub classes: Vec<String>,
    pub weights: Vec<(String, u32, f64)>,
}

impl Perceptron {
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn class_id(&mut self, label: &str) -> u32 {
        if let Some(&id) = self.class_index.get(label) {
            return id;
        }
        let id = self.classes.len() as u32;
        self.classes.push(label.to_string());
        self.class_index.insert(label.to_string(), id);
        id
    }

    pub fn label(&self, class: u32) -> Option<&str> {
        self.classes.get(class as usize).map(String::as_str)
    }

    fn scores(&self, features: &[String]) -> Vec<f64> {
        let mut scores = vec![0.0; self.classes.len()];
        for feature in features {
            for (class, score) in scores.iter_mut().enumerate() {
                let key = ParamKey::new(feature.as_str(), class as u32);
                if let Some(w) = self.weights.get(&key) {
                    *score += w;
                }
            }
        }
        scores
    }

    /// Highest-scoring class; ties go to the lowest class id.
    pub fn predict(&self, features: &[String]) -> Option<u32> {
        let scores = self.scores(features);
        let mut best: Option<(u32, f64)> = None;
        for (class, &score) in scores.iter().enumerate() {
            if best.is_none_or(|(_, s)| score > s) {
                best = Some((class as u32, score));
            }
        }
        best.map(|(class, _)| class)
    }

    /// One perceptron step on a single token. Each feature is dropped with
    /// probability `drop`. Returns 1.0 when the guess was wrong.
    pub fn update(
        &mut self,
        namespace: &str,
        features: &[String],
        truth: &str,
        sgd: &mut Optimizer,
        drop: f64,
        rng: &mut StdRng,
    ) -> f64 {
        let drop = drop.clamp(0.0, 1.0);
        let kept: Vec<String> = features
            .iter()
            .filter(|_| drop == 0.0 || !rng.gen_bool(drop))
            .cloned()
            .collect();
        let truth = self.class_id(truth);
        let guess = self.predict(&kept);
        if guess == Some(truth) {
            return 0.0;
        }
        for feature in &kept {
            let key = ParamKey::new(feature.as_str(), truth);
            sgd.update_param(namespace, &mut self.weights, key, 1.0);
            if let Some(guess) = guess {
                let key = ParamKey::new(feature.as_str(), guess);
                sgd.update_param(namespace, &mut self.weights, key, -1.0);
            }
        }
        1.0
    }

    pub fn to_snapshot(&self) -> PerceptronSnapshot {
        let mut weights: Vec<(String, u32, f64)> = self
            .weights
            .iter()
            .filter(|(_, w)| **w != 0.0)
            .map(|(k, w)| (k.feature.clone(), k.class, *w))
            .collect();
        weights.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        PerceptronSnapshot {
            classes: self.classes.clone(),
            weights,
        }
    }

    pub fn from_snapshot(snapshot: PerceptronSnapshot) -> Result<Self, CoreError> {
        let mut model = Self::default();
        for label in &snapshot.classes {
            model.class_id(label);
        }
        if model.classes.len() != snapshot.classes.len() {
            return Err(CoreError::model("duplicate class labels in snapshot"));
        }
        for (feature, class, weight) in snapshot.weights {
            if class as usize >= model.classes.len() {
                return Err(CoreError::model(format!(
                    "weight for unknown class {class} in snapshot"
                )));
            }
            model.weights.insert(ParamKey::new(feature, class), weight);
        }
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn test_features_pad_sentence_edges() {
        let feats = token_features(&words("Dogs bark"), 0);
        assert!(feats.contains(&"w-1=-START-".to_string()));
        assert!(feats.contains(&"w+2=-END-".to_string()));
        assert!(feats.contains(&"shape=Xx".to_string()));
    }

    #[test]
    fn test_word_shape() {
        assert_eq!(word_shape("McDonald"), "XxXx");
        assert_eq!(word_shape("1984"), "d");
        assert_eq!(word_shape("U.S."), "X.X.");
    }

    #[test]
    fn test_learns_a_separable_pattern() {
        let mut model = Perceptron::default();
        let mut sgd = Optimizer::default();
        let mut rng = StdRng::seed_from_u64(0);
        let sent = words("the dog saw the cat");
        let tags = ["DT", "NN", "VBD", "DT", "NN"];
        for _ in 0..20 {
            sgd.begin_update();
            for (i, tag) in tags.iter().enumerate() {
                model.update("tagger", &token_features(&sent, i), tag, &mut sgd, 0.0, &mut rng);
            }
        }
        for (i, tag) in tags.iter().enumerate() {
            let class = model.predict(&token_features(&sent, i)).unwrap();
            assert_eq!(model.label(class), Some(*tag));
        }
    }

    #[test]
    fn test_snapshot_roundtrip_preserves_predictions() {
        let mut model = Perceptron::default();
        let mut sgd = Optimizer::default();
        let mut rng = StdRng::seed_from_u64(1);
        let sent = words("a b c");
        sgd.begin_update();
        for (i, label) in ["X", "Y", "Z"].iter().enumerate() {
            model.update("m", &token_features(&sent, i), label, &mut sgd, 0.0, &mut rng);
        }
        let restored = Perceptron::from_snapshot(model.to_snapshot()).unwrap();
        for i in 0..3 {
            let feats = token_features(&sent, i);
            assert_eq!(restored.predict(&feats), model.predict(&feats));
        }
    }

    #[test]
    fn test_snapshot_rejects_unknown_class() {
        let snapshot = PerceptronSnapshot {
            classes: vec!["A".into()],
            weights: vec![("bias".into(), 3, 1.0)],
        };
        assert!(Perceptron::from_snapshot(snapshot).is_err());
    }
}
