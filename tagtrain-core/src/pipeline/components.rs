//! Reference pipeline components.
//!
//! The tagger, parser and entity recognizer are all per-token classifiers
//! that differ only in the label scheme they read from the gold annotation and
//! write onto the document. The parser predicts `offset|label` pairs, where
//! `offset` is the signed distance from the token to its head.

use super::perceptron::{Perceptron, PerceptronSnapshot, token_features};
use super::{ComponentKind, Losses, TrainableComponent};
use crate::doc::{Doc, Example, GoldParse, SUBTOK_LABEL};
use crate::error::CoreError;
use crate::optimizer::{Optimizer, Weights};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

/// Which annotation layer a classifier head learns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelScheme {
    Tag,
    Dep,
    Ent,
}

impl LabelScheme {
    /// Scheme for a multitask objective name.
    pub fn from_objective(objective: &str) -> Option<Self> {
        match objective {
            "tag" => Some(Self::Tag),
            "dep" => Some(Self::Dep),
            "ent" | "ner" => Some(Self::Ent),
            _ => None,
        }
    }

    /// Per-token gold labels, if the gold carries this layer.
    pub fn gold_labels(&self, gold: &GoldParse) -> Option<Vec<String>> {
        match self {
            Self::Tag => gold.tags.clone(),
            Self::Ent => gold.entities.clone(),
            Self::Dep => {
                let heads = gold.heads.as_ref()?;
                let deps = gold.deps.as_ref()?;
                Some(
                    heads
                        .iter()
                        .zip(deps)
                        .enumerate()
                        .map(|(i, (&head, dep))| format!("{}|{dep}", head as isize - i as isize))
                        .collect(),
                )
            }
        }
    }

    fn apply(&self, doc: &mut Doc, i: usize, label: &str) {
        match self {
            Self::Tag => doc.tags[i] = Some(label.to_string()),
            Self::Ent => doc.ents[i] = Some(label.to_string()),
            Self::Dep => {
                let (offset, dep) = label.split_once('|').unwrap_or(("0", label));
                let head = offset
                    .parse::<isize>()
                    .ok()
                    .and_then(|off| usize::try_from(i as isize + off).ok())
                    .filter(|&h| h < doc.len())
                    .unwrap_or(i);
                doc.heads[i] = Some(head);
                doc.deps[i] = Some(dep.to_string());
            }
        }
    }
}

#[derive(Debug, Clone)]
struct AuxHead {
    objective: String,
    scheme: LabelScheme,
    model: Perceptron,
}

#[derive(Debug, Serialize, Deserialize)]
struct AuxSnapshot {
    objective: String,
    scheme: LabelScheme,
    model: PerceptronSnapshot,
}

#[derive(Debug, Serialize, Deserialize)]
struct ClassifierSnapshot {
    scheme: LabelScheme,
    model: PerceptronSnapshot,
    #[serde(default)]
    aux: Vec<AuxSnapshot>,
}

/// Per-token classifier with optional auxiliary heads.
#[derive(Debug, Clone)]
pub struct TokenClassifier {
    name: String,
    factory: String,
    kind: ComponentKind,
    scheme: LabelScheme,
    model: Perceptron,
    aux: Vec<AuxHead>,
}

impl TokenClassifier {
    pub fn new(name: &str, kind: ComponentKind, scheme: LabelScheme) -> Self {
        Self {
            name: name.to_string(),
            factory: name.to_string(),
            kind,
            scheme,
            model: Perceptron::default(),
            aux: Vec::new(),
        }
    }

    pub fn tagger() -> Self {
        Self::new("tagger", ComponentKind::Tagger, LabelScheme::Tag)
    }

    pub fn parser() -> Self {
        Self::new("parser", ComponentKind::Parser, LabelScheme::Dep)
    }

    pub fn entity_recognizer() -> Self {
        Self::new("ner", ComponentKind::Ner, LabelScheme::Ent)
    }

    pub fn labels(&self) -> &[String] {
        self.model.classes()
    }

    pub fn objectives(&self) -> impl Iterator<Item = &str> {
        self.aux.iter().map(|h| h.objective.as_str())
    }

    fn aux_namespace(&self, objective: &str) -> String {
        format!("{}:{objective}", self.name)
    }
}

impl TrainableComponent for TokenClassifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ComponentKind {
        self.kind
    }

    fn factory(&self) -> &str {
        &self.factory
    }

    fn begin_training(&mut self, examples: &[Example]) -> Result<(), CoreError> {
        for example in examples {
            if let Some(labels) = self.scheme.gold_labels(&example.gold) {
                for label in &labels {
                    self.model.class_id(label);
                }
            }
            for head in &mut self.aux {
                if let Some(labels) = head.scheme.gold_labels(&example.gold) {
                    for label in &labels {
                        head.model.class_id(label);
                    }
                }
            }
        }
        tracing::debug!(
            component = %self.name,
            labels = self.model.classes().len(),
            "Initialized label set"
        );
        Ok(())
    }

    fn update(
        &mut self,
        batch: &[Example],
        sgd: &mut Optimizer,
        drop: f64,
        rng: &mut StdRng,
        losses: &mut Losses,
    ) -> Result<(), CoreError> {
        let mut loss = 0.0;
        for example in batch {
            let words = &example.doc.words;
            if words.len() != example.gold.len() {
                continue;
            }
            if let Some(labels) = self.scheme.gold_labels(&example.gold) {
                for (i, label) in labels.iter().enumerate() {
                    let features = token_features(words, i);
                    loss += self.model.update(&self.name, &features, label, sgd, drop, rng);
                }
            }
            for idx in 0..self.aux.len() {
                let namespace = self.aux_namespace(&self.aux[idx].objective);
                let head = &mut self.aux[idx];
                if let Some(labels) = head.scheme.gold_labels(&example.gold) {
                    for (i, label) in labels.iter().enumerate() {
                        let features = token_features(words, i);
                        loss += head.model.update(&namespace, &features, label, sgd, drop, rng);
                    }
                }
            }
        }
        *losses.entry(self.name.clone()).or_insert(0.0) += loss;
        Ok(())
    }

    fn add_multitask_objective(&mut self, objective: &str) -> Result<(), CoreError> {
        let scheme = LabelScheme::from_objective(objective).ok_or_else(|| {
            CoreError::config(format!(
                "unknown multitask objective '{objective}' for '{}'",
                self.name
            ))
        })?;
        if self.aux.iter().any(|h| h.objective == objective) {
            return Ok(());
        }
        tracing::info!(component = %self.name, objective, "Adding multitask objective");
        self.aux.push(AuxHead {
            objective: objective.to_string(),
            scheme,
            model: Perceptron::default(),
        });
        Ok(())
    }

    fn predict(&self, doc: &mut Doc) {
        for i in 0..doc.len() {
            let features = token_features(&doc.words, i);
            if let Some(label) = self
                .model
                .predict(&features)
                .and_then(|class| self.model.label(class))
            {
                self.scheme.apply(doc, i, label);
            }
        }
    }

    fn param_tables(&mut self) -> Vec<(String, &mut Weights)> {
        let name = &self.name;
        let mut tables = vec![(name.clone(), &mut self.model.weights)];
        tables.extend(
            self.aux
                .iter_mut()
                .map(|h| (format!("{name}:{}", h.objective), &mut h.model.weights)),
        );
        tables
    }

    fn to_snapshot(&self) -> Result<serde_json::Value, CoreError> {
        let snapshot = ClassifierSnapshot {
            scheme: self.scheme,
            model: self.model.to_snapshot(),
            aux: self
                .aux
                .iter()
                .map(|h| AuxSnapshot {
                    objective: h.objective.clone(),
                    scheme: h.scheme,
                    model: h.model.to_snapshot(),
                })
                .collect(),
        };
        Ok(serde_json::to_value(snapshot)?)
    }

    fn from_snapshot(&mut self, snapshot: serde_json::Value) -> Result<(), CoreError> {
        let snapshot: ClassifierSnapshot = serde_json::from_value(snapshot)?;
        if snapshot.scheme != self.scheme {
            return Err(CoreError::model(format!(
                "snapshot for '{}' has scheme {:?}, expected {:?}",
                self.name, snapshot.scheme, self.scheme
            )));
        }
        self.model = Perceptron::from_snapshot(snapshot.model)?;
        self.aux = snapshot
            .aux
            .into_iter()
            .map(|a| {
                Ok(AuxHead {
                    objective: a.objective,
                    scheme: a.scheme,
                    model: Perceptron::from_snapshot(a.model)?,
                })
            })
            .collect::<Result<_, CoreError>>()?;
        Ok(())
    }
}

/// Merges tokens the parser attached to their right neighbour as `subtok`.
#[derive(Debug, Clone, Default)]
pub struct MergeSubtokens;

impl MergeSubtokens {
    pub const NAME: &'static str = "merge_subtokens";
}

impl TrainableComponent for MergeSubtokens {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> ComponentKind {
        ComponentKind::Other
    }

    fn factory(&self) -> &str {
        Self::NAME
    }

    fn is_trainable(&self) -> bool {
        false
    }

    fn predict(&self, doc: &mut Doc) {
        for i in 0..doc.len() {
            doc.merged[i] =
                doc.deps[i].as_deref() == Some(SUBTOK_LABEL) && doc.heads[i] == Some(i + 1);
        }
    }

    fn to_snapshot(&self) -> Result<serde_json::Value, CoreError> {
        Ok(serde_json::json!({}))
    }

    fn from_snapshot(&mut self, _snapshot: serde_json::Value) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn example() -> Example {
        Example::from_gold(GoldParse {
            words: vec!["She".into(), "runs".into(), "fast".into()],
            tags: Some(vec!["PRP".into(), "VBZ".into(), "RB".into()]),
            heads: Some(vec![1, 1, 1]),
            deps: Some(vec!["nsubj".into(), "ROOT".into(), "advmod".into()]),
            entities: Some(vec!["O".into(), "O".into(), "O".into()]),
        })
    }

    fn train(component: &mut TokenClassifier, n_iter: usize) -> Losses {
        let batch = vec![example()];
        let mut sgd = Optimizer::default();
        let mut rng = StdRng::seed_from_u64(0);
        let mut losses = Losses::new();
        component.begin_training(&batch).unwrap();
        for _ in 0..n_iter {
            sgd.begin_update();
            component
                .update(&batch, &mut sgd, 0.0, &mut rng, &mut losses)
                .unwrap();
        }
        losses
    }

    #[test]
    fn test_dep_labels_encode_head_offsets() {
        let labels = LabelScheme::Dep.gold_labels(&example().gold).unwrap();
        assert_eq!(labels, vec!["1|nsubj", "0|ROOT", "-1|advmod"]);
    }

    #[test]
    fn test_dep_apply_clamps_bad_offsets_to_root() {
        let mut doc = Doc::from_words(["a", "b"]);
        LabelScheme::Dep.apply(&mut doc, 1, "5|dobj");
        assert_eq!(doc.heads[1], Some(1));
        assert_eq!(doc.deps[1].as_deref(), Some("dobj"));
    }

    #[test]
    fn test_parser_learns_training_sentence() {
        let mut parser = TokenClassifier::parser();
        let losses = train(&mut parser, 10);
        assert!(losses["parser"] > 0.0);

        let mut doc = example().doc;
        parser.predict(&mut doc);
        assert_eq!(doc.heads, vec![Some(1), Some(1), Some(1)]);
        assert_eq!(doc.deps[0].as_deref(), Some("nsubj"));
    }

    #[test]
    fn test_multitask_heads_add_loss_and_tables() {
        let mut ner = TokenClassifier::entity_recognizer();
        ner.add_multitask_objective("dep").unwrap();
        ner.add_multitask_objective("dep").unwrap();
        assert_eq!(ner.objectives().collect::<Vec<_>>(), vec!["dep"]);

        let losses = train(&mut ner, 1);
        assert!(losses["ner"] > 0.0);
        let namespaces: Vec<String> = ner.param_tables().into_iter().map(|(n, _)| n).collect();
        assert_eq!(namespaces, vec!["ner".to_string(), "ner:dep".to_string()]);
    }

    #[test]
    fn test_unknown_objective_is_config_error() {
        let mut parser = TokenClassifier::parser();
        assert!(matches!(
            parser.add_multitask_objective("sentiment"),
            Err(CoreError::Config(_))
        ));
    }

    #[test]
    fn test_snapshot_roundtrip_keeps_aux_heads() {
        let mut tagger = TokenClassifier::tagger();
        tagger.add_multitask_objective("ent").unwrap();
        train(&mut tagger, 3);

        let mut restored = TokenClassifier::tagger();
        restored
            .from_snapshot(tagger.to_snapshot().unwrap())
            .unwrap();
        assert_eq!(restored.labels(), tagger.labels());
        assert_eq!(restored.objectives().collect::<Vec<_>>(), vec!["ent"]);
    }

    #[test]
    fn test_snapshot_scheme_mismatch() {
        let tagger = TokenClassifier::tagger();
        let mut ner = TokenClassifier::entity_recognizer();
        assert!(ner.from_snapshot(tagger.to_snapshot().unwrap()).is_err());
    }

    #[test]
    fn test_merge_subtokens_marks_subtok_arcs() {
        let mut doc = Doc::from_words(["New", "York"]);
        doc.heads = vec![Some(1), Some(1)];
        doc.deps = vec![Some(SUBTOK_LABEL.into()), Some("ROOT".into())];
        MergeSubtokens.predict(&mut doc);
        assert_eq!(doc.merged, vec![true, false]);
    }
}
