//! Trainable pipeline abstraction.
//!
//! A pipeline is an ordered list of named components, each tagged with a
//! [`ComponentKind`] and created through a [`registry::ComponentRegistry`].
//! The training loop only talks to the [`TrainablePipeline`] trait, so it can
//! drive the reference [`language::Language`] or any other implementation.

pub mod components;
pub mod language;
pub mod perceptron;
pub mod registry;

use crate::backend::Backend;
use crate::doc::{Doc, Example};
use crate::error::CoreError;
use crate::optimizer::{Optimizer, ParamAverages, ParamStash, Weights};
use crate::scorer::Scores;
use crate::vectors::VectorsInfo;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;

pub use language::Language;
pub use registry::ComponentRegistry;

/// Accumulated loss per component name.
pub type Losses = BTreeMap<String, f64>;

/// What a component predicts. Determines how its accuracy is ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Tagger,
    Parser,
    Ner,
    Other,
}

impl ComponentKind {
    /// Kind implied by a conventional component name.
    pub fn from_name(name: &str) -> Self {
        match name {
            "tagger" => Self::Tagger,
            "parser" => Self::Parser,
            "ner" => Self::Ner,
            _ => Self::Other,
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tagger => "tagger",
            Self::Parser => "parser",
            Self::Ner => "ner",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Capability interface of one pipeline component.
pub trait TrainableComponent: Send + Sync {
    /// Name the component is registered under in its pipeline.
    fn name(&self) -> &str;

    fn kind(&self) -> ComponentKind;

    /// Registry factory that recreates this component from a snapshot.
    fn factory(&self) -> &str;

    /// Whether [`TrainableComponent::update`] does anything.
    fn is_trainable(&self) -> bool {
        true
    }

    /// Prepare label sets from the training examples.
    fn begin_training(&mut self, _examples: &[Example]) -> Result<(), CoreError> {
        Ok(())
    }

    /// Learn from one minibatch, adding this component's loss to `losses`.
    fn update(
        &mut self,
        _batch: &[Example],
        _sgd: &mut Optimizer,
        _drop: f64,
        _rng: &mut StdRng,
        _losses: &mut Losses,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    /// Register an auxiliary training objective (e.g. `dep`, `tag`, `ent`).
    fn add_multitask_objective(&mut self, objective: &str) -> Result<(), CoreError> {
        Err(CoreError::config(format!(
            "component '{}' does not support multitask objective '{objective}'",
            self.name()
        )))
    }

    /// Annotate `doc` in place.
    fn predict(&self, doc: &mut Doc);

    /// Weight tables by parameter namespace, for averaged-parameter swaps.
    fn param_tables(&mut self) -> Vec<(String, &mut Weights)> {
        Vec::new()
    }

    fn to_snapshot(&self) -> Result<serde_json::Value, CoreError>;

    fn from_snapshot(&mut self, snapshot: serde_json::Value) -> Result<(), CoreError>;
}

/// The pipeline operations the training control loop relies on.
pub trait TrainablePipeline: Sized {
    fn lang(&self) -> &str;

    /// Active components in order, with their kinds.
    fn pipe_kinds(&self) -> Vec<(String, ComponentKind)>;

    fn pipe_names(&self) -> Vec<String> {
        self.pipe_kinds().into_iter().map(|(name, _)| name).collect()
    }

    fn has_pipe(&self, name: &str) -> bool {
        self.pipe_kinds().iter().any(|(n, _)| n == name)
    }

    /// Create a component through the registry and append it.
    fn add_pipe(&mut self, factory: &str) -> Result<(), CoreError>;

    fn get_pipe_mut(&mut self, name: &str) -> Option<&mut dyn TrainableComponent>;

    /// Remove the named components from the active pipeline.
    fn disable_pipes(&mut self, names: &[String]);

    /// Tokenize raw text the way this pipeline would.
    fn make_doc(&self, text: &str) -> Doc;

    /// Prepare every component for training and return a fresh optimizer.
    fn begin_training(&mut self, examples: &[Example], backend: Backend)
    -> Result<Optimizer, CoreError>;

    fn update(
        &mut self,
        batch: &[Example],
        sgd: &mut Optimizer,
        drop: f64,
        losses: &mut Losses,
    ) -> Result<(), CoreError>;

    /// Swap averaged weights in, returning the instantaneous ones.
    fn swap_params(&mut self, averages: &ParamAverages) -> ParamStash;

    /// Put back weights returned by [`TrainablePipeline::swap_params`].
    fn restore_params(&mut self, stash: ParamStash);

    /// Scoped averaged-parameter view; the instantaneous weights come back
    /// when the guard drops, whatever happens inside the scope.
    fn use_params(&mut self, averages: &ParamAverages) -> AveragedParams<'_, Self> {
        let stash = self.swap_params(averages);
        AveragedParams {
            pipeline: self,
            stash: Some(stash),
        }
    }

    fn to_disk(&self, path: &Path) -> Result<(), CoreError>;

    fn from_disk(path: &Path) -> Result<Self, CoreError>;

    /// Predict every dev document and score it.
    fn evaluate(&self, dev: &[Example], verbose: bool) -> Result<Scores, CoreError>;

    fn vectors_info(&self) -> VectorsInfo;
}

/// Guard returned by [`TrainablePipeline::use_params`].
pub struct AveragedParams<'a, P: TrainablePipeline> {
    pipeline: &'a mut P,
    stash: Option<ParamStash>,
}

impl<P: TrainablePipeline> Deref for AveragedParams<'_, P> {
    type Target = P;

    fn deref(&self) -> &P {
        self.pipeline
    }
}

impl<P: TrainablePipeline> DerefMut for AveragedParams<'_, P> {
    fn deref_mut(&mut self) -> &mut P {
        self.pipeline
    }
}

impl<P: TrainablePipeline> Drop for AveragedParams<'_, P> {
    fn drop(&mut self) {
        if let Some(stash) = self.stash.take() {
            self.pipeline.restore_params(stash);
        }
    }
}
