//! # tagtrain-core
//!
//! Collaborators for the tagtrain training loop: documents and gold
//! annotation, the corpus reader, a registry-driven trainable pipeline with
//! averaged-perceptron components, the averaging optimizer, the scorer, and
//! the backend / verbosity scopes the checkpoint step relies on.

pub mod backend;
pub mod config;
pub mod corpus;
pub mod doc;
pub mod error;
pub mod logging;
pub mod optimizer;
pub mod persistence;
pub mod pipeline;
pub mod scorer;
pub mod vectors;

pub use backend::{Backend, DeviceScope};
pub use config::{TrainSettings, load_settings};
pub use corpus::{Corpus, GoldCorpus};
pub use doc::{Doc, Example, GoldParse};
pub use error::CoreError;
pub use logging::{NoopVerbosity, QuietScope, Verbosity, VerbosityControl};
pub use optimizer::{Optimizer, ParamAverages};
pub use pipeline::{
    ComponentKind, ComponentRegistry, Language, Losses, TrainableComponent, TrainablePipeline,
};
pub use scorer::{Scorer, Scores};
pub use vectors::{Vectors, VectorsInfo};

/// Crate version, recorded in model metadata.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
