//! Error types for the tagtrain core library.
//!
//! Uses `thiserror` for public API error types. Every collaborator (corpus,
//! pipeline, component registry, persistence) reports through [`CoreError`].

use std::path::PathBuf;

/// Top-level error type for the collaborator layer.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corpus error: {0}")]
    Corpus(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Unknown component factory: {name}")]
    UnknownFactory { name: String },

    #[error("Component factory already registered: {name}")]
    AlreadyRegistered { name: String },

    #[error("Snapshot at {path} failed its integrity check")]
    CorruptSnapshot { path: PathBuf },

    #[error("Not found: {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn corpus(msg: impl Into<String>) -> Self {
        Self::Corpus(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}
