//! Error types for the training control loop.

use std::path::PathBuf;
use tagtrain_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrainError {
    /// Invalid arguments or pipeline setup, reported before training starts.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A tournament winner's snapshot could not be read.
    #[error("Best-model selection failed for {component} ({path}): {reason}")]
    Tournament {
        component: String,
        path: PathBuf,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether this error should stop the process before any training.
    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Core(CoreError::Config(_)))
    }
}
