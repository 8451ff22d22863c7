//! Model metadata and per-epoch records.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tagtrain_core::{Losses, Scores, VectorsInfo};

/// Evaluation throughput for one checkpoint, in words per second.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedRecord {
    pub nwords: usize,
    pub cpu: f64,
    /// Accelerated-backend throughput; absent when only the baseline ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<f64>,
}

/// Run-wide descriptor written as `meta.json` next to every snapshot.
///
/// Unknown keys from a user-supplied meta file are kept in `extra` and
/// written back out untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelMeta {
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub pipeline: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tagtrain_version: Option<String>,
    #[serde(default)]
    pub accuracy: Scores,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<SpeedRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors: Option<VectorsInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ModelMeta {
    /// Parse a user-supplied meta file. The top level must be an object.
    pub fn from_value(value: Value) -> Result<Self, TrainError> {
        if value.is_object() {
            return Ok(serde_json::from_value(value)?);
        }
        let kind = match value {
            Value::Object(_) => "object",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
        };
        Err(TrainError::config(format!(
            "Invalid meta.json: Expected dict but got: {kind}"
        )))
    }

    pub fn from_file(path: &Path) -> Result<Self, TrainError> {
        if !path.exists() {
            return Err(TrainError::config(format!(
                "Can't find meta file: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_value(serde_json::from_str(&content)?)
    }

    /// Framework version requirement recorded with every snapshot.
    pub fn version_requirement() -> String {
        format!(">={}", tagtrain_core::VERSION)
    }
}

/// What one epoch left behind. Never rewritten after the epoch finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub location: PathBuf,
    pub accuracy: Scores,
    pub losses: Losses,
    pub meta: ModelMeta,
}
