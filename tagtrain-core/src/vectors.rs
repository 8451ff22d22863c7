//! Word-vector table carried in the pipeline's vocabulary.
//!
//! Vectors are not used by the reference components; the table is loaded,
//! persisted with every snapshot and reported in `meta.json`.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Vector-table statistics reported in `meta.json`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorsInfo {
    /// Dimensionality of each row.
    pub width: usize,
    /// Number of stored rows.
    pub vectors: usize,
    /// Number of distinct keys mapped onto rows.
    pub keys: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vectors {
    width: usize,
    rows: Vec<Vec<f32>>,
    keys: HashMap<String, usize>,
}

impl Vectors {
    /// Load a whitespace-separated text table: one `word v1 v2 ...` per line,
    /// optionally preceded by a `rows dims` header.
    pub fn from_text_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CoreError> {
        let mut vectors = Self::default();
        for (lineno, line) in content.lines().enumerate() {
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let values: Vec<&str> = fields.collect();
            if lineno == 0 && values.len() == 1 && is_header(word, values[0]) {
                continue;
            }
            let row = values
                .iter()
                .map(|v| v.parse::<f32>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CoreError::model(format!("vectors line {}: {e}", lineno + 1)))?;
            if row.iter().any(|v| !v.is_finite()) {
                return Err(CoreError::model(format!(
                    "vectors line {}: non-finite value for '{word}'",
                    lineno + 1
                )));
            }
            vectors.add(word, row)?;
        }
        Ok(vectors)
    }

    /// Append a row and map `key` onto it. Re-adding a key points it at the
    /// new row; the old row stays in the table. Rows must be finite, since
    /// JSON snapshots cannot represent NaN or infinity.
    pub fn add(&mut self, key: &str, row: Vec<f32>) -> Result<(), CoreError> {
        if row.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::model(format!(
                "vector for '{key}' has a non-finite value"
            )));
        }
        if self.rows.is_empty() {
            self.width = row.len();
        } else if row.len() != self.width {
            return Err(CoreError::model(format!(
                "vector for '{key}' has width {}, table width is {}",
                row.len(),
                self.width
            )));
        }
        self.rows.push(row);
        self.keys.insert(key.to_string(), self.rows.len() - 1);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.keys.get(key).map(|&row| self.rows[row].as_slice())
    }

    pub fn info(&self) -> VectorsInfo {
        VectorsInfo {
            width: self.width,
            vectors: self.rows.len(),
            keys: self.keys.len(),
        }
    }
}

fn is_header(first: &str, second: &str) -> bool {
    first.parse::<usize>().is_ok() && second.parse::<usize>().is_ok()
}
