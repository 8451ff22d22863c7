//! Training settings.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `tagtrain.toml` -> `TAGTRAIN_*` environment variables -> explicit
//! overrides. The settings are read once at process start; the schedules built
//! from them are never reset mid-run.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// File name of the workspace-level settings file.
pub const SETTINGS_FILE: &str = "tagtrain.toml";

/// Hyperparameter schedule settings and the process-wide seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainSettings {
    /// Dropout rate for the first batch update.
    #[serde(default = "default_dropout")]
    pub dropout_from: f64,
    /// Floor the dropout rate decays toward. `None` decays without a floor.
    #[serde(default = "default_dropout_to")]
    pub dropout_to: Option<f64>,
    /// Amount subtracted from the dropout rate after every update.
    #[serde(default)]
    pub dropout_decay: f64,
    /// Word budget of the first minibatch.
    #[serde(default = "default_batch_size")]
    pub batch_from: f64,
    /// Ceiling the word budget compounds toward. `None` grows without a cap.
    #[serde(default = "default_batch_to")]
    pub batch_to: Option<f64>,
    /// Factor the word budget is multiplied by after every minibatch.
    #[serde(default = "default_batch_compound")]
    pub batch_compound: f64,
    /// Seed for corpus shuffling, noise and dropout masks.
    #[serde(default)]
    pub seed: u64,
}

impl Default for TrainSettings {
    fn default() -> Self {
        Self {
            dropout_from: default_dropout(),
            dropout_to: default_dropout_to(),
            dropout_decay: 0.0,
            batch_from: default_batch_size(),
            batch_to: default_batch_to(),
            batch_compound: default_batch_compound(),
            seed: 0,
        }
    }
}

fn default_dropout() -> f64 {
    0.2
}

fn default_dropout_to() -> Option<f64> {
    Some(default_dropout())
}

fn default_batch_size() -> f64 {
    1000.0
}

fn default_batch_to() -> Option<f64> {
    Some(default_batch_size())
}

fn default_batch_compound() -> f64 {
    1.001
}

/// Load settings, layering defaults, settings files, environment and overrides.
pub fn load_settings(
    workspace: Option<&Path>,
    overrides: Option<&TrainSettings>,
) -> Result<TrainSettings, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TrainSettings::default()));

    // User-level config
    if let Some(dirs) = directories::ProjectDirs::from("dev", "tagtrain", "tagtrain") {
        let user_config = dirs.config_dir().join(SETTINGS_FILE);
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(SETTINGS_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TAGTRAIN_DROPOUT_FROM, TAGTRAIN_BATCH_COMPOUND, ...
    figment = figment.merge(Env::prefixed("TAGTRAIN_"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
