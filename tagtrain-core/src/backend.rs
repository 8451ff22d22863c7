//! Compute backend selection.
//!
//! The baseline backend runs prediction sequentially on the calling thread.
//! The accelerated backend fans prediction out over the `rayon` pool. The
//! current backend is thread-local and only ever changed through a
//! [`DeviceScope`], so a selection can't outlive the block that made it.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Baseline,
    Accelerated {
        device: u32,
    },
}

impl Backend {
    /// Map a `--use-gpu` style device id: negative selects the baseline.
    pub fn from_device_id(id: i32) -> Self {
        match u32::try_from(id) {
            Ok(device) => Self::Accelerated { device },
            Err(_) => Self::Baseline,
        }
    }

    pub fn is_accelerated(&self) -> bool {
        matches!(self, Self::Accelerated { .. })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Accelerated { device } => write!(f, "accelerated:{device}"),
        }
    }
}

thread_local! {
    static CURRENT: Cell<Backend> = const { Cell::new(Backend::Baseline) };
}

/// Backend selected for the calling thread.
pub fn current() -> Backend {
    CURRENT.with(Cell::get)
}

/// Selects a backend until dropped, then restores the previous selection.
#[must_use = "the backend reverts when the scope is dropped"]
#[derive(Debug)]
pub struct DeviceScope {
    previous: Backend,
}

impl DeviceScope {
    pub fn enter(backend: Backend) -> Self {
        let previous = CURRENT.with(|c| c.replace(backend));
        tracing::debug!(%backend, %previous, "Entering device scope");
        Self { previous }
    }
}

impl Drop for DeviceScope {
    fn drop(&mut self) {
        CURRENT.with(|c| c.set(self.previous));
    }
}
