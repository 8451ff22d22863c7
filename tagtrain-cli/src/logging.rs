//! Tracing setup for the `tagtrain` binary.
//!
//! Human-readable output goes to stderr through a reloadable filter so the
//! training loop can quiet it during checkpoints; everything at debug level
//! and above is also written as JSON to a daily log file.

use std::path::PathBuf;
use tagtrain_core::{Verbosity, VerbosityControl};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, reload};

/// Directive that keeps scorer mismatch logs visible under `--debug`.
const SCORER_DEBUG: &str = "tagtrain_core::scorer=debug";

/// Stderr filter for a verbosity level. `--debug` keeps scorer mismatches
/// visible even while the checkpoint step runs quiet.
pub fn filter_directives(level: Verbosity, debug: bool) -> String {
    let base = match level {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "info",
        Verbosity::Verbose => "debug",
    };
    if debug {
        format!("{base},{SCORER_DEBUG}")
    } else {
        base.to_string()
    }
}

/// [`VerbosityControl`] backed by the stderr layer's reload handle.
pub struct ReloadVerbosity {
    handle: reload::Handle<EnvFilter, Registry>,
    debug: bool,
}

impl VerbosityControl for ReloadVerbosity {
    fn set_verbosity(&self, level: Verbosity) {
        let directives = filter_directives(level, self.debug);
        if let Err(e) = self.handle.modify(|filter| *filter = EnvFilter::new(directives)) {
            eprintln!("Failed to change log level: {e}");
        }
    }
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file logs are flushed.
pub fn init_tracing(verbose: bool, debug: bool) -> (ReloadVerbosity, WorkerGuard) {
    let initial = filter_directives(Verbosity::from_flag(verbose), debug);
    let (filter, handle) = reload::Layer::new(EnvFilter::new(initial));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(filter);

    let log_dir = directories::ProjectDirs::from("dev", "tagtrain", "tagtrain")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "tagtrain.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    (ReloadVerbosity { handle, debug }, guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        assert_eq!(filter_directives(Verbosity::Normal, false), "info");
        assert_eq!(filter_directives(Verbosity::Verbose, false), "debug");
        assert_eq!(filter_directives(Verbosity::Quiet, false), "warn");
        assert_eq!(
            filter_directives(Verbosity::Normal, true),
            "info,tagtrain_core::scorer=debug"
        );
        assert_eq!(
            filter_directives(Verbosity::Quiet, true),
            "warn,tagtrain_core::scorer=debug"
        );
    }
}
