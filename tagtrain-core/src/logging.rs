//! Runtime verbosity control.
//!
//! The binary owns the tracing subscriber; library code only needs to silence
//! it for a while and put it back. [`QuietScope`] does that with a guard so the
//! previous level comes back on every exit path.

/// Log output level the binary's stderr filter can be switched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Warnings and errors only.
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    pub fn from_flag(verbose: bool) -> Self {
        if verbose { Self::Verbose } else { Self::Normal }
    }
}

/// Something that can switch log output between levels.
pub trait VerbosityControl {
    fn set_verbosity(&self, level: Verbosity);
}

/// Verbosity control that ignores every request. Used by tests and embedders
/// that install no subscriber of their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopVerbosity;

impl VerbosityControl for NoopVerbosity {
    fn set_verbosity(&self, _level: Verbosity) {}
}

/// Drops output to [`Verbosity::Quiet`] until dropped, then restores the
/// run's level (`Verbose` when `verbose`, otherwise `Normal`).
#[must_use = "the previous verbosity is restored when the scope is dropped"]
pub struct QuietScope<'a> {
    control: &'a dyn VerbosityControl,
    restore_to: Verbosity,
}

impl<'a> QuietScope<'a> {
    pub fn enter(control: &'a dyn VerbosityControl, verbose: bool) -> Self {
        control.set_verbosity(Verbosity::Quiet);
        Self {
            control,
            restore_to: Verbosity::from_flag(verbose),
        }
    }
}

impl Drop for QuietScope<'_> {
    fn drop(&mut self) {
        self.control.set_verbosity(self.restore_to);
    }
}
