//! Runtime mode configuration

/// Global dispatch behavior switch.
///
/// One flag controls both catchable seams — executable-unit execution and
/// per-controller mapping — so the two stay consistent. In `Debug` mode an
/// error at either seam is logged with its command/controller context and
/// execution continues; in `Production` mode it propagates to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Errors from dispatch seams propagate (default).
    #[default]
    Production,
    /// Errors from dispatch seams are logged and swallowed.
    Debug,
}

impl RunMode {
    /// Whether dispatch errors should be caught and logged.
    pub fn catches_dispatch_errors(self) -> bool {
        matches!(self, RunMode::Debug)
    }
}
