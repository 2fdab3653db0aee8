//! Development / production build mode.
//!
//! Pipelines never read a shared flag while they run. The process keeps a
//! [`ModeLatch`] which the `build` task promotes to production, and every
//! pipeline is constructed from a [`BuildMode`] snapshot taken from it.

use std::sync::atomic::{AtomicBool, Ordering};

/// Which optional stages a pipeline includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Readable output, no minification or transpilation
    #[default]
    Development,
    /// Minified and transpiled scripts
    Production,
}

impl BuildMode {
    /// Whether production-only stages are enabled.
    pub fn is_production(self) -> bool {
        matches!(self, BuildMode::Production)
    }
}

impl std::fmt::Display for BuildMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildMode::Development => write!(f, "development"),
            BuildMode::Production => write!(f, "production"),
        }
    }
}

/// Process-wide mode that can only move from development to production.
#[derive(Debug, Default)]
pub struct ModeLatch {
    production: AtomicBool,
}

impl ModeLatch {
    /// Create a latch in development mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current mode.
    pub fn current(&self) -> BuildMode {
        if self.production.load(Ordering::Acquire) {
            BuildMode::Production
        } else {
            BuildMode::Development
        }
    }

    /// Switch to production for the rest of the process.
    ///
    /// Returns `true` if this call changed the mode.
    pub fn promote_to_production(&self) -> bool {
        !self.production.swap(true, Ordering::AcqRel)
    }
}
