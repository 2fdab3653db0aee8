//! Pipeline result types.
//!
//! Contains types for representing the outcome of a pipeline run.

use crate::lint::{Diagnostic, Severity};
use std::path::PathBuf;
use std::time::Duration;

/// A file that failed one stage of a pipeline.
///
/// The file's output was skipped; the rest of the stream continued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    /// Source file that failed
    pub file: PathBuf,
    /// Name of the stage that failed
    pub stage: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]: {}", self.file.display(), self.stage, self.message)
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone, Default)]
pub struct PipelineReport {
    /// Pipeline name
    pub name: String,
    /// Output files written, in discovery order
    pub outputs: Vec<PathBuf>,
    /// Per-file failures
    pub failures: Vec<FileFailure>,
    /// Lint diagnostics collected by lint stages
    pub diagnostics: Vec<Diagnostic>,
    /// Number of source files discovered
    pub inputs: usize,
    /// Total pipeline duration
    pub duration: Duration,
}

impl PipelineReport {
    /// Create a new empty report.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the total duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Check if the run completed without file failures.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of error-severity diagnostics.
    pub fn error_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Error).count()
    }

    /// Number of warning-severity diagnostics.
    pub fn warning_count(&self) -> usize {
        self.diagnostics.iter().filter(|d| d.severity == Severity::Warning).count()
    }

    /// Fold another report into this one (used when a task runs several pipelines).
    pub fn merge(&mut self, other: PipelineReport) {
        self.outputs.extend(other.outputs);
        self.failures.extend(other.failures);
        self.diagnostics.extend(other.diagnostics);
        self.inputs += other.inputs;
        self.duration += other.duration;
    }

    /// Generate a one-line summary.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "{}: {} {} written",
            self.name,
            self.outputs.len(),
            if self.outputs.len() == 1 { "file" } else { "files" }
        );
        if !self.failures.is_empty() {
            summary.push_str(&format!(", {} failed", self.failures.len()));
        }
        if !self.diagnostics.is_empty() {
            summary.push_str(&format!(
                ", {} lint {}, {} {}",
                self.error_count(),
                if self.error_count() == 1 { "error" } else { "errors" },
                self.warning_count(),
                if self.warning_count() == 1 { "warning" } else { "warnings" }
            ));
        }
        summary
    }
}
