//! Lint engine for stylesheets, scripts and markup.
//!
//! Each asset class has a [`Linter`] configured by a [`RuleSet`] loaded from
//! a rule file. Linters only annotate; [`LintStage`] plugs one into a
//! pipeline and attaches the resulting [`Diagnostic`]s to the file.

pub mod config;
pub mod markup;
pub mod scripts;
pub mod styles;

pub use config::{load_rules, LintConfigError, RuleLevel, RuleSet, RuleSetting};
pub use markup::MarkupLinter;
pub use scripts::ScriptLinter;
pub use styles::StyleLinter;

use crate::build::discovery::{discover_files, DiscoveryError};
use crate::build::pipeline::{SourceFile, Transform, TransformError};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Reported, never fails anything
    Warning,
    /// Fails `lint*` tasks when `lint.fail_on_error` is set
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single lint finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// File the finding is in
    pub file: PathBuf,
    /// One-based line
    pub line: usize,
    /// One-based column, when known
    pub column: Option<usize>,
    /// Rule identifier, e.g. `no-debugger`
    pub rule: String,
    /// Severity from the rule configuration
    pub severity: Severity,
    /// Human-readable message
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file.display(), self.line)?;
        if let Some(column) = self.column {
            write!(f, ":{}", column)?;
        }
        write!(f, ": {} {} ({})", self.severity, self.message, self.rule)
    }
}

/// Something that can check one file's text.
pub trait Linter: Send + Sync {
    /// Check `text` (the contents of `file`) and return findings in source order.
    fn lint(&self, file: &Path, text: &str) -> Vec<Diagnostic>;
}

/// Pipeline stage that runs a linter and passes the file through unchanged.
#[derive(Debug)]
pub struct LintStage<L> {
    linter: L,
}

impl<L: Linter> LintStage<L> {
    /// Wrap a linter.
    pub fn new(linter: L) -> Self {
        Self { linter }
    }
}

impl<L: Linter> Transform for LintStage<L> {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn apply(&self, mut file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        // Lint a lossy copy; the bytes themselves pass through untouched.
        let text = String::from_utf8_lossy(&file.contents);
        let found = self.linter.lint(&file.path, &text);
        file.diagnostics.extend(found);
        Ok(Some(file))
    }
}

/// Maps byte offsets to one-based line/column positions.
#[derive(Debug)]
pub(crate) struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub(crate) fn position(&self, offset: usize) -> (usize, usize) {
        let line = self.starts.partition_point(|start| *start <= offset).saturating_sub(1);
        (line + 1, offset - self.starts[line] + 1)
    }
}

/// Builds diagnostics for one file against one rule set.
pub(crate) struct Collector<'a> {
    file: &'a Path,
    rules: &'a RuleSet,
    pub(crate) found: Vec<Diagnostic>,
}

impl<'a> Collector<'a> {
    pub(crate) fn new(file: &'a Path, rules: &'a RuleSet) -> Self {
        Self {
            file,
            rules,
            found: Vec::new(),
        }
    }

    pub(crate) fn enabled(&self, rule: &str) -> bool {
        self.rules.severity(rule).is_some()
    }

    pub(crate) fn report(
        &mut self,
        rule: &str,
        line: usize,
        column: Option<usize>,
        message: impl Into<String>,
    ) {
        if let Some(severity) = self.rules.severity(rule) {
            self.found.push(Diagnostic {
                file: self.file.to_path_buf(),
                line,
                column,
                rule: rule.to_string(),
                severity,
                message: message.into(),
            });
        }
    }

    /// Line-based checks shared by every rule set: trailing whitespace and line length.
    pub(crate) fn check_lines(&mut self, text: &str, trailing_rule: &str, length_rule: &str) {
        let max_len = self.rules.option_u64(length_rule).unwrap_or(80) as usize;
        let check_trailing = self.enabled(trailing_rule);
        let check_length = self.enabled(length_rule);
        for (i, line) in text.lines().enumerate() {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if check_trailing && line.ends_with([' ', '\t']) {
                let column = line.trim_end_matches([' ', '\t']).len() + 1;
                self.report(trailing_rule, i + 1, Some(column), "Trailing whitespace not allowed");
            }
            let length = line.chars().count();
            if check_length && length > max_len {
                self.report(
                    length_rule,
                    i + 1,
                    Some(max_len + 1),
                    format!("Line is {} characters long, maximum allowed is {}", length, max_len),
                );
            }
        }
    }

    pub(crate) fn finish(mut self) -> Vec<Diagnostic> {
        self.found.sort_by(|a, b| (a.line, a.column).cmp(&(b.line, b.column)));
        self.found
    }
}

/// Format diagnostics grouped by file, one finding per line:
///
/// ```text
/// /site/src/scripts/app.js
///   3:5  error  Unexpected 'debugger' statement  no-debugger
/// ```
pub fn format_stylish(diagnostics: &[Diagnostic]) -> String {
    let mut out = String::new();
    let mut current: Option<&Path> = None;
    for d in diagnostics {
        if current != Some(d.file.as_path()) {
            if current.is_some() {
                out.push('\n');
            }
            out.push_str(&format!("{}\n", d.file.display()));
            current = Some(d.file.as_path());
        }
        let position = match d.column {
            Some(column) => format!("{}:{}", d.line, column),
            None => d.line.to_string(),
        };
        out.push_str(&format!("  {:<7}  {:<7}  {}  {}\n", position, d.severity, d.message, d.rule));
    }

    if !diagnostics.is_empty() {
        let errors = diagnostics.iter().filter(|d| d.severity == Severity::Error).count();
        let warnings = diagnostics.len() - errors;
        out.push_str(&format!(
            "\n{} {} ({} {}, {} {})\n",
            diagnostics.len(),
            if diagnostics.len() == 1 { "problem" } else { "problems" },
            errors,
            if errors == 1 { "error" } else { "errors" },
            warnings,
            if warnings == 1 { "warning" } else { "warnings" }
        ));
    }
    out
}

/// Lint every file matching `pattern` under `base_dir`, without building anything.
///
/// Diagnostics are returned grouped by file in discovery order. Unreadable
/// files are logged and skipped.
pub fn lint_files(
    base_dir: &Path,
    pattern: &str,
    linter: &dyn Linter,
) -> Result<Vec<Diagnostic>, DiscoveryError> {
    let files = discover_files(base_dir, pattern)?;
    let per_file: Vec<Vec<Diagnostic>> = files
        .par_iter()
        .map(|found| match std::fs::read(&found.path) {
            Ok(bytes) => linter.lint(&found.path, &String::from_utf8_lossy(&bytes)),
            Err(e) => {
                warn!(path = %found.path.display(), "cannot read file for linting: {}", e);
                Vec::new()
            }
        })
        .collect();
    Ok(per_file.into_iter().flatten().collect())
}
