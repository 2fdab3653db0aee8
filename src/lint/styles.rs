//! Stylesheet rules (`.sass-lint.json`).

use super::{Collector, Diagnostic, LineIndex, Linter, RuleLevel, RuleSet};
use crate::build::styles::blank_comments;
use regex::Regex;
use serde_json::json;
use std::path::Path;
use std::sync::OnceLock;

fn important_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\s*important\b").expect("valid regex"))
}

fn id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#[A-Za-z_-][\w-]*").expect("valid regex"))
}

fn empty_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\s*\}").expect("valid regex"))
}

fn debug_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@debug\b").expect("valid regex"))
}

/// Built-in stylesheet rules.
pub fn default_rules() -> RuleSet {
    RuleSet::new()
        .with("no-important", RuleLevel::Warn, None)
        .with("no-ids", RuleLevel::Warn, None)
        .with("no-empty-rulesets", RuleLevel::Warn, None)
        .with("no-trailing-whitespace", RuleLevel::Warn, None)
        .with("no-debug", RuleLevel::Warn, None)
        .with("max-line-length", RuleLevel::Off, Some(json!(80)))
}

/// Lints `.scss` sources.
#[derive(Debug, Clone)]
pub struct StyleLinter {
    rules: RuleSet,
}

impl StyleLinter {
    /// Create a linter with the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }
}

impl Default for StyleLinter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Linter for StyleLinter {
    fn lint(&self, file: &Path, text: &str) -> Vec<Diagnostic> {
        let masked = blank_comments(text, true);
        let index = LineIndex::new(text);
        let mut out = Collector::new(file, &self.rules);

        let at = |out: &mut Collector<'_>, rule: &str, offset: usize, message: &str| {
            let (line, column) = index.position(offset);
            out.report(rule, line, Some(column), message);
        };

        if out.enabled("no-important") {
            for m in important_re().find_iter(&masked) {
                at(&mut out, "no-important", m.start(), "!important not allowed");
            }
        }

        if out.enabled("no-ids") {
            let mut boundary = 0;
            for (i, b) in masked.bytes().enumerate() {
                match b {
                    b'{' => {
                        let selector = &masked[boundary..i];
                        if !selector.trim_start().starts_with('@') {
                            for m in id_re().find_iter(selector) {
                                let offset = boundary + m.start();
                                at(&mut out, "no-ids", offset, "ID selectors not allowed");
                            }
                        }
                        boundary = i + 1;
                    }
                    b'}' | b';' => boundary = i + 1,
                    _ => {}
                }
            }
        }

        if out.enabled("no-empty-rulesets") {
            for m in empty_block_re().find_iter(&masked) {
                at(&mut out, "no-empty-rulesets", m.start(), "No empty blocks allowed");
            }
        }

        if out.enabled("no-debug") {
            for m in debug_re().find_iter(&masked) {
                at(&mut out, "no-debug", m.start(), "@debug not allowed");
            }
        }

        out.check_lines(text, "no-trailing-whitespace", "max-line-length");
        out.finish()
    }
}
