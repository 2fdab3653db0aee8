//! Markup rules (`.html-lintrc.json`).

use super::{Collector, Diagnostic, LineIndex, Linter, RuleLevel, RuleSet};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<([A-Za-z][A-Za-z0-9-]*)\b((?:[^>\x22']|\x22[^\x22]*\x22|'[^']*')*)>")
            .expect("valid regex")
    })
}

fn attr_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_:][\w:.-]*)(?:\s*=\s*("[^"]*"|'[^']*'|[^\s"'=<>`]+))?"#)
            .expect("valid regex")
    })
}

/// Built-in markup rules.
pub fn default_rules() -> RuleSet {
    RuleSet::new()
        .with("img-req-alt", RuleLevel::Error, None)
        .with("attr-quote-style", RuleLevel::Warn, Some(json!("double")))
        .with("id-no-dup", RuleLevel::Error, None)
        .with("tag-bans", RuleLevel::Warn, Some(json!(["style", "b", "i"])))
        .with("doctype-first", RuleLevel::Off, None)
        .with("line-no-trailing-whitespace", RuleLevel::Warn, None)
        .with("line-max-len", RuleLevel::Off, Some(json!(80)))
}

/// Lints `.html` sources.
#[derive(Debug, Clone)]
pub struct MarkupLinter {
    rules: RuleSet,
}

impl MarkupLinter {
    /// Create a linter with the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    fn banned_tags(&self) -> Vec<String> {
        match self.rules.option("tag-bans") {
            Some(Value::Array(items)) => {
                items.iter().filter_map(Value::as_str).map(str::to_ascii_lowercase).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Default for MarkupLinter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

impl Linter for MarkupLinter {
    fn lint(&self, file: &Path, text: &str) -> Vec<Diagnostic> {
        let masked = comment_re().replace_all(text, |caps: &regex::Captures<'_>| {
            caps[0]
                .chars()
                .map(|c| if c == '\n' { "\n".to_string() } else { " ".repeat(c.len_utf8()) })
                .collect::<String>()
        });
        let index = LineIndex::new(text);
        let mut out = Collector::new(file, &self.rules);
        let at = |out: &mut Collector<'_>, rule: &str, offset: usize, message: String| {
            let (line, column) = index.position(offset);
            out.report(rule, line, Some(column), message);
        };

        if out.enabled("doctype-first") {
            let first = masked.trim_start();
            if !first.to_ascii_lowercase().starts_with("<!doctype") {
                let offset = masked.len() - first.len();
                let message = "<!DOCTYPE> should be the first element seen".to_string();
                at(&mut out, "doctype-first", offset, message);
            }
        }

        let quote_style = match self.rules.option("attr-quote-style") {
            Some(Value::String(s)) => s.clone(),
            _ => "double".to_string(),
        };
        let banned = self.banned_tags();
        let mut ids: HashMap<String, usize> = HashMap::new();

        for tag in tag_re().captures_iter(&masked) {
            let (Some(whole), Some(name), Some(attrs)) = (tag.get(0), tag.get(1), tag.get(2)) else {
                continue;
            };
            let name_lower = name.as_str().to_ascii_lowercase();

            if banned.contains(&name_lower) {
                let message = format!("The <{}> tag is banned", name_lower);
                at(&mut out, "tag-bans", whole.start(), message);
            }

            let mut has_alt = false;
            for attr in attr_re().captures_iter(attrs.as_str()) {
                let Some(attr_name) = attr.get(1) else { continue };
                let attr_offset = attrs.start() + attr_name.start();
                let attr_name = attr_name.as_str().to_ascii_lowercase();
                if attr_name == "alt" {
                    has_alt = true;
                }
                let Some(value) = attr.get(2) else { continue };
                let raw = value.as_str();

                let quoted_ok = match quote_style.as_str() {
                    "single" => raw.starts_with('\''),
                    "quoted" => raw.starts_with('\'') || raw.starts_with('"'),
                    _ => raw.starts_with('"'),
                };
                if !quoted_ok {
                    at(
                        &mut out,
                        "attr-quote-style",
                        attr_offset,
                        format!(
                            "The value of attribute '{}' is not {} quoted",
                            attr_name, quote_style
                        ),
                    );
                }

                if attr_name == "id" {
                    let id = raw.trim_matches(|c| c == '"' || c == '\'').to_string();
                    let (line, _) = index.position(attr_offset);
                    if let Some(first_line) = ids.get(&id) {
                        at(
                            &mut out,
                            "id-no-dup",
                            attr_offset,
                            format!("The id \"{}\" is already in use on line {}", id, first_line),
                        );
                    } else {
                        ids.insert(id, line);
                    }
                }
            }

            if name_lower == "img" && !has_alt {
                let message = "An alt attribute is required for <img>".to_string();
                at(&mut out, "img-req-alt", whole.start(), message);
            }
        }

        out.check_lines(text, "line-no-trailing-whitespace", "line-max-len");
        out.finish()
    }
}
