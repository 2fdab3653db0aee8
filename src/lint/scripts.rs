//! Script rules (`.eslintrc.json`).
//!
//! Rules run over the token stream, so code inside strings, templates,
//! regular expressions and comments never triggers them.

use super::{Collector, Diagnostic, Linter, RuleLevel, RuleSet, Severity};
use crate::build::pipeline::TransformError;
use crate::build::scripts::{tokenize, Token, TokenKind};
use serde_json::{json, Value};
use std::path::Path;

/// Built-in script rules.
pub fn default_rules() -> RuleSet {
    RuleSet::new()
        .with("no-debugger", RuleLevel::Error, None)
        .with("no-console", RuleLevel::Warn, None)
        .with("no-var", RuleLevel::Warn, None)
        .with("eqeqeq", RuleLevel::Warn, None)
        .with("no-trailing-spaces", RuleLevel::Warn, None)
        .with("max-len", RuleLevel::Off, Some(json!(80)))
}

/// Lints `.js` sources.
#[derive(Debug, Clone)]
pub struct ScriptLinter {
    rules: RuleSet,
}

impl ScriptLinter {
    /// Create a linter with the given rules.
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }
}

impl Default for ScriptLinter {
    fn default() -> Self {
        Self::new(default_rules())
    }
}

fn report_at(out: &mut Collector<'_>, rule: &str, token: &Token<'_>, message: impl Into<String>) {
    out.report(rule, token.line + 1, Some(token.column + 1), message);
}

impl Linter for ScriptLinter {
    fn lint(&self, file: &Path, text: &str) -> Vec<Diagnostic> {
        let tokens = match tokenize(text) {
            Ok(tokens) => tokens,
            Err(e) => {
                let line = match &e {
                    TransformError::Syntax { line, .. } => *line,
                    _ => 1,
                };
                return vec![Diagnostic {
                    file: file.to_path_buf(),
                    line,
                    column: None,
                    rule: "parse-error".to_string(),
                    severity: Severity::Error,
                    message: format!("Parsing error: {}", e),
                }];
            }
        };

        let significant: Vec<&Token<'_>> = tokens.iter().filter(|t| t.is_significant()).collect();
        let smart_eq =
            matches!(self.rules.option("eqeqeq"), Some(Value::String(s)) if s == "smart");
        let mut out = Collector::new(file, &self.rules);

        for (i, token) in significant.iter().enumerate() {
            let prev = i.checked_sub(1).map(|p| significant[p]);
            let next = significant.get(i + 1).copied();
            let member = prev.is_some_and(|p| p.is_punct(".") || p.is_punct("?."));

            match token.kind {
                TokenKind::Ident if !member => match token.text {
                    "debugger" => {
                        report_at(&mut out, "no-debugger", token, "Unexpected 'debugger' statement")
                    }
                    "console" if next.is_some_and(|n| n.is_punct(".")) => {
                        report_at(&mut out, "no-console", token, "Unexpected console statement")
                    }
                    "var" => report_at(
                        &mut out,
                        "no-var",
                        token,
                        "Unexpected var, use let or const instead",
                    ),
                    _ => {}
                },
                TokenKind::Punct if token.text == "==" || token.text == "!=" => {
                    let against_null = [prev, next].iter().flatten().any(|t| t.is_word("null"));
                    if !(smart_eq && against_null) {
                        report_at(
                            &mut out,
                            "eqeqeq",
                            token,
                            format!("Expected '{}=' and instead saw '{}'", token.text, token.text),
                        );
                    }
                }
                _ => {}
            }
        }

        out.check_lines(text, "no-trailing-spaces", "max-len");
        out.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules_found(text: &str) -> Vec<String> {
        let found = ScriptLinter::default().lint(Path::new("app.js"), text);
        found.into_iter().map(|d| d.rule).collect()
    }

    #[test]
    fn test_clean_script() {
        assert!(rules_found("const a = 1;\nlet b = a === 1;\n").is_empty());
    }

    #[test]
    fn test_reports_in_source_order() {
        let text = "var a = 1;\nif (a == 2) {\n  debugger;\n  console.log(a);\n}\n";
        assert_eq!(rules_found(text), vec!["no-var", "eqeqeq", "no-debugger", "no-console"]);
    }

    #[test]
    fn test_ignores_strings_comments_and_members() {
        let text = concat!(
            "// debugger var\n",
            "const s = \"console.log(a == b)\";\n",
            "const t = `var ${x}`;\n",
            "obj.debugger = obj.var;\n"
        );
        assert!(rules_found(text).is_empty());
    }

    #[test]
    fn test_positions_and_severity() {
        let found = ScriptLinter::default().lint(Path::new("app.js"), "let a;\n  debugger;");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].line, 2);
        assert_eq!(found[0].column, Some(3));
        assert_eq!(found[0].severity, Severity::Error);
        assert_eq!(found[0].message, "Unexpected 'debugger' statement");
    }

    #[test]
    fn test_eqeqeq_smart_allows_null() {
        let rules = default_rules().with("eqeqeq", RuleLevel::Error, Some(json!("smart")));
        let linter = ScriptLinter::new(rules);
        assert!(linter.lint(Path::new("a.js"), "if (a == null) {}").is_empty());
        assert_eq!(
            linter.lint(Path::new("a.js"), "if (a != b) {}")[0].message,
            "Expected '!==' and instead saw '!='"
        );
    }

    #[test]
    fn test_trailing_spaces() {
        assert_eq!(rules_found("let a = 1;   \n"), vec!["no-trailing-spaces"]);
    }

    #[test]
    fn test_parse_error() {
        let found = ScriptLinter::default().lint(Path::new("a.js"), "let a;\nlet s = 'open");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].rule, "parse-error");
        assert_eq!(found[0].line, 2);
    }
}
