//! Lint rule files.
//!
//! Rule files are JSON (comments and trailing commas allowed) of the form
//!
//! ```json
//! { "rules": { "no-debugger": 2, "max-len": ["warn", 100] } }
//! ```
//!
//! Severity is `0`/`1`/`2` or `"off"`/`"warn"`/`"error"`. Entries in the file
//! override the built-in defaults of the rule set they configure.

use super::Severity;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Problem with a lint rule file. Reported, never fatal.
#[derive(Debug, Error)]
pub enum LintConfigError {
    /// The rule file does not exist
    #[error("Lint rule file {0} not found, using defaults")]
    Missing(PathBuf),
    /// The rule file could not be read
    #[error("Cannot read lint rule file {path}: {source}")]
    Io {
        /// Rule file
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The rule file is not valid JSON5
    #[error("Invalid lint rule file {path}: {message}")]
    Parse {
        /// Rule file
        path: PathBuf,
        /// Parser message
        message: String,
    },
    /// A rule entry has an unusable value
    #[error("Invalid lint rule file {path}: rule '{rule}' {message}")]
    InvalidRule {
        /// Rule file
        path: PathBuf,
        /// Offending rule
        rule: String,
        /// What is wrong
        message: String,
    },
}

/// Configured level of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleLevel {
    /// Rule disabled
    Off,
    /// Findings are warnings
    Warn,
    /// Findings are errors
    Error,
}

impl RuleLevel {
    /// Parse `0|1|2` or `"off"|"warn"|"error"`.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_u64()? {
                0 => Some(RuleLevel::Off),
                1 => Some(RuleLevel::Warn),
                2 => Some(RuleLevel::Error),
                _ => None,
            },
            Value::String(s) => match s.as_str() {
                "off" => Some(RuleLevel::Off),
                "warn" | "warning" => Some(RuleLevel::Warn),
                "error" => Some(RuleLevel::Error),
                _ => None,
            },
            _ => None,
        }
    }

    /// Severity of findings, `None` when off.
    pub fn severity(self) -> Option<Severity> {
        match self {
            RuleLevel::Off => None,
            RuleLevel::Warn => Some(Severity::Warning),
            RuleLevel::Error => Some(Severity::Error),
        }
    }
}

/// Level and option of one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSetting {
    /// Configured level
    pub level: RuleLevel,
    /// Rule-specific option, e.g. a maximum line length
    pub option: Option<Value>,
}

/// All configured rules of one linter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: BTreeMap<String, RuleSetting>,
}

impl RuleSet {
    /// Empty rule set (every rule off).
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a rule.
    pub fn with(mut self, rule: &str, level: RuleLevel, option: Option<Value>) -> Self {
        self.rules.insert(rule.to_string(), RuleSetting { level, option });
        self
    }

    /// Setting of a rule.
    pub fn get(&self, rule: &str) -> Option<&RuleSetting> {
        self.rules.get(rule)
    }

    /// Severity for a rule, `None` when the rule is off or unknown.
    pub fn severity(&self, rule: &str) -> Option<Severity> {
        self.rules.get(rule).and_then(|s| s.level.severity())
    }

    /// Option of a rule.
    pub fn option(&self, rule: &str) -> Option<&Value> {
        self.rules.get(rule).and_then(|s| s.option.as_ref())
    }

    /// Numeric option of a rule. Accepts `80` or eslint's `{"code": 80}`.
    pub fn option_u64(&self, rule: &str) -> Option<u64> {
        match self.option(rule)? {
            Value::Number(n) => n.as_u64(),
            Value::Object(map) => {
                map.get("code").or_else(|| map.get("max")).and_then(Value::as_u64)
            }
            _ => None,
        }
    }

    /// Names of all configured rules.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }

    /// Parse rule file contents into the rules it configures.
    pub fn parse(path: &Path, text: &str) -> Result<RuleSet, LintConfigError> {
        let value: Value = json5::from_str(text).map_err(|e| LintConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let Some(root) = value.as_object() else {
            return Err(LintConfigError::Parse {
                path: path.to_path_buf(),
                message: "expected an object".to_string(),
            });
        };

        let mut set = RuleSet::new();
        let Some(rules) = root.get("rules") else {
            return Ok(set);
        };
        let Some(rules) = rules.as_object() else {
            return Err(LintConfigError::Parse {
                path: path.to_path_buf(),
                message: "'rules' must be an object".to_string(),
            });
        };

        for (rule, value) in rules {
            let invalid = |message: &str| LintConfigError::InvalidRule {
                path: path.to_path_buf(),
                rule: rule.clone(),
                message: message.to_string(),
            };
            let setting = match value {
                Value::Array(items) => {
                    let level = items
                        .first()
                        .and_then(RuleLevel::from_value)
                        .ok_or_else(|| invalid("has an invalid severity"))?;
                    RuleSetting {
                        level,
                        option: items.get(1).cloned(),
                    }
                }
                other => RuleSetting {
                    level: RuleLevel::from_value(other)
                        .ok_or_else(|| invalid("has an invalid severity"))?,
                    option: None,
                },
            };
            set.rules.insert(rule.clone(), setting);
        }
        Ok(set)
    }

    /// Overlay `overrides` on top of these rules.
    ///
    /// A rule overridden without an option keeps the default option.
    pub fn merged(mut self, overrides: RuleSet) -> RuleSet {
        for (rule, setting) in overrides.rules {
            let option = setting
                .option
                .or_else(|| self.rules.get(&rule).and_then(|d| d.option.clone()));
            self.rules.insert(rule, RuleSetting {
                level: setting.level,
                option,
            });
        }
        self
    }
}

/// Load a rule file on top of `defaults`.
///
/// Never fails: on any problem the defaults are returned together with the
/// error so the caller can report it.
pub fn load_rules(path: &Path, defaults: RuleSet) -> (RuleSet, Option<LintConfigError>) {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return (defaults, Some(LintConfigError::Missing(path.to_path_buf())));
        }
        Err(source) => {
            return (
                defaults,
                Some(LintConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }),
            );
        }
    };

    match RuleSet::parse(path, &text) {
        Ok(overrides) => (defaults.merged(overrides), None),
        Err(e) => (defaults, Some(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn defaults() -> RuleSet {
        RuleSet::new()
            .with("no-var", RuleLevel::Warn, None)
            .with("max-len", RuleLevel::Off, Some(json!(80)))
    }

    #[test]
    fn test_rule_level_from_value() {
        assert_eq!(RuleLevel::from_value(&json!(0)), Some(RuleLevel::Off));
        assert_eq!(RuleLevel::from_value(&json!(2)), Some(RuleLevel::Error));
        assert_eq!(RuleLevel::from_value(&json!("warn")), Some(RuleLevel::Warn));
        assert_eq!(RuleLevel::from_value(&json!(3)), None);
        assert_eq!(RuleLevel::from_value(&json!("loud")), None);
    }

    #[test]
    fn test_parse_json5_with_options() {
        let text = r#"{
            // comments are fine
            rules: {
                "no-var": "error",
                "max-len": [1, {"code": 120}],
            },
        }"#;
        let set = RuleSet::parse(Path::new(".eslintrc.json"), text).unwrap();
        assert_eq!(set.severity("no-var"), Some(Severity::Error));
        assert_eq!(set.severity("max-len"), Some(Severity::Warning));
        assert_eq!(set.option_u64("max-len"), Some(120));
    }

    #[test]
    fn test_parse_without_rules_is_empty() {
        let set = RuleSet::parse(Path::new("x"), r#"{"env": {"browser": true}}"#).unwrap();
        assert_eq!(set.names().count(), 0);
    }

    #[test]
    fn test_parse_invalid_severity() {
        let err = RuleSet::parse(Path::new("x"), r#"{"rules": {"no-var": 7}}"#).unwrap_err();
        assert!(matches!(err, LintConfigError::InvalidRule { ref rule, .. } if rule == "no-var"));
    }

    #[test]
    fn test_merged_keeps_default_option() {
        let overrides = RuleSet::new().with("max-len", RuleLevel::Error, None);
        let set = defaults().merged(overrides);
        assert_eq!(set.severity("max-len"), Some(Severity::Error));
        assert_eq!(set.option_u64("max-len"), Some(80));
        assert_eq!(set.severity("no-var"), Some(Severity::Warning));
    }

    #[test]
    fn test_load_rules_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let (set, err) = load_rules(&temp.path().join(".eslintrc.json"), defaults());
        assert_eq!(set, defaults());
        assert!(matches!(err, Some(LintConfigError::Missing(_))));
    }

    #[test]
    fn test_load_rules_invalid_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".eslintrc.json");
        fs::write(&path, "{ rules: ").unwrap();

        let (set, err) = load_rules(&path, defaults());
        assert_eq!(set, defaults());
        assert!(matches!(err, Some(LintConfigError::Parse { .. })));
    }

    #[test]
    fn test_load_rules_overrides() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".eslintrc.json");
        fs::write(&path, r#"{"rules": {"no-var": "off"}}"#).unwrap();

        let (set, err) = load_rules(&path, defaults());
        assert!(err.is_none());
        assert_eq!(set.severity("no-var"), None);
    }
}
