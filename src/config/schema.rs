//! Configuration schema types for `assetflow.toml`
//!
//! Defines the structure and validation rules for project configuration.
//! Every section is optional; missing sections fall back to the layout the
//! pipeline expects (`public_html/src` compiled into `public_html/dist`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Project metadata and root directories
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name
    #[serde(default = "default_name")]
    pub name: String,
    /// Source root containing stylesheets, scripts, markup and assets
    #[serde(default = "default_src")]
    pub src: PathBuf,
    /// Distributable root that receives build artifacts
    #[serde(default = "default_dist")]
    pub dist: PathBuf,
    /// Archive produced by the `compress` task
    #[serde(default = "default_archive")]
    pub archive: PathBuf,
}

fn default_name() -> String {
    "unnamed".to_string()
}

fn default_src() -> PathBuf {
    PathBuf::from("public_html/src")
}

fn default_dist() -> PathBuf {
    PathBuf::from("public_html/dist")
}

fn default_archive() -> PathBuf {
    PathBuf::from("build.zip")
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            src: default_src(),
            dist: default_dist(),
            archive: default_archive(),
        }
    }
}

/// Minimum browser versions used for vendor prefixing and syntax lowering.
///
/// Versions are major releases; `None` leaves the browser out of the target set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BrowserTargets {
    #[serde(default)]
    pub chrome: Option<u32>,
    #[serde(default)]
    pub firefox: Option<u32>,
    #[serde(default)]
    pub safari: Option<u32>,
    #[serde(default)]
    pub edge: Option<u32>,
    #[serde(default)]
    pub ios_saf: Option<u32>,
}

impl Default for BrowserTargets {
    fn default() -> Self {
        Self {
            chrome: Some(80),
            firefox: Some(78),
            safari: Some(13),
            edge: Some(88),
            ios_saf: Some(13),
        }
    }
}

/// Stylesheet pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StylesConfig {
    /// Glob for stylesheet sources, relative to the source root
    #[serde(default = "default_styles_pattern")]
    pub pattern: String,
    /// Extra directories searched by `@import`, relative to the source root
    #[serde(default = "default_include_paths")]
    pub include_paths: Vec<PathBuf>,
    /// Output directory, relative to the distributable root
    #[serde(default = "default_styles_out")]
    pub out_dir: PathBuf,
    /// Suffix inserted before the extension of every output
    #[serde(default = "default_suffix")]
    pub suffix: String,
    /// Browser targets for prefixing
    #[serde(default)]
    pub browsers: BrowserTargets,
}

fn default_styles_pattern() -> String {
    "stylesheets/**/*.scss".to_string()
}

fn default_include_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("stylesheets")]
}

fn default_styles_out() -> PathBuf {
    PathBuf::from("stylesheets")
}

fn default_suffix() -> String {
    ".min".to_string()
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            pattern: default_styles_pattern(),
            include_paths: default_include_paths(),
            out_dir: default_styles_out(),
            suffix: default_suffix(),
            browsers: BrowserTargets::default(),
        }
    }
}

/// Script pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptsConfig {
    /// Glob for first-party scripts
    #[serde(default = "default_scripts_pattern")]
    pub pattern: String,
    /// Glob for vendor scripts
    #[serde(default = "default_vendor_pattern")]
    pub vendor_pattern: String,
    /// Bundle name for first-party scripts (before the suffix is applied)
    #[serde(default = "default_bundle")]
    pub bundle: String,
    /// Bundle name for vendor scripts
    #[serde(default = "default_vendor_bundle")]
    pub vendor_bundle: String,
    /// Output directory for the main bundle
    #[serde(default = "default_scripts_out")]
    pub out_dir: PathBuf,
    /// Output directory for the vendor bundle
    #[serde(default = "default_vendor_out")]
    pub vendor_out_dir: PathBuf,
    /// Suffix inserted before the extension of every bundle
    #[serde(default = "default_suffix")]
    pub suffix: String,
}

fn default_scripts_pattern() -> String {
    "scripts/*.js".to_string()
}

fn default_vendor_pattern() -> String {
    "scripts/vendor/*.js".to_string()
}

fn default_bundle() -> String {
    "main.js".to_string()
}

fn default_vendor_bundle() -> String {
    "vendor.js".to_string()
}

fn default_scripts_out() -> PathBuf {
    PathBuf::from("scripts")
}

fn default_vendor_out() -> PathBuf {
    PathBuf::from("scripts/vendor")
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            pattern: default_scripts_pattern(),
            vendor_pattern: default_vendor_pattern(),
            bundle: default_bundle(),
            vendor_bundle: default_vendor_bundle(),
            out_dir: default_scripts_out(),
            vendor_out_dir: default_vendor_out(),
            suffix: default_suffix(),
        }
    }
}

/// Markup pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkupConfig {
    /// Glob for markup sources
    #[serde(default = "default_markup_pattern")]
    pub pattern: String,
}

fn default_markup_pattern() -> String {
    "*.html".to_string()
}

impl Default for MarkupConfig {
    fn default() -> Self {
        Self {
            pattern: default_markup_pattern(),
        }
    }
}

/// Static asset pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetsConfig {
    /// Glob for static assets
    #[serde(default = "default_assets_pattern")]
    pub pattern: String,
    /// Output directory, relative to the distributable root
    #[serde(default = "default_assets_out")]
    pub out_dir: PathBuf,
    /// Re-encode PNG files with maximum compression
    #[serde(default = "default_true")]
    pub optimize_png: bool,
    /// Strip comments and clean attributes in SVG files
    #[serde(default = "default_true")]
    pub optimize_svg: bool,
}

fn default_assets_pattern() -> String {
    "assets/**/*".to_string()
}

fn default_assets_out() -> PathBuf {
    PathBuf::from("assets")
}

fn default_true() -> bool {
    true
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            pattern: default_assets_pattern(),
            out_dir: default_assets_out(),
            optimize_png: true,
            optimize_svg: true,
        }
    }
}

/// Lint rule files and failure policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintSettings {
    /// Rule file for stylesheets, relative to the project root
    #[serde(default = "default_styles_rules")]
    pub styles: PathBuf,
    /// Rule file for scripts
    #[serde(default = "default_scripts_rules")]
    pub scripts: PathBuf,
    /// Rule file for markup
    #[serde(default = "default_markup_rules")]
    pub markup: PathBuf,
    /// Make the `lint*` tasks fail on error-severity violations
    #[serde(default)]
    pub fail_on_error: bool,
}

fn default_styles_rules() -> PathBuf {
    PathBuf::from(".sass-lint.json")
}

fn default_scripts_rules() -> PathBuf {
    PathBuf::from(".eslintrc.json")
}

fn default_markup_rules() -> PathBuf {
    PathBuf::from(".html-lintrc.json")
}

impl Default for LintSettings {
    fn default() -> Self {
        Self {
            styles: default_styles_rules(),
            scripts: default_scripts_rules(),
            markup: default_markup_rules(),
            fail_on_error: false,
        }
    }
}

/// Development server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to bind, 0 picks a free port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// One `pattern -> task` watch rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatchBindingConfig {
    /// Glob relative to the source root
    pub pattern: String,
    /// Task to run when a matching file changes
    pub task: String,
}

impl WatchBindingConfig {
    pub fn new(pattern: &str, task: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            task: task.to_string(),
        }
    }
}

/// Watch mode configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Debounce delay in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u32,
    /// Clear terminal between rebuilds
    #[serde(default)]
    pub clear_screen: bool,
    /// File pattern to task bindings
    #[serde(default = "default_bindings")]
    pub bindings: Vec<WatchBindingConfig>,
}

fn default_debounce_ms() -> u32 {
    100
}

fn default_bindings() -> Vec<WatchBindingConfig> {
    vec![
        WatchBindingConfig::new("*.html", "compileMarkup"),
        WatchBindingConfig::new("stylesheets/**/*.scss", "compileStyles"),
        WatchBindingConfig::new("scripts/**", "compileScripts"),
        WatchBindingConfig::new("assets/**", "compressAssets"),
    ]
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            clear_screen: false,
            bindings: default_bindings(),
        }
    }
}

/// Complete assetflow.toml configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FlowConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub markup: MarkupConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub lint: LintSettings,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    /// Path to the invalid field (e.g., "scripts.bundle")
    pub field: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "assetflow.toml: '{}' {}", self.field, self.message)
    }
}

impl FlowConfig {
    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Vec<ConfigValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: &str| {
            errors.push(ConfigValidationError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.project.name.is_empty() {
            push("project.name", "must be a non-empty string");
        }
        if self.project.src == self.project.dist {
            push("project.dist", "must differ from project.src");
        }

        for (field, pattern) in [
            ("styles.pattern", &self.styles.pattern),
            ("scripts.pattern", &self.scripts.pattern),
            ("scripts.vendor_pattern", &self.scripts.vendor_pattern),
            ("markup.pattern", &self.markup.pattern),
            ("assets.pattern", &self.assets.pattern),
        ] {
            if let Err(e) = glob::Pattern::new(pattern) {
                push(field, &format!("is not a valid glob: {}", e));
            }
        }

        for (field, bundle) in [
            ("scripts.bundle", &self.scripts.bundle),
            ("scripts.vendor_bundle", &self.scripts.vendor_bundle),
        ] {
            if bundle.is_empty() || bundle.contains('/') || bundle.contains('\\') {
                push(field, "must be a plain file name");
            }
        }

        if self.server.host.is_empty() {
            push("server.host", "must be a non-empty string");
        }

        for (i, binding) in self.watch.bindings.iter().enumerate() {
            if let Err(e) = glob::Pattern::new(&binding.pattern) {
                let field = format!("watch.bindings[{}].pattern", i);
                push(&field, &format!("is not a valid glob: {}", e));
            }
            if binding.task.is_empty() {
                push(&format!("watch.bindings[{}].task", i), "must name a task");
            }
        }

        errors
    }

    /// Check if validation passed
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: FlowConfig = toml::from_str("").unwrap();
        assert_eq!(config.project.src, PathBuf::from("public_html/src"));
        assert_eq!(config.project.dist, PathBuf::from("public_html/dist"));
        assert_eq!(config.project.archive, PathBuf::from("build.zip"));
        assert_eq!(config.scripts.bundle, "main.js");
        assert_eq!(config.styles.suffix, ".min");
        assert_eq!(config.watch.bindings.len(), 4);
        assert!(config.is_valid());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
[project]
name = "recipes"
src = "web/src"
dist = "web/dist"
archive = "out/site.zip"

[styles]
pattern = "css/**/*.scss"
suffix = ".min"

[styles.browsers]
chrome = 90
safari = 14

[scripts]
bundle = "app.js"

[lint]
fail_on_error = true

[server]
port = 8080

[watch]
debounce_ms = 250

[[watch.bindings]]
pattern = "css/**"
task = "compileStyles"
"#;

        let config: FlowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.project.name, "recipes");
        assert_eq!(config.project.archive, PathBuf::from("out/site.zip"));
        assert_eq!(config.styles.pattern, "css/**/*.scss");
        assert_eq!(config.styles.browsers.chrome, Some(90));
        assert_eq!(config.styles.browsers.firefox, None);
        assert_eq!(config.scripts.bundle, "app.js");
        assert_eq!(config.scripts.vendor_bundle, "vendor.js");
        assert!(config.lint.fail_on_error);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.watch.debounce_ms, 250);
        assert_eq!(config.watch.bindings, vec![WatchBindingConfig::new("css/**", "compileStyles")]);
        assert!(config.is_valid());
    }

    #[test]
    fn test_validation_bad_glob() {
        let mut config = FlowConfig::default();
        config.styles.pattern = "stylesheets/[".to_string();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "styles.pattern");
    }

    #[test]
    fn test_validation_bundle_name() {
        let mut config = FlowConfig::default();
        config.scripts.bundle = "nested/main.js".to_string();
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "scripts.bundle");
    }

    #[test]
    fn test_validation_same_src_and_dist() {
        let mut config = FlowConfig::default();
        config.project.dist = config.project.src.clone();
        assert!(!config.is_valid());
    }

    #[test]
    fn test_validation_binding_without_task() {
        let mut config = FlowConfig::default();
        config.watch.bindings.push(WatchBindingConfig::new("*.md", ""));
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "watch.bindings[4].task");
    }

    #[test]
    fn test_validation_error_display() {
        let error = ConfigValidationError {
            field: "scripts.bundle".to_string(),
            message: "must be a plain file name".to_string(),
        };
        assert_eq!(error.to_string(), "assetflow.toml: 'scripts.bundle' must be a plain file name");
    }
}
