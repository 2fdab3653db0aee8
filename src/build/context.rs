//! Build context containing configuration and resolved paths for a build.

use crate::config::FlowConfig;
use std::path::{Path, PathBuf};

/// Build context containing configuration and paths for a build operation.
///
/// The context provides access to all information needed to construct
/// pipelines: the configuration, the project root, and the source and
/// distributable roots resolved against it.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// The loaded configuration
    config: FlowConfig,
    /// Project root directory (where assetflow.toml is located)
    project_root: PathBuf,
    /// Whether to run in verbose mode
    verbose: bool,
}

impl BuildContext {
    /// Create a new build context.
    ///
    /// # Arguments
    /// - `config` - The loaded configuration
    /// - `project_root` - The project root directory
    pub fn new(config: FlowConfig, project_root: PathBuf) -> Self {
        Self {
            config,
            project_root,
            verbose: false,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Get the project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Get the source root (resolved to absolute path).
    pub fn src_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.src)
    }

    /// Get the distributable root (resolved to absolute path).
    pub fn dist_dir(&self) -> PathBuf {
        self.resolve_path(&self.config.project.dist)
    }

    /// Get the archive path written by `compress`.
    pub fn archive_path(&self) -> PathBuf {
        self.resolve_path(&self.config.project.archive)
    }

    /// Whether verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Resolve a path relative to the project root.
    ///
    /// If the path is absolute, returns it unchanged.
    /// If relative, joins it with the project root.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Resolve a path relative to the source root.
    pub fn resolve_src(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.src_dir().join(path)
        }
    }

    /// Resolve a path relative to the distributable root.
    pub fn resolve_dist(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.dist_dir().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BuildContext {
        BuildContext::new(FlowConfig::default(), PathBuf::from("/project"))
    }

    #[test]
    fn test_build_context_new() {
        let ctx = ctx();
        assert_eq!(ctx.project_root(), Path::new("/project"));
        assert!(!ctx.is_verbose());
    }

    #[test]
    fn test_build_context_with_verbose() {
        assert!(ctx().with_verbose(true).is_verbose());
    }

    #[test]
    fn test_build_context_resolve_path_absolute() {
        assert_eq!(ctx().resolve_path(Path::new("/other/path")), PathBuf::from("/other/path"));
    }

    #[test]
    fn test_build_context_roots() {
        let ctx = ctx();
        assert_eq!(ctx.src_dir(), PathBuf::from("/project/public_html/src"));
        assert_eq!(ctx.dist_dir(), PathBuf::from("/project/public_html/dist"));
        assert_eq!(ctx.archive_path(), PathBuf::from("/project/build.zip"));
    }

    #[test]
    fn test_build_context_resolve_src_and_dist() {
        let ctx = ctx();
        assert_eq!(
            ctx.resolve_src(Path::new("stylesheets")),
            PathBuf::from("/project/public_html/src/stylesheets")
        );
        assert_eq!(
            ctx.resolve_dist(Path::new("scripts/vendor")),
            PathBuf::from("/project/public_html/dist/scripts/vendor")
        );
    }
}
