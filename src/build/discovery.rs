//! Source file discovery for the build pipelines.
//!
//! Resolves glob patterns against the source root. Every match is returned
//! together with its path relative to the *glob base* (the literal leading
//! directories of the pattern), which is how outputs are laid out under a
//! pipeline's destination.

use glob::glob;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Error during source discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// Invalid glob pattern
    #[error("Invalid glob pattern '{0}': {1}")]
    InvalidPattern(String, glob::PatternError),
}

/// A file matched by a pipeline's glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Absolute path of the source file
    pub path: PathBuf,
    /// Path relative to the glob base
    pub relative: PathBuf,
}

/// The literal directory prefix of a glob pattern.
///
/// `stylesheets/**/*.scss` has the base `stylesheets`, `*.html` has an empty base.
pub fn glob_base(pattern: &str) -> PathBuf {
    let mut base = PathBuf::new();
    let components: Vec<Component> = Path::new(pattern).components().collect();
    // The last component is always a file pattern, even if it has no wildcard.
    for component in components.iter().take(components.len().saturating_sub(1)) {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(component.as_os_str());
    }
    base
}

/// Discover source files matching a glob pattern.
///
/// # Arguments
/// - `base_dir` - Base directory to resolve patterns from
/// - `pattern` - Glob pattern to match
///
/// # Returns
/// Matching regular files, sorted by path.
pub fn discover_files(
    base_dir: &Path,
    pattern: &str,
) -> Result<Vec<DiscoveredFile>, DiscoveryError> {
    glob::Pattern::new(pattern)
        .map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let escaped_base = glob::Pattern::escape(&base_dir.to_string_lossy());
    let full_pattern = format!("{}/{}", escaped_base.trim_end_matches('/'), pattern);
    let paths =
        glob(&full_pattern).map_err(|e| DiscoveryError::InvalidPattern(pattern.to_string(), e))?;

    let glob_root = base_dir.join(glob_base(pattern));
    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) => {
                if !path.is_file() {
                    continue;
                }
                let relative = path
                    .strip_prefix(&glob_root)
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|_| path.file_name().map(PathBuf::from).unwrap_or_default());
                files.push(DiscoveredFile { path, relative });
            }
            Err(e) => {
                // Log but continue on unreadable entries
                warn!("error reading path during discovery: {}", e);
            }
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}
