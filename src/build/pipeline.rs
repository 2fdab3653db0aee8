//! Transform pipeline.
//!
//! A [`Pipeline`] discovers source files with a glob, pushes them through an
//! ordered list of [`Stage`]s and writes whatever comes out under a
//! destination root.
//!
//! Per-file stages run across files on rayon's pool; within one file the
//! stages always run in declared order. A transform error only skips the
//! failing file, it is recorded in the [`PipelineReport`] and the rest of the
//! stream carries on.

use crate::build::discovery::{discover_files, DiscoveryError};
use crate::build::result::{FileFailure, PipelineReport};
use crate::build::sourcemap::{mapping_url_comment, LineMap};
use crate::lint::Diagnostic;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Error from a single transform applied to a single file.
#[derive(Debug, Error)]
pub enum TransformError {
    /// Source did not parse or compile
    #[error("line {line}: {message}")]
    Syntax {
        /// One-based line of the problem
        line: usize,
        /// Description of the problem
        message: String,
    },
    /// Contents are not UTF-8 text
    #[error("file is not valid UTF-8 text")]
    InvalidUtf8,
    /// I/O error while reading a dependency of the file
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Any other failure
    #[error("{0}")]
    Other(String),
}

/// Fatal error for a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid source glob
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    /// Destination root could not be created
    #[error("Cannot create destination {path}: {source}")]
    Destination {
        /// Destination directory
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
}

/// A file moving through a pipeline.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Where the file was read from (or the bundle name for concatenations)
    pub path: PathBuf,
    /// Output path, relative to the pipeline destination
    pub relative: PathBuf,
    /// Name of the file relative to the source root, used in source maps
    pub source_name: String,
    /// Current contents
    pub contents: Vec<u8>,
    /// Source map state, once initialized
    pub map: Option<LineMap>,
    /// Lint annotations attached by lint stages
    pub diagnostics: Vec<Diagnostic>,
}

impl SourceFile {
    /// Create a file with the given contents.
    pub fn new(
        path: impl Into<PathBuf>,
        relative: impl Into<PathBuf>,
        source_name: impl Into<String>,
        contents: Vec<u8>,
    ) -> Self {
        Self {
            path: path.into(),
            relative: relative.into(),
            source_name: source_name.into(),
            contents,
            map: None,
            diagnostics: Vec::new(),
        }
    }

    /// Contents as UTF-8 text.
    pub fn text(&self) -> Result<&str, TransformError> {
        std::str::from_utf8(&self.contents).map_err(|_| TransformError::InvalidUtf8)
    }

    /// Replace the contents with text.
    pub fn set_text(&mut self, text: String) {
        self.contents = text.into_bytes();
    }

    /// Extension of the output path, lowercased.
    pub fn extension(&self) -> Option<String> {
        self.relative.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
    }

    /// Whether this is a partial (`_name.scss`) that only exists to be imported.
    pub fn is_partial(&self) -> bool {
        self.path.file_name().map(|n| n.to_string_lossy().starts_with('_')).unwrap_or(false)
    }
}

/// A per-file transform.
pub trait Transform: Send + Sync {
    /// Short stage name used in reports.
    fn name(&self) -> &'static str;

    /// Transform one file. `Ok(None)` drops the file from the stream.
    fn apply(&self, file: SourceFile) -> Result<Option<SourceFile>, TransformError>;
}

/// One step of a pipeline.
pub enum Stage {
    /// Per-file transform
    Map(Box<dyn Transform>),
    /// Join the whole stream into one file with the given name
    Concat(String),
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Map(t) => write!(f, "Map({})", t.name()),
            Stage::Concat(name) => write!(f, "Concat({})", name),
        }
    }
}

/// Starts a line-level source map for each file.
#[derive(Debug, Default)]
pub struct InitSourceMap;

impl Transform for InitSourceMap {
    fn name(&self) -> &'static str {
        "sourcemaps"
    }

    fn apply(&self, mut file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        let map = LineMap::identity(file.source_name.clone(), file.text()?);
        file.map = Some(map);
        Ok(Some(file))
    }
}

/// Inserts a suffix before the extension: `main.css` becomes `main.min.css`.
#[derive(Debug, Clone)]
pub struct Rename {
    suffix: String,
}

impl Rename {
    /// Create a rename stage.
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Transform for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, mut file: SourceFile) -> Result<Option<SourceFile>, TransformError> {
        let stem = file
            .relative
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match file.extension() {
            Some(ext) => format!("{}{}.{}", stem, self.suffix, ext),
            None => format!("{}{}", stem, self.suffix),
        };
        file.relative.set_file_name(name);
        Ok(Some(file))
    }
}

/// Join files in stream order with a newline between them, merging their maps.
///
/// Returns `None` for an empty stream.
pub fn concat_files(files: Vec<SourceFile>, bundle: &str) -> Option<SourceFile> {
    if files.is_empty() {
        return None;
    }

    let with_maps = files.iter().any(|f| f.map.is_some());
    let mut contents: Vec<u8> = Vec::new();
    let mut map = LineMap::default();
    let mut diagnostics = Vec::new();

    let mut line_offset: usize = 0;
    for (i, file) in files.into_iter().enumerate() {
        if i > 0 {
            contents.push(b'\n');
            line_offset += 1;
        }
        if with_maps {
            let file_map = file.map.unwrap_or_else(|| {
                let text = String::from_utf8_lossy(&file.contents);
                LineMap::identity(file.source_name.clone(), &text)
            });
            map.append(&file_map, line_offset.saturating_sub(map.line_count()));
        }
        line_offset += file.contents.iter().filter(|b| **b == b'\n').count();
        contents.extend_from_slice(&file.contents);
        diagnostics.extend(file.diagnostics);
    }

    let mut bundled = SourceFile::new(bundle, bundle, bundle, contents);
    bundled.map = with_maps.then_some(map);
    bundled.diagnostics = diagnostics;
    Some(bundled)
}

/// An ordered chain of stages over the files matched by a glob.
///
/// # Example
///
/// ```ignore
/// let report = Pipeline::new("markup", src, "*.html", dist)
///     .stage(LintStage::new(MarkupLinter::new(rules)))
///     .run()?;
/// ```
#[derive(Debug)]
pub struct Pipeline {
    name: String,
    src_root: PathBuf,
    pattern: String,
    dest: PathBuf,
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create a pipeline with no stages.
    ///
    /// # Arguments
    /// - `name` - Name used in logs and reports
    /// - `src_root` - Directory the pattern is resolved against
    /// - `pattern` - Source glob, relative to `src_root`
    /// - `dest` - Destination root for outputs
    pub fn new(
        name: impl Into<String>,
        src_root: impl Into<PathBuf>,
        pattern: impl Into<String>,
        dest: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            src_root: src_root.into(),
            pattern: pattern.into(),
            dest: dest.into(),
            stages: Vec::new(),
        }
    }

    /// Append a per-file stage.
    pub fn stage<T: Transform + 'static>(mut self, transform: T) -> Self {
        self.stages.push(Stage::Map(Box::new(transform)));
        self
    }

    /// Append a per-file stage if `enabled`.
    pub fn stage_if<T: Transform + 'static>(self, enabled: bool, transform: T) -> Self {
        if enabled {
            self.stage(transform)
        } else {
            self
        }
    }

    /// Append a concatenation stage.
    pub fn concat(mut self, bundle: impl Into<String>) -> Self {
        self.stages.push(Stage::Concat(bundle.into()));
        self
    }

    /// Configured stages, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run the pipeline to completion.
    pub fn run(&self) -> Result<PipelineReport, PipelineError> {
        let start = Instant::now();
        let mut report = PipelineReport::new(&self.name);

        let discovered = discover_files(&self.src_root, &self.pattern)?;
        report.inputs = discovered.len();
        debug!(pipeline = %self.name, files = discovered.len(), "discovered sources");

        let mut stream = Vec::with_capacity(discovered.len());
        for found in discovered {
            match fs::read(&found.path) {
                Ok(contents) => {
                    let source_name = found
                        .path
                        .strip_prefix(&self.src_root)
                        .unwrap_or(&found.relative)
                        .to_string_lossy()
                        .replace('\\', "/");
                    let file = SourceFile::new(found.path, found.relative, source_name, contents);
                    stream.push(file);
                }
                Err(e) => self.record_failure(&mut report, &found.path, "read", e.to_string()),
            }
        }

        let mut pending: Vec<&dyn Transform> = Vec::new();
        for stage in &self.stages {
            match stage {
                Stage::Map(transform) => pending.push(transform.as_ref()),
                Stage::Concat(bundle) => {
                    stream = self.run_segment(&pending, stream, &mut report);
                    pending.clear();
                    stream = concat_files(stream, bundle).into_iter().collect();
                }
            }
        }
        stream = self.run_segment(&pending, stream, &mut report);

        if !stream.is_empty() {
            fs::create_dir_all(&self.dest).map_err(|source| PipelineError::Destination {
                path: self.dest.clone(),
                source,
            })?;
        }
        for file in stream {
            let path = file.path.clone();
            if let Err(e) = self.write(file, &mut report) {
                self.record_failure(&mut report, &path, "write", e.to_string());
            }
        }

        Ok(report.with_duration(start.elapsed()))
    }

    /// Run a run of consecutive per-file stages across the stream in parallel.
    fn run_segment(
        &self,
        transforms: &[&dyn Transform],
        stream: Vec<SourceFile>,
        report: &mut PipelineReport,
    ) -> Vec<SourceFile> {
        if transforms.is_empty() {
            return stream;
        }

        let results: Vec<_> = stream
            .into_par_iter()
            .map(|file| {
                let path = file.path.clone();
                let mut diagnostics = Vec::new();
                let mut current = Some(file);
                for transform in transforms {
                    let Some(file) = current.take() else { break };
                    match transform.apply(file) {
                        Ok(Some(mut next)) => {
                            diagnostics.append(&mut next.diagnostics);
                            current = Some(next);
                        }
                        Ok(None) => {}
                        Err(e) => return (path, diagnostics, Err((transform.name(), e))),
                    }
                }
                (path, diagnostics, Ok(current))
            })
            .collect();

        let mut survivors = Vec::with_capacity(results.len());
        for (path, diagnostics, result) in results {
            report.diagnostics.extend(diagnostics);
            match result {
                Ok(Some(file)) => survivors.push(file),
                Ok(None) => {}
                Err((stage, e)) => self.record_failure(report, &path, stage, e.to_string()),
            }
        }
        survivors
    }

    fn write(&self, file: SourceFile, report: &mut PipelineReport) -> std::io::Result<()> {
        let out = self.dest.join(&file.relative);
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }

        let file_name =
            out.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        match &file.map {
            Some(map) => {
                let map_name = format!("{}.map", file_name);
                let block_comment = file.extension().as_deref() == Some("css");
                let mut contents = file.contents;
                let comment = mapping_url_comment(&map_name, block_comment);
                contents.extend_from_slice(comment.as_bytes());
                fs::write(&out, contents)?;

                let map_path = out.with_file_name(&map_name);
                fs::write(&map_path, map.to_json(&file_name))?;
                report.outputs.push(out);
                report.outputs.push(map_path);
            }
            None => {
                fs::write(&out, &file.contents)?;
                report.outputs.push(out);
            }
        }
        Ok(())
    }

    fn record_failure(
        &self,
        report: &mut PipelineReport,
        file: &Path,
        stage: &str,
        message: String,
    ) {
        warn!(pipeline = %self.name, file = %file.display(), stage, "{}", message);
        report.failures.push(FileFailure {
            file: file.to_path_buf(),
            stage: stage.to_string(),
            message,
        });
    }
}
