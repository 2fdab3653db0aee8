//! Watch mode: re-run tasks when source files change.
//!
//! A [`WatchCoordinator`] holds `pattern -> task` bindings relative to the
//! source root. Once started it watches the source root recursively,
//! debounces filesystem events and triggers every task whose pattern matches
//! a changed path. Runs of the same task never overlap: a trigger arriving
//! while the task is running queues exactly one follow-up run.

use crate::build::StatusReporter;
use crate::config::WatchConfig;
use crate::tasks::WeakTaskRunner;
use glob::{MatchOptions, Pattern, PatternError};
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, DebouncedEventKind, Debouncer};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Error during watch setup
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to initialize file watcher
    #[error("Failed to initialize file watcher: {0}")]
    WatcherInit(notify::Error),
    /// Failed to add watch path
    #[error("Failed to watch path: {0}")]
    WatchPath(notify::Error),
    /// A binding pattern is not a valid glob
    #[error("Invalid watch pattern '{pattern}': {source}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Parser error
        source: PatternError,
    },
    /// Source directory not found
    #[error("Source directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
}

/// A single `pattern -> task` rule.
#[derive(Debug, Clone)]
pub struct WatchBinding {
    pattern: Pattern,
    task: String,
}

impl WatchBinding {
    /// The glob, relative to the source root.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// Task triggered by matching changes.
    pub fn task(&self) -> &str {
        &self.task
    }
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Maps changed paths to the tasks that must re-run.
#[derive(Debug, Clone)]
pub struct WatchCoordinator {
    src_dir: PathBuf,
    debounce: Duration,
    clear_screen: bool,
    bindings: Vec<WatchBinding>,
}

impl WatchCoordinator {
    /// Create a coordinator with no bindings.
    pub fn new(src_dir: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            src_dir: src_dir.into(),
            debounce,
            clear_screen: false,
            bindings: Vec::new(),
        }
    }

    /// Create a coordinator from the `[watch]` section.
    pub fn from_config(
        src_dir: impl Into<PathBuf>,
        config: &WatchConfig,
    ) -> Result<Self, WatchError> {
        let mut coordinator = Self::new(src_dir, Duration::from_millis(config.debounce_ms as u64));
        coordinator.clear_screen = config.clear_screen;
        for binding in &config.bindings {
            coordinator.bind(&binding.pattern, &binding.task)?;
        }
        Ok(coordinator)
    }

    /// Trigger `task` whenever a path matching `pattern` changes.
    pub fn bind(&mut self, pattern: &str, task: &str) -> Result<(), WatchError> {
        let pattern = Pattern::new(pattern).map_err(|source| WatchError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        self.bindings.push(WatchBinding {
            pattern,
            task: task.to_string(),
        });
        Ok(())
    }

    /// Registered bindings, in binding order.
    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Watched source root.
    pub fn src_dir(&self) -> &Path {
        &self.src_dir
    }

    fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        if let Ok(rel) = path.strip_prefix(&self.src_dir) {
            return Some(rel);
        }
        // Watchers report canonical paths
        let canonical = self.src_dir.canonicalize().ok()?;
        path.strip_prefix(canonical).ok()
    }

    /// Tasks bound to a pattern matching `path`, in binding order.
    pub fn tasks_for(&self, path: &Path) -> Vec<String> {
        let Some(relative) = self.relative(path) else {
            return Vec::new();
        };
        let mut tasks: Vec<String> = Vec::new();
        for binding in &self.bindings {
            let matched = binding.pattern.matches_path_with(relative, MATCH_OPTIONS);
            if matched && !tasks.contains(&binding.task) {
                tasks.push(binding.task.clone());
            }
        }
        tasks
    }

    /// Tasks to run for one batch of changed paths. Each task appears once.
    pub fn dispatch(&self, paths: &[PathBuf]) -> Vec<String> {
        let mut tasks: Vec<String> = Vec::new();
        for path in paths {
            for task in self.tasks_for(path) {
                if !tasks.contains(&task) {
                    tasks.push(task);
                }
            }
        }
        tasks
    }

    /// Start watching. Triggered tasks run on `runner`.
    ///
    /// Watching stops when the returned handle is dropped.
    pub fn start(
        self,
        runner: WeakTaskRunner,
        reporter: Arc<dyn StatusReporter>,
    ) -> Result<WatchHandle, WatchError> {
        if !self.src_dir.is_dir() {
            return Err(WatchError::SourceNotFound(self.src_dir.clone()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<DebounceEventResult>();
        let mut debouncer = new_debouncer(self.debounce, move |result: DebounceEventResult| {
            let _ = tx.send(result);
        })
        .map_err(WatchError::WatcherInit)?;
        debouncer
            .watcher()
            .watch(&self.src_dir, RecursiveMode::Recursive)
            .map_err(WatchError::WatchPath)?;
        info!(
            dir = %self.src_dir.display(),
            bindings = self.bindings.len(),
            "watching for changes"
        );

        let scheduler = Arc::new(Scheduler::new(runner, reporter));
        let coordinator = self;
        let task = tokio::spawn(async move {
            while let Some(result) = rx.recv().await {
                match result {
                    Ok(events) => {
                        let paths: Vec<PathBuf> = events
                            .into_iter()
                            .filter(|e| matches!(e.kind, DebouncedEventKind::Any))
                            .map(|e| e.path)
                            .collect();
                        let tasks = coordinator.dispatch(&paths);
                        if tasks.is_empty() {
                            continue;
                        }
                        for path in &paths {
                            debug!(path = %path.display(), "changed");
                        }
                        if coordinator.clear_screen {
                            clear_screen();
                        }
                        for task in tasks {
                            scheduler.trigger(&task);
                        }
                    }
                    // Non-fatal, keep watching
                    Err(e) => warn!("watch error: {}", e),
                }
            }
        });

        Ok(WatchHandle {
            _debouncer: debouncer,
            task,
        })
    }
}

/// Keeps a started watch alive.
pub struct WatchHandle {
    _debouncer: Debouncer<notify::RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle").finish_non_exhaustive()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    RunningDirty,
}

/// Serializes triggered runs per task, coalescing triggers that arrive
/// while the task is running into one follow-up run.
pub(crate) struct Scheduler {
    runner: WeakTaskRunner,
    reporter: Arc<dyn StatusReporter>,
    states: Mutex<HashMap<String, RunState>>,
}

impl Scheduler {
    pub(crate) fn new(runner: WeakTaskRunner, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            runner,
            reporter,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Request a run of `task`. Must be called from within a tokio runtime.
    pub(crate) fn trigger(self: &Arc<Self>, task: &str) {
        let Ok(mut states) = self.states.lock() else { return };
        match states.get(task) {
            None => {
                states.insert(task.to_string(), RunState::Running);
                drop(states);
                let scheduler = Arc::clone(self);
                let task = task.to_string();
                tokio::spawn(async move { scheduler.run_until_clean(task).await });
            }
            Some(RunState::Running) => {
                states.insert(task.to_string(), RunState::RunningDirty);
            }
            Some(RunState::RunningDirty) => {}
        }
    }

    async fn run_until_clean(self: Arc<Self>, task: String) {
        loop {
            if let Some(runner) = self.runner.upgrade() {
                if let Err(e) = runner.run(&task).await {
                    self.reporter.error(&e.to_string());
                }
            }

            let Ok(mut states) = self.states.lock() else { return };
            if states.get(&task) == Some(&RunState::RunningDirty) {
                states.insert(task.clone(), RunState::Running);
            } else {
                states.remove(&task);
                return;
            }
        }
    }
}

/// Clear the terminal screen
fn clear_screen() {
    print!("\x1B[2J\x1B[1;1H");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{NullReporter, RecordingReporter};
    use crate::tasks::{BoxError, TaskRegistry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn coordinator() -> WatchCoordinator {
        WatchCoordinator::from_config("/site/src", &WatchConfig::default()).unwrap()
    }

    #[test]
    fn test_default_bindings() {
        let c = coordinator();
        let tasks = |path: &str| c.tasks_for(Path::new(path));
        assert_eq!(tasks("/site/src/index.html"), vec!["compileMarkup"]);
        assert_eq!(tasks("/site/src/stylesheets/main.scss"), vec!["compileStyles"]);
        assert_eq!(tasks("/site/src/stylesheets/base/_reset.scss"), vec!["compileStyles"]);
        assert_eq!(tasks("/site/src/scripts/vendor/lib.js"), vec!["compileScripts"]);
        assert_eq!(tasks("/site/src/assets/img/logo.png"), vec!["compressAssets"]);
    }

    #[test]
    fn test_unrelated_paths_trigger_nothing() {
        let c = coordinator();
        assert!(c.tasks_for(Path::new("/site/src/pages/about.html")).is_empty());
        assert!(c.tasks_for(Path::new("/site/src/stylesheets/main.css")).is_empty());
        assert!(c.tasks_for(Path::new("/elsewhere/index.html")).is_empty());
    }

    #[test]
    fn test_many_to_many() {
        let mut c = WatchCoordinator::new("/src", Duration::from_millis(10));
        c.bind("scripts/**", "compileScripts").unwrap();
        c.bind("scripts/**", "lintScripts").unwrap();
        c.bind("**/*.js", "compileScripts").unwrap();

        let tasks = c.tasks_for(Path::new("/src/scripts/a.js"));
        assert_eq!(tasks, vec!["compileScripts", "lintScripts"]);
        let batch = vec![PathBuf::from("/src/scripts/a.js"), PathBuf::from("/src/other.js")];
        assert_eq!(c.dispatch(&batch), vec!["compileScripts", "lintScripts"]);
    }

    #[test]
    fn test_invalid_pattern() {
        let mut c = WatchCoordinator::new("/src", Duration::from_millis(10));
        assert!(matches!(c.bind("[", "x"), Err(WatchError::InvalidPattern { .. })));
    }

    #[tokio::test]
    async fn test_start_requires_source_dir() {
        let temp = TempDir::new().unwrap();
        let c = WatchCoordinator::new(temp.path().join("missing"), Duration::from_millis(10));
        let result = c.start(WeakTaskRunner::default(), Arc::new(NullReporter));
        assert!(matches!(result, Err(WatchError::SourceNotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scheduler_coalesces_triggers() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        let counter = runs.clone();
        registry
            .register("slow", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(())
                }
            })
            .unwrap();
        let runner = registry.into_runner().unwrap();
        let scheduler = Arc::new(Scheduler::new(runner.downgrade(), Arc::new(NullReporter)));

        scheduler.trigger("slow");
        tokio::time::sleep(Duration::from_millis(20)).await;
        scheduler.trigger("slow");
        scheduler.trigger("slow");
        scheduler.trigger("slow");
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert!(scheduler.states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scheduler_reports_failures_and_recovers() {
        let mut registry = TaskRegistry::new();
        registry.register("bad", || async { Err::<(), BoxError>("syntax error".into()) }).unwrap();
        let runner = registry.into_runner().unwrap();
        let reporter = Arc::new(RecordingReporter::new());
        let scheduler = Arc::new(Scheduler::new(runner.downgrade(), reporter.clone()));

        scheduler.trigger("bad");
        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.trigger("bad");
        tokio::time::sleep(Duration::from_millis(50)).await;

        let messages = reporter.messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].contains("syntax error"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_watch_triggers_bound_task() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        std::fs::create_dir_all(src.join("stylesheets")).unwrap();

        let styles = Arc::new(AtomicUsize::new(0));
        let markup = Arc::new(AtomicUsize::new(0));
        let mut registry = TaskRegistry::new();
        for (name, counter) in [
            ("compileStyles", styles.clone()),
            ("compileMarkup", markup.clone()),
        ] {
            registry
                .register(name, move || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })
                .unwrap();
        }
        let runner = registry.into_runner().unwrap();

        let mut c = WatchCoordinator::new(&src, Duration::from_millis(50));
        c.bind("stylesheets/**/*.scss", "compileStyles").unwrap();
        c.bind("*.html", "compileMarkup").unwrap();
        let handle = c.start(runner.downgrade(), Arc::new(NullReporter)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(src.join("stylesheets/main.scss"), ".a { color: red; }").unwrap();

        let mut waited = 0;
        while styles.load(Ordering::SeqCst) == 0 && waited < 50 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            waited += 1;
        }
        assert!(styles.load(Ordering::SeqCst) >= 1);
        assert_eq!(markup.load(Ordering::SeqCst), 0);
        drop(handle);
    }
}
