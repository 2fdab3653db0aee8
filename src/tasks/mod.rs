//! Named build tasks and their composition.
//!
//! Tasks are registered once on a [`TaskRegistry`], validated, and then
//! turned into an immutable [`TaskRunner`] that can run any of them any
//! number of times. A task is either a callback returning a future, or a
//! composite that runs other tasks in series or in parallel. Callback tasks
//! may also declare prerequisites that run before the callback.
//!
//! ```ignore
//! let mut registry = TaskRegistry::new();
//! registry.register("clean", || async { Ok(()) })?;
//! registry.register("compile", || async { Ok(()) })?;
//! registry.series("package", &["clean", "compile"])?;
//!
//! let runner = registry.into_runner()?;
//! runner.run("package").await?;
//! ```

pub mod standard;

use crate::build::format_duration;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::Instant;
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

pub use standard::register_standard_tasks;

/// Error type carried by task callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Future returned by a task callback.
pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;

/// Future returned by [`TaskRunner::run`].
pub type RunFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send + 'static>>;

type Callback = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

/// Error from registering, validating or running tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// A task with this name already exists
    #[error("Task '{0}' is already registered")]
    Duplicate(String),
    /// No task with this name
    #[error("Task '{0}' is not registered")]
    NotFound(String),
    /// A prerequisite or composite member is not registered
    #[error("Task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency {
        /// Task declaring the dependency
        task: String,
        /// Missing task
        dependency: String,
    },
    /// The dependency graph has a cycle
    #[error("Task dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
    /// A task callback failed
    #[error("'{task}' errored: {source}")]
    Failed {
        /// Task whose callback failed
        task: String,
        /// Underlying error
        #[source]
        source: BoxError,
    },
}

impl TaskError {
    /// Name of the failing task, for `Failed` errors.
    pub fn failed_task(&self) -> Option<&str> {
        match self {
            TaskError::Failed { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Prerequisites of a task and how they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dependencies {
    /// One after another, in listed order
    Series(Vec<String>),
    /// All at once; done when every one is done
    Parallel(Vec<String>),
}

impl Dependencies {
    /// No prerequisites.
    pub fn none() -> Self {
        Dependencies::Series(Vec::new())
    }

    /// Names of the prerequisites.
    pub fn names(&self) -> &[String] {
        match self {
            Dependencies::Series(names) | Dependencies::Parallel(names) => names,
        }
    }
}

impl Default for Dependencies {
    fn default() -> Self {
        Self::none()
    }
}

fn owned(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

struct TaskDef {
    dependencies: Dependencies,
    callback: Option<Callback>,
    description: Option<String>,
}

/// Mutable collection of tasks, used during startup.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, TaskDef>,
    order: Vec<String>,
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry").field("tasks", &self.order).finish()
    }
}

impl TaskRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, name: &str, def: TaskDef) -> Result<(), TaskError> {
        if self.tasks.contains_key(name) {
            return Err(TaskError::Duplicate(name.to_string()));
        }
        self.tasks.insert(name.to_string(), def);
        self.order.push(name.to_string());
        Ok(())
    }

    /// Register a task with no prerequisites.
    pub fn register<F, Fut>(&mut self, name: &str, callback: F) -> Result<(), TaskError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register_with(name, Dependencies::none(), callback)
    }

    /// Register a task whose prerequisites run to completion before it.
    pub fn register_with<F, Fut>(
        &mut self,
        name: &str,
        dependencies: Dependencies,
        callback: F,
    ) -> Result<(), TaskError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let callback: Callback = Arc::new(move || Box::pin(callback()) as TaskFuture);
        self.insert(
            name,
            TaskDef {
                dependencies,
                callback: Some(callback),
                description: None,
            },
        )
    }

    /// Register a composite task running `members` strictly in order.
    pub fn series(&mut self, name: &str, members: &[&str]) -> Result<(), TaskError> {
        let dependencies = Dependencies::Series(owned(members));
        self.insert(name, TaskDef {
            dependencies,
            callback: None,
            description: None,
        })
    }

    /// Register a composite task running `members` concurrently.
    pub fn parallel(&mut self, name: &str, members: &[&str]) -> Result<(), TaskError> {
        let dependencies = Dependencies::Parallel(owned(members));
        self.insert(name, TaskDef {
            dependencies,
            callback: None,
            description: None,
        })
    }

    /// Attach a one-line description shown by task listings.
    pub fn describe(&mut self, name: &str, description: &str) -> Result<(), TaskError> {
        let def = self.tasks.get_mut(name).ok_or_else(|| TaskError::NotFound(name.to_string()))?;
        def.description = Some(description.to_string());
        Ok(())
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Check that every dependency exists and that there are no cycles.
    pub fn validate(&self) -> Result<(), TaskError> {
        for name in &self.order {
            for dependency in self.tasks[name].dependencies.names() {
                if !self.tasks.contains_key(dependency) {
                    return Err(TaskError::UnknownDependency {
                        task: name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Visiting,
            Done,
        }

        fn visit(
            tasks: &HashMap<String, TaskDef>,
            name: &str,
            marks: &mut HashMap<String, Mark>,
            path: &mut Vec<String>,
        ) -> Result<(), TaskError> {
            match marks.get(name) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    let start = path.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(name.to_string());
                    return Err(TaskError::Cycle(cycle));
                }
                None => {}
            }
            marks.insert(name.to_string(), Mark::Visiting);
            path.push(name.to_string());
            for dependency in tasks[name].dependencies.names() {
                visit(tasks, dependency, marks, path)?;
            }
            path.pop();
            marks.insert(name.to_string(), Mark::Done);
            Ok(())
        }

        let mut marks = HashMap::new();
        for name in &self.order {
            visit(&self.tasks, name, &mut marks, &mut Vec::new())?;
        }
        Ok(())
    }

    /// Validate and freeze the registry.
    pub fn into_runner(self) -> Result<TaskRunner, TaskError> {
        self.validate()?;
        let inner = RunnerInner {
            tasks: self.tasks,
            order: self.order,
        };
        Ok(TaskRunner {
            inner: Arc::new(inner),
        })
    }
}

struct RunnerInner {
    tasks: HashMap<String, TaskDef>,
    order: Vec<String>,
}

/// Immutable, cheaply cloneable handle that runs registered tasks.
#[derive(Clone)]
pub struct TaskRunner {
    inner: Arc<RunnerInner>,
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").field("tasks", &self.inner.order).finish()
    }
}

impl TaskRunner {
    /// Registered names, in registration order.
    pub fn names(&self) -> &[String] {
        &self.inner.order
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.tasks.contains_key(name)
    }

    /// Description attached with [`TaskRegistry::describe`].
    pub fn description(&self, name: &str) -> Option<&str> {
        self.inner.tasks.get(name).and_then(|def| def.description.as_deref())
    }

    /// A handle that does not keep the tasks alive.
    pub fn downgrade(&self) -> WeakTaskRunner {
        WeakTaskRunner {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Run a task, its prerequisites first.
    ///
    /// Resolves when the task's callback (or every member of a composite)
    /// has completed. Errors from prerequisites and members propagate
    /// unchanged, so the error names the task that actually failed.
    pub fn run(&self, name: &str) -> RunFuture {
        let runner = self.clone();
        let name = name.to_string();
        Box::pin(async move {
            let Some(def) = runner.inner.tasks.get(&name) else {
                return Err(TaskError::NotFound(name));
            };
            let dependencies = def.dependencies.clone();
            let callback = def.callback.clone();

            info!("Starting '{}'...", name);
            let start = Instant::now();

            let result = match runner.run_dependencies(&dependencies).await {
                Ok(()) => match callback {
                    Some(callback) => callback().await.map_err(|source| TaskError::Failed {
                        task: name.clone(),
                        source,
                    }),
                    None => Ok(()),
                },
                Err(e) => Err(e),
            };

            match &result {
                Ok(()) => info!("Finished '{}' after {}", name, format_duration(start.elapsed())),
                Err(_) => warn!("'{}' errored after {}", name, format_duration(start.elapsed())),
            }
            result
        })
    }

    /// Run several tasks one after another, stopping at the first failure.
    pub async fn run_series(&self, names: &[String]) -> Result<(), TaskError> {
        self.check_known(names)?;
        self.run_dependencies(&Dependencies::Series(names.to_vec())).await
    }

    /// Run several tasks concurrently and wait for all of them.
    pub async fn run_parallel(&self, names: &[String]) -> Result<(), TaskError> {
        self.check_known(names)?;
        self.run_dependencies(&Dependencies::Parallel(names.to_vec())).await
    }

    fn check_known(&self, names: &[String]) -> Result<(), TaskError> {
        match names.iter().find(|n| !self.contains(n)) {
            Some(missing) => Err(TaskError::NotFound(missing.clone())),
            None => Ok(()),
        }
    }

    async fn run_dependencies(&self, dependencies: &Dependencies) -> Result<(), TaskError> {
        match dependencies {
            Dependencies::Series(names) => {
                for name in names {
                    self.run(name).await?;
                }
                Ok(())
            }
            Dependencies::Parallel(names) => {
                let mut set = JoinSet::new();
                for name in names {
                    set.spawn(self.run(name));
                }

                let mut first_error = None;
                while let Some(joined) = set.join_next().await {
                    let result = joined.unwrap_or_else(|e| {
                        Err(TaskError::Failed {
                            task: "parallel".to_string(),
                            source: Box::new(e),
                        })
                    });
                    if let Err(e) = result {
                        first_error.get_or_insert(e);
                    }
                }
                first_error.map_or(Ok(()), Err)
            }
        }
    }
}

/// Non-owning handle to a [`TaskRunner`].
///
/// Held by tasks that trigger other tasks (such as `watch`), since the
/// runner owns their callbacks.
#[derive(Debug, Clone, Default)]
pub struct WeakTaskRunner {
    inner: Weak<RunnerInner>,
}

impl std::fmt::Debug for RunnerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(&self.order).finish()
    }
}

impl WeakTaskRunner {
    /// The runner, if it is still alive.
    pub fn upgrade(&self) -> Option<TaskRunner> {
        self.inner.upgrade().map(|inner| TaskRunner { inner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Barrier;

    type Log = Arc<Mutex<Vec<String>>>;

    fn logging_task(registry: &mut TaskRegistry, log: &Log, name: &'static str, delay_ms: u64) {
        let log = log.clone();
        registry
            .register(name, move || {
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("start {}", name));
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    log.lock().unwrap().push(format!("end {}", name));
                    Ok(())
                }
            })
            .unwrap();
    }

    fn failing_task(registry: &mut TaskRegistry, name: &'static str) {
        registry.register(name, || async { Err::<(), BoxError>("boom".into()) }).unwrap();
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = TaskRegistry::new();
        registry.register("a", || async { Ok(()) }).unwrap();
        let again = registry.register("a", || async { Ok(()) });
        assert!(matches!(again, Err(TaskError::Duplicate(n)) if n == "a"));
        assert!(matches!(registry.series("a", &[]), Err(TaskError::Duplicate(_))));
    }

    #[test]
    fn test_validate_unknown_dependency() {
        let mut registry = TaskRegistry::new();
        registry.series("all", &["missing"]).unwrap();
        let err = registry.validate().unwrap_err();
        match err {
            TaskError::UnknownDependency { task, dependency } => {
                assert_eq!(task, "all");
                assert_eq!(dependency, "missing");
            }
            other => panic!("expected unknown dependency, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_cycle() {
        let mut registry = TaskRegistry::new();
        registry.series("a", &["b"]).unwrap();
        registry.parallel("b", &["c"]).unwrap();
        registry.series("c", &["a"]).unwrap();
        match registry.into_runner() {
            Err(TaskError::Cycle(path)) => assert_eq!(path, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_run_unknown_task() {
        let runner = TaskRegistry::new().into_runner().unwrap();
        assert!(matches!(runner.run("nope").await, Err(TaskError::NotFound(n)) if n == "nope"));
        let parallel = runner.run_parallel(&["nope".to_string()]).await;
        assert!(matches!(parallel, Err(TaskError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_series_runs_in_order() {
        let log = Log::default();
        let mut registry = TaskRegistry::new();
        logging_task(&mut registry, &log, "a", 20);
        logging_task(&mut registry, &log, "b", 0);
        logging_task(&mut registry, &log, "c", 5);
        registry.series("all", &["a", "b", "c"]).unwrap();

        registry.into_runner().unwrap().run("all").await.unwrap();
        assert_eq!(
            *log.lock().unwrap(),
            vec!["start a", "end a", "start b", "end b", "start c", "end c"]
        );
    }

    #[tokio::test]
    async fn test_series_stops_at_first_failure() {
        let log = Log::default();
        let mut registry = TaskRegistry::new();
        failing_task(&mut registry, "bad");
        logging_task(&mut registry, &log, "after", 0);
        registry.series("all", &["bad", "after"]).unwrap();

        let err = registry.into_runner().unwrap().run("all").await.unwrap_err();
        assert_eq!(err.failed_task(), Some("bad"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_starts_all_members() {
        let barrier = Arc::new(Barrier::new(2));
        let mut registry = TaskRegistry::new();
        for name in ["left", "right"] {
            let barrier = barrier.clone();
            registry
                .register(name, move || {
                    let barrier = barrier.clone();
                    async move {
                        barrier.wait().await;
                        Ok(())
                    }
                })
                .unwrap();
        }
        registry.parallel("both", &["left", "right"]).unwrap();

        let runner = registry.into_runner().unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner.run("both"))
            .await
            .expect("members ran concurrently")
            .unwrap();
    }

    #[tokio::test]
    async fn test_parallel_reports_failure_after_all_finish() {
        let log = Log::default();
        let mut registry = TaskRegistry::new();
        failing_task(&mut registry, "bad");
        logging_task(&mut registry, &log, "slow", 30);
        registry.parallel("both", &["bad", "slow"]).unwrap();

        let err = registry.into_runner().unwrap().run("both").await.unwrap_err();
        assert_eq!(err.failed_task(), Some("bad"));
        assert_eq!(*log.lock().unwrap(), vec!["start slow", "end slow"]);
    }

    #[tokio::test]
    async fn test_prerequisites_run_before_callback() {
        let log = Log::default();
        let mut registry = TaskRegistry::new();
        logging_task(&mut registry, &log, "prep", 10);
        let task_log = log.clone();
        registry
            .register_with("main", Dependencies::Series(vec!["prep".to_string()]), move || {
                let log = task_log.clone();
                async move {
                    log.lock().unwrap().push("main".to_string());
                    Ok(())
                }
            })
            .unwrap();

        registry.into_runner().unwrap().run("main").await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["start prep", "end prep", "main"]);
    }

    #[tokio::test]
    async fn test_tasks_can_run_repeatedly() {
        let log = Log::default();
        let mut registry = TaskRegistry::new();
        logging_task(&mut registry, &log, "a", 0);
        let runner = registry.into_runner().unwrap();
        runner.run("a").await.unwrap();
        runner.run("a").await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 4);
    }

    #[test]
    fn test_weak_runner() {
        let runner = TaskRegistry::new().into_runner().unwrap();
        let weak = runner.downgrade();
        assert!(weak.upgrade().is_some());
        drop(runner);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_describe() {
        let mut registry = TaskRegistry::new();
        registry.register("clean", || async { Ok(()) }).unwrap();
        registry.describe("clean", "Remove the build directory").unwrap();
        assert!(matches!(registry.describe("nope", "x"), Err(TaskError::NotFound(_))));
        let runner = registry.into_runner().unwrap();
        assert_eq!(runner.description("clean"), Some("Remove the build directory"));
        assert_eq!(runner.names(), ["clean".to_string()]);
    }
}
