//! Process-wide state shared by the standard tasks.

use crate::build::{BuildContext, BuildMode, ModeLatch, StatusReporter};
use crate::server::ReloadBridge;
use crate::tasks::{TaskRunner, WeakTaskRunner};
use crate::watch::WatchHandle;
use std::sync::{Arc, Mutex, OnceLock};

/// Everything a task callback needs: configuration, the build mode latch,
/// the dev server bridge and the status reporter.
pub struct Session {
    context: BuildContext,
    mode: ModeLatch,
    bridge: Arc<ReloadBridge>,
    reporter: Arc<dyn StatusReporter>,
    watch: Mutex<Option<WatchHandle>>,
    runner: OnceLock<WeakTaskRunner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("project_root", &self.context.project_root())
            .field("mode", &self.mode())
            .field("bridge", &self.bridge)
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl Session {
    /// Create a session in development mode.
    pub fn new(context: BuildContext, reporter: Arc<dyn StatusReporter>) -> Self {
        Self {
            context,
            mode: ModeLatch::new(),
            bridge: Arc::new(ReloadBridge::new()),
            reporter,
            watch: Mutex::new(None),
            runner: OnceLock::new(),
        }
    }

    /// Build context.
    pub fn context(&self) -> &BuildContext {
        &self.context
    }

    /// Snapshot of the current build mode.
    pub fn mode(&self) -> BuildMode {
        self.mode.current()
    }

    /// The promote-only mode latch.
    pub fn mode_latch(&self) -> &ModeLatch {
        &self.mode
    }

    /// Dev server and live-reload bridge.
    pub fn bridge(&self) -> &Arc<ReloadBridge> {
        &self.bridge
    }

    /// Status reporter.
    pub fn reporter(&self) -> &Arc<dyn StatusReporter> {
        &self.reporter
    }

    /// Remember the runner so tasks can trigger other tasks.
    ///
    /// Only the first call has an effect.
    pub fn attach_runner(&self, runner: &TaskRunner) {
        let _ = self.runner.set(runner.downgrade());
    }

    /// The runner attached with [`attach_runner`](Self::attach_runner).
    pub fn runner(&self) -> WeakTaskRunner {
        self.runner.get().cloned().unwrap_or_default()
    }

    /// Keep a started watch alive for the rest of the session.
    ///
    /// Returns `false` if a watch was already active; the new handle is dropped.
    pub fn set_watch(&self, handle: WatchHandle) -> bool {
        match self.watch.lock() {
            Ok(mut slot) if slot.is_none() => {
                *slot = Some(handle);
                true
            }
            _ => false,
        }
    }

    /// Whether a watch is active.
    pub fn is_watching(&self) -> bool {
        self.watch.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Whether the process should stay alive after its tasks finish.
    pub fn keeps_alive(&self) -> bool {
        self.is_watching() || self.bridge.is_running()
    }

    /// Stop watching and shut the dev server down.
    pub async fn shutdown(&self) {
        let handle = self.watch.lock().ok().and_then(|mut slot| slot.take());
        drop(handle);
        self.bridge.shutdown().await;
    }
}
