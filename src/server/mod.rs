//! Development server and live-reload bridge.
//!
//! [`ReloadBridge::start`] serves the distributable root over HTTP and opens
//! a server-sent events channel at [`LIVERELOAD_PATH`]. Every HTML page gets
//! a small client script that listens on that channel, so pipelines can ask
//! browsers to reload or to swap changed stylesheets in place.

pub mod files;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Path of the live-reload event stream.
pub const LIVERELOAD_PATH: &str = "/__livereload";

/// Error from the development server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called while the server is running
    #[error("Development server is already running")]
    AlreadyRunning,
    /// The address could not be bound
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        /// Requested address
        addr: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Other socket error
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Message pushed to connected browsers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadEvent {
    /// Reload the whole page
    Reload,
    /// Swap stylesheets whose URL ends with one of these paths
    Inject(Vec<String>),
}

impl ReloadEvent {
    fn to_event(&self) -> Event {
        match self {
            ReloadEvent::Reload => Event::default().event("reload").data("reload"),
            ReloadEvent::Inject(paths) => {
                let data = serde_json::to_string(paths).unwrap_or_else(|_| "[]".to_string());
                Event::default().event("inject").data(data)
            }
        }
    }
}

#[derive(Clone)]
pub(crate) struct ServeState {
    root: Arc<PathBuf>,
    events: broadcast::Sender<ReloadEvent>,
    closing: watch::Receiver<bool>,
}

enum ServerState {
    Stopped,
    Starting,
    Running {
        addr: SocketAddr,
        closing: watch::Sender<bool>,
        task: JoinHandle<()>,
    },
}

/// Dev server plus the channel to its connected browsers.
pub struct ReloadBridge {
    events: broadcast::Sender<ReloadEvent>,
    state: Mutex<ServerState>,
}

impl std::fmt::Debug for ReloadBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReloadBridge").field("addr", &self.local_addr()).finish()
    }
}

impl Default for ReloadBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadBridge {
    /// Create a stopped bridge.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            events,
            state: Mutex::new(ServerState::Stopped),
        }
    }

    /// Serve `root` on `host:port` (port 0 picks a free port).
    ///
    /// Returns the bound address. Fails with [`ServerError::AlreadyRunning`]
    /// if the server was already started.
    pub async fn start(
        &self,
        root: impl Into<PathBuf>,
        host: &str,
        port: u16,
    ) -> Result<SocketAddr, ServerError> {
        {
            let mut state = self.state.lock().map_err(|_| ServerError::AlreadyRunning)?;
            if !matches!(*state, ServerState::Stopped) {
                return Err(ServerError::AlreadyRunning);
            }
            *state = ServerState::Starting;
        }

        let listener = match TcpListener::bind((host, port)).await {
            Ok(listener) => listener,
            Err(source) => {
                self.set_state(ServerState::Stopped);
                return Err(ServerError::Bind { addr: format!("{}:{}", host, port), source });
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                self.set_state(ServerState::Stopped);
                return Err(e.into());
            }
        };

        let (closing_tx, closing_rx) = watch::channel(false);
        let serve_state = ServeState {
            root: Arc::new(root.into()),
            events: self.events.clone(),
            closing: closing_rx.clone(),
        };
        let app = Router::new()
            .route(LIVERELOAD_PATH, get(livereload))
            .fallback(files::serve_static)
            .with_state(serve_state);

        let mut shutdown = closing_rx;
        let task = tokio::spawn(async move {
            let signal = async move {
                let _ = shutdown.changed().await;
            };
            if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
                error!("development server exited: {}", e);
            }
        });

        info!(%addr, "development server listening");
        self.set_state(ServerState::Running {
            addr,
            closing: closing_tx,
            task,
        });
        Ok(addr)
    }

    fn set_state(&self, new: ServerState) {
        if let Ok(mut state) = self.state.lock() {
            *state = new;
        }
    }

    /// Whether the server is running.
    pub fn is_running(&self) -> bool {
        self.local_addr().is_some()
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.state.lock().ok()? {
            ServerState::Running { addr, .. } => Some(addr),
            _ => None,
        }
    }

    /// Number of connected browsers.
    pub fn client_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn send(&self, event: ReloadEvent) -> usize {
        if !self.is_running() {
            return 0;
        }
        let notified = self.events.send(event).unwrap_or(0);
        debug!(clients = notified, "live-reload event sent");
        notified
    }

    /// Ask every connected browser to reload. Returns the number notified.
    pub fn reload(&self) -> usize {
        self.send(ReloadEvent::Reload)
    }

    /// Ask every connected browser to swap the given stylesheets.
    ///
    /// Paths are matched against the end of each stylesheet URL, so
    /// `stylesheets/main.min.css` is enough. Returns the number notified.
    pub fn inject(&self, changed: Vec<String>) -> usize {
        self.send(ReloadEvent::Inject(changed))
    }

    /// Stop the server and close all live-reload streams.
    pub async fn shutdown(&self) {
        let previous = match self.state.lock() {
            Ok(mut state) => std::mem::replace(&mut *state, ServerState::Stopped),
            Err(_) => return,
        };
        if let ServerState::Running { closing, mut task, .. } = previous {
            let _ = closing.send(true);
            if tokio::time::timeout(Duration::from_secs(2), &mut task).await.is_err() {
                task.abort();
            }
            info!("development server stopped");
        }
    }
}

async fn livereload(State(state): State<ServeState>) -> impl IntoResponse {
    let receiver = state.events.subscribe();
    debug!(clients = state.events.receiver_count(), "live-reload client connected");

    let initial = (receiver, state.closing);
    let events = stream::unfold(initial, |(mut receiver, mut closing)| async move {
        loop {
            tokio::select! {
                _ = closing.changed() => return None,
                message = receiver.recv() => match message {
                    Ok(event) => {
                        let event = Ok::<Event, Infallible>(event.to_event());
                        return Some((event, (receiver, closing)));
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    });
    Sse::new(events).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request =
            format!("GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n", path);
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    async fn read_until(stream: &mut TcpStream, needle: &str) -> String {
        let mut seen = Vec::new();
        let mut buf = [0u8; 1024];
        while !String::from_utf8_lossy(&seen).contains(needle) {
            let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            assert!(n > 0, "connection closed before {:?}", needle);
            seen.extend_from_slice(&buf[..n]);
        }
        String::from_utf8_lossy(&seen).into_owned()
    }

    fn site() -> TempDir {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("stylesheets")).unwrap();
        fs::write(temp.path().join("index.html"), "<html><body><h1>Hi</h1></body></html>").unwrap();
        fs::write(temp.path().join("stylesheets/main.min.css"), ".a{color:red}").unwrap();
        temp
    }

    #[tokio::test]
    async fn test_reload_before_start_is_noop() {
        let bridge = ReloadBridge::new();
        assert!(!bridge.is_running());
        assert_eq!(bridge.reload(), 0);
        assert_eq!(bridge.inject(vec!["a.css".to_string()]), 0);
    }

    #[tokio::test]
    async fn test_double_start_fails() {
        let temp = site();
        let bridge = ReloadBridge::new();
        bridge.start(temp.path(), "127.0.0.1", 0).await.unwrap();
        let again = bridge.start(temp.path(), "127.0.0.1", 0).await;
        assert!(matches!(again, Err(ServerError::AlreadyRunning)));
        bridge.shutdown().await;
        assert!(!bridge.is_running());
    }

    #[tokio::test]
    async fn test_serves_files_with_client_script() {
        let temp = site();
        let bridge = ReloadBridge::new();
        let addr = bridge.start(temp.path(), "127.0.0.1", 0).await.unwrap();

        let index = get(addr, "/").await;
        assert!(index.starts_with("HTTP/1.1 200"));
        assert!(index.to_ascii_lowercase().contains("content-type: text/html"));
        assert!(index.contains(LIVERELOAD_PATH));
        assert!(index.contains("</script></body>"));

        let css = get(addr, "/stylesheets/main.min.css").await;
        assert!(css.starts_with("HTTP/1.1 200"));
        assert!(css.to_ascii_lowercase().contains("content-type: text/css"));
        assert!(css.ends_with(".a{color:red}"));

        assert!(get(addr, "/missing.html").await.starts_with("HTTP/1.1 404"));
        assert!(get(addr, "/%2e%2e/secret").await.starts_with("HTTP/1.1 404"));
        bridge.shutdown().await;
    }

    #[tokio::test]
    async fn test_reload_and_inject_reach_clients() {
        let temp = site();
        let bridge = ReloadBridge::new();
        let addr = bridge.start(temp.path(), "127.0.0.1", 0).await.unwrap();

        let mut client = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", LIVERELOAD_PATH);
        client.write_all(request.as_bytes()).await.unwrap();
        let head = read_until(&mut client, "\r\n\r\n").await;
        assert!(head.to_ascii_lowercase().contains("text/event-stream"));

        assert_eq!(bridge.client_count(), 1);
        assert_eq!(bridge.reload(), 1);
        read_until(&mut client, "event: reload").await;

        assert_eq!(bridge.inject(vec!["stylesheets/main.min.css".to_string()]), 1);
        let body = read_until(&mut client, "event: inject").await;
        let body = if body.contains("main.min.css") {
            body
        } else {
            read_until(&mut client, "main.min.css").await
        };
        assert!(body.contains("stylesheets/main.min.css"));

        bridge.shutdown().await;
        assert_eq!(bridge.reload(), 0);
    }
}
