//! User-facing status reporting.
//!
//! Tasks describe what they did through a [`StatusReporter`]. The console
//! reporter prints one line per status, tagged with a severity icon and a
//! `[HH:MM:SS]` timestamp:
//!
//! ```text
//! [14:03:11] ✓ Build directory cleaned
//! [14:03:12] ℹ Styles compiled
//! [14:03:12] ⚠ Note that the development build is not optimised
//! ```

use crate::lint::{format_stylish, Diagnostic};
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

/// Severity of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Something finished successfully
    Success,
    /// Informational
    Info,
    /// Something the user should look at
    Warning,
    /// Something failed
    Error,
}

impl Status {
    /// Icon printed in front of the message.
    pub fn icon(self) -> &'static str {
        match self {
            Status::Success => "✓",
            Status::Info => "ℹ",
            Status::Warning => "⚠",
            Status::Error => "✗",
        }
    }
}

/// Receiver of status lines and lint diagnostics.
pub trait StatusReporter: Send + Sync {
    /// Report a status line.
    fn status(&self, status: Status, message: &str);

    /// Report lint diagnostics for a set of files.
    fn diagnostics(&self, _diagnostics: &[Diagnostic]) {}

    /// Check if this reporter wants verbose output.
    fn is_verbose(&self) -> bool {
        false
    }

    /// Shorthand for [`Status::Success`].
    fn success(&self, message: &str) {
        self.status(Status::Success, message);
    }

    /// Shorthand for [`Status::Info`].
    fn info(&self, message: &str) {
        self.status(Status::Info, message);
    }

    /// Shorthand for [`Status::Warning`].
    fn warning(&self, message: &str) {
        self.status(Status::Warning, message);
    }

    /// Shorthand for [`Status::Error`].
    fn error(&self, message: &str) {
        self.status(Status::Error, message);
    }
}

/// A reporter that discards everything.
#[derive(Debug, Default)]
pub struct NullReporter;

impl StatusReporter for NullReporter {
    fn status(&self, _status: Status, _message: &str) {}
}

/// A reporter that keeps every status line in memory.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    entries: Mutex<Vec<(Status, String)>>,
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingReporter {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status lines recorded so far, oldest first.
    pub fn entries(&self) -> Vec<(Status, String)> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Messages recorded so far, without their severity.
    pub fn messages(&self) -> Vec<String> {
        self.entries().into_iter().map(|(_, m)| m).collect()
    }

    /// Diagnostics recorded so far.
    pub fn recorded_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

impl StatusReporter for RecordingReporter {
    fn status(&self, status: Status, message: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push((status, message.to_string()));
        }
    }

    fn diagnostics(&self, diagnostics: &[Diagnostic]) {
        if let Ok(mut recorded) = self.diagnostics.lock() {
            recorded.extend_from_slice(diagnostics);
        }
    }
}

/// Console reporter, colored when stderr is a terminal.
pub struct ConsoleReporter {
    use_colors: bool,
    verbose: bool,
    output: Mutex<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for ConsoleReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleReporter")
            .field("use_colors", &self.use_colors)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl ConsoleReporter {
    /// Create a reporter writing to stderr.
    pub fn new() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stderr),
            verbose: false,
            output: Mutex::new(Box::new(std::io::stderr())),
        }
    }

    /// Create a reporter that writes to a custom output, without colors.
    pub fn with_output<W: Write + Send + 'static>(output: W) -> Self {
        Self {
            use_colors: false,
            verbose: false,
            output: Mutex::new(Box::new(output)),
        }
    }

    /// Set whether to use colors.
    pub fn with_colors(mut self, use_colors: bool) -> Self {
        self.use_colors = use_colors;
        self
    }

    /// Set verbose mode.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    fn color(&self, text: &str, color: &str) -> String {
        if self.use_colors {
            format!("{}{}\x1b[0m", color, text)
        } else {
            text.to_string()
        }
    }

    fn gray(&self, text: &str) -> String {
        self.color(text, "\x1b[90m")
    }

    fn icon(&self, status: Status) -> String {
        let code = match status {
            Status::Success => "\x1b[32m",
            Status::Info => "\x1b[36m",
            Status::Warning => "\x1b[33m",
            Status::Error => "\x1b[31m",
        };
        self.color(status.icon(), code)
    }

    fn write_text(&self, text: &str) {
        if let Ok(mut output) = self.output.lock() {
            let _ = write!(output, "{}", text);
            let _ = output.flush();
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter for ConsoleReporter {
    fn status(&self, status: Status, message: &str) {
        let stamp = self.gray(&format!("[{}]", timestamp()));
        self.write_text(&format!("{} {} {}\n", stamp, self.icon(status), message));
    }

    fn diagnostics(&self, diagnostics: &[Diagnostic]) {
        if !diagnostics.is_empty() {
            self.write_text(&format_stylish(diagnostics));
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Format a duration as `123ms` or `1.23s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else {
        format!("{:.2}s", duration.as_secs_f64())
    }
}

/// Current wall-clock time as `HH:MM:SS` (UTC).
pub fn timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default();
    let secs = now.as_secs() % 86400;
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}
