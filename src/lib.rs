//! assetflow - a task runner for static sites
//!
//! This library provides functionality to:
//! - Register named tasks and compose them in series or in parallel
//! - Compile stylesheets, scripts, markup and assets through file pipelines
//! - Lint sources against JSON rule files
//! - Serve the build output with live reload and re-run tasks on change
//! - Package the build output into a zip archive

pub mod build;
pub mod cli;
pub mod config;
pub mod lint;
pub mod server;
pub mod session;
pub mod tasks;
pub mod watch;
