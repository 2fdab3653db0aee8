//! Command-line interface implementation
//!
//! `aflow [OPTIONS] <TASK>...` loads `assetflow.toml`, registers the
//! standard tasks and runs the named ones. When a task started the dev
//! server or a watch, the process stays up until Ctrl+C.

use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use crate::build::{BuildContext, ConsoleReporter, StatusReporter};
use crate::config::{find_config, load_config, merge_cli_overrides, CliOverrides, FlowConfig};
use crate::session::Session;
use crate::tasks::standard::standard_runner;
use crate::tasks::{TaskError, TaskRunner};

/// Exit codes
pub(crate) const EXIT_SUCCESS: u8 = 0;
pub(crate) const EXIT_ERROR: u8 = 1;
pub(crate) const EXIT_INVALID_ARGS: u8 = 2;

/// assetflow - compile, lint, serve and package a static site
#[derive(Debug, Parser)]
#[command(name = "aflow")]
#[command(about = "Compile, lint, serve and package a static site")]
#[command(version)]
pub struct Cli {
    /// Tasks to run, in parallel unless --series is given
    #[arg(required_unless_present = "list_tasks")]
    pub tasks: Vec<String>,

    /// Path to assetflow.toml (default: search upwards from the current directory)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the source root
    #[arg(long)]
    pub src: Option<PathBuf>,

    /// Override the distributable root
    #[arg(long)]
    pub dist: Option<PathBuf>,

    /// Override the dev server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Run the given tasks one after another
    #[arg(long)]
    pub series: bool,

    /// List registered tasks and exit
    #[arg(long = "tasks")]
    pub list_tasks: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "assetflow=info",
        1 => "assetflow=debug",
        _ => "assetflow=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Load configuration and pick the project root.
///
/// The root is the directory holding the config file, or the current
/// directory when none is found.
fn load(cli: &Cli) -> Result<(FlowConfig, PathBuf), String> {
    let path = cli.config.clone().or_else(find_config);
    let mut config = load_config(path.as_deref()).map_err(|e| e.to_string())?;
    let overrides = CliOverrides {
        src: cli.src.clone(),
        dist: cli.dist.clone(),
        port: cli.port,
    };
    merge_cli_overrides(&mut config, &overrides);

    let errors = config.validate();
    if !errors.is_empty() {
        return Err(errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"));
    }

    let root = match path.as_deref().and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => std::env::current_dir().map_err(|e| format!("Cannot read current directory: {}", e))?,
    };
    Ok((config, root))
}

fn list_tasks(runner: &TaskRunner) {
    let width = runner.names().iter().map(String::len).max().unwrap_or(0);
    for name in runner.names() {
        match runner.description(name) {
            Some(description) => println!("{:width$}  {}", name, description, width = width),
            None => println!("{}", name),
        }
    }
}

/// Exit code for a task error. Unknown names are usage errors.
pub(crate) fn exit_code_for(err: &TaskError) -> u8 {
    match err {
        TaskError::NotFound(_) => EXIT_INVALID_ARGS,
        _ => EXIT_ERROR,
    }
}

async fn run_tasks(cli: &Cli, session: Arc<Session>, runner: TaskRunner) -> u8 {
    let result = if cli.series {
        runner.run_series(&cli.tasks).await
    } else {
        runner.run_parallel(&cli.tasks).await
    };

    if let Err(e) = result {
        session.reporter().error(&e.to_string());
        session.shutdown().await;
        return exit_code_for(&e);
    }

    if session.keeps_alive() {
        debug!("waiting for Ctrl+C");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl+C: {}", e);
        }
        session.shutdown().await;
    }
    EXIT_SUCCESS
}

/// Entry point for the `aflow` binary.
pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (config, root) = match load(&cli) {
        Ok(loaded) => loaded,
        Err(message) => {
            eprintln!("Error: {}", message);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    let verbose = cli.verbose > 0;
    let context = BuildContext::new(config, root).with_verbose(verbose);
    let reporter: Arc<dyn StatusReporter> = Arc::new(ConsoleReporter::new().with_verbose(verbose));
    let session = Arc::new(Session::new(context, reporter));

    let runner = match standard_runner(&session) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };

    if cli.list_tasks {
        list_tasks(&runner);
        return ExitCode::from(EXIT_SUCCESS);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: cannot start async runtime: {}", e);
            return ExitCode::from(EXIT_ERROR);
        }
    };
    ExitCode::from(runtime.block_on(run_tasks(&cli, session, runner)))
}
