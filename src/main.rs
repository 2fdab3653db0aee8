//! aflow - compile, lint, serve and package a static site

use std::process::ExitCode;

use assetflow::cli;

fn main() -> ExitCode {
    cli::run()
}
