//! blart - signal a child process when watched files change

use blart::config::{Args, Settings};
use clap::{CommandFactory, Parser};
use std::fmt::Display;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let settings = match Settings::resolve(&args) {
        Ok(settings) => settings,
        Err(e) => return usage_and_exit(e),
    };

    match blart::supervisor::run(settings).await {
        Ok(reason) => ExitCode::from(reason.exit_code()),
        Err(e) => usage_and_exit(e),
    }
}

/// Report a startup problem together with the usage text.
fn usage_and_exit(problem: impl Display) -> ExitCode {
    println!("!! {problem}");
    let _ = Args::command().print_help();
    println!();
    println!(
        "blart version: {} ({}/{})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    ExitCode::FAILURE
}
