//! Main entry point for the blobtier CLI app

use blobtier::cli_runner::{self, Completion};
use tracing_subscriber::EnvFilter;

fn main() -> std::process::ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    match cli_runner::run_cli_app() {
        Ok(Completion::Clean) => std::process::ExitCode::SUCCESS,
        Ok(Completion::Partial) => std::process::ExitCode::from(2),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::ExitCode::FAILURE
        }
    }
}
