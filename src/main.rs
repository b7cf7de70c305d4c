use std::process::ExitCode;

use clap::Parser;
use nestegg::api::{self, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match api::run(&cli) {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::warn!(kind = err.kind(), "request failed");
            println!("{}", api::error_document(&err));
            ExitCode::from(api::exit_code(&err))
        }
    }
}
