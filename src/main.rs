use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tranche::cli;

fn main() -> ExitCode {
    match cli::dispatch(cli::Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            // Logging may not be up yet if config loading failed.
            error!("{err:#}");
            eprintln!("tranche: {err:#}");
            ExitCode::FAILURE
        }
    }
}
