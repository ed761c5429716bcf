use anyhow::Result;
use clap::Parser;
use devpush_core::errors::DevpushError;

mod cli;
mod commands;
mod ui;

/// Exit code for devfile validation and synthesis failures
const EXIT_INVALID_DEVFILE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let parsed = cli::Cli::parse();

    match parsed.dispatch().await {
        Ok(()) => Ok(()),
        Err(err) => {
            // Devfile problems exit with 2, everything else with 1
            if let Some(devpush_error) = err.downcast_ref::<DevpushError>() {
                if matches!(
                    devpush_error,
                    DevpushError::Command(_) | DevpushError::Synthesis(_)
                ) {
                    eprintln!("Error: {}", devpush_error);
                    std::process::exit(EXIT_INVALID_DEVFILE);
                }
            }

            // For all other errors, return them normally
            Err(err)
        }
    }
}
