use std::process::ExitCode;

use clap::Parser;
use manifest_builder::cli::{output, run_cli, CliArgs};
use manifest_builder::wizard::RunOutcome;

#[tokio::main]
async fn main() -> ExitCode {
    manifest_builder::init();
    let args = CliArgs::parse();
    match run_cli(args).await {
        Ok(RunOutcome::Failed) => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            output::error(format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
