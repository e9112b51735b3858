//! Command-line entry point: argument parsing, wiring, and console output.

mod app;
pub mod output;

pub use app::{run_cli, CliArgs};
