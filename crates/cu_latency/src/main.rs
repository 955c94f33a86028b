//! Measures the latency, in device clock cycles, of `A0[start] += A1[0]` executed by the
//! leader thread of the execution group placed on one chosen compute unit.
//!
//! Samples are printed to stdout by the kernel itself, one per line. Diagnostics go to stderr
//! and are controlled by the `CU_LATENCY_LOG` environment variable.

#[cfg(not(any(feature = "cuda", feature = "rocm")))]
compile_error!("enable at least one of the `cuda` and `rocm` features");

mod cli;
#[cfg(feature = "cuda")]
mod cuda;
mod error;
#[cfg(feature = "rocm")]
mod rocm;
mod run;

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::error::DeviceFailure;

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = cli.config().unwrap_or_else(|e| e.exit());
    let result = run::run(&config);
    if let Err(failure) = &result {
        error!(api = %failure.api(), "run aborted");
        println!("{failure}");
    }
    ExitCode::from(exit_status(&result, cli.exit_zero_on_failure))
}

/// Process status for a finished run: 1 on a device failure unless `exit_zero_on_failure`.
fn exit_status(result: &Result<(), DeviceFailure>, exit_zero_on_failure: bool) -> u8 {
    match result {
        Ok(()) => 0,
        Err(_) if exit_zero_on_failure => 0,
        Err(_) => 1,
    }
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env("CU_LATENCY_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
