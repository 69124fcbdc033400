//! knitgen CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Invalid arguments or malformed input
//! - 3: Validation failure

use std::process::ExitCode;

use clap::Parser;
use knit_core::KnitError;
use knit_policy::PolicyError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::check::CheckFailed;
use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_directive = if cli.verbose { "knit=debug,info" } else { "knit=info,warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let log_result = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();

    if log_result.is_err() {
        // Logging already initialized, continue
    }

    let result = match cli.command {
        Commands::Check(args) => commands::check::execute(args),
        Commands::Policy(args) => commands::policy::execute(args),
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    if e.downcast_ref::<CheckFailed>().is_some() {
        return ExitCodes::VALIDATION_FAILURE;
    }
    if let Some(err) = e.downcast_ref::<KnitError>() {
        return match err {
            KnitError::DeferredViolations { .. } => ExitCodes::VALIDATION_FAILURE,
            KnitError::Policy(PolicyError::ConstraintViolated { .. }) => {
                ExitCodes::VALIDATION_FAILURE
            }
            KnitError::Io(_) | KnitError::Worker(_) => ExitCodes::GENERAL_ERROR,
            _ => ExitCodes::INVALID_ARGS,
        };
    }
    match e.downcast_ref::<PolicyError>() {
        Some(PolicyError::InvalidConfiguration(_)) | Some(PolicyError::Yaml(_)) => {
            ExitCodes::INVALID_ARGS
        }
        Some(PolicyError::ConstraintViolated { .. }) => ExitCodes::VALIDATION_FAILURE,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
