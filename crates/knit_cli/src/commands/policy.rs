//! Policy command - Print or save the default diagnostics configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use knit_policy::{ConstraintLimits, DiagnosticsConfig};

#[derive(Args)]
pub struct PolicyArgs {
    /// Write the configuration to this file instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum float length
    #[arg(long)]
    max_float: Option<u32>,

    /// Maximum loops stacked on one needle
    #[arg(long)]
    max_stacked_loops: Option<u32>,

    /// Maximum rows a loop may be held
    #[arg(long)]
    max_held_rows: Option<u32>,
}

pub fn execute(args: PolicyArgs) -> Result<()> {
    let yaml = render(&args)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, &yaml)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote diagnostics configuration to {}", path.display());
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn render(args: &PolicyArgs) -> Result<String> {
    let mut limits = ConstraintLimits::default();
    if let Some(max_float) = args.max_float {
        limits = limits.with_max_float(max_float);
    }
    if let Some(max_stacked_loops) = args.max_stacked_loops {
        limits = limits.with_max_stacked_loops(max_stacked_loops);
    }
    if let Some(max_held_rows) = args.max_held_rows {
        limits = limits.with_max_held_rows(max_held_rows);
    }
    Ok(DiagnosticsConfig::default().with_limits(limits).to_yaml()?)
}
