//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod check;
pub mod policy;

/// knitgen - Knitout validation tools
#[derive(Parser)]
#[command(name = "knit")]
#[command(version, about = "knitgen - Knitout validation tools")]
#[command(long_about = r#"
knitgen replays Knitout files against a simulated knitting machine and
reports physically risky or impossible operations.

COMMANDS:
  check   → Replay a .k file and report diagnostics
  policy  → Print the default diagnostics configuration as YAML

EXIT CODES:
  0 - Success
  1 - General error
  2 - Invalid arguments or malformed input
  3 - Validation failure
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Replay a Knitout file and report constraint violations
    Check(check::CheckArgs),

    /// Print or save the default diagnostics configuration
    Policy(policy::PolicyArgs),
}
