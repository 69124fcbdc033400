//! Error types for the core module.

use thiserror::Error;

use knit_policy::{Diagnostic, PolicyError, Violation};

/// Result type alias for core operations.
pub type KnitResult<T> = Result<T, KnitError>;

/// Errors that can occur while emitting Knitout.
#[derive(Error, Debug)]
pub enum KnitError {
    #[error("Carrier '{0}' was not declared for this writer")]
    UnknownCarrier(String),

    #[error("No carriers specified for '{0}'")]
    NoCarriers(String),

    #[error("Invalid bed-needle '{0}': expected f, b, fs or bs followed by a needle index")]
    InvalidBedNeedle(String),

    #[error("Invalid direction '{0}': expected '+' or '-'")]
    InvalidDirection(String),

    #[error("Unknown machine profile '{0}'")]
    UnknownMachine(String),

    #[error("Invalid rack value: {0}")]
    InvalidRack(f64),

    #[error("Invalid operation at line {line}: {message}")]
    InvalidOperation { line: usize, message: String },

    #[error("Attempting to '{op}' carrier '{carrier}', which is already in")]
    DuplicateCarrier { carrier: String, op: String },

    #[error("Carrier '{0}' is not in")]
    InactiveCarrier(String),

    #[error("Can't {op} carrier(s) '{carriers}' since the hook is still holding another yarn")]
    HookHeld { op: String, carriers: String },

    #[error("Can't releasehook carrier(s) '{0}' since the hook is not holding yarn")]
    HookNotHeld(String),

    #[error("Machine '{0}' has no yarn-inserting hook")]
    HookUnsupported(String),

    #[error(
        "{} error-grade violation(s) found during deferred validation, first at line {}",
        .diagnostics.len(),
        .diagnostics.first().map(|d| d.line).unwrap_or_default()
    )]
    DeferredViolations { diagnostics: Vec<Diagnostic> },

    #[error("Validation worker failed: {0}")]
    Worker(String),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KnitError {
    /// The constraint violation behind an error-grade failure, if any.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            KnitError::Policy(err) => err.violation(),
            KnitError::DeferredViolations { diagnostics } => {
                diagnostics.first().map(|d| &d.violation)
            }
            _ => None,
        }
    }
}
