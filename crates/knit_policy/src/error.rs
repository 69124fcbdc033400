//! Error types for the policy module.

use thiserror::Error;

use crate::rules::Violation;

/// Result type alias for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;

/// Errors that can occur while configuring or enforcing a policy.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid diagnostics configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Constraint violated at line {line}: {violation}")]
    ConstraintViolated { line: usize, violation: Violation },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl PolicyError {
    /// The violation behind an error-grade failure, if this is one.
    pub fn violation(&self) -> Option<&Violation> {
        match self {
            PolicyError::ConstraintViolated { violation, .. } => Some(violation),
            _ => None,
        }
    }
}
