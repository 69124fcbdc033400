//! # knit_policy
//!
//! Exception policy and diagnostics for knitgen.
//!
//! Every physical constraint the Knitout writer simulates belongs to a
//! [`ConstraintClass`]. An [`ExceptionPolicy`] maps each class to a
//! [`Severity`]: error-grade violations abort generation, warn-grade
//! violations are recorded in a [`DiagnosticLog`] and generation continues,
//! ignored classes produce no output at all.
//!
//! ## Example
//!
//! ```rust
//! use knit_policy::{ConstraintClass, DiagnosticLog, ExceptionPolicy, Violation};
//!
//! let policy = ExceptionPolicy::configure(
//!     &[ConstraintClass::Float, ConstraintClass::StackedLoop],
//!     &[ConstraintClass::UnalignedNeedles],
//! )
//! .unwrap();
//!
//! let log = DiagnosticLog::new();
//! let float = Violation::new(ConstraintClass::Float, "carrier 3", "float of length 9")
//!     .with_magnitude(9);
//! policy.enforce(12, Some(float), &log).unwrap();
//! assert_eq!(log.warnings().len(), 1);
//! ```

pub mod error;
pub mod policy;
pub mod report;
pub mod rules;

pub use error::{PolicyError, PolicyResult};
pub use policy::{DiagnosticsConfig, ExceptionPolicy, Severity};
pub use report::{Diagnostic, DiagnosticLog, DiagnosticSummary};
pub use rules::{ConstraintClass, ConstraintLimits, Violation};
