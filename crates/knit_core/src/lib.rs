//! # knit_core
//!
//! Knitout emission engine for knitgen.
//!
//! This crate simulates the state of a V-bed knitting machine while it
//! writes Knitout, and checks every operation against the physical
//! constraints of the machine before emitting it.
//!
//! # Architecture
//!
//! - **Registry**: loops held on each needle, keyed by bed and index
//! - **Carriers**: which yarn carriers are in, and where they last were
//! - **Checks**: constraint checks captured as owned snapshots
//! - **Log**: headers and operation lines, serialized in order
//! - **Worker**: optional background thread that evaluates checks
//! - **Writer**: the public surface tying the pieces together
//!
//! # Example
//!
//! ```rust
//! use knit_core::KnitoutWriter;
//!
//! let mut k = KnitoutWriter::new(&["1"]).unwrap();
//! k.inhook(&["1"]).unwrap();
//! k.tuck("+", "f0", &["1"]).unwrap();
//! k.tuck("-", "f1", &["1"]).unwrap();
//! k.releasehook(&["1"]).unwrap();
//! k.knit("+", "f0", &["1"]).unwrap();
//! k.knit("-", "f1", &["1"]).unwrap();
//! k.drop("f0").unwrap();
//! k.drop("f1").unwrap();
//! k.outhook(&["1"]).unwrap();
//!
//! let text = k.finalize().unwrap();
//! assert!(text.starts_with(";!knitout-2\n"));
//! assert!(k.diagnostics().errors().is_empty());
//! ```

pub mod carrier;
pub mod checks;
pub mod error;
pub mod log;
pub mod machine;
pub mod needle;
pub mod operation;
pub mod registry;
pub mod worker;
pub mod writer;

pub use carrier::{CarrierRecord, CarrierState, Motion};
pub use checks::Check;
pub use error::{KnitError, KnitResult};
pub use log::{OperationLog, KNITOUT_VERSION};
pub use machine::MachineProfile;
pub use needle::{Bed, BedNeedle, Direction, IntoBedNeedle, IntoDirection};
pub use operation::{format_rack, parse_program, Operation, Program};
pub use registry::{NeedleEntry, NeedleRegistry};
pub use worker::{ValidationWorker, WorkerReport};
pub use writer::{KnitoutWriter, ValidationMode, WriterConfig};

pub use knit_policy::{
    ConstraintClass, ConstraintLimits, Diagnostic, DiagnosticLog, DiagnosticsConfig,
    ExceptionPolicy, Severity,
};
