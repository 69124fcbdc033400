//! Constraint classes, thresholds and violations.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A class of physical-machine constraint the writer checks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintClass {
    /// A carrier used by knit/tuck/miss/split before it was brought in
    InactiveCarrier,
    /// A carrier taken out or released while not in
    InactiveCarrierExit,
    /// Transfer between needles that are not aligned at the current rack
    UnalignedNeedles,
    /// Carrier moved further than the float limit since its last needle
    Float,
    /// Too many loops stacked on one needle
    StackedLoop,
    /// A loop left unknit for too many rows
    HeldLoop,
    /// A held loop still on the bed when the file is finalized
    UnfinishedLoop,
    /// Transfer or split from a needle without loops
    EmptyTransfer,
    /// Knit on a needle that does not hold a loop yet
    UnstableLoop,
}

impl ConstraintClass {
    /// All classes, in declaration order.
    pub const ALL: [ConstraintClass; 9] = [
        ConstraintClass::InactiveCarrier,
        ConstraintClass::InactiveCarrierExit,
        ConstraintClass::UnalignedNeedles,
        ConstraintClass::Float,
        ConstraintClass::StackedLoop,
        ConstraintClass::HeldLoop,
        ConstraintClass::UnfinishedLoop,
        ConstraintClass::EmptyTransfer,
        ConstraintClass::UnstableLoop,
    ];

    /// Stable snake_case identifier, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintClass::InactiveCarrier => "inactive_carrier",
            ConstraintClass::InactiveCarrierExit => "inactive_carrier_exit",
            ConstraintClass::UnalignedNeedles => "unaligned_needles",
            ConstraintClass::Float => "float",
            ConstraintClass::StackedLoop => "stacked_loop",
            ConstraintClass::HeldLoop => "held_loop",
            ConstraintClass::UnfinishedLoop => "unfinished_loop",
            ConstraintClass::EmptyTransfer => "empty_transfer",
            ConstraintClass::UnstableLoop => "unstable_loop",
        }
    }
}

impl fmt::Display for ConstraintClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numeric thresholds for the magnitude-based checks.
///
/// The defaults were tuned on a Shima Seiki SWGN2 and are not physical
/// constants of every machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintLimits {
    /// Longest carrier jump, in needles, before a float is reported
    #[serde(default = "default_max_float")]
    pub max_float: u32,
    /// Most loops a needle may hold after a tuck or transfer
    #[serde(default = "default_max_stacked_loops")]
    pub max_stacked_loops: u32,
    /// Most rows a loop may be held unknit
    #[serde(default = "default_max_held_rows")]
    pub max_held_rows: u32,
}

fn default_max_float() -> u32 {
    6
}

fn default_max_stacked_loops() -> u32 {
    2
}

fn default_max_held_rows() -> u32 {
    10
}

impl Default for ConstraintLimits {
    fn default() -> Self {
        Self {
            max_float: default_max_float(),
            max_stacked_loops: default_max_stacked_loops(),
            max_held_rows: default_max_held_rows(),
        }
    }
}

impl ConstraintLimits {
    pub fn with_max_float(mut self, max_float: u32) -> Self {
        self.max_float = max_float;
        self
    }

    pub fn with_max_stacked_loops(mut self, max_stacked_loops: u32) -> Self {
        self.max_stacked_loops = max_stacked_loops;
        self
    }

    pub fn with_max_held_rows(mut self, max_held_rows: u32) -> Self {
        self.max_held_rows = max_held_rows;
        self
    }
}

/// A single failed constraint check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Violation {
    /// Class of the failed check
    pub class: ConstraintClass,
    /// Offending needle(s) or carrier, e.g. `f5` or `carrier 3`
    pub subject: String,
    /// Human-readable description
    pub message: String,
    /// Float length, stack count or held-row count, where meaningful
    #[serde(default)]
    pub magnitude: Option<i64>,
}

impl Violation {
    pub fn new(
        class: ConstraintClass,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            subject: subject.into(),
            message: message.into(),
            magnitude: None,
        }
    }

    pub fn with_magnitude(mut self, magnitude: i64) -> Self {
        self.magnitude = Some(magnitude);
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.class, self.message)
    }
}
