//! Exception policy: how each constraint class is handled when it fires.
//!
//! A policy is an explicit value owned by the writer. There is no
//! process-wide filter state; two writers may run with different policies.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{PolicyError, PolicyResult};
use crate::report::{Diagnostic, DiagnosticLog};
use crate::rules::{ConstraintClass, ConstraintLimits, Violation};

/// How a violation of a constraint class is treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Not reported at all
    #[default]
    Ignored,
    /// Reported, generation continues
    Warn,
    /// Aborts the operation that triggered it
    Error,
}

impl Severity {
    pub fn blocks(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

const DEFAULT_WARN: [ConstraintClass; 6] = [
    ConstraintClass::InactiveCarrierExit,
    ConstraintClass::Float,
    ConstraintClass::StackedLoop,
    ConstraintClass::HeldLoop,
    ConstraintClass::EmptyTransfer,
    ConstraintClass::UnstableLoop,
];

const DEFAULT_ERROR: [ConstraintClass; 3] = [
    ConstraintClass::InactiveCarrier,
    ConstraintClass::UnalignedNeedles,
    ConstraintClass::UnfinishedLoop,
];

/// Mapping of every constraint class to exactly one severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionPolicy {
    severities: BTreeMap<ConstraintClass, Severity>,
}

impl Default for ExceptionPolicy {
    fn default() -> Self {
        let mut severities: BTreeMap<_, _> = ConstraintClass::ALL
            .iter()
            .map(|class| (*class, Severity::Ignored))
            .collect();
        for class in DEFAULT_WARN {
            severities.insert(class, Severity::Warn);
        }
        for class in DEFAULT_ERROR {
            severities.insert(class, Severity::Error);
        }
        Self { severities }
    }
}

impl ExceptionPolicy {
    /// Build a policy from a warn set and an error set.
    ///
    /// Classes named in neither set are ignored. Both sets must be
    /// non-empty and disjoint.
    pub fn configure(warn: &[ConstraintClass], error: &[ConstraintClass]) -> PolicyResult<Self> {
        if warn.is_empty() {
            return Err(PolicyError::InvalidConfiguration(
                "warn set must name at least one constraint class".to_string(),
            ));
        }
        if error.is_empty() {
            return Err(PolicyError::InvalidConfiguration(
                "error set must name at least one constraint class".to_string(),
            ));
        }
        if let Some(class) = warn.iter().find(|class| error.contains(class)) {
            return Err(PolicyError::InvalidConfiguration(format!(
                "constraint class '{}' is in both the warn and the error set",
                class
            )));
        }

        let mut severities: BTreeMap<_, _> = ConstraintClass::ALL
            .iter()
            .map(|class| (*class, Severity::Ignored))
            .collect();
        for class in warn {
            severities.insert(*class, Severity::Warn);
        }
        for class in error {
            severities.insert(*class, Severity::Error);
        }

        Ok(Self { severities })
    }

    /// Severity assigned to a class.
    pub fn severity(&self, class: ConstraintClass) -> Severity {
        self.severities.get(&class).copied().unwrap_or_default()
    }

    /// Classes assigned the given severity, in declaration order.
    pub fn classes_with(&self, severity: Severity) -> Vec<ConstraintClass> {
        ConstraintClass::ALL
            .iter()
            .copied()
            .filter(|class| self.severity(*class) == severity)
            .collect()
    }

    /// Apply the policy to the outcome of one check.
    ///
    /// `None` means the check passed. A warn-grade violation is logged and
    /// recorded; an error-grade one is recorded and returned as an error.
    pub fn enforce(
        &self,
        line: usize,
        violation: Option<Violation>,
        log: &DiagnosticLog,
    ) -> PolicyResult<()> {
        let Some(violation) = violation else {
            return Ok(());
        };

        match self.severity(violation.class) {
            Severity::Ignored => Ok(()),
            Severity::Warn => {
                warn!(line, class = %violation.class, "{}", violation.message);
                log.record(Diagnostic::new(line, Severity::Warn, violation));
                Ok(())
            }
            Severity::Error => {
                error!(line, class = %violation.class, "{}", violation.message);
                log.record(Diagnostic::new(line, Severity::Error, violation.clone()));
                Err(PolicyError::ConstraintViolated { line, violation })
            }
        }
    }
}

/// Serializable diagnostics configuration: policy sets plus thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    /// Classes reported as warnings
    #[serde(default = "default_warn")]
    pub warn: Vec<ConstraintClass>,
    /// Classes that abort generation
    #[serde(default = "default_error")]
    pub error: Vec<ConstraintClass>,
    /// Thresholds for float, stack and held-loop checks
    #[serde(default)]
    pub limits: ConstraintLimits,
}

fn default_warn() -> Vec<ConstraintClass> {
    DEFAULT_WARN.to_vec()
}

fn default_error() -> Vec<ConstraintClass> {
    DEFAULT_ERROR.to_vec()
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            warn: default_warn(),
            error: default_error(),
            limits: ConstraintLimits::default(),
        }
    }
}

impl DiagnosticsConfig {
    pub fn new(warn: Vec<ConstraintClass>, error: Vec<ConstraintClass>) -> Self {
        Self {
            warn,
            error,
            limits: ConstraintLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ConstraintLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Validate the sets and build the policy they describe.
    pub fn policy(&self) -> PolicyResult<ExceptionPolicy> {
        ExceptionPolicy::configure(&self.warn, &self.error)
    }

    /// Load a configuration from a YAML file.
    pub fn from_file(path: &Path) -> PolicyResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> PolicyResult<Self> {
        serde_yaml::from_str(yaml).map_err(PolicyError::from)
    }

    /// Serialize the configuration to YAML.
    pub fn to_yaml(&self) -> PolicyResult<String> {
        serde_yaml::to_string(self).map_err(PolicyError::from)
    }
}
