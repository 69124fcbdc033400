//! Diagnostics recorded during generation and the report built from them.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::policy::Severity;
use crate::rules::{ConstraintClass, Violation};

/// A violation tagged with the operation line that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    /// 1-based operation line number
    pub line: usize,
    pub severity: Severity,
    pub violation: Violation,
}

impl Diagnostic {
    pub fn new(line: usize, severity: Severity, violation: Violation) -> Self {
        Self {
            line,
            severity,
            violation,
        }
    }

    pub fn class(&self) -> ConstraintClass {
        self.violation.class
    }
}

/// Summary counts over a set of diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiagnosticSummary {
    pub total: usize,
    pub warnings: usize,
    pub errors: usize,
}

/// Shared, append-only store of diagnostics.
///
/// Cloning yields another handle to the same store, so the writer and its
/// validation worker can record into one log.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticLog {
    entries: Arc<Mutex<Vec<Diagnostic>>>,
}

impl DiagnosticLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn record(&self, diagnostic: Diagnostic) {
        self.lock().push(diagnostic);
    }

    /// Copy of every diagnostic recorded so far, in recording order.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.lock()
            .iter()
            .filter(|d| d.severity == Severity::Warn)
            .cloned()
            .collect()
    }

    pub fn errors(&self) -> Vec<Diagnostic> {
        self.lock()
            .iter()
            .filter(|d| d.severity.blocks())
            .cloned()
            .collect()
    }

    /// Diagnostics of one constraint class.
    pub fn of_class(&self, class: ConstraintClass) -> Vec<Diagnostic> {
        self.lock()
            .iter()
            .filter(|d| d.class() == class)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn summary(&self) -> DiagnosticSummary {
        let entries = self.lock();
        let errors = entries.iter().filter(|d| d.severity.blocks()).count();
        DiagnosticSummary {
            total: entries.len(),
            warnings: entries.len() - errors,
            errors,
        }
    }

    /// Human-readable report, one diagnostic per line, sorted by line.
    pub fn report(&self) -> String {
        let mut entries = self.snapshot();
        entries.sort_by_key(|d| d.line);

        let mut report = String::new();
        for d in &entries {
            let marker = if d.severity.blocks() { "error" } else { "warning" };
            report.push_str(&format!(
                "line {:>5}  {:<7}  {}\n",
                d.line, marker, d.violation
            ));
        }

        let summary = self.summary();
        report.push_str(&format!(
            "{} diagnostic(s): {} warning(s), {} error(s)\n",
            summary.total, summary.warnings, summary.errors
        ));
        report
    }
}
