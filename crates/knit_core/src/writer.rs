//! Knitout writer.
//!
//! [`KnitoutWriter`] is the surface pattern generators drive: one method
//! per Knitout verb plus the queries generators use to sequence their
//! passes. Every operation is checked against the machine state before
//! anything changes, so an error-grade violation leaves the writer exactly
//! as it was.

use std::fs;
use std::path::Path;

use knit_policy::{
    ConstraintClass, ConstraintLimits, Diagnostic, DiagnosticLog, DiagnosticsConfig,
    ExceptionPolicy, Violation,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::carrier::{CarrierRecord, CarrierState};
use crate::checks::Check;
use crate::error::{KnitError, KnitResult};
use crate::log::OperationLog;
use crate::machine::MachineProfile;
use crate::needle::{Bed, BedNeedle, Direction, IntoBedNeedle, IntoDirection};
use crate::operation::Operation;
use crate::registry::{NeedleEntry, NeedleRegistry};
use crate::worker::ValidationWorker;

/// When constraint checks are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    /// Each operation is checked before it returns
    #[default]
    Immediate,
    /// Checks run on a background worker and are collected at finalize
    Deferred,
}

/// Writer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriterConfig {
    #[serde(default)]
    pub machine: MachineProfile,
    /// Needles per inch, written to the `;;Gauge:` header when set
    #[serde(default)]
    pub gauge: Option<u32>,
    #[serde(default)]
    pub validation: ValidationMode,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    /// Take out every carrier still in when finalizing
    #[serde(default)]
    pub auto_outhook: bool,
}

impl WriterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_machine(mut self, machine: MachineProfile) -> Self {
        self.machine = machine;
        self
    }

    pub fn with_gauge(mut self, gauge: u32) -> Self {
        self.gauge = Some(gauge);
        self
    }

    pub fn with_validation(mut self, validation: ValidationMode) -> Self {
        self.validation = validation;
        self
    }

    /// Shorthand for [`ValidationMode::Deferred`].
    pub fn deferred(self) -> Self {
        self.with_validation(ValidationMode::Deferred)
    }

    pub fn with_diagnostics(mut self, diagnostics: DiagnosticsConfig) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn with_auto_outhook(mut self, auto_outhook: bool) -> Self {
        self.auto_outhook = auto_outhook;
        self
    }
}

/// Emits Knitout while simulating needle and carrier state.
pub struct KnitoutWriter {
    config: WriterConfig,
    declared: Vec<String>,
    policy: ExceptionPolicy,
    limits: ConstraintLimits,
    registry: NeedleRegistry,
    carriers: CarrierState,
    log: OperationLog,
    diagnostics: DiagnosticLog,
    rack: f64,
    hook_held: bool,
    passes: u32,
    worker: Option<ValidationWorker>,
    /// Error-grade violations drained from the worker, kept until `clear`
    failures: Vec<Diagnostic>,
    /// Line count the end-of-file checks last ran at
    end_checked: Option<usize>,
}

impl KnitoutWriter {
    /// Create a writer for the given carriers with the default configuration.
    pub fn new<S: AsRef<str>>(carriers: &[S]) -> KnitResult<Self> {
        Self::with_config(carriers, WriterConfig::default())
    }

    /// Create a writer for the given carriers.
    ///
    /// Operations naming a carrier outside this set fail with
    /// [`KnitError::UnknownCarrier`].
    pub fn with_config<S: AsRef<str>>(carriers: &[S], config: WriterConfig) -> KnitResult<Self> {
        if carriers.is_empty() {
            return Err(KnitError::NoCarriers("writer".to_string()));
        }
        let mut declared: Vec<String> = Vec::with_capacity(carriers.len());
        for carrier in carriers {
            let carrier = carrier.as_ref().trim();
            if carrier.is_empty() || carrier.contains(char::is_whitespace) {
                return Err(KnitError::UnknownCarrier(carrier.to_string()));
            }
            if !declared.iter().any(|c| c == carrier) {
                declared.push(carrier.to_string());
            }
        }

        let policy = config.diagnostics.policy()?;
        let limits = config.diagnostics.limits;
        let diagnostics = DiagnosticLog::new();
        let worker = match config.validation {
            ValidationMode::Immediate => None,
            ValidationMode::Deferred => Some(ValidationWorker::spawn(
                policy.clone(),
                limits,
                diagnostics.clone(),
            )?),
        };

        let mut log = OperationLog::new();
        log.append_header("Machine", config.machine.name.clone());
        if let Some(gauge) = config.gauge {
            log.append_header("Gauge", gauge.to_string());
        }
        log.append_header("Carriers", declared.join(" "));

        debug!(
            machine = %config.machine,
            carriers = declared.len(),
            validation = ?config.validation,
            "Created knitout writer"
        );

        Ok(Self {
            config,
            declared,
            policy,
            limits,
            registry: NeedleRegistry::new(),
            carriers: CarrierState::new(),
            log,
            diagnostics,
            rack: 0.0,
            hook_held: false,
            passes: 0,
            worker,
            failures: Vec::new(),
            end_checked: None,
        })
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn resolve_carriers<S: AsRef<str>>(&self, op: &str, carriers: &[S]) -> KnitResult<Vec<String>> {
        if carriers.is_empty() {
            return Err(KnitError::NoCarriers(op.to_string()));
        }
        self.known_carriers(carriers)
    }

    fn known_carriers<S: AsRef<str>>(&self, carriers: &[S]) -> KnitResult<Vec<String>> {
        carriers
            .iter()
            .map(|c| {
                let c = c.as_ref().trim();
                if self.declared.iter().any(|d| d == c) {
                    Ok(c.to_string())
                } else {
                    Err(KnitError::UnknownCarrier(c.to_string()))
                }
            })
            .collect()
    }

    fn ensure_inactive(&self, op: &str, carriers: &[String]) -> KnitResult<()> {
        for (i, carrier) in carriers.iter().enumerate() {
            if self.carriers.is_active(carrier) || carriers[..i].contains(carrier) {
                return Err(KnitError::DuplicateCarrier {
                    carrier: carrier.clone(),
                    op: op.to_string(),
                });
            }
        }
        Ok(())
    }

    fn ensure_hook(&self) -> KnitResult<()> {
        if self.config.machine.has_hook {
            Ok(())
        } else {
            Err(KnitError::HookUnsupported(self.config.machine.name.clone()))
        }
    }

    fn carrier_checks(&self, op: &'static str, carriers: &[String], needle: i32) -> Vec<Check> {
        carriers
            .iter()
            .flat_map(|c| {
                [
                    Check::float(&self.carriers, c, needle),
                    Check::inactive_carrier(&self.carriers, c, op),
                ]
            })
            .collect()
    }

    fn exit_checks(&self, op: &'static str, carriers: &[String]) -> Vec<Check> {
        carriers
            .iter()
            .map(|c| Check::inactive_carrier_exit(&self.carriers, c, op))
            .collect()
    }

    /// Evaluate or queue the checks for the operation about to be emitted.
    fn validate(&self, checks: Vec<Check>) -> KnitResult<()> {
        self.validate_at(self.log.next_line(), checks)
    }

    fn validate_at(&self, line: usize, checks: Vec<Check>) -> KnitResult<()> {
        match &self.worker {
            Some(worker) => {
                for check in checks {
                    worker.submit(line, check)?;
                }
            }
            None => {
                let violations: Vec<Violation> = checks
                    .iter()
                    .filter_map(|check| check.evaluate(&self.limits))
                    .collect();
                // an operation that fails leaves no warnings behind
                if let Some(fatal) = violations
                    .iter()
                    .find(|v| self.policy.severity(v.class).blocks())
                {
                    self.policy
                        .enforce(line, Some(fatal.clone()), &self.diagnostics)?;
                }
                for violation in violations {
                    self.policy.enforce(line, Some(violation), &self.diagnostics)?;
                }
            }
        }
        Ok(())
    }

    fn move_carriers(&mut self, carriers: &[String], direction: Direction, needle: BedNeedle) {
        let mut reversed = false;
        for carrier in carriers {
            reversed |= self.carriers.record_motion(carrier, direction, needle).reversed;
        }
        if reversed {
            self.passes += 1;
        }
    }

    fn emit(&mut self, op: Operation) -> usize {
        let text = op.to_string();
        debug!(line = self.log.next_line(), op = %text, "emit");
        self.log.append_operation(text)
    }

    // ---------------------------------------------------------------------
    // Carrier operations
    // ---------------------------------------------------------------------

    /// Bring carriers in.
    pub fn in_carriers<S: AsRef<str>>(&mut self, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.resolve_carriers("in", carriers)?;
        self.ensure_inactive("in", &carriers)?;
        for carrier in &carriers {
            self.carriers.activate(carrier, "in")?;
        }
        self.emit(Operation::In(carriers));
        Ok(())
    }

    /// Bring carriers in on the yarn-inserting hook.
    pub fn inhook<S: AsRef<str>>(&mut self, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.resolve_carriers("inhook", carriers)?;
        self.ensure_hook()?;
        self.ensure_inactive("inhook", &carriers)?;
        if self.hook_held {
            return Err(KnitError::HookHeld {
                op: "inhook".to_string(),
                carriers: carriers.join(" "),
            });
        }
        for carrier in &carriers {
            self.carriers.activate(carrier, "inhook")?;
        }
        self.hook_held = true;
        self.emit(Operation::InHook(carriers));
        Ok(())
    }

    /// Release the yarn held by the hook.
    pub fn releasehook<S: AsRef<str>>(&mut self, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.resolve_carriers("releasehook", carriers)?;
        self.ensure_hook()?;
        if !self.hook_held {
            return Err(KnitError::HookNotHeld(carriers.join(" ")));
        }
        self.validate(self.exit_checks("releasehook", &carriers))?;
        self.hook_held = false;
        self.emit(Operation::ReleaseHook(carriers));
        Ok(())
    }

    /// Take carriers out on the hook.
    pub fn outhook<S: AsRef<str>>(&mut self, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.resolve_carriers("outhook", carriers)?;
        self.ensure_hook()?;
        if self.hook_held {
            return Err(KnitError::HookHeld {
                op: "outhook".to_string(),
                carriers: carriers.join(" "),
            });
        }
        self.take_out("outhook", &carriers)?;
        self.emit(Operation::OutHook(carriers));
        Ok(())
    }

    /// Take carriers out.
    pub fn out_carriers<S: AsRef<str>>(&mut self, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.resolve_carriers("out", carriers)?;
        self.take_out("out", &carriers)?;
        self.emit(Operation::Out(carriers));
        Ok(())
    }

    fn take_out(&mut self, op: &'static str, carriers: &[String]) -> KnitResult<()> {
        self.validate(self.exit_checks(op, carriers))?;
        for carrier in carriers {
            if self.carriers.is_active(carrier) {
                self.carriers.deactivate(carrier)?;
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Needle operations
    // ---------------------------------------------------------------------

    /// Knit through the loops on `needle`.
    pub fn knit<D, N, S>(&mut self, direction: D, needle: N, carriers: &[S]) -> KnitResult<()>
    where
        D: IntoDirection,
        N: IntoBedNeedle,
        S: AsRef<str>,
    {
        let direction = direction.into_direction()?;
        let needle = needle.into_bed_needle()?;
        let carriers = self.resolve_carriers("knit", carriers)?;

        let mut checks = self.carrier_checks("knit", &carriers, needle.needle);
        checks.push(Check::held_loop(&self.registry, needle));
        checks.push(Check::unstable_loop(&self.registry, needle));
        self.validate(checks)?;

        self.move_carriers(&carriers, direction, needle);
        self.registry.increment(needle, false);
        self.emit(Operation::Knit {
            direction,
            needle,
            carriers,
        });
        Ok(())
    }

    /// Tuck a new loop onto `needle`.
    pub fn tuck<D, N, S>(&mut self, direction: D, needle: N, carriers: &[S]) -> KnitResult<()>
    where
        D: IntoDirection,
        N: IntoBedNeedle,
        S: AsRef<str>,
    {
        let direction = direction.into_direction()?;
        let needle = needle.into_bed_needle()?;
        let carriers = self.resolve_carriers("tuck", carriers)?;

        let mut checks = self.carrier_checks("tuck", &carriers, needle.needle);
        checks.push(Check::held_loop(&self.registry, needle));
        checks.push(Check::stacked_after_tuck(&self.registry, needle));
        self.validate(checks)?;

        self.move_carriers(&carriers, direction, needle);
        self.registry.increment(needle, true);
        self.emit(Operation::Tuck {
            direction,
            needle,
            carriers,
        });
        Ok(())
    }

    /// Move carriers past `needle` without forming a loop.
    pub fn miss<D, N, S>(&mut self, direction: D, needle: N, carriers: &[S]) -> KnitResult<()>
    where
        D: IntoDirection,
        N: IntoBedNeedle,
        S: AsRef<str>,
    {
        let direction = direction.into_direction()?;
        let needle = needle.into_bed_needle()?;
        let carriers = self.resolve_carriers("miss", carriers)?;

        let checks = carriers
            .iter()
            .map(|c| Check::inactive_carrier(&self.carriers, c, "miss"))
            .collect();
        self.validate(checks)?;

        self.move_carriers(&carriers, direction, needle);
        self.emit(Operation::Miss {
            direction,
            needle,
            carriers,
        });
        Ok(())
    }

    /// Transfer the loops on `from` to `to`.
    pub fn xfer<F, T>(&mut self, from: F, to: T) -> KnitResult<()>
    where
        F: IntoBedNeedle,
        T: IntoBedNeedle,
    {
        let from = from.into_bed_needle()?;
        let to = to.into_bed_needle()?;

        let checks = vec![
            Check::unaligned_needles(from, to, self.rack),
            Check::empty_transfer(&self.registry, from),
            Check::stacked_after_transfer(&self.registry, from, to),
        ];
        self.validate(checks)?;

        self.registry.transfer(from, to, false);
        self.emit(Operation::Xfer { from, to });
        Ok(())
    }

    /// Knit a new loop on `from` while moving the old one to `to`.
    pub fn split<D, F, T, S>(&mut self, direction: D, from: F, to: T, carriers: &[S]) -> KnitResult<()>
    where
        D: IntoDirection,
        F: IntoBedNeedle,
        T: IntoBedNeedle,
        S: AsRef<str>,
    {
        let direction = direction.into_direction()?;
        let from = from.into_bed_needle()?;
        let to = to.into_bed_needle()?;
        let carriers = self.resolve_carriers("split", carriers)?;

        let mut checks = vec![
            Check::unaligned_needles(from, to, self.rack),
            Check::empty_transfer(&self.registry, from),
        ];
        checks.extend(self.carrier_checks("split", &carriers, from.needle));
        checks.push(Check::held_loop(&self.registry, from));
        checks.push(Check::stacked_after_transfer(&self.registry, from, to));
        self.validate(checks)?;

        self.move_carriers(&carriers, direction, from);
        self.registry.transfer(from, to, true);
        self.emit(Operation::Split {
            direction,
            from,
            to,
            carriers,
        });
        Ok(())
    }

    /// Drop the loops on `needle`.
    pub fn drop<N: IntoBedNeedle>(&mut self, needle: N) -> KnitResult<()> {
        let needle = needle.into_bed_needle()?;
        self.validate(vec![Check::held_loop(&self.registry, needle)])?;

        self.registry.remove(needle);
        self.emit(Operation::Drop(needle));
        Ok(())
    }

    /// Set the rack. Setting the current value emits nothing.
    pub fn rack(&mut self, rack: f64) -> KnitResult<()> {
        if !rack.is_finite() {
            return Err(KnitError::InvalidRack(rack));
        }
        if rack == self.rack {
            debug!(rack, "rack unchanged");
            return Ok(());
        }
        self.rack = rack;
        self.emit(Operation::Rack(rack));
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Extensions
    // ---------------------------------------------------------------------

    /// Emit a comment line per line of `text`.
    pub fn comment(&mut self, text: &str) {
        for line in text.lines() {
            self.emit(Operation::Comment(line.to_string()));
        }
    }

    pub fn stitch_number(&mut self, stitch_number: u32) {
        self.emit(Operation::StitchNumber(stitch_number));
    }

    /// Set the visualizer color of carriers; a missing `#` is added.
    pub fn vis_color<S: AsRef<str>>(&mut self, hex: &str, carriers: &[S]) -> KnitResult<()> {
        let carriers = self.known_carriers(carriers)?;
        let color = if hex.starts_with('#') {
            hex.to_string()
        } else {
            format!("#{hex}")
        };
        self.emit(Operation::VisColor { color, carriers });
        Ok(())
    }

    pub fn pause(&mut self) {
        self.emit(Operation::Pause);
    }

    /// Add a header, or replace an existing one in place.
    pub fn add_header(&mut self, key: &str, value: &str) {
        self.log.append_header(key, value);
    }

    /// Replay a parsed operation through the matching method.
    pub fn apply(&mut self, op: &Operation) -> KnitResult<()> {
        match op {
            Operation::In(cs) => self.in_carriers(cs),
            Operation::InHook(cs) => self.inhook(cs),
            Operation::ReleaseHook(cs) => self.releasehook(cs),
            Operation::Out(cs) => self.out_carriers(cs),
            Operation::OutHook(cs) => self.outhook(cs),
            Operation::Knit {
                direction,
                needle,
                carriers,
            } => self.knit(*direction, *needle, carriers),
            Operation::Tuck {
                direction,
                needle,
                carriers,
            } => self.tuck(*direction, *needle, carriers),
            Operation::Miss {
                direction,
                needle,
                carriers,
            } => self.miss(*direction, *needle, carriers),
            Operation::Split {
                direction,
                from,
                to,
                carriers,
            } => self.split(*direction, *from, *to, carriers),
            Operation::Xfer { from, to } => self.xfer(*from, *to),
            Operation::Drop(needle) => self.drop(*needle),
            Operation::Rack(rack) => self.rack(*rack),
            Operation::Pause => {
                self.pause();
                Ok(())
            }
            Operation::StitchNumber(n) => {
                self.stitch_number(*n);
                Ok(())
            }
            Operation::VisColor { color, carriers } => self.vis_color(color, carriers),
            Operation::Comment(text) => {
                self.emit(Operation::Comment(text.clone()));
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------------
    // Policy
    // ---------------------------------------------------------------------

    /// Reclassify constraint classes. Classes in neither set are ignored.
    pub fn configure_diagnostics(
        &mut self,
        warn: &[ConstraintClass],
        error: &[ConstraintClass],
    ) -> KnitResult<()> {
        let policy = ExceptionPolicy::configure(warn, error)?;
        self.set_policy(policy, self.limits)
    }

    pub fn set_limits(&mut self, limits: ConstraintLimits) -> KnitResult<()> {
        self.set_policy(self.policy.clone(), limits)
    }

    /// Apply a full diagnostics configuration.
    pub fn set_diagnostics(&mut self, config: &DiagnosticsConfig) -> KnitResult<()> {
        self.set_policy(config.policy()?, config.limits)
    }

    fn set_policy(&mut self, policy: ExceptionPolicy, limits: ConstraintLimits) -> KnitResult<()> {
        if let Some(worker) = &self.worker {
            worker.reconfigure(policy.clone(), limits)?;
        }
        debug!(
            warn = ?policy.classes_with(knit_policy::Severity::Warn),
            error = ?policy.classes_with(knit_policy::Severity::Error),
            "Diagnostics reconfigured"
        );
        self.policy = policy;
        self.limits = limits;
        self.end_checked = None;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    pub fn row_count(&self) -> u32 {
        self.registry.row_count()
    }

    /// Number of carrier direction reversals so far.
    pub fn pass_count(&self) -> u32 {
        self.passes
    }

    pub fn rack_value(&self) -> f64 {
        self.rack
    }

    pub fn min_needle(&self, bed: Option<Bed>) -> Option<i32> {
        self.registry.min_needle(bed)
    }

    pub fn max_needle(&self, bed: Option<Bed>) -> Option<i32> {
        self.registry.max_needle(bed)
    }

    fn entry<N: IntoBedNeedle>(&self, needle: N) -> KnitResult<Option<&NeedleEntry>> {
        Ok(self.registry.get(needle.into_bed_needle()?))
    }

    /// Whether `needle` holds at least one loop.
    pub fn is_occupied<N: IntoBedNeedle>(&self, needle: N) -> KnitResult<bool> {
        Ok(self.entry(needle)?.is_some())
    }

    pub fn loop_count<N: IntoBedNeedle>(&self, needle: N) -> KnitResult<u32> {
        Ok(self.entry(needle)?.map_or(0, |e| e.loop_count))
    }

    pub fn stitch_count<N: IntoBedNeedle>(&self, needle: N) -> KnitResult<u32> {
        Ok(self.entry(needle)?.map_or(0, |e| e.stitch_count))
    }

    pub fn held_rows<N: IntoBedNeedle>(&self, needle: N) -> KnitResult<Option<u32>> {
        Ok(self.registry.held_rows(needle.into_bed_needle()?))
    }

    pub fn active_needles(&self, bed: Bed) -> Vec<i32> {
        self.registry.active_needles(bed)
    }

    pub fn sorted_needles(&self, bed: Option<Bed>) -> Vec<(BedNeedle, NeedleEntry)> {
        self.registry.sorted(bed)
    }

    /// Occupied needles sorted by position at the current rack.
    pub fn rack_sorted_needles(&self) -> Vec<BedNeedle> {
        self.registry.rack_sorted(self.rack)
    }

    pub fn registry(&self) -> &NeedleRegistry {
        &self.registry
    }

    pub fn carrier(&self, carrier: &str) -> Option<&CarrierRecord> {
        self.carriers.get(carrier)
    }

    /// Carriers currently in, in declaration order.
    pub fn active_carriers(&self) -> Vec<String> {
        self.declared
            .iter()
            .filter(|c| self.carriers.is_active(c))
            .cloned()
            .collect()
    }

    pub fn declared_carriers(&self) -> &[String] {
        &self.declared
    }

    pub fn hook_held(&self) -> bool {
        self.hook_held
    }

    pub fn line_count(&self) -> usize {
        self.log.line_count()
    }

    pub fn operations(&self) -> &[String] {
        self.log.operations()
    }

    pub fn headers(&self) -> &[(String, String)] {
        self.log.headers()
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn policy(&self) -> &ExceptionPolicy {
        &self.policy
    }

    pub fn limits(&self) -> &ConstraintLimits {
        &self.limits
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Current text without running end-of-file checks.
    pub fn serialize(&self) -> String {
        self.log.serialize()
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    fn outhook_remaining(&mut self) -> KnitResult<()> {
        let remaining = self.active_carriers();
        if remaining.is_empty() {
            return Ok(());
        }
        debug!(carriers = %remaining.join(" "), "Taking out remaining carriers");
        if self.config.machine.has_hook {
            self.outhook(&remaining)
        } else {
            self.out_carriers(&remaining)
        }
    }

    /// Run end-of-file checks, drain deferred validation and return the
    /// file text.
    ///
    /// Fails if a loop is left unknit too long, or if deferred validation
    /// found any error-grade violation. Deferred failures keep failing
    /// every later call until [`clear`](Self::clear).
    pub fn finalize(&mut self) -> KnitResult<String> {
        if self.config.auto_outhook {
            self.outhook_remaining()?;
        }

        let line = self.log.line_count();
        if self.end_checked != Some(line) {
            let row = self.registry.row_count();
            let checks: Vec<Check> = self
                .registry
                .iter()
                .map(|(needle, entry)| Check::unfinished_loop(*needle, *entry, row))
                .collect();
            self.validate_at(line, checks)?;
            self.end_checked = Some(line);
        }

        if let Some(worker) = self.worker.take() {
            let report = worker.finish()?;
            debug!(checks = report.checks, "Deferred validation drained");
            self.worker = Some(ValidationWorker::spawn(
                self.policy.clone(),
                self.limits,
                self.diagnostics.clone(),
            )?);
            self.failures.extend(report.failures);
        }
        if !self.failures.is_empty() {
            return Err(KnitError::DeferredViolations {
                diagnostics: self.failures.clone(),
            });
        }

        let summary = self.diagnostics.summary();
        info!(
            lines = self.log.line_count(),
            warnings = summary.warnings,
            "Finalized knitout"
        );
        Ok(self.log.serialize())
    }

    /// Finalize and write the file. Nothing is written on failure.
    pub fn write(&mut self, path: &Path) -> KnitResult<()> {
        let text = self.finalize()?;
        fs::write(path, text)?;
        info!(path = %path.display(), "Wrote knitout file");
        Ok(())
    }

    /// Reset operations and machine state. Headers and policy are kept.
    pub fn clear(&mut self) -> KnitResult<()> {
        if let Some(worker) = self.worker.take() {
            worker.finish()?;
            self.worker = Some(ValidationWorker::spawn(
                self.policy.clone(),
                self.limits,
                self.diagnostics.clone(),
            )?);
        }
        self.log.clear_operations();
        self.registry.clear();
        self.carriers.clear();
        self.diagnostics.clear();
        self.failures.clear();
        self.end_checked = None;
        self.rack = 0.0;
        self.hook_held = false;
        self.passes = 0;
        debug!("Cleared knitout writer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use knit_policy::Severity;

    fn writer() -> KnitoutWriter {
        KnitoutWriter::new(&["1", "2", "3"]).unwrap()
    }

    #[test]
    fn test_headers_written_on_creation() {
        let w = KnitoutWriter::with_config(&["1", "2"], WriterConfig::new().with_gauge(15)).unwrap();
        assert_eq!(
            w.serialize(),
            ";!knitout-2\n;;Machine: SWGN2\n;;Gauge: 15\n;;Carriers: 1 2\n"
        );
    }

    #[test]
    fn test_empty_carrier_list_rejected() {
        let none: [&str; 0] = [];
        assert!(matches!(KnitoutWriter::new(&none), Err(KnitError::NoCarriers(_))));
    }

    #[test]
    fn test_undeclared_carrier_is_fatal() {
        let mut w = writer();
        assert!(matches!(w.in_carriers(&["9"]), Err(KnitError::UnknownCarrier(c)) if c == "9"));
        let none: [&str; 0] = [];
        assert!(matches!(w.in_carriers(&none), Err(KnitError::NoCarriers(_))));
        assert_eq!(w.line_count(), 0);
    }

    #[test]
    fn test_duplicate_in_is_fatal() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        assert!(matches!(
            w.in_carriers(&["2", "1"]),
            Err(KnitError::DuplicateCarrier { .. })
        ));
        assert!(matches!(
            w.inhook(&["3", "3"]),
            Err(KnitError::DuplicateCarrier { .. })
        ));
        // nothing from the failed calls was applied
        assert_eq!(w.active_carriers(), vec!["1"]);
        assert_eq!(w.line_count(), 1);
    }

    #[test]
    fn test_hook_is_single_slot() {
        let mut w = writer();
        w.inhook(&["1"]).unwrap();
        assert!(w.hook_held());
        assert!(matches!(w.inhook(&["2"]), Err(KnitError::HookHeld { .. })));
        assert!(matches!(w.outhook(&["1"]), Err(KnitError::HookHeld { .. })));

        w.releasehook(&["1"]).unwrap();
        assert!(!w.hook_held());
        assert!(matches!(w.releasehook(&["1"]), Err(KnitError::HookNotHeld(_))));
        w.outhook(&["1"]).unwrap();
        assert!(w.active_carriers().is_empty());
    }

    #[test]
    fn test_hookless_machine() {
        let config = WriterConfig::new().with_machine(MachineProfile::kniterate());
        let mut w = KnitoutWriter::with_config(&["1"], config).unwrap();
        assert!(matches!(w.inhook(&["1"]), Err(KnitError::HookUnsupported(_))));
        w.in_carriers(&["1"]).unwrap();
        w.out_carriers(&["1"]).unwrap();
    }

    #[test]
    fn test_out_of_inactive_carrier_warns() {
        let mut w = writer();
        w.out_carriers(&["2"]).unwrap();
        assert_eq!(w.operations(), &["out 2".to_string()]);
        let warnings = w.diagnostics().warnings();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].class(), ConstraintClass::InactiveCarrierExit);
    }

    #[test]
    fn test_knit_and_tuck_accounting() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        assert_eq!(w.loop_count("f0").unwrap(), 2);
        assert_eq!(w.stitch_count("f0").unwrap(), 0);

        w.knit("-", ("f", 0), &["1"]).unwrap();
        assert_eq!(w.loop_count("f0").unwrap(), 1);
        assert_eq!(w.stitch_count("f0").unwrap(), 1);
        assert_eq!(w.row_count(), 1);
        assert_eq!(w.pass_count(), 1);
        assert_eq!(w.carrier("1").unwrap().direction, Some(Direction::Negative));
    }

    #[test]
    fn test_stacked_loop_warns_after_third_tuck() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        for _ in 0..3 {
            w.tuck("+", "b4", &["1"]).unwrap();
        }
        let stacked = w.diagnostics().of_class(ConstraintClass::StackedLoop);
        assert_eq!(stacked.len(), 1);
        assert_eq!(stacked[0].line, 4);
        assert_eq!(stacked[0].violation.magnitude, Some(3));
    }

    #[test]
    fn test_knit_on_empty_needle_is_unstable() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.knit("+", "f3", &["1"]).unwrap();
        assert_eq!(w.diagnostics().of_class(ConstraintClass::UnstableLoop).len(), 1);
    }

    #[test]
    fn test_error_leaves_state_untouched() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f5", &["1"]).unwrap();
        let err = w.xfer("f5", "b4").unwrap_err();
        assert_eq!(err.violation().map(|v| v.class), Some(ConstraintClass::UnalignedNeedles));
        assert!(w.is_occupied("f5").unwrap());
        assert!(!w.is_occupied("b4").unwrap());
        assert_eq!(w.line_count(), 2);

        w.xfer("f5", "b5").unwrap();
        assert!(w.is_occupied("b5").unwrap());
        assert!(!w.is_occupied("f5").unwrap());
    }

    #[test]
    fn test_xfer_at_rack() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f5", &["1"]).unwrap();
        w.rack(1.0).unwrap();
        w.xfer("f5", "b4").unwrap();
        w.xfer("b4", "f5").unwrap();
        assert!(w.diagnostics().errors().is_empty());
        assert_eq!(w.operations()[2], "rack 1");
    }

    #[test]
    fn test_empty_transfer_warns() {
        let mut w = writer();
        w.xfer("f1", "b1").unwrap();
        let empty = w.diagnostics().of_class(ConstraintClass::EmptyTransfer);
        assert_eq!(empty.len(), 1);
        assert!(w.registry().is_empty());
    }

    #[test]
    fn test_split_keeps_source() {
        let mut w = writer();
        w.in_carriers(&["2"]).unwrap();
        w.tuck("+", "f2", &["2"]).unwrap();
        w.split("+", "f2", "b2", &["2"]).unwrap();
        assert_eq!(w.loop_count("f2").unwrap(), 1);
        assert_eq!(w.stitch_count("f2").unwrap(), 0);
        assert_eq!(w.loop_count("b2").unwrap(), 1);
        assert_eq!(w.operations().last().unwrap(), "split + f2 b2 2");
    }

    #[test]
    fn test_miss_moves_carrier_only() {
        let mut w = writer();
        w.in_carriers(&["3"]).unwrap();
        w.miss("-", "f20", &["3"]).unwrap();
        assert!(w.registry().is_empty());
        assert_eq!(w.carrier("3").unwrap().needle(), Some(20));
    }

    #[test]
    fn test_held_loop_warns_on_drop() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        w.tuck("+", "f1", &["1"]).unwrap();
        for i in 0..11 {
            let dir = if i % 2 == 0 { "-" } else { "+" };
            w.knit(dir, "f0", &["1"]).unwrap();
        }
        assert_eq!(w.held_rows("f1").unwrap(), Some(11));
        w.drop("f1").unwrap();
        let held = w.diagnostics().of_class(ConstraintClass::HeldLoop);
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].violation.magnitude, Some(11));
    }

    #[test]
    fn test_unfinished_loop_blocks_finalize() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        w.tuck("+", "f1", &["1"]).unwrap();
        for i in 0..11 {
            let dir = if i % 2 == 0 { "-" } else { "+" };
            w.knit(dir, "f0", &["1"]).unwrap();
        }
        let err = w.finalize().unwrap_err();
        assert_eq!(err.violation().map(|v| v.class), Some(ConstraintClass::UnfinishedLoop));

        // a recently knit loop left on the bed is fine
        w.drop("f1").unwrap();
        w.finalize().unwrap();
    }

    #[test]
    fn test_repeated_finalize_records_end_of_file_warnings_once() {
        let mut w = writer();
        w.configure_diagnostics(&[ConstraintClass::UnfinishedLoop], &[])
            .unwrap();
        w.in_carriers(&["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        w.tuck("+", "f1", &["1"]).unwrap();
        for i in 0..11 {
            let dir = if i % 2 == 0 { "-" } else { "+" };
            w.knit(dir, "f0", &["1"]).unwrap();
        }

        let first = w.finalize().unwrap();
        let second = w.finalize().unwrap();
        assert_eq!(first, second);
        assert_eq!(w.diagnostics().of_class(ConstraintClass::UnfinishedLoop).len(), 1);
    }

    #[test]
    fn test_failed_operation_leaves_no_warnings() {
        let mut w = writer();
        w.in_carriers(&["1"]).unwrap();
        w.knit("+", "f0", &["1"]).unwrap();

        // carrier 1 floats (warn) while carrier 2 was never brought in (error)
        let err = w.knit("+", "f10", &["1", "2"]).unwrap_err();
        assert_eq!(err.violation().map(|v| v.class), Some(ConstraintClass::InactiveCarrier));
        assert!(w.diagnostics().warnings().is_empty());
        assert_eq!(w.diagnostics().errors().len(), 1);
        assert_eq!(w.line_count(), 2);

        w.knit("+", "f10", &["1"]).unwrap();
        let floats = w.diagnostics().of_class(ConstraintClass::Float);
        assert_eq!(floats.len(), 1);
        assert_eq!(floats[0].line, 3);
    }

    #[test]
    fn test_configure_diagnostics() {
        let mut w = writer();
        w.configure_diagnostics(&[ConstraintClass::InactiveCarrier], &[ConstraintClass::Float])
            .unwrap();
        assert_eq!(w.policy().severity(ConstraintClass::UnalignedNeedles), Severity::Ignored);

        w.knit("+", "f0", &["2"]).unwrap();
        assert_eq!(w.diagnostics().warnings().len(), 1);
        assert!(w.carrier("2").is_some());
        assert!(w.knit("+", "f10", &["2"]).is_err());

        assert!(w
            .configure_diagnostics(&[ConstraintClass::Float], &[ConstraintClass::Float])
            .is_err());
    }

    #[test]
    fn test_rack_rejects_non_finite() {
        let mut w = writer();
        assert!(matches!(w.rack(f64::NAN), Err(KnitError::InvalidRack(_))));
        w.rack(0.25).unwrap();
        w.rack(0.25).unwrap();
        assert_eq!(w.operations(), &["rack 0.25".to_string()]);
    }

    #[test]
    fn test_extensions() {
        let mut w = writer();
        w.comment("cast on\nbind off");
        w.stitch_number(5);
        w.vis_color("ff8800", &["1", "2"]).unwrap();
        w.pause();
        w.add_header("Position", "Center");
        w.add_header("Machine", "Kniterate");
        assert_eq!(
            w.operations(),
            &[
                ";cast on".to_string(),
                ";bind off".to_string(),
                "x-stitch-number 5".to_string(),
                "x-vis-color #ff8800 1 2".to_string(),
                "pause".to_string(),
            ]
        );
        assert_eq!(w.headers()[0], ("Machine".to_string(), "Kniterate".to_string()));
        assert_eq!(w.headers().last().unwrap().0, "Position");
    }

    #[test]
    fn test_auto_outhook() {
        let config = WriterConfig::new().with_auto_outhook(true);
        let mut w = KnitoutWriter::with_config(&["1", "2", "3"], config).unwrap();
        w.in_carriers(&["3"]).unwrap();
        w.in_carriers(&["1"]).unwrap();
        let text = w.finalize().unwrap();
        assert!(text.ends_with("outhook 1 3\n"));
        assert!(w.active_carriers().is_empty());
    }

    #[test]
    fn test_clear_keeps_headers_and_policy() {
        let mut w = writer();
        w.configure_diagnostics(&[ConstraintClass::Float], &[ConstraintClass::UnalignedNeedles])
            .unwrap();
        w.inhook(&["1"]).unwrap();
        w.tuck("+", "f0", &["1"]).unwrap();
        w.rack(1.0).unwrap();
        w.clear().unwrap();

        assert_eq!(w.line_count(), 0);
        assert!(w.registry().is_empty());
        assert!(w.active_carriers().is_empty());
        assert!(!w.hook_held());
        assert_eq!(w.rack_value(), 0.0);
        assert_eq!(w.headers().len(), 2);
        assert_eq!(w.policy().severity(ConstraintClass::StackedLoop), Severity::Ignored);
    }
}
