//! Check command - Replay a Knitout file and report diagnostics.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use knit_core::{parse_program, KnitError, KnitResult, KnitoutWriter, MachineProfile, WriterConfig};
use knit_policy::{Diagnostic, DiagnosticSummary, DiagnosticsConfig};

#[derive(Args)]
pub struct CheckArgs {
    /// Knitout file to replay
    file: PathBuf,

    /// Diagnostics configuration (YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Machine profile, overriding the file's Machine header
    #[arg(short, long)]
    machine: Option<String>,

    /// Stop at the first error-grade violation
    #[arg(long)]
    fail_fast: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

/// The file replayed but has error-grade violations.
#[derive(Debug, Error)]
#[error("validation failed: {errors} error-grade violation(s) in {path}")]
pub struct CheckFailed {
    pub path: String,
    pub errors: usize,
}

/// A diagnostic located in the checked file.
#[derive(Debug, Serialize)]
pub struct FileDiagnostic {
    pub file_line: usize,
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
}

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub path: String,
    pub machine: String,
    pub operations: usize,
    pub passed: bool,
    /// File line where a fail-fast replay stopped
    pub halted_at: Option<usize>,
    pub summary: DiagnosticSummary,
    pub diagnostics: Vec<FileDiagnostic>,
}

pub fn execute(args: CheckArgs) -> Result<()> {
    let path = args.file.display().to_string();
    info!("Checking knitout file: {}", path);

    let text = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", path))?;
    let diagnostics = match &args.config {
        Some(config) => DiagnosticsConfig::from_file(config)?,
        None => DiagnosticsConfig::default(),
    };
    let machine = args
        .machine
        .as_deref()
        .map(str::parse::<MachineProfile>)
        .transpose()?;

    let report = run_check(&path, &text, diagnostics, machine, args.fail_fast)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if report.passed {
        Ok(())
    } else {
        Err(CheckFailed {
            path,
            errors: report.summary.errors,
        }
        .into())
    }
}

fn print_report(report: &CheckReport) {
    for d in &report.diagnostics {
        let marker = if d.diagnostic.severity.blocks() { "error" } else { "warning" };
        println!(
            "{}:{}: {}: {}",
            report.path, d.file_line, marker, d.diagnostic.violation
        );
    }
    if let Some(line) = report.halted_at {
        println!("{}:{}: replay stopped", report.path, line);
    }
    println!(
        "{} operation(s) on {}: {} warning(s), {} error(s)",
        report.operations, report.machine, report.summary.warnings, report.summary.errors
    );
}

/// Replay `text` through a writer and collect every diagnostic.
///
/// Without `fail_fast` checks are deferred, so replay continues past
/// error-grade violations and all of them are reported.
pub fn run_check(
    path: &str,
    text: &str,
    diagnostics: DiagnosticsConfig,
    machine: Option<MachineProfile>,
    fail_fast: bool,
) -> KnitResult<CheckReport> {
    let program = parse_program(text)?;
    let machine = match machine {
        Some(machine) => machine,
        None => program
            .header("Machine")
            .map(str::parse::<MachineProfile>)
            .transpose()?
            .unwrap_or_default(),
    };

    let mut config = WriterConfig::new()
        .with_machine(machine.clone())
        .with_diagnostics(diagnostics);
    if let Some(gauge) = program.header("Gauge").and_then(|g| g.parse().ok()) {
        config = config.with_gauge(gauge);
    }
    if !fail_fast {
        config = config.deferred();
    }
    let mut writer = KnitoutWriter::with_config(&program.carriers(), config)?;

    // file line of every emitted operation, indexed by operation line
    let mut file_lines: Vec<usize> = Vec::with_capacity(program.operations.len());
    let mut halted_at = None;
    for (file_line, op) in &program.operations {
        match writer.apply(op) {
            Ok(()) => {
                if writer.line_count() > file_lines.len() {
                    file_lines.push(*file_line);
                }
            }
            Err(err) if err.violation().is_some() => {
                debug!(line = *file_line, "Replay stopped at error-grade violation");
                halted_at = Some(*file_line);
                break;
            }
            Err(err) => {
                return Err(KnitError::InvalidOperation {
                    line: *file_line,
                    message: err.to_string(),
                })
            }
        }
    }

    if halted_at.is_none() {
        match writer.finalize() {
            Ok(_) => {}
            Err(err) if err.violation().is_some() => {}
            Err(err) => return Err(err),
        }
    }

    let mut entries = writer.diagnostics().snapshot();
    entries.sort_by_key(|d| d.line);
    let diagnostics = entries
        .into_iter()
        .map(|diagnostic| FileDiagnostic {
            file_line: diagnostic
                .line
                .checked_sub(1)
                .and_then(|i| file_lines.get(i).copied())
                .or(halted_at)
                .or_else(|| file_lines.last().copied())
                .unwrap_or_default(),
            diagnostic,
        })
        .collect();

    let summary = writer.diagnostics().summary();
    Ok(CheckReport {
        path: path.to_string(),
        machine: machine.name,
        operations: file_lines.len(),
        passed: summary.errors == 0,
        halted_at,
        summary,
        diagnostics,
    })
}
