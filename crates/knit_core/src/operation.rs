//! Typed Knitout operations and program parsing.
//!
//! [`Operation`]'s `Display` is the canonical line the writer emits and
//! its `FromStr` reads one back, so a file written by the writer can be
//! replayed through [`KnitoutWriter::apply`](crate::KnitoutWriter::apply).

use std::fmt;
use std::str::FromStr;

use crate::error::{KnitError, KnitResult};
use crate::needle::{BedNeedle, Direction};

/// Format a rack value: integral values without a fraction, others in
/// their shortest decimal form.
pub fn format_rack(rack: f64) -> String {
    if rack == 0.0 {
        // avoids "-0"
        "0".to_string()
    } else {
        rack.to_string()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    In(Vec<String>),
    InHook(Vec<String>),
    ReleaseHook(Vec<String>),
    Out(Vec<String>),
    OutHook(Vec<String>),
    Knit {
        direction: Direction,
        needle: BedNeedle,
        carriers: Vec<String>,
    },
    Tuck {
        direction: Direction,
        needle: BedNeedle,
        carriers: Vec<String>,
    },
    Miss {
        direction: Direction,
        needle: BedNeedle,
        carriers: Vec<String>,
    },
    Split {
        direction: Direction,
        from: BedNeedle,
        to: BedNeedle,
        carriers: Vec<String>,
    },
    Xfer {
        from: BedNeedle,
        to: BedNeedle,
    },
    Drop(BedNeedle),
    Rack(f64),
    Pause,
    StitchNumber(u32),
    VisColor {
        color: String,
        carriers: Vec<String>,
    },
    Comment(String),
}

impl Operation {
    /// The Knitout verb.
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::In(_) => "in",
            Operation::InHook(_) => "inhook",
            Operation::ReleaseHook(_) => "releasehook",
            Operation::Out(_) => "out",
            Operation::OutHook(_) => "outhook",
            Operation::Knit { .. } => "knit",
            Operation::Tuck { .. } => "tuck",
            Operation::Miss { .. } => "miss",
            Operation::Split { .. } => "split",
            Operation::Xfer { .. } => "xfer",
            Operation::Drop(_) => "drop",
            Operation::Rack(_) => "rack",
            Operation::Pause => "pause",
            Operation::StitchNumber(_) => "x-stitch-number",
            Operation::VisColor { .. } => "x-vis-color",
            Operation::Comment(_) => ";",
        }
    }

    /// Carriers named by the operation.
    pub fn carriers(&self) -> &[String] {
        match self {
            Operation::In(cs)
            | Operation::InHook(cs)
            | Operation::ReleaseHook(cs)
            | Operation::Out(cs)
            | Operation::OutHook(cs) => cs,
            Operation::Knit { carriers, .. }
            | Operation::Tuck { carriers, .. }
            | Operation::Miss { carriers, .. }
            | Operation::Split { carriers, .. }
            | Operation::VisColor { carriers, .. } => carriers,
            _ => &[],
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Comment(text) => return write!(f, ";{text}"),
            Operation::Knit {
                direction, needle, ..
            }
            | Operation::Tuck {
                direction, needle, ..
            }
            | Operation::Miss {
                direction, needle, ..
            } => write!(f, "{} {direction} {needle}", self.verb())?,
            Operation::Split {
                direction,
                from,
                to,
                ..
            } => write!(f, "split {direction} {from} {to}")?,
            Operation::Xfer { from, to } => write!(f, "xfer {from} {to}")?,
            Operation::Drop(needle) => write!(f, "drop {needle}")?,
            Operation::Rack(rack) => write!(f, "rack {}", format_rack(*rack))?,
            Operation::StitchNumber(n) => write!(f, "x-stitch-number {n}")?,
            Operation::VisColor { color, .. } => write!(f, "x-vis-color {color}")?,
            _ => f.write_str(self.verb())?,
        }
        for carrier in self.carriers() {
            write!(f, " {carrier}")?;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> KnitError {
    KnitError::InvalidOperation {
        line: 0,
        message: message.into(),
    }
}

fn next_token<'a>(tokens: &mut impl Iterator<Item = &'a str>, verb: &str, what: &str) -> KnitResult<&'a str> {
    tokens
        .next()
        .ok_or_else(|| invalid(format!("'{verb}' is missing its {what}")))
}

impl FromStr for Operation {
    type Err = KnitError;

    fn from_str(s: &str) -> KnitResult<Self> {
        let line = s.trim();
        if let Some(text) = line.strip_prefix(';') {
            return Ok(Operation::Comment(text.to_string()));
        }
        // trailing comments are not part of the operation
        let line = line.split(';').next().unwrap_or_default();

        let mut tokens = line.split_whitespace();
        let verb = tokens
            .next()
            .ok_or_else(|| invalid("empty operation"))?;

        let op = match verb {
            "knit" | "tuck" | "miss" => {
                let direction = next_token(&mut tokens, verb, "direction")?.parse()?;
                let needle = next_token(&mut tokens, verb, "needle")?.parse()?;
                let carriers = tokens.map(str::to_string).collect();
                match verb {
                    "knit" => Operation::Knit {
                        direction,
                        needle,
                        carriers,
                    },
                    "tuck" => Operation::Tuck {
                        direction,
                        needle,
                        carriers,
                    },
                    _ => Operation::Miss {
                        direction,
                        needle,
                        carriers,
                    },
                }
            }
            "split" => Operation::Split {
                direction: next_token(&mut tokens, verb, "direction")?.parse()?,
                from: next_token(&mut tokens, verb, "source needle")?.parse()?,
                to: next_token(&mut tokens, verb, "target needle")?.parse()?,
                carriers: tokens.map(str::to_string).collect(),
            },
            "xfer" => {
                let op = Operation::Xfer {
                    from: next_token(&mut tokens, verb, "source needle")?.parse()?,
                    to: next_token(&mut tokens, verb, "target needle")?.parse()?,
                };
                if tokens.next().is_some() {
                    return Err(invalid("'xfer' takes no carriers"));
                }
                op
            }
            "drop" => Operation::Drop(next_token(&mut tokens, verb, "needle")?.parse()?),
            "rack" => {
                let value = next_token(&mut tokens, verb, "value")?;
                let rack: f64 = value
                    .parse()
                    .map_err(|_| invalid(format!("invalid rack value '{value}'")))?;
                if !rack.is_finite() {
                    return Err(KnitError::InvalidRack(rack));
                }
                Operation::Rack(rack)
            }
            "pause" => Operation::Pause,
            "x-stitch-number" => {
                let value = next_token(&mut tokens, verb, "value")?;
                Operation::StitchNumber(
                    value
                        .parse()
                        .map_err(|_| invalid(format!("invalid stitch number '{value}'")))?,
                )
            }
            "x-vis-color" => Operation::VisColor {
                color: next_token(&mut tokens, verb, "color")?.to_string(),
                carriers: tokens.map(str::to_string).collect(),
            },
            "in" | "inhook" | "releasehook" | "out" | "outhook" => {
                let carriers: Vec<String> = tokens.map(str::to_string).collect();
                match verb {
                    "in" => Operation::In(carriers),
                    "inhook" => Operation::InHook(carriers),
                    "releasehook" => Operation::ReleaseHook(carriers),
                    "out" => Operation::Out(carriers),
                    _ => Operation::OutHook(carriers),
                }
            }
            other => return Err(invalid(format!("unsupported operation '{other}'"))),
        };
        Ok(op)
    }
}

/// A parsed Knitout file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    /// Header declarations in file order
    pub headers: Vec<(String, String)>,
    /// Operations with their 1-based file line numbers
    pub operations: Vec<(usize, Operation)>,
}

impl Program {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Carriers the program declares, or failing that, every carrier it
    /// uses in order of first appearance.
    pub fn carriers(&self) -> Vec<String> {
        if let Some(declared) = self.header("Carriers") {
            return declared.split_whitespace().map(str::to_string).collect();
        }
        let mut carriers: Vec<String> = Vec::new();
        for (_, op) in &self.operations {
            for carrier in op.carriers() {
                if !carriers.contains(carrier) {
                    carriers.push(carrier.clone());
                }
            }
        }
        carriers
    }
}

/// Parse a whole Knitout file.
///
/// The version line is skipped, `;;Key: value` lines become headers, other
/// `;` lines become comments and blank lines are ignored.
pub fn parse_program(text: &str) -> KnitResult<Program> {
    let mut program = Program::default();
    for (index, raw) in text.lines().enumerate() {
        let line_number = index + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with(";!") {
            continue;
        }
        if let Some(header) = line.strip_prefix(";;") {
            let (key, value) = header.split_once(':').ok_or_else(|| KnitError::InvalidOperation {
                line: line_number,
                message: format!("malformed header '{line}'"),
            })?;
            program
                .headers
                .push((key.trim().to_string(), value.trim().to_string()));
            continue;
        }
        let op = line.parse::<Operation>().map_err(|err| match err {
            KnitError::InvalidOperation { message, .. } => KnitError::InvalidOperation {
                line: line_number,
                message,
            },
            other => KnitError::InvalidOperation {
                line: line_number,
                message: other.to_string(),
            },
        })?;
        program.operations.push((line_number, op));
    }
    Ok(program)
}
