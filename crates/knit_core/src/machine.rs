//! Machine profiles.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KnitError;

/// Target machine; decides whether hook operations are available.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineProfile {
    /// Name written to the `;;Machine:` header
    pub name: String,
    /// Machine has a yarn-inserting hook
    pub has_hook: bool,
}

impl MachineProfile {
    pub fn new(name: impl Into<String>, has_hook: bool) -> Self {
        Self {
            name: name.into(),
            has_hook,
        }
    }

    /// Shima Seiki SWGN2.
    pub fn swgn2() -> Self {
        Self::new("SWGN2", true)
    }

    /// Kniterate.
    pub fn kniterate() -> Self {
        Self::new("Kniterate", false)
    }
}

impl Default for MachineProfile {
    fn default() -> Self {
        Self::swgn2()
    }
}

impl fmt::Display for MachineProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl FromStr for MachineProfile {
    type Err = KnitError;

    fn from_str(s: &str) -> Result<Self, KnitError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "swgn2" | "shima" => Ok(Self::swgn2()),
            "kniterate" => Ok(Self::kniterate()),
            other => Err(KnitError::UnknownMachine(other.to_string())),
        }
    }
}
