//! Yarn carrier state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{KnitError, KnitResult};
use crate::needle::{BedNeedle, Direction};

/// Last known motion of a carrier that is in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarrierRecord {
    /// Direction of the last pass, unset until first use
    pub direction: Option<Direction>,
    /// Last needle the carrier fed, unset until first use
    pub position: Option<BedNeedle>,
}

impl CarrierRecord {
    pub fn needle(&self) -> Option<i32> {
        self.position.map(|bn| bn.needle)
    }
}

/// Outcome of recording a carrier motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Motion {
    /// The carrier was in before this motion
    pub was_active: bool,
    /// The motion reversed the carrier's previous direction
    pub reversed: bool,
}

/// Records for every carrier currently in.
#[derive(Debug, Clone, Default)]
pub struct CarrierState {
    records: BTreeMap<String, CarrierRecord>,
}

impl CarrierState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring a carrier in with an empty record.
    pub fn activate(&mut self, carrier: &str, op: &str) -> KnitResult<()> {
        if self.records.contains_key(carrier) {
            return Err(KnitError::DuplicateCarrier {
                carrier: carrier.to_string(),
                op: op.to_string(),
            });
        }
        debug!(carrier, op, "carrier in");
        self.records.insert(carrier.to_string(), CarrierRecord::default());
        Ok(())
    }

    /// Take a carrier out, returning its last record.
    pub fn deactivate(&mut self, carrier: &str) -> KnitResult<CarrierRecord> {
        let record = self
            .records
            .remove(carrier)
            .ok_or_else(|| KnitError::InactiveCarrier(carrier.to_string()))?;
        debug!(carrier, "carrier out");
        Ok(record)
    }

    /// Update a carrier after it fed a needle.
    ///
    /// A carrier that is not in still gets a record, so later operations
    /// have a baseline; the caller reports the inactive use.
    pub fn record_motion(
        &mut self,
        carrier: &str,
        direction: Direction,
        position: BedNeedle,
    ) -> Motion {
        let was_active = self.records.contains_key(carrier);
        let record = self.records.entry(carrier.to_string()).or_default();
        let reversed = record.direction.is_some_and(|d| d != direction);
        record.direction = Some(direction);
        record.position = Some(position);
        Motion {
            was_active,
            reversed,
        }
    }

    pub fn get(&self, carrier: &str) -> Option<&CarrierRecord> {
        self.records.get(carrier)
    }

    pub fn is_active(&self, carrier: &str) -> bool {
        self.records.contains_key(carrier)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
