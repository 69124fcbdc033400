//! Constraint checks.
//!
//! A [`Check`] is an owned snapshot of exactly the state one check needs,
//! taken when the operation is issued. Evaluating it is a pure function of
//! that snapshot and the [`ConstraintLimits`], so a check gives the same
//! answer whether it runs immediately or later on the validation worker.

use knit_policy::{ConstraintClass, ConstraintLimits, Violation};

use crate::carrier::CarrierState;
use crate::needle::BedNeedle;
use crate::operation::format_rack;
use crate::registry::{NeedleEntry, NeedleRegistry};

#[derive(Debug, Clone, PartialEq)]
pub enum Check {
    InactiveCarrier {
        carrier: String,
        op: &'static str,
        active: bool,
    },
    InactiveCarrierExit {
        carrier: String,
        op: &'static str,
        active: bool,
    },
    UnalignedNeedles {
        from: BedNeedle,
        to: BedNeedle,
        rack: f64,
    },
    Float {
        carrier: String,
        previous: Option<i32>,
        needle: i32,
    },
    StackedLoop {
        needle: BedNeedle,
        loops: u32,
    },
    HeldLoop {
        needle: BedNeedle,
        entry: Option<NeedleEntry>,
        row: u32,
    },
    UnfinishedLoop {
        needle: BedNeedle,
        entry: NeedleEntry,
        row: u32,
    },
    EmptyTransfer {
        from: BedNeedle,
        entry: Option<NeedleEntry>,
    },
    UnstableLoop {
        needle: BedNeedle,
        entry: Option<NeedleEntry>,
    },
}

impl Check {
    pub fn inactive_carrier(carriers: &CarrierState, carrier: &str, op: &'static str) -> Self {
        Check::InactiveCarrier {
            carrier: carrier.to_string(),
            op,
            active: carriers.is_active(carrier),
        }
    }

    pub fn inactive_carrier_exit(carriers: &CarrierState, carrier: &str, op: &'static str) -> Self {
        Check::InactiveCarrierExit {
            carrier: carrier.to_string(),
            op,
            active: carriers.is_active(carrier),
        }
    }

    pub fn unaligned_needles(from: BedNeedle, to: BedNeedle, rack: f64) -> Self {
        Check::UnalignedNeedles { from, to, rack }
    }

    pub fn float(carriers: &CarrierState, carrier: &str, needle: i32) -> Self {
        Check::Float {
            carrier: carrier.to_string(),
            previous: carriers.get(carrier).and_then(|record| record.needle()),
            needle,
        }
    }

    /// Stack check on the loop count `needle` will hold after a tuck.
    pub fn stacked_after_tuck(registry: &NeedleRegistry, needle: BedNeedle) -> Self {
        let loops = registry.get(needle).map_or(1, |entry| entry.loop_count + 1);
        Check::StackedLoop { needle, loops }
    }

    /// Stack check on the loop count `to` will hold after receiving `from`.
    pub fn stacked_after_transfer(registry: &NeedleRegistry, from: BedNeedle, to: BedNeedle) -> Self {
        let incoming = registry.get(from).map_or(0, |entry| entry.loop_count);
        let present = registry.get(to).map_or(0, |entry| entry.loop_count);
        Check::StackedLoop {
            needle: to,
            loops: present + incoming,
        }
    }

    pub fn held_loop(registry: &NeedleRegistry, needle: BedNeedle) -> Self {
        Check::HeldLoop {
            needle,
            entry: registry.get(needle).copied(),
            row: registry.row_count(),
        }
    }

    pub fn unfinished_loop(needle: BedNeedle, entry: NeedleEntry, row: u32) -> Self {
        Check::UnfinishedLoop { needle, entry, row }
    }

    pub fn empty_transfer(registry: &NeedleRegistry, from: BedNeedle) -> Self {
        Check::EmptyTransfer {
            from,
            entry: registry.get(from).copied(),
        }
    }

    pub fn unstable_loop(registry: &NeedleRegistry, needle: BedNeedle) -> Self {
        Check::UnstableLoop {
            needle,
            entry: registry.get(needle).copied(),
        }
    }

    pub fn class(&self) -> ConstraintClass {
        match self {
            Check::InactiveCarrier { .. } => ConstraintClass::InactiveCarrier,
            Check::InactiveCarrierExit { .. } => ConstraintClass::InactiveCarrierExit,
            Check::UnalignedNeedles { .. } => ConstraintClass::UnalignedNeedles,
            Check::Float { .. } => ConstraintClass::Float,
            Check::StackedLoop { .. } => ConstraintClass::StackedLoop,
            Check::HeldLoop { .. } => ConstraintClass::HeldLoop,
            Check::UnfinishedLoop { .. } => ConstraintClass::UnfinishedLoop,
            Check::EmptyTransfer { .. } => ConstraintClass::EmptyTransfer,
            Check::UnstableLoop { .. } => ConstraintClass::UnstableLoop,
        }
    }

    /// Run the check; `None` means it passed.
    pub fn evaluate(&self, limits: &ConstraintLimits) -> Option<Violation> {
        let class = self.class();
        match self {
            Check::InactiveCarrier {
                carrier,
                op,
                active,
            }
            | Check::InactiveCarrierExit {
                carrier,
                op,
                active,
            } => (!active).then(|| {
                Violation::new(
                    class,
                    format!("carrier {carrier}"),
                    format!("Attempting to {op} carrier '{carrier}', which hasn't been brought in yet."),
                )
            }),
            Check::UnalignedNeedles { from, to, rack } => {
                if from.bed.is_front_side() == to.bed.is_front_side() {
                    return Some(Violation::new(
                        class,
                        format!("{from} {to}"),
                        format!("Can't transfer between needles on the same bed side ({from} -> {to})."),
                    ));
                }
                let (from_index, to_index) = (i64::from(from.needle), i64::from(to.needle));
                let offset = if from.bed.is_front_side() {
                    from_index - to_index
                } else {
                    to_index - from_index
                };
                (offset as f64 != *rack).then(|| {
                    Violation::new(
                        class,
                        format!("{from} {to}"),
                        format!("'{from}' and '{to}' are unaligned at rack {}.", format_rack(*rack)),
                    )
                    .with_magnitude(offset)
                })
            }
            Check::Float {
                carrier,
                previous,
                needle,
            } => {
                let previous = (*previous)?;
                let length = (i64::from(*needle) - i64::from(previous)).abs();
                (length > i64::from(limits.max_float)).then(|| {
                    Violation::new(
                        class,
                        format!("carrier {carrier}"),
                        format!(
                            "Float of length {length} formed bringing carrier '{carrier}' from needle {previous} to needle {needle}."
                        ),
                    )
                    .with_magnitude(length)
                })
            }
            Check::StackedLoop { needle, loops } => (*loops > limits.max_stacked_loops).then(|| {
                Violation::new(
                    class,
                    needle.to_string(),
                    format!("{loops} loops stacked on '{needle}'."),
                )
                .with_magnitude(i64::from(*loops))
            }),
            Check::HeldLoop { needle, entry, row } => {
                let held = entry.as_ref()?.held_rows(*row);
                (held > limits.max_held_rows).then(|| {
                    Violation::new(
                        class,
                        needle.to_string(),
                        format!("'{needle}' has been holding an unknit loop for {held} rows."),
                    )
                    .with_magnitude(i64::from(held))
                })
            }
            Check::UnfinishedLoop { needle, entry, row } => {
                let held = entry.held_rows(*row);
                (held > limits.max_held_rows).then(|| {
                    Violation::new(
                        class,
                        needle.to_string(),
                        format!(
                            "'{needle}' is left holding a loop unknit for {held} rows at the end of the file."
                        ),
                    )
                    .with_magnitude(i64::from(held))
                })
            }
            Check::EmptyTransfer { from, entry } => {
                let loops = entry.map_or(0, |e| e.loop_count);
                (loops == 0).then(|| {
                    Violation::new(
                        class,
                        from.to_string(),
                        format!("Transferring from '{from}', which holds no loops."),
                    )
                })
            }
            Check::UnstableLoop { needle, entry } => entry.is_none().then(|| {
                Violation::new(
                    class,
                    needle.to_string(),
                    format!("Attempting to knit on '{needle}', which does not yet have a stable loop formed."),
                )
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::needle::Direction;

    fn limits() -> ConstraintLimits {
        ConstraintLimits::default()
    }

    #[test]
    fn test_inactive_carrier() {
        let mut carriers = CarrierState::new();
        let v = Check::inactive_carrier(&carriers, "9", "knit")
            .evaluate(&limits())
            .unwrap();
        assert_eq!(v.class, ConstraintClass::InactiveCarrier);
        assert!(v.message.contains("'9'"));
        assert!(v.message.contains("knit"));

        carriers.activate("9", "in").unwrap();
        assert!(Check::inactive_carrier(&carriers, "9", "knit")
            .evaluate(&limits())
            .is_none());
    }

    #[test]
    fn test_unaligned_needles() {
        let f5 = BedNeedle::front(5);
        assert!(Check::unaligned_needles(f5, BedNeedle::back(5), 0.0)
            .evaluate(&limits())
            .is_none());

        let v = Check::unaligned_needles(f5, BedNeedle::back(4), 0.0)
            .evaluate(&limits())
            .unwrap();
        assert_eq!(v.class, ConstraintClass::UnalignedNeedles);
        assert_eq!(v.magnitude, Some(1));

        // back-sourced transfers measure the offset the other way round
        assert!(Check::unaligned_needles(BedNeedle::back(4), f5, 1.0)
            .evaluate(&limits())
            .is_none());
        assert!(Check::unaligned_needles(f5, BedNeedle::back(4), 1.0)
            .evaluate(&limits())
            .is_none());
        assert!(Check::unaligned_needles(f5, BedNeedle::back(5), 0.25)
            .evaluate(&limits())
            .is_some());
    }

    #[test]
    fn test_unaligned_needles_at_index_extremes() {
        let v = Check::unaligned_needles(BedNeedle::front(i32::MAX), BedNeedle::back(-1), 0.0)
            .evaluate(&limits())
            .unwrap();
        assert_eq!(v.magnitude, Some(i64::from(i32::MAX) + 1));

        let v = Check::unaligned_needles(BedNeedle::back(i32::MIN), BedNeedle::front(i32::MAX), 0.0)
            .evaluate(&limits())
            .unwrap();
        assert_eq!(v.magnitude, Some(i64::from(i32::MAX) - i64::from(i32::MIN)));
    }

    #[test]
    fn test_same_side_transfer_is_unaligned() {
        let v = Check::unaligned_needles(BedNeedle::front(2), "fs2".parse().unwrap(), 0.0)
            .evaluate(&limits())
            .unwrap();
        assert!(v.message.contains("same bed side"));
    }

    #[test]
    fn test_float_length() {
        let mut carriers = CarrierState::new();
        carriers.activate("1", "in").unwrap();
        assert!(Check::float(&carriers, "1", 40).evaluate(&limits()).is_none());

        carriers.record_motion("1", Direction::Positive, BedNeedle::front(0));
        let v = Check::float(&carriers, "1", 10).evaluate(&limits()).unwrap();
        assert_eq!(v.magnitude, Some(10));
        assert!(Check::float(&carriers, "1", 5).evaluate(&limits()).is_none());
        assert!(Check::float(&carriers, "1", -6).evaluate(&limits()).is_none());
        assert!(Check::float(&carriers, "1", 7)
            .evaluate(&limits().with_max_float(8))
            .is_none());
    }

    #[test]
    fn test_stacked_loops_projection() {
        let mut registry = NeedleRegistry::new();
        let f1 = BedNeedle::front(1);
        let b1 = BedNeedle::back(1);
        registry.increment(f1, true);
        registry.increment(f1, true);
        assert!(Check::stacked_after_tuck(&registry, b1).evaluate(&limits()).is_none());

        let v = Check::stacked_after_tuck(&registry, f1).evaluate(&limits()).unwrap();
        assert_eq!(v.magnitude, Some(3));

        registry.increment(b1, true);
        let v = Check::stacked_after_transfer(&registry, f1, b1)
            .evaluate(&limits())
            .unwrap();
        assert_eq!(v.magnitude, Some(3));
    }

    #[test]
    fn test_held_loop_uses_snapshot() {
        let mut registry = NeedleRegistry::new();
        let f0 = BedNeedle::front(0);
        let f1 = BedNeedle::front(1);
        registry.increment(f0, true);
        registry.increment(f1, true);
        for _ in 0..11 {
            registry.increment(f0, false);
        }

        let check = Check::held_loop(&registry, f1);
        // later mutations do not change the captured answer
        registry.increment(f1, false);
        let v = check.evaluate(&limits()).unwrap();
        assert_eq!(v.magnitude, Some(11));

        assert!(Check::held_loop(&registry, BedNeedle::front(8))
            .evaluate(&limits())
            .is_none());
    }

    #[test]
    fn test_empty_transfer_and_unstable_loop() {
        let mut registry = NeedleRegistry::new();
        let f2 = BedNeedle::front(2);
        assert!(Check::empty_transfer(&registry, f2).evaluate(&limits()).is_some());
        assert!(Check::unstable_loop(&registry, f2).evaluate(&limits()).is_some());

        registry.increment(f2, true);
        assert!(Check::empty_transfer(&registry, f2).evaluate(&limits()).is_none());
        assert!(Check::unstable_loop(&registry, f2).evaluate(&limits()).is_none());
    }
}
