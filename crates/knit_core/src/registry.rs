//! Loop occupancy registry for needle locations.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::needle::{Bed, BedNeedle};

/// Loop bookkeeping for one occupied needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedleEntry {
    /// Loops currently stacked on the needle
    pub loop_count: u32,
    /// Knit-throughs completed at this location
    pub stitch_count: u32,
    /// Row count when the location was first populated
    pub created_row: u32,
}

impl NeedleEntry {
    fn fresh(row: u32) -> Self {
        Self {
            loop_count: 1,
            stitch_count: 0,
            created_row: row,
        }
    }

    fn empty(row: u32) -> Self {
        Self {
            loop_count: 0,
            stitch_count: 0,
            created_row: row,
        }
    }

    /// Row this loop was last advanced to.
    pub fn current_row(&self) -> u32 {
        self.created_row + self.stitch_count
    }

    /// Rows the loop has sat unknit, given the global row count.
    pub fn held_rows(&self, row_count: u32) -> u32 {
        row_count.saturating_sub(self.current_row())
    }
}

/// Ordering used for every sorted view: descending position, front-side
/// beds first on ties.
fn compare_positions(a: (f64, Bed), b: (f64, Bed)) -> Ordering {
    b.0.total_cmp(&a.0).then_with(|| front_side_first(a.1, b.1))
}

fn front_side_first(a: Bed, b: Bed) -> Ordering {
    b.is_front_side().cmp(&a.is_front_side()).then(a.cmp(&b))
}

/// Registry of occupied needles.
///
/// Needles with no loops are never stored: an absent key means an empty
/// needle.
#[derive(Debug, Clone, Default)]
pub struct NeedleRegistry {
    entries: BTreeMap<BedNeedle, NeedleEntry>,
    row_mark: u32,
}

impl NeedleRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, needle: BedNeedle) -> Option<&NeedleEntry> {
        self.entries.get(&needle)
    }

    pub fn contains(&self, needle: BedNeedle) -> bool {
        self.entries.contains_key(&needle)
    }

    /// Form a loop on a needle.
    ///
    /// A tuck stacks one more loop; a knit consumes the stack, leaves one
    /// loop and counts a stitch.
    pub fn increment(&mut self, needle: BedNeedle, is_tuck: bool) {
        let row = self.row_count();
        let entry = match self.entries.get_mut(&needle) {
            Some(entry) => {
                if is_tuck {
                    entry.loop_count += 1;
                } else {
                    entry.loop_count = 1;
                    entry.stitch_count += 1;
                }
                *entry
            }
            None => {
                let entry = NeedleEntry::fresh(row);
                self.entries.insert(needle, entry);
                entry
            }
        };
        self.row_mark = self.row_mark.max(entry.stitch_count);
    }

    /// Move the loops of `from` onto `to`.
    ///
    /// The destination takes the stitch count and creation row of the less
    /// advanced side. On a split the source keeps a fresh loop, otherwise it
    /// is emptied.
    pub fn transfer(&mut self, from: BedNeedle, to: BedNeedle, is_split: bool) {
        if from == to {
            return;
        }

        let row = self.row_count();
        let source = self
            .entries
            .get(&from)
            .copied()
            .unwrap_or_else(|| NeedleEntry::empty(row));

        let dest = self.entries.entry(to).or_insert_with(|| NeedleEntry::empty(row));
        dest.loop_count += source.loop_count;
        if source.loop_count > 0 && source.stitch_count < dest.stitch_count {
            dest.stitch_count = source.stitch_count;
            dest.created_row = source.created_row;
        }
        if dest.loop_count == 0 {
            self.entries.remove(&to);
        }

        if is_split {
            self.entries.insert(from, NeedleEntry::fresh(row));
        } else {
            self.entries.remove(&from);
        }
        debug!(%from, %to, is_split, loops = source.loop_count, "transferred loops");
    }

    /// Drop every loop on a needle.
    pub fn remove(&mut self, needle: BedNeedle) -> Option<NeedleEntry> {
        self.entries.remove(&needle)
    }

    /// Highest stitch count any needle has reached.
    ///
    /// Tracked as a high-water mark so it never decreases when the most
    /// advanced needle is dropped or transferred.
    pub fn row_count(&self) -> u32 {
        self.row_mark
    }

    /// Rows the loop on `needle` has been held, `None` for an empty needle.
    pub fn held_rows(&self, needle: BedNeedle) -> Option<u32> {
        self.get(needle).map(|entry| entry.held_rows(self.row_count()))
    }

    fn indices(&self, bed: Option<Bed>) -> impl Iterator<Item = i32> + '_ {
        self.entries
            .keys()
            .filter(move |bn| bed.map_or(true, |b| bn.bed == b))
            .map(|bn| bn.needle)
    }

    /// Lowest occupied index on `bed` (any bed if `None`).
    pub fn min_needle(&self, bed: Option<Bed>) -> Option<i32> {
        self.indices(bed).min()
    }

    /// Highest occupied index on `bed` (any bed if `None`).
    pub fn max_needle(&self, bed: Option<Bed>) -> Option<i32> {
        self.indices(bed).max()
    }

    /// Occupied indices on one bed, ascending.
    pub fn active_needles(&self, bed: Bed) -> Vec<i32> {
        // BTreeMap keys order by bed then index
        self.indices(Some(bed)).collect()
    }

    /// Occupied needles in sort order, optionally restricted to one bed.
    pub fn sorted(&self, bed: Option<Bed>) -> Vec<(BedNeedle, NeedleEntry)> {
        let mut res: Vec<_> = self
            .entries
            .iter()
            .filter(|(bn, _)| bed.map_or(true, |b| bn.bed == b))
            .map(|(bn, entry)| (*bn, *entry))
            .collect();
        res.sort_by(|(a, _), (b, _)| {
            compare_positions((a.position(0.0), a.bed), (b.position(0.0), b.bed))
        });
        res
    }

    /// Occupied needles sorted by their position at `rack`.
    pub fn rack_sorted(&self, rack: f64) -> Vec<BedNeedle> {
        let mut res: Vec<_> = self.entries.keys().copied().collect();
        res.sort_by(|a, b| {
            compare_positions((a.position(rack), a.bed), (b.position(rack), b.bed))
        });
        res
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BedNeedle, &NeedleEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        debug!("Clearing needle registry");
        self.entries.clear();
        self.row_mark = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(n: i32) -> BedNeedle {
        BedNeedle::front(n)
    }

    fn b(n: i32) -> BedNeedle {
        BedNeedle::back(n)
    }

    #[test]
    fn test_increment_creates_entry() {
        let mut registry = NeedleRegistry::new();
        assert!(registry.get(f(0)).is_none());

        registry.increment(f(0), true);
        let entry = registry.get(f(0)).unwrap();
        assert_eq!(entry.loop_count, 1);
        assert_eq!(entry.stitch_count, 0);
        assert_eq!(entry.created_row, 0);
    }

    #[test]
    fn test_tuck_stacks_and_knit_consumes() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(2), true);
        registry.increment(f(2), true);
        registry.increment(f(2), true);
        assert_eq!(registry.get(f(2)).unwrap().loop_count, 3);
        assert_eq!(registry.get(f(2)).unwrap().stitch_count, 0);

        registry.increment(f(2), false);
        let entry = registry.get(f(2)).unwrap();
        assert_eq!(entry.loop_count, 1);
        assert_eq!(entry.stitch_count, 1);
        assert_eq!(registry.row_count(), 1);
    }

    #[test]
    fn test_transfer_conserves_loops() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(1), true);
        registry.increment(f(1), true);
        registry.increment(b(1), true);

        registry.transfer(f(1), b(1), false);
        assert!(registry.get(f(1)).is_none());
        assert_eq!(registry.get(b(1)).unwrap().loop_count, 3);
    }

    #[test]
    fn test_transfer_inherits_less_advanced_side() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(1), true);
        for _ in 0..4 {
            registry.increment(f(1), false);
        }
        registry.increment(b(0), true);
        registry.increment(b(0), false);

        // b0 has 1 stitch, created at row 4; f1 has 4 stitches from row 0
        registry.transfer(b(0), f(1), false);
        let entry = registry.get(f(1)).unwrap();
        assert_eq!(entry.loop_count, 2);
        assert_eq!(entry.stitch_count, 1);
        assert_eq!(entry.created_row, 4);
    }

    #[test]
    fn test_split_keeps_fresh_source() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(3), true);
        registry.increment(f(3), false);
        registry.increment(f(3), false);

        registry.transfer(f(3), b(3), true);
        let source = registry.get(f(3)).unwrap();
        assert_eq!(source.loop_count, 1);
        assert_eq!(source.stitch_count, 0);
        assert_eq!(source.created_row, 2);
        assert_eq!(registry.get(b(3)).unwrap().loop_count, 1);
    }

    #[test]
    fn test_empty_transfer_leaves_no_zero_entries() {
        let mut registry = NeedleRegistry::new();
        registry.transfer(f(5), b(5), false);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_row_count_never_decreases() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(0), true);
        registry.increment(f(0), false);
        registry.increment(f(0), false);
        assert_eq!(registry.row_count(), 2);

        registry.remove(f(0));
        assert!(registry.is_empty());
        assert_eq!(registry.row_count(), 2);
    }

    #[test]
    fn test_held_rows() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(0), true);
        registry.increment(f(1), true);
        for _ in 0..5 {
            registry.increment(f(0), false);
        }
        assert_eq!(registry.held_rows(f(0)), Some(0));
        assert_eq!(registry.held_rows(f(1)), Some(5));
        assert_eq!(registry.held_rows(f(9)), None);
    }

    #[test]
    fn test_min_max_needle() {
        let mut registry = NeedleRegistry::new();
        assert_eq!(registry.min_needle(None), None);
        assert_eq!(registry.max_needle(Some(Bed::Front)), None);

        registry.increment(f(-3), true);
        registry.increment(f(4), true);
        registry.increment(b(9), true);
        assert_eq!(registry.min_needle(Some(Bed::Front)), Some(-3));
        assert_eq!(registry.max_needle(Some(Bed::Front)), Some(4));
        assert_eq!(registry.max_needle(None), Some(9));
        assert_eq!(registry.active_needles(Bed::Back), vec![9]);
    }

    #[test]
    fn test_sorted_order() {
        let mut registry = NeedleRegistry::new();
        registry.increment(b(2), true);
        registry.increment(f(1), true);
        registry.increment(f(2), true);

        let order: Vec<_> = registry.sorted(None).into_iter().map(|(bn, _)| bn).collect();
        assert_eq!(order, vec![f(2), b(2), f(1)]);
    }

    #[test]
    fn test_rack_sorted_order() {
        let mut registry = NeedleRegistry::new();
        registry.increment(f(1), true);
        registry.increment(b(1), true);
        registry.increment(f(2), true);

        // at rack 1, b1 sits at position 2 next to f2
        let order = registry.rack_sorted(1.0);
        assert_eq!(order, vec![f(2), b(1), f(1)]);

        // at rack 0.25, b1 sits between f1 and f2
        let order = registry.rack_sorted(0.25);
        assert_eq!(order, vec![f(2), b(1), f(1)]);

        let order = registry.rack_sorted(-0.25);
        assert_eq!(order, vec![f(2), f(1), b(1)]);
    }
}
