//! Sorted, non-overlapping interval set over `u64` addresses (spec §9:
//! "An implementation as a sorted non-overlapping `Vec<(lo,hi)>` per set
//! is sufficient; binary search for `contains`; merge adjacent on `set`,
//! split on `reset`."). Used three times by `MemoryController` — once
//! each for read, write, and execute permission.

/// A set of disjoint half-open ranges `[lo, hi)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntervalSet {
    ranges: Vec<(u64, u64)>,
}

impl IntervalSet {
    pub fn new() -> Self {
        IntervalSet { ranges: Vec::new() }
    }

    /// True if `addr` falls inside any stored range.
    pub fn contains(&self, addr: u64) -> bool {
        match self.ranges.binary_search_by(|&(lo, _)| lo.cmp(&addr)) {
            Ok(_) => true,
            Err(idx) => {
                if idx == 0 {
                    false
                } else {
                    let (_, hi) = self.ranges[idx - 1];
                    addr < hi
                }
            }
        }
    }

    /// Adds `[lo, hi)` to the set, merging with any adjacent or
    /// overlapping ranges. A no-op for an empty range (`lo >= hi`).
    pub fn set(&mut self, lo: u64, hi: u64) {
        if lo >= hi {
            return;
        }
        let start = match self.ranges.binary_search_by(|&(l, _)| l.cmp(&lo)) {
            Ok(i) => i,
            Err(i) => i,
        };
        // Back up over any range that might overlap/touch from the left.
        let mut start = start;
        while start > 0 && self.ranges[start - 1].1 >= lo {
            start -= 1;
        }
        let mut end = start;
        let mut new_lo = lo;
        let mut new_hi = hi;
        while end < self.ranges.len() && self.ranges[end].0 <= new_hi {
            let (l, h) = self.ranges[end];
            new_lo = new_lo.min(l);
            new_hi = new_hi.max(h);
            end += 1;
        }
        self.ranges.splice(start..end, std::iter::once((new_lo, new_hi)));
    }

    /// Removes `[lo, hi)` from the set, splitting any range that only
    /// partially overlaps it.
    pub fn reset(&mut self, lo: u64, hi: u64) {
        if lo >= hi {
            return;
        }
        let mut result = Vec::with_capacity(self.ranges.len() + 1);
        for &(l, h) in &self.ranges {
            if h <= lo || l >= hi {
                // No overlap.
                result.push((l, h));
                continue;
            }
            if l < lo {
                result.push((l, lo));
            }
            if h > hi {
                result.push((hi, h));
            }
        }
        self.ranges = result;
    }

    /// Every byte in `[lo, hi)` is contained in the set.
    pub fn contains_range(&self, lo: u64, hi: u64) -> bool {
        if lo >= hi {
            return true;
        }
        let idx = match self.ranges.binary_search_by(|&(l, _)| l.cmp(&lo)) {
            Ok(i) => i,
            Err(i) => i.saturating_sub(1),
        };
        if idx >= self.ranges.len() {
            return false;
        }
        let (l, h) = self.ranges[idx];
        l <= lo && hi <= h
    }

    #[cfg(test)]
    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn set_merges_adjacent_ranges() {
        let mut s = IntervalSet::new();
        s.set(0, 10);
        s.set(10, 20);
        assert_eq!(s.ranges(), &[(0, 20)]);
    }

    #[test]
    fn set_merges_overlapping_ranges() {
        let mut s = IntervalSet::new();
        s.set(0, 10);
        s.set(5, 15);
        assert_eq!(s.ranges(), &[(0, 15)]);
    }

    #[test]
    fn disjoint_ranges_stay_separate() {
        let mut s = IntervalSet::new();
        s.set(0, 10);
        s.set(20, 30);
        assert_eq!(s.ranges(), &[(0, 10), (20, 30)]);
        assert!(!s.contains(15));
        assert!(s.contains(5));
        assert!(s.contains(25));
        assert!(!s.contains(30));
    }

    #[test]
    fn reset_splits_a_range() {
        let mut s = IntervalSet::new();
        s.set(0, 100);
        s.reset(40, 60);
        assert_eq!(s.ranges(), &[(0, 40), (60, 100)]);
        assert!(!s.contains(50));
        assert!(s.contains(39));
        assert!(s.contains(60));
    }

    #[test]
    fn reset_can_remove_a_range_entirely() {
        let mut s = IntervalSet::new();
        s.set(10, 20);
        s.reset(0, 100);
        assert!(s.ranges().is_empty());
    }

    #[test]
    fn contains_range_requires_full_coverage() {
        let mut s = IntervalSet::new();
        s.set(0, 10);
        s.set(20, 30);
        assert!(s.contains_range(2, 8));
        assert!(!s.contains_range(5, 25));
        assert!(!s.contains_range(12, 18));
    }

    fn is_sorted_and_disjoint(ranges: &[(u64, u64)]) -> bool {
        ranges.windows(2).all(|w| w[0].1 < w[1].0) && ranges.iter().all(|&(l, h)| l < h)
    }

    proptest! {
        /// Mirrors `aero-mem`'s property module: any sequence of `set`/`reset`
        /// calls over a bounded address range leaves the backing `Vec` sorted
        /// and non-overlapping, and agrees byte-for-byte with a `HashMap`-backed
        /// reference model of the same operations.
        #[test]
        fn set_reset_sequences_stay_sorted_and_agree_with_model(
            ops in proptest::collection::vec(
                (proptest::bool::ANY, 0u64..64, 1u64..16), 0..64)
        ) {
            let mut set = IntervalSet::new();
            let mut model = std::collections::HashSet::new();
            for (is_set, lo, len) in ops {
                let hi = lo + len;
                if is_set {
                    set.set(lo, hi);
                    for addr in lo..hi {
                        model.insert(addr);
                    }
                } else {
                    set.reset(lo, hi);
                    for addr in lo..hi {
                        model.remove(&addr);
                    }
                }
            }
            prop_assert!(is_sorted_and_disjoint(set.ranges()));
            for addr in 0u64..80 {
                prop_assert_eq!(set.contains(addr), model.contains(&addr));
            }
        }
    }
}
