//! Online segment accumulator.

use std::cmp::Ordering;

use rand::Rng;

use crate::tape::Value;

/// Running description of a segment of values: one uniformly sampled
/// representative, whether every value seen so far compares equal, and the
/// running count. O(1) space, built in a single forward pass.
///
/// This is what lets the sorter pick a pivot without ever materializing a
/// segment: the representative doubles as the partitioning key, and the
/// equality flag detects the degenerate all-equal segment that no pivot can
/// shrink.
#[derive(Debug, Clone)]
pub struct SegmentSummary {
    representative: Value,
    all_equal: bool,
    len: u64,
}

impl SegmentSummary {
    pub fn new() -> Self {
        SegmentSummary {
            representative: 0,
            all_equal: true,
            len: 0,
        }
    }

    /// Some value of the segment. After `k` updates each of the `k` values
    /// seen has been retained with probability exactly `1/k`.
    pub fn representative(&self) -> Value {
        self.representative
    }

    /// Whether all values seen compare equal under the comparator passed to
    /// [`SegmentSummary::update`]. Vacuously true for an empty summary.
    pub fn all_equal(&self) -> bool {
        self.all_equal
    }

    /// Number of values accumulated.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Folds one more value into the summary.
    ///
    /// The representative stays uniform by the size-1 reservoir argument:
    /// on the `k`-th call the incoming value replaces it with probability
    /// `1/k`, so the value seen on call `j` is still retained after call
    /// `k` with probability `1/j * (1 - 1/(j+1)) * ... * (1 - 1/k) = 1/k`.
    pub fn update<F, R>(&mut self, value: Value, compare: &F, rng: &mut R)
    where
        F: Fn(&Value, &Value) -> Ordering,
        R: Rng,
    {
        self.all_equal = self.all_equal
            && (self.len == 0 || compare(&self.representative, &value) == Ordering::Equal);

        if rng.gen_range(0..=self.len) == 0 {
            self.representative = value;
        }
        self.len += 1;
    }
}

impl Default for SegmentSummary {
    fn default() -> Self {
        SegmentSummary::new()
    }
}
