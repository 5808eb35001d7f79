//! Grain identifiers and grain-boundary patch keys.

use std::fmt;

/// Identifier of a grain in the reconstructed microstructure.
///
/// Signed so that the exterior sentinels used by reconstruction pipelines
/// (`-1`, `0`) can be carried through unchanged.
pub type GrainId = i32;

/// The unordered pair of grains on either side of a boundary patch.
///
/// Stored with the smaller id first so that both orientations of a face label
/// resolve to the same patch key.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GrainPair {
    low: GrainId,
    high: GrainId,
}

impl GrainPair {
    /// Build the canonical pair for two grain ids, in either order.
    ///
    /// Returns `None` when both ids are the same grain, which never bounds a
    /// patch.
    #[inline]
    pub fn new(a: GrainId, b: GrainId) -> Option<Self> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Some(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Some(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The smaller grain id.
    #[inline]
    pub fn low(self) -> GrainId {
        self.low
    }

    /// The larger grain id.
    #[inline]
    pub fn high(self) -> GrainId {
        self.high
    }

    /// Whether `grain` is one of the two sides of this patch.
    #[inline]
    pub fn contains(self, grain: GrainId) -> bool {
        self.low == grain || self.high == grain
    }

    /// The pair as an ordered array `[low, high]`.
    #[inline]
    pub fn as_array(self) -> [GrainId; 2] {
        [self.low, self.high]
    }
}

impl fmt::Display for GrainPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.low, self.high)
    }
}
