//! # Enumerator Module
//!
//! Canonical pair identities and the lazy cursor that hands them out.
//!
//! The comparison space is every `(i, j)` with `i < j` over the indices of
//! signed images. The coordinator owns the single [`PairEnumerator`] and
//! dispatches its output in batches, so no key is ever handed to two
//! in-flight workers.

mod cursor;

pub use cursor::PairEnumerator;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical identifier of an unordered pair, always `first < second`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PairKey {
    a: u32,
    b: u32,
}

impl PairKey {
    /// Build the canonical key for two indices in either order.
    ///
    /// Returns `None` for a self-pair.
    pub fn new(x: u32, y: u32) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }

    /// The smaller index
    pub fn first(&self) -> u32 {
        self.a
    }

    /// The larger index
    pub fn second(&self) -> u32 {
        self.b
    }

    pub fn contains(&self, index: u32) -> bool {
        self.a == index || self.b == index
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.a, self.b)
    }
}
