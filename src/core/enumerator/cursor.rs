//! Restartable cursor over the pending pair space.

use super::PairKey;
use std::collections::HashSet;

/// Lazily yields every unresolved canonical pair over a set of indices.
///
/// Emission order is row-major over the sorted indices: `(i0, i1), (i0, i2),
/// ..., (i1, i2), ...`. Pairs already in `resolved` are skipped, and
/// [`exclude`](Self::exclude) drops an index from everything not yet emitted.
/// [`across`](Self::across) narrows the space to pairs that straddle two
/// collections.
#[derive(Debug)]
pub struct PairEnumerator {
    indices: Vec<u32>,
    resolved: HashSet<PairKey>,
    excluded: HashSet<u32>,
    side: Option<HashSet<u32>>,
    row: usize,
    col: usize,
    total: u64,
    already_resolved: u64,
    emitted: u64,
}

impl PairEnumerator {
    /// Create a cursor over `indices`, skipping keys in `resolved`.
    ///
    /// Resolved keys that reference an index outside `indices` are ignored.
    pub fn new(indices: impl IntoIterator<Item = u32>, resolved: HashSet<PairKey>) -> Self {
        let mut indices: Vec<u32> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();

        let n = indices.len() as u64;
        let total = n * n.saturating_sub(1) / 2;

        let members: HashSet<u32> = indices.iter().copied().collect();
        let resolved: HashSet<PairKey> = resolved
            .into_iter()
            .filter(|k| members.contains(&k.first()) && members.contains(&k.second()))
            .collect();
        let already_resolved = resolved.len() as u64;

        Self {
            indices,
            resolved,
            excluded: HashSet::new(),
            side: None,
            row: 0,
            col: 1,
            total,
            already_resolved,
            emitted: 0,
        }
    }

    /// Keep only pairs with exactly one member in `side`.
    ///
    /// Call before the first pull; resolved keys within one side stop
    /// counting towards the pair space.
    pub fn across(mut self, side: impl IntoIterator<Item = u32>) -> Self {
        let side: HashSet<u32> = side
            .into_iter()
            .filter(|index| self.indices.binary_search(index).is_ok())
            .collect();
        let inside = side.len() as u64;
        let outside = self.indices.len() as u64 - inside;

        self.resolved
            .retain(|key| side.contains(&key.first()) != side.contains(&key.second()));
        self.already_resolved = self.resolved.len() as u64;
        self.total = inside * outside;
        self.side = Some(side);
        self
    }

    /// Whether `key` belongs to the pair space at all
    fn is_eligible(&self, key: PairKey) -> bool {
        match &self.side {
            None => true,
            Some(side) => side.contains(&key.first()) != side.contains(&key.second()),
        }
    }

    /// Size of the pair space: resolved before this run, emitted, and pending
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Pairs that were resolved before the cursor was created
    pub fn already_resolved(&self) -> u64 {
        self.already_resolved
    }

    /// Pairs handed out so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Pairs still to be handed out
    pub fn remaining(&self) -> u64 {
        self.total
            .saturating_sub(self.already_resolved)
            .saturating_sub(self.emitted)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Hand out up to `max` pairs
    pub fn next_batch(&mut self, max: usize) -> Vec<PairKey> {
        self.by_ref().take(max).collect()
    }

    /// Remove `index` from every pair not yet emitted.
    ///
    /// Returns how many pending pairs were dropped.
    pub fn exclude(&mut self, index: u32) -> u64 {
        if self.excluded.contains(&index) {
            return 0;
        }
        let Ok(position) = self.indices.binary_search(&index) else {
            return 0;
        };

        let mut dropped = 0;
        for (other_position, &other) in self.indices.iter().enumerate() {
            if other_position == position || self.excluded.contains(&other) {
                continue;
            }
            let Some(key) = PairKey::new(index, other) else {
                continue;
            };
            if self.resolved.contains(&key) || !self.is_eligible(key) {
                continue;
            }

            let (lo, hi) = if position < other_position {
                (position, other_position)
            } else {
                (other_position, position)
            };
            if !self.is_behind_cursor(lo, hi) {
                dropped += 1;
            }
        }

        self.excluded.insert(index);
        self.total -= dropped;
        dropped
    }

    fn is_behind_cursor(&self, lo: usize, hi: usize) -> bool {
        lo < self.row || (lo == self.row && hi < self.col)
    }
}

impl Iterator for PairEnumerator {
    type Item = PairKey;

    fn next(&mut self) -> Option<PairKey> {
        let n = self.indices.len();

        while self.row + 1 < n {
            let a = self.indices[self.row];

            if !self.excluded.contains(&a) {
                while self.col < n {
                    let b = self.indices[self.col];
                    self.col += 1;

                    if self.excluded.contains(&b) {
                        continue;
                    }
                    let key = PairKey { a, b };
                    if self.resolved.contains(&key) || !self.is_eligible(key) {
                        continue;
                    }

                    self.emitted += 1;
                    return Some(key);
                }
            }

            self.row += 1;
            self.col = self.row + 1;
        }

        None
    }
}
