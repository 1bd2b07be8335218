//! Groups images into clusters using transitive relationships.
//!
//! If A matches B and B matches C, then {A, B, C} forms a single group
//! even if A doesn't directly match C.

use super::{PairVerdict, Verdict};
use crate::core::checkpoint::{CheckpointStore, ImageRecord};
use crate::core::enumerator::PairKey;
use crate::error::CheckpointError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// A connected component of the similarity graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Image indices, ascending
    pub members: Vec<u32>,
    /// Paths, in the same order as `members`
    pub paths: Vec<PathBuf>,
    /// Weakest verdict linking the group; `None` for a singleton
    pub verdict: Option<Verdict>,
    /// Mean score over the edges inside the group; `None` for a singleton
    pub average_score: Option<f64>,
}

impl DuplicateGroup {
    /// Smallest index in the group
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Number of duplicates, not counting the first member
    pub fn duplicate_count(&self) -> usize {
        self.members.len().saturating_sub(1)
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Union-find over positions, with path halving and union by rank
struct DisjointSet {
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
            rank: vec![0; size],
        }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }
}

/// Partitions images into connected components of Duplicate/Similar edges
#[derive(Debug, Default)]
pub struct TransitiveGrouper;

impl TransitiveGrouper {
    pub fn new() -> Self {
        Self
    }

    /// Group `nodes` by the matching edges between them.
    ///
    /// Every node ends up in exactly one group (singletons included).
    /// Members are ascending, groups are ordered by their smallest member,
    /// and edges touching an unknown node or carrying a Distinct verdict are
    /// ignored. The output depends only on the inputs as sets.
    pub fn group(
        &self,
        nodes: &[(u32, PathBuf)],
        edges: &[(PairKey, PairVerdict)],
    ) -> Vec<DuplicateGroup> {
        let mut nodes: Vec<&(u32, PathBuf)> = nodes.iter().collect();
        nodes.sort_by_key(|(index, _)| *index);
        nodes.dedup_by_key(|(index, _)| *index);

        let position: HashMap<u32, usize> = nodes
            .iter()
            .enumerate()
            .map(|(pos, (index, _))| (*index, pos))
            .collect();

        let mut edges: Vec<&(PairKey, PairVerdict)> = edges
            .iter()
            .filter(|(key, verdict)| {
                verdict.verdict.is_match()
                    && position.contains_key(&key.first())
                    && position.contains_key(&key.second())
            })
            .collect();
        edges.sort_by_key(|(key, _)| *key);

        let mut set = DisjointSet::new(nodes.len());
        for (key, _) in &edges {
            set.union(position[&key.first()], position[&key.second()]);
        }

        let mut slot_of_root: HashMap<usize, usize> = HashMap::new();
        let mut groups: Vec<DuplicateGroup> = Vec::new();
        for (pos, (index, path)) in nodes.iter().enumerate() {
            let root = set.find(pos);
            let slot = *slot_of_root.entry(root).or_insert_with(|| {
                groups.push(DuplicateGroup {
                    members: Vec::new(),
                    paths: Vec::new(),
                    verdict: None,
                    average_score: None,
                });
                groups.len() - 1
            });
            groups[slot].members.push(*index);
            groups[slot].paths.push(path.clone());
        }

        let mut totals: HashMap<usize, (f64, usize, Verdict)> = HashMap::new();
        for (key, verdict) in &edges {
            let root = set.find(position[&key.first()]);
            let entry = totals.entry(root).or_insert((0.0, 0, Verdict::Duplicate));
            entry.0 += verdict.score;
            entry.1 += 1;
            entry.2 = entry.2.weakest(verdict.verdict);
        }

        for (root, (sum, count, weakest)) in totals {
            if let Some(&slot) = slot_of_root.get(&root) {
                groups[slot].verdict = Some(weakest);
                groups[slot].average_score = Some(sum / count as f64);
            }
        }

        groups
    }
}

/// Builds groups from the verdicts in a checkpoint store.
///
/// Read-only and safe to call mid-run; groups are a view over the stored
/// verdicts, never stored themselves.
pub struct ResultAggregator {
    store: Arc<dyn CheckpointStore>,
    grouper: TransitiveGrouper,
}

impl ResultAggregator {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            grouper: TransitiveGrouper::new(),
        }
    }

    /// Full partition of the signed images
    pub fn groups(&self) -> Result<Vec<DuplicateGroup>, CheckpointError> {
        let nodes: Vec<(u32, PathBuf)> = self
            .store
            .images()?
            .into_iter()
            .filter(|record: &ImageRecord| record.state.is_signed())
            .map(|record| (record.index, record.path))
            .collect();
        let edges = self.store.edges()?;

        Ok(self.grouper.group(&nodes, &edges))
    }

    /// Groups with at least two members
    pub fn duplicates(&self) -> Result<Vec<DuplicateGroup>, CheckpointError> {
        Ok(self
            .groups()?
            .into_iter()
            .filter(|group| !group.is_singleton())
            .collect())
    }
}
