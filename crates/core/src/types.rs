//! Values that flow between the scheduler, the fetch pipeline and the collectors.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A graph node queued for expansion at a given layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub node_id: u32,
    pub level: usize,
}

impl Candidate {
    pub fn new(node_id: u32, level: usize) -> Self {
        Self { node_id, level }
    }
}

/// A candidate annotated with its distance to the current query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoredResult {
    pub node_id: u32,
    pub level: usize,
    pub distance: f32,
}

impl ScoredResult {
    pub fn new(node_id: u32, level: usize, distance: f32) -> Self {
        Self {
            node_id,
            level,
            distance,
        }
    }

    /// Placeholder for an unused queue slot.
    pub(crate) const SENTINEL: ScoredResult = ScoredResult {
        node_id: u32::MAX,
        level: 0,
        distance: f32::INFINITY,
    };

    /// Total order used by every bounded collection: distance, then node id.
    #[inline]
    pub fn sort_key(&self) -> (OrderedFloat<f32>, u32) {
        (OrderedFloat(self.distance), self.node_id)
    }

    #[inline]
    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }

    pub fn candidate(&self) -> Candidate {
        Candidate::new(self.node_id, self.level)
    }
}

/// Every scored neighbor produced by one expansion task, in neighbor-list order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultGroup {
    /// The task this group answers.
    pub task: Candidate,
    /// Surviving neighbors with their distances. `results.len()` is the emitted count.
    pub results: Vec<ScoredResult>,
    /// Neighbors dropped by the visited filter (base layer only).
    pub filtered: usize,
}

/// Per-query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Node at which base-layer search started.
    pub base_entry: u32,
    /// Expansion tasks issued on upper layers.
    pub upper_hops: usize,
    /// Expansion tasks issued on the base layer (including the entry task).
    pub base_hops: usize,
    /// Base-layer vectors fetched and scored.
    pub evaluated: usize,
    /// Base-layer neighbors rejected by the visited filter.
    pub filtered: usize,
}

/// Output of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutput {
    /// `(node_id, distance)` pairs, ascending by distance, at most `ef` long.
    pub neighbors: Vec<(u32, f32)>,
    pub stats: SearchStats,
}

impl SearchOutput {
    pub fn ids(&self) -> Vec<u32> {
        self.neighbors.iter().map(|&(id, _)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_breaks_ties_by_node_id() {
        let a = ScoredResult::new(3, 0, 1.0);
        let b = ScoredResult::new(7, 0, 1.0);
        assert_eq!(a.cmp_key(&b), Ordering::Less);
        assert_eq!(b.cmp_key(&a), Ordering::Greater);
    }

    #[test]
    fn test_sentinel_sorts_last() {
        let real = ScoredResult::new(u32::MAX - 1, 0, f32::MAX);
        assert_eq!(real.cmp_key(&ScoredResult::SENTINEL), Ordering::Less);
    }
}
