//! Bounded candidate queue: a fixed-capacity arena kept sorted ascending.
//!
//! The queue never grows past `capacity` slots. New batches are sorted on
//! their own and merged into the arena from the back, so an insertion costs
//! O(capacity + b·log b) for a batch of b results instead of a full re-sort.
//! Slots past `len` hold the infinite-distance sentinel.

use crate::types::ScoredResult;

#[derive(Debug)]
pub struct CandidateQueue {
    slots: Box<[ScoredResult]>,
    len: usize,
    scratch: Vec<ScoredResult>,
}

impl CandidateQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: vec![ScoredResult::SENTINEL; capacity].into_boxed_slice(),
            len: 0,
            scratch: Vec::with_capacity(capacity),
        }
    }

    /// Clear every slot back to the sentinel.
    pub fn reset(&mut self) {
        self.slots[..self.len].fill(ScoredResult::SENTINEL);
        self.len = 0;
    }

    /// Insert a batch, keeping only the `capacity` smallest entries overall.
    ///
    /// Entries with a non-finite distance can never be expanded and are dropped.
    pub fn insert_batch(&mut self, batch: &[ScoredResult]) {
        let cap = self.slots.len();
        self.scratch.clear();
        self.scratch
            .extend(batch.iter().filter(|r| r.distance.is_finite()).copied());
        if self.scratch.is_empty() {
            return;
        }
        self.scratch.sort_unstable_by(|a, b| a.cmp_key(b));
        self.scratch.truncate(cap);

        // Merge from the back. Writes land at index >= the next unread slot,
        // so nothing is overwritten before it is consumed. Anything that would
        // land at index >= cap is the largest remaining and is dropped.
        let mut i = self.len;
        let mut j = self.scratch.len();
        let mut k = i + j;
        while j > 0 {
            k -= 1;
            let take_existing = i > 0 && self.slots[i - 1].cmp_key(&self.scratch[j - 1]).is_gt();
            let next = if take_existing {
                i -= 1;
                self.slots[i]
            } else {
                j -= 1;
                self.scratch[j]
            };
            if k < cap {
                self.slots[k] = next;
            }
        }
        self.len = (self.len + self.scratch.len()).min(cap);
    }

    /// Smallest-distance entry, without removing it.
    #[inline]
    pub fn peek_min(&self) -> Option<ScoredResult> {
        if self.len == 0 {
            None
        } else {
            Some(self.slots[0])
        }
    }

    /// Remove and return the smallest-distance entry.
    pub fn pop_min(&mut self) -> Option<ScoredResult> {
        if self.len == 0 {
            return None;
        }
        let top = self.slots[0];
        self.slots.copy_within(1..self.len, 0);
        self.len -= 1;
        self.slots[self.len] = ScoredResult::SENTINEL;
        Some(top)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Occupied slots in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &ScoredResult> {
        self.slots[..self.len].iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn r(id: u32, d: f32) -> ScoredResult {
        ScoredResult::new(id, 0, d)
    }

    fn distances(q: &CandidateQueue) -> Vec<f32> {
        q.iter().map(|r| r.distance).collect()
    }

    #[test]
    fn test_overflow_keeps_four_smallest() {
        let mut q = CandidateQueue::new(4);
        q.insert_batch(&[
            r(1, 6.0),
            r(2, 2.0),
            r(3, 5.0),
            r(4, 1.0),
            r(5, 4.0),
            r(6, 3.0),
        ]);
        assert_eq!(q.len(), 4);
        assert_eq!(distances(&q), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_merge_across_batches() {
        let mut q = CandidateQueue::new(5);
        q.insert_batch(&[r(1, 10.0), r(2, 30.0)]);
        q.insert_batch(&[r(3, 20.0), r(4, 5.0), r(5, 40.0), r(6, 35.0)]);
        assert_eq!(distances(&q), vec![5.0, 10.0, 20.0, 30.0, 35.0]);
        q.insert_batch(&[r(7, 1.0)]);
        assert_eq!(distances(&q), vec![1.0, 5.0, 10.0, 20.0, 30.0]);
        q.insert_batch(&[r(8, 100.0)]);
        assert_eq!(distances(&q), vec![1.0, 5.0, 10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_pop_min_shifts_and_refills_sentinel() {
        let mut q = CandidateQueue::new(3);
        q.insert_batch(&[r(1, 3.0), r(2, 1.0), r(3, 2.0)]);
        assert_eq!(q.pop_min().map(|c| c.node_id), Some(2));
        assert_eq!(q.peek_min().map(|c| c.node_id), Some(3));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop_min().map(|c| c.node_id), Some(3));
        assert_eq!(q.pop_min().map(|c| c.node_id), Some(1));
        assert!(q.pop_min().is_none());
        assert!(q.peek_min().is_none());
    }

    #[test]
    fn test_ties_ordered_by_node_id() {
        let mut q = CandidateQueue::new(4);
        q.insert_batch(&[r(9, 1.0), r(3, 1.0), r(5, 1.0)]);
        let ids: Vec<u32> = q.iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![3, 5, 9]);
    }

    #[test]
    fn test_reset_empties_queue() {
        let mut q = CandidateQueue::new(2);
        q.insert_batch(&[r(1, 1.0), r(2, 2.0)]);
        q.reset();
        assert!(q.is_empty());
        q.insert_batch(&[r(3, 7.0)]);
        assert_eq!(q.peek_min().map(|c| c.node_id), Some(3));
    }

    #[test]
    fn test_non_finite_distances_are_dropped() {
        let mut q = CandidateQueue::new(4);
        q.insert_batch(&[r(1, f32::INFINITY), r(2, f32::NAN), r(3, 2.0)]);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_invariant_matches_reference_sort() {
        let mut rng = StdRng::seed_from_u64(7);
        let cap = 16;
        let mut q = CandidateQueue::new(cap);
        let mut all = Vec::new();
        let mut next_id = 0u32;
        for _ in 0..50 {
            let n = rng.gen_range(0..12);
            let batch: Vec<ScoredResult> = (0..n)
                .map(|_| {
                    next_id += 1;
                    r(next_id, rng.gen_range(0..40) as f32)
                })
                .collect();
            all.extend_from_slice(&batch);
            q.insert_batch(&batch);

            let got: Vec<_> = q.iter().map(|c| c.sort_key()).collect();
            assert!(got.windows(2).all(|w| w[0] <= w[1]));

            let mut expected: Vec<_> = all.iter().map(|c| c.sort_key()).collect();
            expected.sort();
            expected.truncate(cap);
            assert_eq!(got, expected);
        }
    }
}
