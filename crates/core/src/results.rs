//! Top-`ef` result set for one query.

use crate::types::ScoredResult;

/// Bounded result set kept sorted ascending; the worst entry is the last slot.
#[derive(Debug)]
pub struct ResultSet {
    slots: Box<[ScoredResult]>,
    len: usize,
}

impl ResultSet {
    pub fn new(ef: usize) -> Self {
        Self {
            slots: vec![ScoredResult::SENTINEL; ef.max(1)].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn reset(&mut self) {
        self.slots[..self.len].fill(ScoredResult::SENTINEL);
        self.len = 0;
    }

    /// Offer a result. Returns `true` if it was admitted.
    ///
    /// While the set has fewer than `ef` entries everything finite is admitted.
    /// Once full, a result is admitted only if its distance is strictly smaller
    /// than the current worst, which is evicted.
    pub fn offer(&mut self, result: ScoredResult) -> bool {
        if !result.distance.is_finite() {
            return false;
        }
        let ef = self.slots.len();
        if self.len == ef {
            if result.distance >= self.slots[ef - 1].distance {
                return false;
            }
            // evict worst
            self.len -= 1;
        }
        let pos = self.slots[..self.len].partition_point(|r| r.cmp_key(&result).is_lt());
        self.slots.copy_within(pos..self.len, pos + 1);
        self.slots[pos] = result;
        self.len += 1;
        true
    }

    /// Largest distance held, once the set is full; `+inf` before that.
    #[inline]
    pub fn threshold(&self) -> f32 {
        if self.is_full() {
            self.slots[self.len - 1].distance
        } else {
            f32::INFINITY
        }
    }

    pub fn worst(&self) -> Option<ScoredResult> {
        self.len.checked_sub(1).map(|i| self.slots[i])
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Results ascending by distance, `min(ef, admitted)` long.
    pub fn finalize(&self) -> Vec<ScoredResult> {
        self.slots[..self.len].to_vec()
    }
}
