//! Epoch-tagged Bloom filter used to skip already-visited base-layer nodes.
//!
//! Each bucket stores the epoch of the query that last set it instead of a
//! bit. `reset()` advances the epoch, so a new query starts with every bucket
//! reading as empty without touching the array. A full memset happens only
//! when the u16 epoch wraps, once every 65534 queries.

use crate::config::VisitedFilterConfig;

/// MurmurHash2 mixing constant.
const MURMUR_M: u32 = 0x5bd1e995;

/// MurmurHash2 specialised to a single 4-byte key.
#[inline]
pub fn murmur2_u32(key: u32, seed: u32) -> u32 {
    let mut k = key.wrapping_mul(MURMUR_M);
    k ^= k >> 24;
    k = k.wrapping_mul(MURMUR_M);

    let mut h = seed ^ 4;
    h = h.wrapping_mul(MURMUR_M);
    h ^= k;

    h ^= h >> 13;
    h = h.wrapping_mul(MURMUR_M);
    h ^= h >> 15;
    h
}

/// Probabilistic per-query visited set. Never reports a false negative.
#[derive(Debug)]
pub struct VisitedFilter {
    buckets: Vec<u16>,
    epoch: u16,
    hash_count: usize,
    seed: u32,
}

impl VisitedFilter {
    pub fn new(config: &VisitedFilterConfig) -> Self {
        Self {
            buckets: vec![0u16; config.bucket_count.max(1)],
            epoch: 1,
            hash_count: config.hash_count.max(1),
            seed: config.seed,
        }
    }

    /// Start a new query. O(1) amortized.
    pub fn reset(&mut self) {
        if self.epoch == u16::MAX {
            self.buckets.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    #[inline]
    fn bucket(&self, node_id: u32, hash_fn: usize) -> usize {
        let seed = self.seed.wrapping_add(hash_fn as u32);
        murmur2_u32(node_id, seed) as usize % self.buckets.len()
    }

    /// Returns `true` if `node_id` was already present in this epoch.
    /// Otherwise marks it present and returns `false`.
    #[inline]
    pub fn check_and_insert(&mut self, node_id: u32) -> bool {
        let mut matched = 0;
        for i in 0..self.hash_count {
            let idx = self.bucket(node_id, i);
            if self.buckets[idx] == self.epoch {
                matched += 1;
            } else {
                self.buckets[idx] = self.epoch;
            }
        }
        matched == self.hash_count
    }

    /// Read-only membership probe.
    pub fn contains(&self, node_id: u32) -> bool {
        (0..self.hash_count).all(|i| self.buckets[self.bucket(node_id, i)] == self.epoch)
    }

    pub fn epoch(&self) -> u16 {
        self.epoch
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub fn hash_count(&self) -> usize {
        self.hash_count
    }

    /// Expected false-positive rate after `inserted` distinct keys: `(1 - e^(-k·n/m))^k`.
    pub fn expected_false_positive_rate(&self, inserted: usize) -> f64 {
        false_positive_rate(self.hash_count, self.buckets.len(), inserted)
    }
}

pub(crate) fn false_positive_rate(hash_count: usize, bucket_count: usize, inserted: usize) -> f64 {
    let k = hash_count.max(1) as f64;
    let m = bucket_count.max(1) as f64;
    (1.0 - (-k * inserted as f64 / m).exp()).powf(k)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter(bucket_count: usize, hash_count: usize) -> VisitedFilter {
        VisitedFilter::new(&VisitedFilterConfig {
            bucket_count,
            hash_count,
            seed: 1,
        })
    }

    #[test]
    fn test_murmur2_mixes_seed() {
        assert_ne!(murmur2_u32(42, 1), murmur2_u32(42, 2));
        assert_eq!(murmur2_u32(42, 1), murmur2_u32(42, 1));
    }

    #[test]
    fn test_check_and_insert_then_present() {
        let mut f = filter(1024, 3);
        assert!(!f.check_and_insert(7));
        assert!(f.check_and_insert(7));
        assert!(f.contains(7));
    }

    #[test]
    fn test_no_false_negatives() {
        let mut f = filter(64, 2); // deliberately tiny: many collisions
        let keys: Vec<u32> = (0..500).map(|i| i * 7919).collect();
        for &k in &keys {
            f.check_and_insert(k);
        }
        for &k in &keys {
            assert!(f.check_and_insert(k), "key {k} lost");
        }
    }

    #[test]
    fn test_reset_forgets_previous_epoch() {
        let mut f = filter(1 << 12, 3);
        for k in 0..100 {
            f.check_and_insert(k);
        }
        f.reset();
        for k in 0..100 {
            assert!(!f.contains(k));
        }
        assert!(!f.check_and_insert(5));
    }

    #[test]
    fn test_epoch_wrap_clears_buckets() {
        let mut f = filter(16, 1);
        for _ in 0..65534 {
            f.reset();
        }
        assert_eq!(f.epoch(), u16::MAX);
        f.check_and_insert(3);

        f.reset();
        assert_eq!(f.epoch(), 1);
        assert!(!f.contains(3));
    }

    #[test]
    fn test_false_positive_rate_is_low_when_sized() {
        let mut f = filter(1 << 18, 3);
        for k in 0..5_000u32 {
            f.check_and_insert(k);
        }
        let false_hits = (1_000_000..1_010_000u32).filter(|&k| f.contains(k)).count();
        assert!(false_hits < 50, "too many false positives: {false_hits}");
        assert!(f.expected_false_positive_rate(5_000) < 1e-3);
    }
}
