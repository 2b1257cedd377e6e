//! Squared Euclidean distance between f32 vectors.
//!
//! AVX2+FMA on x86_64 when available at runtime, otherwise an 8-lane scalar
//! loop. Both paths use a fixed accumulation order, so the same pair of
//! vectors always yields the same value on a given machine.

/// Squared Euclidean distance (L2²). Both slices must have the same length.
#[inline]
#[allow(unreachable_code)]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "distance operands differ in length");
    #[cfg(target_arch = "x86_64")]
    {
        if std::arch::is_x86_feature_detected!("avx2") && std::arch::is_x86_feature_detected!("fma")
        {
            return unsafe { avx2_l2_sq(a, b) };
        }
    }
    lanes_l2_sq(a, b)
}

fn lanes_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; 8];
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let tail_a = chunks_a.remainder();
    let tail_b = chunks_b.remainder();
    for (ca, cb) in chunks_a.zip(chunks_b) {
        for lane in 0..8 {
            let d = ca[lane] - cb[lane];
            acc[lane] += d * d;
        }
    }
    let mut sum = ((acc[0] + acc[4]) + (acc[1] + acc[5])) + ((acc[2] + acc[6]) + (acc[3] + acc[7]));
    for (x, y) in tail_a.iter().zip(tail_b) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::*;

#[cfg(target_arch = "x86_64")]
#[inline]
#[target_feature(enable = "avx2")]
unsafe fn hsum_f32x8(v: __m256) -> f32 {
    let hi128 = _mm256_extractf128_ps(v, 1);
    let lo128 = _mm256_castps256_ps128(v);
    let sum128 = _mm_add_ps(lo128, hi128);
    let hi64 = _mm_movehl_ps(sum128, sum128);
    let sum64 = _mm_add_ps(sum128, hi64);
    let hi32 = _mm_shuffle_ps(sum64, sum64, 0x55);
    _mm_cvtss_f32(_mm_add_ss(sum64, hi32))
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2,fma")]
unsafe fn avx2_l2_sq(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().min(b.len());
    let a_ptr = a.as_ptr();
    let b_ptr = b.as_ptr();

    let mut s0 = _mm256_setzero_ps();
    let mut s1 = _mm256_setzero_ps();

    let chunks = len / 16;
    for i in 0..chunks {
        let base = i * 16;
        let d0 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base)),
            _mm256_loadu_ps(b_ptr.add(base)),
        );
        let d1 = _mm256_sub_ps(
            _mm256_loadu_ps(a_ptr.add(base + 8)),
            _mm256_loadu_ps(b_ptr.add(base + 8)),
        );
        s0 = _mm256_fmadd_ps(d0, d0, s0);
        s1 = _mm256_fmadd_ps(d1, d1, s1);
    }

    let mut sum = hsum_f32x8(_mm256_add_ps(s0, s1));

    for i in (chunks * 16)..len {
        let d = *a_ptr.add(i) - *b_ptr.add(i);
        sum += d * d;
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_sq_known_value() {
        let a = [0.0, 0.0, 0.0];
        let b = [3.0, 4.0, 0.0];
        assert_eq!(l2_sq(&a, &b), 25.0);
    }

    #[test]
    fn test_l2_sq_self_is_zero() {
        let v: Vec<f32> = (0..37).map(|i| i as f32 * 0.25 - 3.0).collect();
        assert_eq!(l2_sq(&v, &v), 0.0);
    }

    #[test]
    fn test_lanes_match_naive_sum() {
        let a: Vec<f32> = (0..100).map(|i| (i % 7) as f32).collect();
        let b: Vec<f32> = (0..100).map(|i| (i % 5) as f32).collect();
        let naive: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
        // small integers: every partial sum is exact
        assert_eq!(lanes_l2_sq(&a, &b), naive);
        assert_eq!(l2_sq(&a, &b), naive);
    }

    #[test]
    fn test_repeated_calls_are_bit_identical() {
        let a: Vec<f32> = (0..129).map(|i| (i as f32).sin()).collect();
        let b: Vec<f32> = (0..129).map(|i| (i as f32).cos()).collect();
        let first = l2_sq(&a, &b);
        for _ in 0..10 {
            assert_eq!(l2_sq(&a, &b).to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_empty_vectors() {
        assert_eq!(l2_sq(&[], &[]), 0.0);
    }
}
