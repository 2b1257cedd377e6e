//! Readers for the little-endian vector files used by the search driver.
//!
//! Layout: `u32 count`, `u32 dim`, then `count * dim` 4-byte values.
//! Query files hold f32 values, ground-truth files hold i32 node ids.

use std::fs;
use std::io;
use std::path::Path;

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Split a file into its header and fixed-width rows of 4-byte words.
fn read_rows(path: &Path) -> io::Result<(usize, usize, Vec<u8>)> {
    let buf = fs::read(path)?;
    if buf.len() < 8 {
        return Err(invalid(format!("{:?}: missing 8-byte header", path)));
    }
    let count = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let dim = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| invalid(format!("{:?}: header overflows ({count} x {dim})", path)))?;
    if buf.len() - 8 != expected {
        return Err(invalid(format!(
            "{:?}: expected {} payload bytes for {} x {}, found {}",
            path,
            expected,
            count,
            dim,
            buf.len() - 8
        )));
    }
    Ok((count, dim, buf[8..].to_vec()))
}

fn words(data: &[u8]) -> impl Iterator<Item = [u8; 4]> + '_ {
    data.chunks_exact(4).map(|c| [c[0], c[1], c[2], c[3]])
}

/// Read `count` f32 vectors. Returns `(dim, vectors)`.
pub fn read_fvecs(path: &Path) -> io::Result<(usize, Vec<Vec<f32>>)> {
    let (_, dim, data) = read_rows(path)?;
    if dim == 0 {
        return Ok((0, Vec::new()));
    }
    let values: Vec<f32> = words(&data).map(f32::from_le_bytes).collect();
    Ok((dim, values.chunks(dim).map(|c| c.to_vec()).collect()))
}

/// Read ground-truth neighbor ids, `k` per query. Returns `(k, ids)`.
pub fn read_ground_truth(path: &Path) -> io::Result<(usize, Vec<Vec<i32>>)> {
    let (_, k, data) = read_rows(path)?;
    if k == 0 {
        return Ok((0, Vec::new()));
    }
    let values: Vec<i32> = words(&data).map(i32::from_le_bytes).collect();
    Ok((k, values.chunks(k).map(|c| c.to_vec()).collect()))
}

/// Fraction of the first `k` ground-truth ids found among the first `k` predictions.
///
/// With fewer than `k` ground-truth ids the denominator shrinks to match.
pub fn recall_at_k(predicted: &[u32], ground_truth: &[i32], k: usize) -> f64 {
    let denom = k.min(ground_truth.len());
    if denom == 0 {
        return 0.0;
    }
    let truth: std::collections::HashSet<u32> = ground_truth
        .iter()
        .take(k)
        .filter(|&&id| id >= 0)
        .map(|&id| id as u32)
        .collect();
    let found = predicted.iter().take(k).filter(|id| truth.contains(id)).count();
    found as f64 / denom as f64
}
