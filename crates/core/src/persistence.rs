//! Graph snapshots on disk using bincode serialization.
//!
//! Writes use atomic temp-file + rename. A CRC32 checksum is appended as an
//! 8-byte footer: `[bincode payload][magic "HGF1"][CRC32 BE]`.

use crate::error::{EngineError, Result};
use crate::store::InMemoryGraph;
use std::fs;
use std::path::Path;

/// Magic bytes written before the CRC32 footer.
const SNAPSHOT_CRC_MAGIC: &[u8; 4] = b"HGF1";

/// Save a graph snapshot to `path` with an atomic write.
pub fn save_graph(graph: &InMemoryGraph, path: &Path) -> Result<()> {
    let bytes = bincode::serialize(graph).map_err(|e| EngineError::Snapshot(e.to_string()))?;
    let crc = crc32fast::hash(&bytes);

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");

    let mut output = Vec::with_capacity(bytes.len() + 8);
    output.extend_from_slice(&bytes);
    output.extend_from_slice(SNAPSHOT_CRC_MAGIC);
    output.extend_from_slice(&crc.to_be_bytes());

    fs::write(&tmp_path, &output)?;
    fs::rename(&tmp_path, path)?;

    tracing::info!(
        "Saved graph snapshot {:?} ({} nodes, {} bytes, CRC32={:#010x})",
        path,
        graph.node_count(),
        bytes.len(),
        crc
    );
    Ok(())
}

/// Load a graph snapshot, verifying the CRC32 footer when present and the
/// graph's structural invariants.
pub fn load_graph(path: &Path) -> Result<InMemoryGraph> {
    let raw = fs::read(path)?;

    let bytes = if raw.len() >= 8 && &raw[raw.len() - 8..raw.len() - 4] == SNAPSHOT_CRC_MAGIC {
        let (payload, footer) = raw.split_at(raw.len() - 8);
        let stored_crc = u32::from_be_bytes([footer[4], footer[5], footer[6], footer[7]]);
        let computed_crc = crc32fast::hash(payload);
        if computed_crc != stored_crc {
            return Err(EngineError::Snapshot(format!(
                "CRC32 mismatch: expected {:#010x}, got {:#010x}. File may be corrupted: {:?}",
                stored_crc, computed_crc, path
            )));
        }
        tracing::debug!("Snapshot CRC32 verified: {:#010x}", stored_crc);
        payload
    } else {
        tracing::warn!("Snapshot {:?} has no CRC32 checksum", path);
        &raw[..]
    };

    let graph: InMemoryGraph =
        bincode::deserialize(bytes).map_err(|e| EngineError::Snapshot(e.to_string()))?;
    graph
        .validate()
        .map_err(|e| EngineError::Snapshot(format!("validation failed: {}", e)))?;

    tracing::info!(
        "Loaded graph snapshot {:?} ({} nodes, {} levels, dimension {})",
        path,
        graph.node_count(),
        graph.max_level,
        graph.dimension
    );
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_graph() -> InMemoryGraph {
        let mut g = InMemoryGraph::new(3);
        g.push_node(&[0.0, 1.0, 2.0], vec![vec![1], vec![1]]).unwrap();
        g.push_node(&[3.0, 4.0, 5.0], vec![vec![0], vec![0]]).unwrap();
        g.set_entry_point(0);
        g
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.hgf");
        let g = small_graph();
        save_graph(&g, &path).unwrap();

        let loaded = load_graph(&path).unwrap();
        assert_eq!(loaded.node_count(), 2);
        assert_eq!(loaded.max_level, 2);
        assert_eq!(loaded.entry_point, Some(0));
        assert_eq!(loaded.vector(1), &[3.0, 4.0, 5.0]);
        assert_eq!(loaded.links(0, 1), &[1]);
        assert!(!dir.path().join("graph.hgf.tmp").exists());
    }

    #[test]
    fn test_corruption_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.hgf");
        save_graph(&small_graph(), &path).unwrap();

        let mut raw = fs::read(&path).unwrap();
        raw[10] ^= 0xff;
        fs::write(&path, &raw).unwrap();

        let err = load_graph(&path).unwrap_err();
        assert!(err.to_string().contains("CRC32 mismatch"));
    }

    #[test]
    fn test_invalid_graph_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graph.hgf");
        let mut g = small_graph();
        g.set_neighbors(1, 0, vec![7]);
        save_graph(&g, &path).unwrap();
        assert!(matches!(load_graph(&path), Err(EngineError::Snapshot(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_graph(&dir.path().join("nope.hgf")).unwrap_err();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
