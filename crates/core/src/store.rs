//! Read-only graph storage: the collaborator trait and an in-memory implementation.
//!
//! The engine only ever reads the graph through [`GraphStore`]. [`InMemoryGraph`]
//! keeps vectors in one contiguous arena with a separate adjacency array
//! (Struct-of-Arrays), and issues software prefetches for upcoming vectors.

use crate::config::EngineConfig;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Adjacency lists and vectors of a pre-built, read-only hierarchical graph.
///
/// Both fetches are deterministic. Unknown nodes yield empty slices: an empty
/// neighbor list simply ends that expansion, and an empty vector is reported
/// as a dimension mismatch by the pipeline.
pub trait GraphStore: Send + Sync {
    /// Neighbor ids of `node_id` at `level`, in stored order.
    fn fetch_neighbors(&self, node_id: u32, level: usize) -> Cow<'_, [u32]>;

    /// Vector of `node_id`.
    fn fetch_vector(&self, node_id: u32) -> Cow<'_, [f32]>;

    /// Hint that `node_id`'s vector will be fetched soon. Default: no-op.
    #[inline]
    fn prefetch_vector(&self, _node_id: u32) {}
}

/// Portable software prefetch hint (L1 cache, read).
/// No-op on unsupported platforms.
#[inline(always)]
fn prefetch_read(ptr: *const u8) {
    #[cfg(target_arch = "aarch64")]
    unsafe {
        std::arch::asm!(
            "prfm pldl1keep, [{ptr}]",
            ptr = in(reg) ptr,
            options(nostack, preserves_flags)
        );
    }
    #[cfg(target_arch = "x86_64")]
    unsafe {
        std::arch::x86_64::_mm_prefetch(ptr as *const i8, std::arch::x86_64::_MM_HINT_T0);
    }
}

/// In-memory hierarchical graph with a contiguous f32 vector arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InMemoryGraph {
    pub dimension: usize,
    // SoA: vector arena, `dimension` floats per node
    pub vectors: Vec<f32>,
    // SoA: [node_id][level][neighbor_ids]
    pub neighbors: Vec<Vec<Vec<u32>>>,
    pub entry_point: Option<u32>,
    /// Number of layers, i.e. highest level + 1. Zero while empty.
    pub max_level: usize,
}

impl InMemoryGraph {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            neighbors: Vec::new(),
            entry_point: None,
            max_level: 0,
        }
    }

    /// Append a node with its per-level adjacency lists (`links[level]`).
    /// Returns the new node id.
    pub fn push_node(&mut self, vector: &[f32], links: Vec<Vec<u32>>) -> Result<u32, EngineError> {
        let node_id = self.neighbors.len() as u32;
        if vector.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                node_id,
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.vectors.extend_from_slice(vector);
        self.max_level = self.max_level.max(links.len().max(1));
        self.neighbors.push(links);
        Ok(node_id)
    }

    /// Replace the adjacency list of `node_id` at `level`, growing its levels if needed.
    pub fn set_neighbors(&mut self, node_id: u32, level: usize, ids: Vec<u32>) {
        let node_levels = &mut self.neighbors[node_id as usize];
        if node_levels.len() <= level {
            node_levels.resize_with(level + 1, Vec::new);
        }
        node_levels[level] = ids;
        self.max_level = self.max_level.max(level + 1);
    }

    pub fn set_entry_point(&mut self, node_id: u32) {
        self.entry_point = Some(node_id);
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    /// Number of levels `node_id` participates in.
    pub fn node_levels(&self, node_id: u32) -> usize {
        self.neighbors
            .get(node_id as usize)
            .map_or(0, |levels| levels.len())
    }

    /// O(1) slice into the arena. Empty for unknown nodes.
    #[inline]
    pub fn vector(&self, node_id: u32) -> &[f32] {
        let start = node_id as usize * self.dimension;
        self.vectors
            .get(start..start + self.dimension)
            .unwrap_or(&[])
    }

    #[inline]
    pub fn links(&self, node_id: u32, level: usize) -> &[u32] {
        self.neighbors
            .get(node_id as usize)
            .and_then(|levels| levels.get(level))
            .map(|ids| ids.as_slice())
            .unwrap_or(&[])
    }

    /// Engine configuration with default tuning for this graph's shape.
    pub fn engine_config(&self) -> Result<EngineConfig, EngineError> {
        let entry = self
            .entry_point
            .ok_or_else(|| EngineError::Config("graph has no entry point".to_string()))?;
        Ok(EngineConfig::new(self.dimension, self.max_level.max(1), entry))
    }

    /// Validate internal invariants after deserialization.
    ///
    /// Checks arena length, entry point bounds, that the entry point spans
    /// every level, and that all neighbor ids are in bounds.
    pub fn validate(&self) -> Result<(), String> {
        let nc = self.node_count();
        if self.vectors.len() != nc * self.dimension {
            return Err(format!(
                "vectors length {} != node_count({}) * dimension({})",
                self.vectors.len(),
                nc,
                self.dimension
            ));
        }
        if let Some(ep) = self.entry_point {
            if ep as usize >= nc {
                return Err(format!("entry_point {} >= node_count {}", ep, nc));
            }
            if self.node_levels(ep) < self.max_level {
                return Err(format!(
                    "entry_point {} spans {} levels, graph has {}",
                    ep,
                    self.node_levels(ep),
                    self.max_level
                ));
            }
        } else if nc > 0 {
            return Err("non-empty graph without entry point".to_string());
        }
        for (node_id, node_neighbors) in self.neighbors.iter().enumerate() {
            if node_neighbors.len() > self.max_level {
                return Err(format!(
                    "node {} has {} levels, max_level is {}",
                    node_id,
                    node_neighbors.len(),
                    self.max_level
                ));
            }
            for (level, level_neighbors) in node_neighbors.iter().enumerate() {
                for &neighbor in level_neighbors {
                    if neighbor as usize >= nc {
                        return Err(format!(
                            "neighbor {} out of bounds (node_count={}) at node {} level {}",
                            neighbor, nc, node_id, level
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl GraphStore for InMemoryGraph {
    fn fetch_neighbors(&self, node_id: u32, level: usize) -> Cow<'_, [u32]> {
        Cow::Borrowed(self.links(node_id, level))
    }

    fn fetch_vector(&self, node_id: u32) -> Cow<'_, [f32]> {
        Cow::Borrowed(self.vector(node_id))
    }

    /// Prefetches two cache lines for vectors longer than 16 floats.
    #[inline(always)]
    fn prefetch_vector(&self, node_id: u32) {
        let start = node_id as usize * self.dimension;
        if start < self.vectors.len() {
            let ptr = unsafe { self.vectors.as_ptr().add(start) as *const u8 };
            prefetch_read(ptr);
            if self.dimension > 16 {
                prefetch_read(unsafe { ptr.add(64) });
            }
        }
    }
}
