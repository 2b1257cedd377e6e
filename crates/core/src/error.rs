//! Error type shared by the engine, the pipelines and snapshot persistence.

use thiserror::Error;

/// Errors surfaced by the traversal engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Rejected configuration. Fatal at construction time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A vector (fetched or supplied as a query) has the wrong length.
    /// Fatal for the query it occurred in only.
    #[error("dimension mismatch for node {node_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        node_id: u32,
        expected: usize,
        actual: usize,
    },

    /// A pipeline stage thread went away.
    #[error("pipeline stage disconnected")]
    PipelineClosed,

    /// Snapshot file could not be decoded or failed validation.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Node id used in [`EngineError::DimensionMismatch`] when the query itself is malformed.
pub const QUERY_NODE_ID: u32 = u32::MAX;

pub type Result<T> = std::result::Result<T, EngineError>;
