//! # hnswflow-core
//!
//! Pipelined, bounded-memory traversal engine for approximate nearest
//! neighbor search over a pre-built hierarchical (HNSW-style) graph.
//!
//! A query greedily descends the upper layers from a fixed entry point, then
//! runs best-first search on the base layer with a bounded candidate queue,
//! a top-`ef` result set and an epoch-tagged Bloom filter for visited nodes.
//! Neighbor fetch, visited filtering and distance computation run as a
//! pipeline that can overlap many expansion tasks.
//!
//! This is the core library crate with zero async dependencies.

/// Tuning constants and the validated [`EngineConfig`].
pub mod config;
/// Squared Euclidean distance.
pub mod distance;
/// Query engine: the public `search` entry point.
pub mod engine;
/// Error type and result alias.
pub mod error;
/// Graph snapshots: bincode with a CRC32 footer and atomic writes.
pub mod persistence;
/// Fetch pipeline executors: inline and threaded.
pub mod pipeline;
/// Bounded candidate queue with batch insertion.
pub mod queue;
/// Top-`ef` result collector.
pub mod results;
/// Traversal state machine.
pub mod scheduler;
/// Graph store trait and the in-memory reference store.
pub mod store;
/// Candidates, scored results, groups and per-query stats.
pub mod types;
/// Epoch-tagged Bloom filter for visited base-layer nodes.
pub mod visited;

pub use config::{EngineConfig, PipelineMode, VisitedFilterConfig};
pub use engine::Engine;
pub use error::{EngineError, Result};
pub use persistence::{load_graph, save_graph};
pub use store::{GraphStore, InMemoryGraph};
pub use types::{Candidate, ResultGroup, ScoredResult, SearchOutput, SearchStats};
