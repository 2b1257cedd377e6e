//! Engine configuration: tuning constants and the validated [`EngineConfig`].
//!
//! Defaults are compile-time constants; runtime overrides come from the CLI or
//! from a serialized `EngineConfig`. [`EngineConfig::validate`] rejects every
//! configuration the traversal engine cannot run with.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};

/// Default number of results returned per query.
///
/// Also the capacity of the result set that drives the stopping rule.
pub const DEFAULT_EF: usize = 64;

/// Default capacity of the bounded candidate queue.
///
/// Candidates beyond this many (by distance) are discarded for the query.
pub const DEFAULT_CANDIDATE_CAPACITY: usize = 64;

/// Default number of buckets in the visited filter (256K).
pub const DEFAULT_BLOOM_BUCKETS: usize = 1 << 18;

/// Default number of independent hash functions in the visited filter.
pub const DEFAULT_BLOOM_HASHES: usize = 3;

/// Default base seed of the visited filter; hash function `i` uses `seed + i`.
pub const DEFAULT_BLOOM_SEED: u32 = 1;

/// Default maximum number of candidates popped into one in-flight batch.
pub const DEFAULT_MAX_CAND_BATCH_SIZE: usize = 1;

/// Default maximum number of batches in flight at once.
pub const DEFAULT_MAX_ASYNC_STAGES: usize = 1;

/// Default capacity of each inter-stage channel of the threaded pipeline.
///
/// Raised to the in-flight task bound when that is larger.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 512;

/// Default number of query channels: independent pipelines that serve
/// different queries at the same time.
pub const DEFAULT_NUM_CHANNELS: usize = 1;

/// Default number of compute channels one threaded pipeline splits each
/// task's distance computation over.
pub const DEFAULT_COMPUTE_CHANNELS: usize = 1;

/// Maximum allowed number of query or compute channels.
pub const MAX_CHANNELS: usize = 64;

/// Maximum allowed vector dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum allowed `ef`.
pub const MAX_EF: usize = 10_000;

/// Maximum allowed candidate queue capacity.
pub const MAX_CANDIDATE_CAPACITY: usize = 10_000;

/// Maximum number of hash functions in the visited filter.
pub const MAX_BLOOM_HASHES: usize = 16;

/// Sizing of the per-query visited filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitedFilterConfig {
    /// Number of tagged buckets. More buckets, fewer false positives.
    pub bucket_count: usize,
    /// Number of hash functions probed per key.
    pub hash_count: usize,
    /// Base seed; hash function `i` is seeded with `seed + i`.
    pub seed: u32,
}

impl Default for VisitedFilterConfig {
    fn default() -> Self {
        Self {
            bucket_count: DEFAULT_BLOOM_BUCKETS,
            hash_count: DEFAULT_BLOOM_HASHES,
            seed: DEFAULT_BLOOM_SEED,
        }
    }
}

/// Which executor resolves expansion tasks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    /// Stages run round-robin on the calling thread.
    #[default]
    Inline,
    /// Each stage runs on its own thread, connected by bounded channels.
    Threaded,
}

/// Configuration of a traversal engine.
///
/// The graph-shape fields (`max_level`, `entry_point_id`, `dimension`) describe
/// the pre-built index; the rest are search tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of results per query.
    pub ef: usize,
    /// Capacity of the bounded candidate queue.
    pub candidate_capacity: usize,
    /// Number of layers in the graph. `1` means base layer only.
    pub max_level: usize,
    /// Top-layer entry node.
    pub entry_point_id: u32,
    /// Vector dimension.
    pub dimension: usize,
    /// Sizing of the per-query visited filter.
    #[serde(default)]
    pub visited_filter: VisitedFilterConfig,
    /// Candidates popped into one in-flight batch during base search.
    #[serde(default = "default_max_cand_batch_size")]
    pub max_cand_batch_size: usize,
    /// Batches allowed in flight at once during base search.
    #[serde(default = "default_max_async_stages")]
    pub max_async_stages: usize,
    /// Capacity of each inter-stage channel (threaded mode only).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Executor that resolves expansion tasks.
    #[serde(default)]
    pub pipeline_mode: PipelineMode,
    /// Independent query contexts, each with its own pipeline. Concurrent
    /// `search` calls and `search_batch` slices run on separate channels.
    #[serde(default = "default_num_channels")]
    pub num_channels: usize,
    /// Compute threads per threaded pipeline; neighbors of one task are
    /// split over them by node id (threaded mode only).
    #[serde(default = "default_compute_channels")]
    pub compute_channels: usize,
}

fn default_max_cand_batch_size() -> usize {
    DEFAULT_MAX_CAND_BATCH_SIZE
}

fn default_max_async_stages() -> usize {
    DEFAULT_MAX_ASYNC_STAGES
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_num_channels() -> usize {
    DEFAULT_NUM_CHANNELS
}

fn default_compute_channels() -> usize {
    DEFAULT_COMPUTE_CHANNELS
}

impl EngineConfig {
    /// Creates a configuration with default tuning for a graph of the given shape.
    pub fn new(dimension: usize, max_level: usize, entry_point_id: u32) -> Self {
        Self {
            ef: DEFAULT_EF,
            candidate_capacity: DEFAULT_CANDIDATE_CAPACITY,
            max_level,
            entry_point_id,
            dimension,
            visited_filter: VisitedFilterConfig::default(),
            max_cand_batch_size: DEFAULT_MAX_CAND_BATCH_SIZE,
            max_async_stages: DEFAULT_MAX_ASYNC_STAGES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            pipeline_mode: PipelineMode::Inline,
            num_channels: DEFAULT_NUM_CHANNELS,
            compute_channels: DEFAULT_COMPUTE_CHANNELS,
        }
    }

    /// Upper bound on the number of tasks simultaneously in flight.
    pub fn max_in_flight_tasks(&self) -> usize {
        self.max_cand_batch_size * self.max_async_stages
    }

    /// Effective capacity of the inter-stage channels.
    ///
    /// Never below the in-flight bound, so the scheduler can always submit a
    /// full refill without waiting on its own return channel.
    pub fn effective_channel_capacity(&self) -> usize {
        self.channel_capacity.max(self.max_in_flight_tasks()).max(1)
    }

    /// Check every bound the engine relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ef == 0 || self.ef > MAX_EF {
            return Err(EngineError::Config(format!(
                "ef must be in 1..={}, got {}",
                MAX_EF, self.ef
            )));
        }
        if self.candidate_capacity == 0 || self.candidate_capacity > MAX_CANDIDATE_CAPACITY {
            return Err(EngineError::Config(format!(
                "candidate_capacity must be in 1..={}, got {}",
                MAX_CANDIDATE_CAPACITY, self.candidate_capacity
            )));
        }
        if self.dimension == 0 || self.dimension > MAX_DIMENSION {
            return Err(EngineError::Config(format!(
                "dimension must be in 1..={}, got {}",
                MAX_DIMENSION, self.dimension
            )));
        }
        if self.max_level == 0 {
            return Err(EngineError::Config(
                "max_level must be at least 1".to_string(),
            ));
        }
        if self.visited_filter.bucket_count == 0 {
            return Err(EngineError::Config(
                "visited_filter.bucket_count must be positive".to_string(),
            ));
        }
        if self.visited_filter.hash_count == 0 || self.visited_filter.hash_count > MAX_BLOOM_HASHES
        {
            return Err(EngineError::Config(format!(
                "visited_filter.hash_count must be in 1..={}, got {}",
                MAX_BLOOM_HASHES, self.visited_filter.hash_count
            )));
        }
        if self.max_cand_batch_size == 0 {
            return Err(EngineError::Config(
                "max_cand_batch_size must be positive".to_string(),
            ));
        }
        if self.max_async_stages == 0 {
            return Err(EngineError::Config(
                "max_async_stages must be positive".to_string(),
            ));
        }
        if self.num_channels == 0 || self.num_channels > MAX_CHANNELS {
            return Err(EngineError::Config(format!(
                "num_channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.num_channels
            )));
        }
        if self.compute_channels == 0 || self.compute_channels > MAX_CHANNELS {
            return Err(EngineError::Config(format!(
                "compute_channels must be in 1..={}, got {}",
                MAX_CHANNELS, self.compute_channels
            )));
        }
        Ok(())
    }
}
