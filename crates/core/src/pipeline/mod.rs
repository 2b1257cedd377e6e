//! Neighbor/vector fetch pipeline: turns expansion tasks into scored result groups.
//!
//! A task `(node, level)` goes through three steps:
//!
//! ```text
//! fetch neighbors ──▶ visited filter (level 0 only) ──▶ fetch vectors + distance
//! ```
//!
//! Groups come out in task submission order, one per task, so the scheduler
//! can match every group to the pop that produced it. Two executors implement
//! [`FetchPipeline`]: [`InlinePipeline`] runs the steps on the caller's thread
//! and [`ThreadedPipeline`] runs each step on its own thread, connected by
//! bounded channels, so many tasks overlap. The threaded executor can also
//! split the distance step of each task over several compute channels.

/// Single-threaded executor.
pub mod inline;
/// One thread per stage, bounded crossbeam channels in between.
pub mod threaded;

pub use inline::InlinePipeline;
pub use threaded::ThreadedPipeline;

use crate::distance::l2_sq;
use crate::error::{EngineError, Result};
use crate::store::GraphStore;
use crate::types::{Candidate, ResultGroup, ScoredResult};
use crate::visited::VisitedFilter;

/// Executor contract shared by the inline and threaded pipelines.
///
/// A query is bracketed by [`begin_query`](FetchPipeline::begin_query) and
/// [`end_query`](FetchPipeline::end_query). `end_query` is the query boundary:
/// it discards any unread groups and returns only once every stage has
/// finished with the query, so per-query state can be reused safely.
pub trait FetchPipeline: Send {
    /// Start a query. The visited filter moves to a fresh epoch.
    fn begin_query(&mut self, query: &[f32]) -> Result<()>;

    /// Queue an expansion task.
    fn submit(&mut self, task: Candidate) -> Result<()>;

    /// Block until the group for the oldest unanswered task is available.
    fn next_group(&mut self) -> Result<ResultGroup>;

    /// Number of submitted tasks whose group has not been read yet.
    fn pending(&self) -> usize;

    /// Drain the query and wait until every stage has let go of it.
    fn end_query(&mut self) -> Result<()>;
}

/// Drop already-visited base-layer neighbors in place. Returns how many were dropped.
///
/// Upper levels are never deduplicated: greedy descent revisits nodes freely.
pub(crate) fn filter_visited(filter: &mut VisitedFilter, level: usize, ids: &mut Vec<u32>) -> usize {
    if level != 0 {
        return 0;
    }
    let before = ids.len();
    ids.retain(|&id| !filter.check_and_insert(id));
    before - ids.len()
}

/// Fetch each surviving neighbor's vector and score it against the query.
pub(crate) fn score_neighbors<S: GraphStore + ?Sized>(
    store: &S,
    query: &[f32],
    task: Candidate,
    ids: &[u32],
    filtered: usize,
) -> Result<ResultGroup> {
    let mut results = Vec::with_capacity(ids.len());
    for (i, &id) in ids.iter().enumerate() {
        // Prefetch next neighbor's data while processing current
        if let Some(&next_id) = ids.get(i + 1) {
            store.prefetch_vector(next_id);
        }
        let vector = store.fetch_vector(id);
        if vector.len() != query.len() {
            return Err(EngineError::DimensionMismatch {
                node_id: id,
                expected: query.len(),
                actual: vector.len(),
            });
        }
        results.push(ScoredResult::new(id, task.level, l2_sq(query, &vector)));
    }
    Ok(ResultGroup {
        task,
        results,
        filtered,
    })
}

/// Run all three steps for one task on the current thread.
pub(crate) fn resolve_task<S: GraphStore + ?Sized>(
    store: &S,
    filter: &mut VisitedFilter,
    query: &[f32],
    task: Candidate,
) -> Result<ResultGroup> {
    let mut ids = store.fetch_neighbors(task.node_id, task.level).into_owned();
    let filtered = filter_visited(filter, task.level, &mut ids);
    score_neighbors(store, query, task, &ids, filtered)
}
