//! Query engine: ties the scheduler, the fetch pipeline and the graph store
//! together behind `search(&self, query)`.

use crate::config::{EngineConfig, PipelineMode};
use crate::distance::l2_sq;
use crate::error::{EngineError, Result, QUERY_NODE_ID};
use crate::pipeline::{FetchPipeline, InlinePipeline, ThreadedPipeline};
use crate::scheduler::TraversalScheduler;
use crate::store::GraphStore;
use crate::types::{Candidate, SearchOutput};
use crate::visited::false_positive_rate;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Above this expected false-positive rate the visited filter is reported as undersized.
const FILTER_FP_WARN_RATE: f64 = 0.01;

/// Per-query state reused across queries. One per query channel.
struct QueryContext {
    pipeline: Box<dyn FetchPipeline>,
    scheduler: TraversalScheduler,
    tasks: Vec<Candidate>,
}

/// ANN search engine over a read-only graph.
///
/// The engine owns `num_channels` query contexts, each with its own pipeline
/// and scheduler. `search` takes `&self` and runs on whichever context is
/// free, so an `Engine` shared behind an `Arc` serves that many queries at
/// once; `search_batch` hands each context a contiguous slice of the batch.
pub struct Engine<S: GraphStore + 'static> {
    config: EngineConfig,
    store: Arc<S>,
    entry_vector: Vec<f32>,
    contexts: Vec<Mutex<QueryContext>>,
    next_context: AtomicUsize,
}

impl<S: GraphStore + 'static> Engine<S> {
    /// Validate `config`, load the entry point and start the pipelines.
    pub fn new(store: Arc<S>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let entry_vector = store.fetch_vector(config.entry_point_id).into_owned();
        if entry_vector.len() != config.dimension {
            return Err(EngineError::DimensionMismatch {
                node_id: config.entry_point_id,
                expected: config.dimension,
                actual: entry_vector.len(),
            });
        }

        let expected_visits = config.ef.saturating_mul(config.candidate_capacity);
        let fp_rate = false_positive_rate(
            config.visited_filter.hash_count,
            config.visited_filter.bucket_count,
            expected_visits,
        );
        if fp_rate > FILTER_FP_WARN_RATE {
            tracing::warn!(
                bucket_count = config.visited_filter.bucket_count,
                hash_count = config.visited_filter.hash_count,
                expected_visits,
                fp_rate,
                "visited filter is undersized; recall may drop"
            );
        }

        let mut contexts = Vec::with_capacity(config.num_channels);
        for _ in 0..config.num_channels {
            let pipeline: Box<dyn FetchPipeline> = match config.pipeline_mode {
                PipelineMode::Inline => {
                    Box::new(InlinePipeline::new(Arc::clone(&store), &config.visited_filter))
                }
                PipelineMode::Threaded => Box::new(ThreadedPipeline::with_channels(
                    Arc::clone(&store),
                    &config.visited_filter,
                    config.effective_channel_capacity(),
                    config.compute_channels,
                )?),
            };
            contexts.push(Mutex::new(QueryContext {
                pipeline,
                scheduler: TraversalScheduler::new(&config),
                tasks: Vec::with_capacity(config.max_in_flight_tasks()),
            }));
        }

        tracing::info!(
            dimension = config.dimension,
            max_level = config.max_level,
            entry_point = config.entry_point_id,
            ef = config.ef,
            candidate_capacity = config.candidate_capacity,
            batch = config.max_cand_batch_size,
            stages = config.max_async_stages,
            mode = ?config.pipeline_mode,
            num_channels = config.num_channels,
            compute_channels = config.compute_channels,
            "search engine ready"
        );

        Ok(Self {
            store,
            entry_vector,
            contexts,
            next_context: AtomicUsize::new(0),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Up to `ef` nearest nodes to `query`, ascending by squared L2 distance.
    pub fn search(&self, query: &[f32]) -> Result<SearchOutput> {
        self.check_query(query)?;
        let mut guard = self.acquire();
        self.run_query(&mut guard, query)
    }

    /// Answer every query, in input order. Queries are split into contiguous
    /// slices, one per query channel, and the slices run in parallel. A failed
    /// query does not affect the others.
    pub fn search_batch<Q: AsRef<[f32]> + Sync>(&self, queries: &[Q]) -> Vec<Result<SearchOutput>> {
        let channels = self.contexts.len().min(queries.len());
        if channels <= 1 {
            return queries.iter().map(|q| self.search(q.as_ref())).collect();
        }

        let slice_len = queries.len().div_ceil(channels);
        std::thread::scope(|scope| {
            let handles: Vec<_> = queries
                .chunks(slice_len)
                .zip(&self.contexts)
                .map(|(slice, context)| {
                    scope.spawn(move || {
                        let mut guard = context.lock();
                        slice
                            .iter()
                            .map(|q| -> Result<SearchOutput> {
                                let query = q.as_ref();
                                self.check_query(query)?;
                                self.run_query(&mut guard, query)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            let mut out = Vec::with_capacity(queries.len());
            for handle in handles {
                match handle.join() {
                    Ok(results) => out.extend(results),
                    Err(panic) => std::panic::resume_unwind(panic),
                }
            }
            out
        })
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.config.dimension {
            return Err(EngineError::DimensionMismatch {
                node_id: QUERY_NODE_ID,
                expected: self.config.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }

    /// A free query context if there is one, otherwise wait on the next in turn.
    fn acquire(&self) -> MutexGuard<'_, QueryContext> {
        let start = self.next_context.fetch_add(1, Ordering::Relaxed) % self.contexts.len();
        for i in 0..self.contexts.len() {
            if let Some(guard) = self.contexts[(start + i) % self.contexts.len()].try_lock() {
                return guard;
            }
        }
        self.contexts[start].lock()
    }

    fn run_query(&self, ctx: &mut QueryContext, query: &[f32]) -> Result<SearchOutput> {
        ctx.tasks.clear();
        ctx.pipeline.begin_query(query)?;

        let traversal = self.traverse(ctx, query);
        // the boundary runs even when the traversal failed, so the next query starts clean
        let ended = ctx.pipeline.end_query();
        traversal?;
        ended?;

        let stats = ctx.scheduler.stats();
        tracing::debug!(
            base_entry = stats.base_entry,
            upper_hops = stats.upper_hops,
            base_hops = stats.base_hops,
            evaluated = stats.evaluated,
            filtered = stats.filtered,
            "query done"
        );

        Ok(SearchOutput {
            neighbors: ctx
                .scheduler
                .finalize()
                .iter()
                .map(|r| (r.node_id, r.distance))
                .collect(),
            stats,
        })
    }

    fn traverse(&self, ctx: &mut QueryContext, query: &[f32]) -> Result<()> {
        let entry_distance = l2_sq(&self.entry_vector, query);
        ctx.scheduler
            .start(self.config.entry_point_id, entry_distance, &mut ctx.tasks);
        loop {
            for task in ctx.tasks.drain(..) {
                ctx.pipeline.submit(task)?;
            }
            if ctx.scheduler.is_done() {
                return Ok(());
            }
            let group = ctx.pipeline.next_group()?;
            ctx.scheduler.on_group(&group, &mut ctx.tasks);
        }
    }
}
