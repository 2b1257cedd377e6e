use super::{resolve_task, FetchPipeline};
use crate::config::VisitedFilterConfig;
use crate::error::{EngineError, Result};
use crate::store::GraphStore;
use crate::types::{Candidate, ResultGroup};
use crate::visited::VisitedFilter;
use std::collections::VecDeque;
use std::sync::Arc;

/// Resolves each task as soon as it is submitted and buffers the groups FIFO.
///
/// Deterministic and allocation-light; the reference executor for tests.
pub struct InlinePipeline<S: GraphStore> {
    store: Arc<S>,
    filter: VisitedFilter,
    query: Vec<f32>,
    ready: VecDeque<Result<ResultGroup>>,
}

impl<S: GraphStore> InlinePipeline<S> {
    pub fn new(store: Arc<S>, filter: &VisitedFilterConfig) -> Self {
        Self {
            store,
            filter: VisitedFilter::new(filter),
            query: Vec::new(),
            ready: VecDeque::new(),
        }
    }
}

impl<S: GraphStore> FetchPipeline for InlinePipeline<S> {
    fn begin_query(&mut self, query: &[f32]) -> Result<()> {
        self.ready.clear();
        self.filter.reset();
        self.query.clear();
        self.query.extend_from_slice(query);
        Ok(())
    }

    fn submit(&mut self, task: Candidate) -> Result<()> {
        let group = resolve_task(&*self.store, &mut self.filter, &self.query, task);
        self.ready.push_back(group);
        Ok(())
    }

    fn next_group(&mut self) -> Result<ResultGroup> {
        // nothing submitted: the caller has no group to wait for
        self.ready.pop_front().unwrap_or_else(|| Err(EngineError::PipelineClosed))
    }

    fn pending(&self) -> usize {
        self.ready.len()
    }

    fn end_query(&mut self) -> Result<()> {
        self.ready.clear();
        Ok(())
    }
}
