use super::{filter_visited, FetchPipeline};
use crate::config::VisitedFilterConfig;
use crate::distance::l2_sq;
use crate::error::{EngineError, Result};
use crate::store::GraphStore;
use crate::types::{Candidate, ResultGroup, ScoredResult};
use crate::visited::VisitedFilter;
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Per-query header broadcast through every stage ahead of the query's tasks.
#[derive(Debug, Clone)]
struct QueryHeader {
    epoch: u64,
    query: Arc<[f32]>,
}

/// In-band stage message. Control tokens travel in the same FIFO as work, so
/// every stage observes query boundaries in order.
#[derive(Debug)]
enum StageMsg<T> {
    Begin(QueryHeader),
    Work(T),
    End(u64),
}

/// Neighbors of one task, before and after the visited filter.
#[derive(Debug)]
struct Fetched {
    task: Candidate,
    ids: Vec<u32>,
    filtered: usize,
}

/// The share of one task's surviving neighbors owned by a compute channel.
/// Each id carries its position in the neighbor list so the gather stage can
/// restore the original order.
#[derive(Debug)]
struct Part {
    task: Candidate,
    filtered: usize,
    total: usize,
    ids: Vec<(usize, u32)>,
}

/// A scored [`Part`]. A failure carries the position of the offending neighbor.
#[derive(Debug)]
struct ScoredPart {
    task: Candidate,
    filtered: usize,
    total: usize,
    scored: std::result::Result<Vec<(usize, ScoredResult)>, (usize, EngineError)>,
}

#[derive(Debug)]
enum Scored {
    Part(ScoredPart),
    End(u64),
}

#[derive(Debug)]
enum Reply {
    Group(Result<ResultGroup>),
    Finished(u64),
}

/// Long-lived stage threads connected by bounded FIFO channels:
///
/// ```text
///                                            ┌▶ [compute 0] ─┐
/// submit ─▶ [neighbors] ─▶ [visited filter] ─┼▶ [compute 1] ─┼▶ [gather] ─▶ next_group
///                                            └▶ [compute N-1] ┘
/// ```
///
/// The visited filter splits each task's surviving neighbors over the compute
/// channels by `node_id % N`; every channel gets a (possibly empty) part of
/// every task, and the gather stage reads the channels in lockstep and puts
/// the scored neighbors back in neighbor-list order. Groups are therefore
/// identical for any number of compute channels.
///
/// Stages work on different tasks at the same time. Channel capacity must be
/// at least the number of tasks the caller keeps in flight, otherwise the
/// caller can block on `submit` while the last stage blocks on a full reply
/// channel.
pub struct ThreadedPipeline {
    tasks: Option<Sender<StageMsg<Candidate>>>,
    replies: Option<Receiver<Reply>>,
    handles: Vec<JoinHandle<()>>,
    epoch: u64,
    pending: usize,
}

impl ThreadedPipeline {
    /// A pipeline with a single compute channel.
    pub fn new<S: GraphStore + 'static>(
        store: Arc<S>,
        filter: &VisitedFilterConfig,
        channel_capacity: usize,
    ) -> Result<Self> {
        Self::with_channels(store, filter, channel_capacity, 1)
    }

    /// A pipeline whose distance computation is split over `compute_channels` threads.
    pub fn with_channels<S: GraphStore + 'static>(
        store: Arc<S>,
        filter: &VisitedFilterConfig,
        channel_capacity: usize,
        compute_channels: usize,
    ) -> Result<Self> {
        let cap = channel_capacity.max(1);
        let channels = compute_channels.max(1);
        let (task_tx, task_rx) = bounded::<StageMsg<Candidate>>(cap);
        let (fetched_tx, fetched_rx) = bounded::<StageMsg<Fetched>>(cap);
        let (reply_tx, reply_rx) = bounded::<Reply>(cap);

        let mut handles = Vec::with_capacity(channels + 3);

        let neighbor_store = Arc::clone(&store);
        handles.push(
            thread::Builder::new()
                .name("hnswflow-neighbors".to_string())
                .spawn(move || neighbor_stage(&*neighbor_store, task_rx, fetched_tx))?,
        );

        let mut part_txs = Vec::with_capacity(channels);
        let mut scored_rxs = Vec::with_capacity(channels);
        for channel in 0..channels {
            let (part_tx, part_rx) = bounded::<StageMsg<Part>>(cap);
            let (scored_tx, scored_rx) = bounded::<Scored>(cap);
            let compute_store = Arc::clone(&store);
            handles.push(
                thread::Builder::new()
                    .name(format!("hnswflow-compute-{channel}"))
                    .spawn(move || compute_stage(&*compute_store, part_rx, scored_tx))?,
            );
            part_txs.push(part_tx);
            scored_rxs.push(scored_rx);
        }

        let visited = VisitedFilter::new(filter);
        handles.push(
            thread::Builder::new()
                .name("hnswflow-visited".to_string())
                .spawn(move || filter_stage(visited, fetched_rx, part_txs))?,
        );

        handles.push(
            thread::Builder::new()
                .name("hnswflow-gather".to_string())
                .spawn(move || gather_stage(scored_rxs, reply_tx))?,
        );

        tracing::debug!(channel_capacity = cap, compute_channels = channels, "threaded pipeline started");

        Ok(Self {
            tasks: Some(task_tx),
            replies: Some(reply_rx),
            handles,
            epoch: 0,
            pending: 0,
        })
    }

    fn send(&self, msg: StageMsg<Candidate>) -> Result<()> {
        self.tasks
            .as_ref()
            .ok_or(EngineError::PipelineClosed)?
            .send(msg)
            .map_err(|_| EngineError::PipelineClosed)
    }

    fn recv(&self) -> Result<Reply> {
        self.replies
            .as_ref()
            .ok_or(EngineError::PipelineClosed)?
            .recv()
            .map_err(|_| EngineError::PipelineClosed)
    }
}

fn neighbor_stage<S: GraphStore + ?Sized>(
    store: &S,
    input: Receiver<StageMsg<Candidate>>,
    output: Sender<StageMsg<Fetched>>,
) {
    for msg in input.iter() {
        let out = match msg {
            StageMsg::Begin(header) => StageMsg::Begin(header),
            StageMsg::End(epoch) => StageMsg::End(epoch),
            StageMsg::Work(task) => StageMsg::Work(Fetched {
                task,
                ids: store.fetch_neighbors(task.node_id, task.level).into_owned(),
                filtered: 0,
            }),
        };
        if output.send(out).is_err() {
            break;
        }
    }
}

fn filter_stage(
    mut filter: VisitedFilter,
    input: Receiver<StageMsg<Fetched>>,
    outputs: Vec<Sender<StageMsg<Part>>>,
) {
    let channels = outputs.len();
    for msg in input.iter() {
        let delivered = match msg {
            StageMsg::Begin(header) => {
                filter.reset();
                outputs
                    .iter()
                    .all(|out| out.send(StageMsg::Begin(header.clone())).is_ok())
            }
            StageMsg::End(epoch) => outputs.iter().all(|out| out.send(StageMsg::End(epoch)).is_ok()),
            StageMsg::Work(mut fetched) => {
                fetched.filtered = filter_visited(&mut filter, fetched.task.level, &mut fetched.ids);
                let mut parts: Vec<Part> = (0..channels)
                    .map(|_| Part {
                        task: fetched.task,
                        filtered: fetched.filtered,
                        total: fetched.ids.len(),
                        ids: Vec::new(),
                    })
                    .collect();
                for (pos, &id) in fetched.ids.iter().enumerate() {
                    parts[id as usize % channels].ids.push((pos, id));
                }
                outputs
                    .iter()
                    .zip(parts)
                    .all(|(out, part)| out.send(StageMsg::Work(part)).is_ok())
            }
        };
        if !delivered {
            break;
        }
    }
}

fn compute_stage<S: GraphStore + ?Sized>(
    store: &S,
    input: Receiver<StageMsg<Part>>,
    output: Sender<Scored>,
) {
    let mut current: Option<QueryHeader> = None;
    for msg in input.iter() {
        let scored = match msg {
            StageMsg::Begin(header) => {
                current = Some(header);
                continue;
            }
            StageMsg::End(epoch) => {
                if current.as_ref().is_some_and(|h| h.epoch == epoch) {
                    current = None;
                }
                Scored::End(epoch)
            }
            StageMsg::Work(part) => {
                let scored = match current.as_ref() {
                    Some(header) => score_part(store, &header.query, &part),
                    None => Err((0, EngineError::PipelineClosed)),
                };
                Scored::Part(ScoredPart {
                    task: part.task,
                    filtered: part.filtered,
                    total: part.total,
                    scored,
                })
            }
        };
        if output.send(scored).is_err() {
            break;
        }
    }
}

fn score_part<S: GraphStore + ?Sized>(
    store: &S,
    query: &[f32],
    part: &Part,
) -> std::result::Result<Vec<(usize, ScoredResult)>, (usize, EngineError)> {
    let mut scored = Vec::with_capacity(part.ids.len());
    for (i, &(pos, id)) in part.ids.iter().enumerate() {
        if let Some(&(_, next_id)) = part.ids.get(i + 1) {
            store.prefetch_vector(next_id);
        }
        let vector = store.fetch_vector(id);
        if vector.len() != query.len() {
            return Err((
                pos,
                EngineError::DimensionMismatch {
                    node_id: id,
                    expected: query.len(),
                    actual: vector.len(),
                },
            ));
        }
        scored.push((pos, ScoredResult::new(id, part.task.level, l2_sq(query, &vector))));
    }
    Ok(scored)
}

/// Rebuild one group from the parts of every channel. On failure the error of
/// the earliest neighbor wins, as in a sequential scan.
fn merge_parts(parts: Vec<ScoredPart>) -> Result<ResultGroup> {
    let (task, filtered, total) = match parts.first() {
        Some(p) => (p.task, p.filtered, p.total),
        None => return Err(EngineError::PipelineClosed),
    };
    let mut slots: Vec<Option<ScoredResult>> = vec![None; total];
    let mut first_error: Option<(usize, EngineError)> = None;
    for part in parts {
        match part.scored {
            Ok(scored) => {
                for (pos, result) in scored {
                    slots[pos] = Some(result);
                }
            }
            Err((pos, err)) => {
                if first_error.as_ref().map_or(true, |(p, _)| pos < *p) {
                    first_error = Some((pos, err));
                }
            }
        }
    }
    if let Some((_, err)) = first_error {
        return Err(err);
    }
    Ok(ResultGroup {
        task,
        results: slots.into_iter().flatten().collect(),
        filtered,
    })
}

fn gather_stage(inputs: Vec<Receiver<Scored>>, output: Sender<Reply>) {
    'outer: loop {
        let mut parts = Vec::with_capacity(inputs.len());
        let mut ended = None;
        for input in &inputs {
            match input.recv() {
                Ok(Scored::Part(part)) => parts.push(part),
                Ok(Scored::End(epoch)) => ended = Some(epoch),
                Err(_) => break 'outer,
            }
        }
        // every channel sees the same message sequence, so a round is all parts or all ends
        let reply = match ended {
            Some(epoch) => Reply::Finished(epoch),
            None => Reply::Group(merge_parts(parts)),
        };
        if output.send(reply).is_err() {
            break;
        }
    }
}

impl FetchPipeline for ThreadedPipeline {
    fn begin_query(&mut self, query: &[f32]) -> Result<()> {
        self.epoch += 1;
        self.pending = 0;
        self.send(StageMsg::Begin(QueryHeader {
            epoch: self.epoch,
            query: Arc::from(query),
        }))
    }

    fn submit(&mut self, task: Candidate) -> Result<()> {
        self.send(StageMsg::Work(task))?;
        self.pending += 1;
        Ok(())
    }

    fn next_group(&mut self) -> Result<ResultGroup> {
        if self.pending == 0 {
            return Err(EngineError::PipelineClosed);
        }
        match self.recv()? {
            Reply::Group(group) => {
                self.pending -= 1;
                group
            }
            // a finish token can only follow an End we sent
            Reply::Finished(_) => Err(EngineError::PipelineClosed),
        }
    }

    fn pending(&self) -> usize {
        self.pending
    }

    fn end_query(&mut self) -> Result<()> {
        while self.pending > 0 {
            if let Reply::Group(_) = self.recv()? {
                self.pending -= 1;
            }
        }
        self.send(StageMsg::End(self.epoch))?;
        loop {
            if let Reply::Finished(epoch) = self.recv()? {
                if epoch == self.epoch {
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for ThreadedPipeline {
    fn drop(&mut self) {
        // closing the task channel cascades: each stage exits when its input disconnects.
        // Unread groups may still fill the reply channel, so the receiver goes too
        // and a stage blocked on a full output sees the disconnect.
        self.tasks.take();
        self.replies.take();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::warn!("pipeline stage panicked");
            }
        }
    }
}
