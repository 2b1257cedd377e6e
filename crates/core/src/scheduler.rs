//! Traversal scheduler: the per-query state machine.
//!
//! ```text
//! UpperDescent(max_level-1) ─▶ … ─▶ UpperDescent(1) ─▶ BaseSearch ─▶ QueryDone
//! ```
//!
//! The scheduler never touches the graph. It emits expansion tasks into a
//! caller-provided buffer and absorbs the [`ResultGroup`] answering each task,
//! in submission order. Upper layers do greedy descent one task at a time;
//! the base layer runs best-first search over the bounded candidate queue,
//! with up to `max_async_stages` batches of up to `max_cand_batch_size`
//! candidates in flight.

use crate::config::EngineConfig;
use crate::queue::CandidateQueue;
use crate::results::ResultSet;
use crate::types::{Candidate, ResultGroup, ScoredResult, SearchStats};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Greedy descent at `level` (always `>= 1`).
    UpperDescent { level: usize },
    BaseSearch,
    QueryDone,
}

#[derive(Debug)]
pub struct TraversalScheduler {
    queue: CandidateQueue,
    results: ResultSet,
    max_level: usize,
    batch_size: usize,
    max_stages: usize,
    state: SchedulerState,
    /// Closest node found so far during upper descent.
    current: ScoredResult,
    /// Outstanding groups per in-flight batch, oldest first.
    in_flight: VecDeque<usize>,
    stats: SearchStats,
}

impl TraversalScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            queue: CandidateQueue::new(config.candidate_capacity),
            results: ResultSet::new(config.ef),
            max_level: config.max_level.max(1),
            batch_size: config.max_cand_batch_size.max(1),
            max_stages: config.max_async_stages.max(1),
            state: SchedulerState::QueryDone,
            current: ScoredResult::SENTINEL,
            in_flight: VecDeque::with_capacity(config.max_async_stages.max(1)),
            stats: SearchStats::default(),
        }
    }

    /// Begin a query at the entry point.
    ///
    /// `entry_distance` is the distance between the entry vector and the
    /// query. Pushes the first task into `out`.
    pub fn start(&mut self, entry_id: u32, entry_distance: f32, out: &mut Vec<Candidate>) {
        self.queue.reset();
        self.results.reset();
        self.in_flight.clear();
        self.stats = SearchStats::default();
        self.current = ScoredResult::new(entry_id, self.max_level - 1, entry_distance);

        if self.max_level > 1 {
            let level = self.max_level - 1;
            self.state = SchedulerState::UpperDescent { level };
            self.emit_upper(level, out);
        } else {
            self.enter_base(out);
        }
    }

    /// Absorb the group answering the oldest outstanding task, pushing any
    /// follow-up tasks into `out`.
    pub fn on_group(&mut self, group: &ResultGroup, out: &mut Vec<Candidate>) {
        match self.state {
            SchedulerState::UpperDescent { level } => self.on_upper_group(level, group, out),
            SchedulerState::BaseSearch => self.on_base_group(group, out),
            SchedulerState::QueryDone => {
                tracing::warn!(node_id = group.task.node_id, "group received after query finished");
            }
        }
    }

    fn on_upper_group(&mut self, level: usize, group: &ResultGroup, out: &mut Vec<Candidate>) {
        let mut changed = false;
        for r in &group.results {
            if r.distance < self.current.distance {
                self.current = *r;
                changed = true;
            }
        }
        if changed {
            self.emit_upper(level, out);
        } else if level > 1 {
            self.state = SchedulerState::UpperDescent { level: level - 1 };
            tracing::trace!(level = level - 1, node_id = self.current.node_id, "descend");
            self.emit_upper(level - 1, out);
        } else {
            self.enter_base(out);
        }
    }

    fn on_base_group(&mut self, group: &ResultGroup, out: &mut Vec<Candidate>) {
        self.queue.insert_batch(&group.results);
        for r in &group.results {
            self.results.offer(*r);
        }
        self.stats.evaluated += group.results.len();
        self.stats.filtered += group.filtered;

        let batch_done = match self.in_flight.front_mut() {
            Some(outstanding) => {
                *outstanding = outstanding.saturating_sub(1);
                *outstanding == 0
            }
            None => false,
        };
        if batch_done {
            self.in_flight.pop_front();
            self.refill(out);
        }
    }

    fn emit_upper(&mut self, level: usize, out: &mut Vec<Candidate>) {
        self.stats.upper_hops += 1;
        out.push(Candidate::new(self.current.node_id, level));
    }

    fn enter_base(&mut self, out: &mut Vec<Candidate>) {
        let entry = self.current.node_id;
        tracing::trace!(node_id = entry, "base search");
        self.state = SchedulerState::BaseSearch;
        self.queue.reset();
        self.results.reset();
        self.stats.base_entry = entry;
        self.stats.base_hops += 1;
        self.in_flight.push_back(1);
        out.push(Candidate::new(entry, 0));
    }

    /// Fill free stage slots with batches of candidates that pass the
    /// stopping rule. Ends the query when nothing is left in flight.
    fn refill(&mut self, out: &mut Vec<Candidate>) {
        while self.in_flight.len() < self.max_stages {
            let mut issued = 0;
            while issued < self.batch_size && self.should_expand() {
                if let Some(next) = self.queue.pop_min() {
                    out.push(Candidate::new(next.node_id, 0));
                    issued += 1;
                }
            }
            if issued == 0 {
                break;
            }
            self.stats.base_hops += issued;
            self.in_flight.push_back(issued);
        }
        if self.in_flight.is_empty() {
            tracing::trace!(hops = self.stats.base_hops, "query done");
            self.state = SchedulerState::QueryDone;
        }
    }

    /// Closest unexpanded candidate is finite and no worse than the result threshold.
    fn should_expand(&self) -> bool {
        match self.queue.peek_min() {
            Some(top) => top.distance.is_finite() && top.distance <= self.results.threshold(),
            None => false,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SchedulerState::QueryDone
    }

    pub fn stats(&self) -> SearchStats {
        self.stats
    }

    pub fn results(&self) -> &ResultSet {
        &self.results
    }

    /// Top-`ef` results ascending by distance.
    pub fn finalize(&self) -> Vec<ScoredResult> {
        self.results.finalize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ef: usize, cap: usize, max_level: usize) -> EngineConfig {
        EngineConfig {
            ef,
            candidate_capacity: cap,
            ..EngineConfig::new(2, max_level, 0)
        }
    }

    fn group(task: Candidate, results: &[(u32, f32)]) -> ResultGroup {
        ResultGroup {
            task,
            results: results
                .iter()
                .map(|&(id, d)| ScoredResult::new(id, task.level, d))
                .collect(),
            filtered: 0,
        }
    }

    #[test]
    fn test_fully_connected_scenario() {
        let mut s = TraversalScheduler::new(&config(2, 4, 1));
        let mut out = Vec::new();
        s.start(0, 9.0, &mut out);
        assert_eq!(out, vec![Candidate::new(0, 0)]);
        assert_eq!(s.state(), SchedulerState::BaseSearch);

        out.clear();
        s.on_group(&group(Candidate::new(0, 0), &[(1, 5.0), (2, 1.0), (3, 3.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(2, 0)]);

        // 1 and 3 are filtered; the entry point is seen for the first time
        out.clear();
        s.on_group(&group(Candidate::new(2, 0), &[(0, 9.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(3, 0)]);

        out.clear();
        s.on_group(&group(Candidate::new(3, 0), &[]), &mut out);
        assert!(out.is_empty());
        assert!(s.is_done());

        let got: Vec<(u32, f32)> = s.finalize().iter().map(|r| (r.node_id, r.distance)).collect();
        assert_eq!(got, vec![(2, 1.0), (3, 3.0)]);
        assert_eq!(s.stats().base_hops, 3);
        assert_eq!(s.stats().evaluated, 4);
    }

    #[test]
    fn test_single_layer_skips_descent() {
        let mut s = TraversalScheduler::new(&config(4, 4, 1));
        let mut out = Vec::new();
        s.start(7, 2.0, &mut out);
        assert_eq!(out, vec![Candidate::new(7, 0)]);
        assert_eq!(s.stats().base_entry, 7);
        assert_eq!(s.stats().upper_hops, 0);
    }

    #[test]
    fn test_upper_descent_moves_then_descends() {
        let mut s = TraversalScheduler::new(&config(4, 4, 3));
        let mut out = Vec::new();
        s.start(0, 10.0, &mut out);
        assert_eq!(out, vec![Candidate::new(0, 2)]);
        assert_eq!(s.state(), SchedulerState::UpperDescent { level: 2 });

        // strictly closer neighbor: stay on level 2 at the new node
        out.clear();
        s.on_group(&group(Candidate::new(0, 2), &[(4, 12.0), (5, 6.0), (6, 7.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(5, 2)]);

        // no improvement: drop a level
        out.clear();
        s.on_group(&group(Candidate::new(5, 2), &[(0, 10.0), (6, 6.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(5, 1)]);
        assert_eq!(s.state(), SchedulerState::UpperDescent { level: 1 });

        out.clear();
        s.on_group(&group(Candidate::new(5, 1), &[(8, 2.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(8, 1)]);

        out.clear();
        s.on_group(&group(Candidate::new(8, 1), &[]), &mut out);
        assert_eq!(out, vec![Candidate::new(8, 0)]);
        assert_eq!(s.state(), SchedulerState::BaseSearch);

        let stats = s.stats();
        assert_eq!(stats.base_entry, 8);
        assert_eq!(stats.upper_hops, 4);
        // the base entry is not seeded into the results
        assert!(s.results().is_empty());
    }

    #[test]
    fn test_terminates_when_queue_runs_dry() {
        let mut s = TraversalScheduler::new(&config(8, 8, 1));
        let mut out = Vec::new();
        s.start(0, 0.0, &mut out);
        out.clear();
        s.on_group(&group(Candidate::new(0, 0), &[(1, 1.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(1, 0)]);
        out.clear();
        s.on_group(&group(Candidate::new(1, 0), &[]), &mut out);
        assert!(out.is_empty());
        assert!(s.is_done());
        assert_eq!(s.finalize().len(), 1);
    }

    #[test]
    fn test_batches_and_stages_bound_in_flight_tasks() {
        let cfg = EngineConfig {
            max_cand_batch_size: 2,
            max_async_stages: 2,
            ..config(8, 8, 1)
        };
        let mut s = TraversalScheduler::new(&cfg);
        let mut out = Vec::new();
        s.start(0, 0.0, &mut out);
        out.clear();

        let many: Vec<(u32, f32)> = (1..=6).map(|i| (i, i as f32)).collect();
        s.on_group(&group(Candidate::new(0, 0), &many), &mut out);
        // two stages of two candidates each
        let ids: Vec<u32> = out.iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);

        // first batch half done: nothing new yet
        out.clear();
        s.on_group(&group(Candidate::new(1, 0), &[]), &mut out);
        assert!(out.is_empty());

        // first batch complete: one stage frees up
        s.on_group(&group(Candidate::new(2, 0), &[]), &mut out);
        let ids: Vec<u32> = out.iter().map(|c| c.node_id).collect();
        assert_eq!(ids, vec![5, 6]);
        assert_eq!(s.stats().base_hops, 7);
    }

    #[test]
    fn test_stopping_rule_uses_full_result_set() {
        let mut s = TraversalScheduler::new(&config(1, 4, 1));
        let mut out = Vec::new();
        s.start(0, 0.0, &mut out);
        out.clear();
        s.on_group(&group(Candidate::new(0, 0), &[(1, 1.0), (2, 2.0)]), &mut out);
        assert_eq!(out, vec![Candidate::new(1, 0)]);
        out.clear();
        // 2 at distance 2.0 is worse than the single held result
        s.on_group(&group(Candidate::new(1, 0), &[]), &mut out);
        assert!(out.is_empty());
        assert!(s.is_done());
    }
}
