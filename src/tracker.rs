//! Windowed online-DTW tracker: follows a live chroma stream through the
//! reference score and decides when the page should turn.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, info};

use crate::chroma::{Chroma, NUM_CHROMA, cosine_distance, l2_normalized};
use crate::config::TrackerConfig;
use crate::score::{ReferenceScore, TempoMap};

/// Per-step output of the tracker. A plain value; the producer clones it
/// across the channel, so nothing here aliases tracker state.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Frame index into the reference.
    pub position: usize,
    /// 1-based page containing `position`.
    pub page: usize,
    pub total_pages: usize,
    pub score_len: usize,
    /// 0.0 .. 1.0.
    pub progress: f32,
    /// Accumulated cost at `position` for this step (0.0 while idle).
    pub cost: f32,
    /// RMS energy of the block that produced this step.
    pub energy: f32,
    pub running: bool,
    pub finished: bool,
    /// One-shot: target page when this step crossed a page boundary.
    pub page_turn: Option<usize>,
    /// Display-only musical time derived from `position`.
    pub measure: u32,
    pub beat: u32,
}

/// Online DTW with a bounded search window.
///
/// The cost column only survives inside the last scan window; everything
/// outside is +inf. That keeps each step O(window) in time and the state in
/// bounded memory, at the price that a jump further than the window radius
/// can only be repaired by the recovery supervisor.
pub struct Odtw {
    score: Arc<ReferenceScore>,
    tempo: TempoMap,

    window: usize,
    damping: f32,
    wait_penalty: f32,
    step_penalty: f32,
    skip_penalty: f32,
    page_turn_offset: usize,
    finish_tolerance: usize,
    start_threshold: f32,

    smoothing: VecDeque<Chroma>,
    smoothing_capacity: usize,

    position: usize,
    cost: Vec<f32>,
    // Span of finite entries in `cost`; everything outside is +inf.
    span_lo: usize,
    span_hi: usize,
    scratch: Vec<f32>,

    next_page_idx: usize,
    running: bool,
    finished: bool,
    last: Snapshot,
}

impl Odtw {
    pub fn new(score: Arc<ReferenceScore>, cfg: &TrackerConfig, tempo: TempoMap) -> Self {
        let n = score.len();
        let smoothing_capacity = cfg.smoothing_window.max(1);
        let mut odtw = Self {
            tempo,
            window: cfg.search_window,
            damping: cfg.damping,
            wait_penalty: cfg.wait_penalty,
            step_penalty: cfg.step_penalty,
            skip_penalty: cfg.skip_penalty,
            page_turn_offset: cfg.page_turn_offset,
            finish_tolerance: cfg.finish_tolerance,
            start_threshold: cfg.start_threshold,
            smoothing: VecDeque::with_capacity(smoothing_capacity),
            smoothing_capacity,
            position: 0,
            cost: vec![f32::INFINITY; n],
            span_lo: 0,
            span_hi: 1,
            scratch: vec![0.0; (2 * cfg.search_window).min(n).max(1)],
            next_page_idx: 0,
            running: false,
            finished: false,
            last: Snapshot {
                position: 0,
                page: 1,
                total_pages: score.total_pages(),
                score_len: n,
                progress: 0.0,
                cost: 0.0,
                energy: 0.0,
                running: false,
                finished: false,
                page_turn: None,
                measure: 1,
                beat: 1,
            },
            score,
        };
        odtw.reset();
        odtw
    }

    /// Restore the initial state: single-source cost column at frame 0,
    /// start gate re-armed.
    pub fn reset(&mut self) {
        self.cost.fill(f32::INFINITY);
        self.cost[0] = 0.0;
        self.span_lo = 0;
        self.span_hi = 1;
        self.position = 0;
        self.next_page_idx = 0;
        self.running = false;
        self.finished = false;
        self.smoothing.clear();
        self.last = self.make_snapshot(0.0, 0.0, None);
    }

    pub fn score(&self) -> &ReferenceScore {
        &self.score
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Accumulated cost at `i`, +inf outside the last scan window.
    pub fn cost_at(&self, i: usize) -> f32 {
        self.cost[i]
    }

    /// Process one live frame. O(window) per call; a no-op after finish.
    pub fn step(&mut self, live: &Chroma, energy: f32) -> Snapshot {
        if self.finished {
            return self.last.clone();
        }

        if !self.running {
            if energy >= self.start_threshold {
                self.running = true;
                info!("tracking started (rms={energy:.4})");
            } else {
                // Idle: position and cost column untouched.
                self.last = self.make_snapshot(0.0, energy, None);
                return self.last.clone();
            }
        }

        let cost = self.advance(live);
        let page_turn = self.check_page_turn();
        self.check_finished();

        self.last = self.make_snapshot(cost, energy, page_turn);
        self.last.clone()
    }

    /// One DTW column update over the scan window around `position`.
    fn advance(&mut self, live_raw: &Chroma) -> f32 {
        if self.smoothing.len() == self.smoothing_capacity {
            self.smoothing.pop_front();
        }
        self.smoothing.push_back(*live_raw);

        let mut mean = [0.0f32; NUM_CHROMA];
        for frame in &self.smoothing {
            for (m, x) in mean.iter_mut().zip(frame.iter()) {
                *m += x;
            }
        }
        let count = self.smoothing.len() as f32;
        for m in mean.iter_mut() {
            *m /= count;
        }
        let live = l2_normalized(&mean);

        let n = self.score.len();
        let lo = self.position.saturating_sub(self.window);
        let hi = (self.position + self.window).min(n);

        let mut best_cost = f32::INFINITY;
        let mut best_index = self.position;

        for i in lo..hi {
            let local = cosine_distance(&live, self.score.frame(i));

            let cost_wait = self.cost[i] + self.wait_penalty;
            let cost_step = if i > 0 {
                self.cost[i - 1] + self.step_penalty
            } else {
                f32::INFINITY
            };
            let cost_skip = if i > 1 {
                self.cost[i - 2] + self.skip_penalty
            } else {
                f32::INFINITY
            };
            let min_prev = cost_wait.min(cost_step).min(cost_skip);

            let new_cost = local + min_prev * self.damping;
            self.scratch[i - lo] = new_cost;
            if new_cost < best_cost {
                best_cost = new_cost;
                best_index = i;
            }
        }

        // Only the window survives; everything the previous column knew
        // outside of it is forgotten.
        for c in &mut self.cost[self.span_lo..self.span_hi] {
            *c = f32::INFINITY;
        }
        self.cost[lo..hi].copy_from_slice(&self.scratch[..hi - lo]);
        self.span_lo = lo;
        self.span_hi = hi;

        self.position = best_index;
        best_cost
    }

    /// Fire at most one page boundary per step; later boundaries crossed in
    /// the same step are picked up by subsequent steps.
    fn check_page_turn(&mut self) -> Option<usize> {
        let ends = self.score.page_ends();
        if self.next_page_idx >= ends.len() {
            return None;
        }
        let threshold = ends[self.next_page_idx].saturating_sub(self.page_turn_offset);
        if self.position >= threshold {
            self.next_page_idx += 1;
            let target = self.next_page_idx + 1;
            info!("page turn -> {target}");
            return Some(target);
        }
        None
    }

    fn check_finished(&mut self) {
        let n = self.score.len();
        if self.next_page_idx == self.score.page_ends().len()
            && self.position + self.finish_tolerance >= n
        {
            self.finished = true;
            info!("piece finished at frame {}", self.position);
        }
    }

    /// Relocate after a recovery rescan: single-source cost column at
    /// `new_position`, smoothing history discarded.
    pub fn relocate(&mut self, new_position: usize) {
        let n = self.score.len();
        let new_position = new_position.min(n - 1);
        for c in &mut self.cost[self.span_lo..self.span_hi] {
            *c = f32::INFINITY;
        }
        self.cost[new_position] = 0.0;
        self.span_lo = new_position;
        self.span_hi = new_position + 1;
        self.position = new_position;
        self.smoothing.clear();
        debug!("relocated to frame {new_position}");
    }

    fn make_snapshot(&self, cost: f32, energy: f32, page_turn: Option<usize>) -> Snapshot {
        let n = self.score.len();
        let progress = (self.position as f32 / n.max(1) as f32).min(1.0);
        let (measure, beat) = self.tempo.measure_beat(self.position);
        Snapshot {
            position: self.position,
            page: self.score.page_at(self.position),
            total_pages: self.score.total_pages(),
            score_len: n,
            progress,
            cost,
            energy,
            running: self.running,
            finished: self.finished,
            page_turn,
            measure,
            beat,
        }
    }
}
