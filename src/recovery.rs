//! Recovery supervisor: watches the tracker's cost through a sliding window
//! and relocates it with a full-score rescan once tracking has diverged.

use std::collections::VecDeque;

use tracing::warn;

use crate::chroma::{Chroma, cosine_distance, l2_normalized};
use crate::config::RecoveryConfig;
use crate::tracker::{Odtw, Snapshot};

/// Wraps an [`Odtw`] with divergence detection.
///
/// Incremental tracking cannot repair a jump beyond the search window (the
/// cost column outside the window is +inf), so the supervisor keeps a bounded
/// history of raw live frames and, when the mean cost over the last
/// `avg_window` steps exceeds the threshold, brute-force matches that history
/// against the whole reference and restarts the tracker at the best offset.
/// The rescan is O(score_len * history_len), paid only on trigger.
pub struct RecoveryTracker {
    odtw: Odtw,
    threshold: f32,
    avg_window: usize,
    cost_history: VecDeque<f32>,
    live_history: VecDeque<Chroma>,
    history_capacity: usize,
    recovery_count: u32,
}

impl RecoveryTracker {
    pub fn new(odtw: Odtw, cfg: &RecoveryConfig) -> Self {
        Self {
            odtw,
            threshold: cfg.threshold,
            avg_window: cfg.avg_window.max(1),
            cost_history: VecDeque::with_capacity(cfg.avg_window.max(1)),
            live_history: VecDeque::with_capacity(cfg.history_size.max(1)),
            history_capacity: cfg.history_size.max(1),
            recovery_count: 0,
        }
    }

    pub fn tracker(&self) -> &Odtw {
        &self.odtw
    }

    pub fn recovery_count(&self) -> u32 {
        self.recovery_count
    }

    pub fn reset(&mut self) {
        self.odtw.reset();
        self.cost_history.clear();
        self.live_history.clear();
    }

    /// One tracking step. The second value is true when this step performed
    /// a recovery relocation.
    pub fn step(&mut self, live: &Chroma, energy: f32) -> (Snapshot, bool) {
        if self.live_history.len() == self.history_capacity {
            self.live_history.pop_front();
        }
        self.live_history.push_back(*live);

        let mut snapshot = self.odtw.step(live, energy);

        if self.cost_history.len() == self.avg_window {
            self.cost_history.pop_front();
        }
        self.cost_history.push_back(snapshot.cost);

        // Divergence test only once the window is full; a young session has
        // nothing meaningful to average yet.
        if self.cost_history.len() < self.avg_window {
            return (snapshot, false);
        }
        let avg = self.cost_history.iter().sum::<f32>() / self.cost_history.len() as f32;
        if avg <= self.threshold {
            return (snapshot, false);
        }

        let Some(new_position) = self.full_scan() else {
            // History longer than the reference: nothing sensible to match.
            return (snapshot, false);
        };

        self.odtw.relocate(new_position);
        self.live_history.clear();
        self.cost_history.clear();
        self.recovery_count += 1;
        warn!(
            "recovery #{}: avg cost {avg:.2} > {:.2}, relocated to frame {new_position}",
            self.recovery_count, self.threshold
        );

        // Re-issue the frame at the new position so the caller never sees a
        // cost computed against the old, wrong location.
        snapshot = self.odtw.step(live, energy);
        (snapshot, true)
    }

    /// Match the buffered live frames against every reference offset; returns
    /// the frame "where the stream is now" (end of the best window).
    fn full_scan(&self) -> Option<usize> {
        let history = &self.live_history;
        let h = history.len();
        let n = self.odtw.score().len();
        if h == 0 || h > n {
            return None;
        }

        let normalized: Vec<Chroma> = history.iter().map(l2_normalized).collect();

        let mut best_start = 0;
        let mut best_avg = f32::INFINITY;
        for start in 0..=(n - h) {
            let mut sum = 0.0;
            for (j, live) in normalized.iter().enumerate() {
                sum += cosine_distance(live, self.odtw.score().frame(start + j));
            }
            let avg = sum / h as f32;
            // Strict comparison: ties resolve to the smallest start.
            if avg < best_avg {
                best_avg = avg;
                best_start = start;
            }
        }

        Some(best_start + h - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chroma::NUM_CHROMA;
    use crate::config::{RecoveryConfig, TrackerConfig};
    use crate::score::{ReferenceScore, TempoMap};
    use std::sync::Arc;

    fn tempo() -> TempoMap {
        TempoMap {
            bpm: 60,
            beats_per_measure: 4,
            hop: 512,
            sample_rate: 44_100,
        }
    }

    fn unit_frame(class: usize) -> Chroma {
        let mut f = [0.0; NUM_CHROMA];
        f[class % NUM_CHROMA] = 1.0;
        f
    }

    fn build(n: usize, recovery: &RecoveryConfig) -> RecoveryTracker {
        let frames = (0..n).map(unit_frame).collect();
        let score = Arc::new(ReferenceScore::new(frames, Vec::new()).unwrap());
        let cfg = TrackerConfig {
            start_threshold: 0.0,
            ..TrackerConfig::default()
        };
        RecoveryTracker::new(Odtw::new(score, &cfg, tempo()), recovery)
    }

    #[test]
    fn no_trigger_until_window_full() {
        let cfg = RecoveryConfig {
            threshold: 0.0, // any full window would trigger
            avg_window: 8,
            history_size: 4,
        };
        let mut rt = build(40, &cfg);
        for t in 0..7 {
            let (_, recovered) = rt.step(&unit_frame(t), 1.0);
            assert!(!recovered, "window not full at step {t}");
        }
    }

    #[test]
    fn rescan_skipped_when_history_exceeds_score() {
        let cfg = RecoveryConfig {
            threshold: 0.0,
            avg_window: 12,
            history_size: 16,
        };
        // By the time the cost window fills, the live history is already
        // longer than the 8-frame score, so every scan is skipped silently.
        let mut rt = build(8, &cfg);
        for t in 0..30 {
            let (_, _) = rt.step(&unit_frame(t + 6), 1.0);
        }
        assert_eq!(rt.recovery_count(), 0);
    }

    #[test]
    fn histories_clear_after_recovery() {
        let cfg = RecoveryConfig {
            threshold: 2.0,
            avg_window: 5,
            history_size: 10,
        };
        let mut rt = build(60, &cfg);
        // Deliberately mismatched input: live frames never match the local
        // window, so cost climbs until recovery fires.
        let mut fired_at = None;
        for t in 0..40 {
            let (_, recovered) = rt.step(&unit_frame(t % 3), 1.0);
            if recovered {
                fired_at = Some(t);
                break;
            }
        }
        let fired_at = fired_at.expect("recovery should fire on sustained mismatch");
        // Cleared windows mean the very next steps cannot re-trigger.
        for t in fired_at + 1..fired_at + 4 {
            let (_, recovered) = rt.step(&unit_frame(t % 3), 1.0);
            assert!(!recovered, "histories were cleared at recovery");
        }
        assert_eq!(rt.recovery_count(), 1);
    }
}
