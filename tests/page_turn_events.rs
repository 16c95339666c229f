use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use segue::chroma::{Chroma, NUM_CHROMA, l2_normalized};
use segue::config::TrackerConfig;
use segue::score::{ReferenceScore, TempoMap};
use segue::tracker::Odtw;

fn tempo() -> TempoMap {
    TempoMap {
        bpm: 60,
        beats_per_measure: 4,
        hop: 512,
        sample_rate: 44_100,
    }
}

fn random_unit_frames(n: usize, seed: u64) -> Vec<Chroma> {
    let mut rng = SmallRng::seed_from_u64(seed);
    (0..n)
        .map(|_| {
            let mut f = [0.0f32; NUM_CHROMA];
            for x in f.iter_mut() {
                *x = rng.random_range(-1.0..1.0);
            }
            l2_normalized(&f)
        })
        .collect()
}

#[test]
fn boundaries_fire_once_each_at_the_offset() {
    let n = 100;
    let frames = random_unit_frames(n, 3);
    let score = Arc::new(ReferenceScore::new(frames.clone(), vec![40, 70]).unwrap());
    // Zeroed penalties pin the tracker to the diagonal, so event timing is
    // exact: position equals the step index.
    let cfg = TrackerConfig {
        start_threshold: 0.0,
        wait_penalty: 0.0,
        step_penalty: 0.0,
        skip_penalty: 0.0,
        page_turn_offset: 5,
        finish_tolerance: 1,
        ..TrackerConfig::default()
    };
    let mut odtw = Odtw::new(score, &cfg, tempo());

    let mut events = Vec::new();
    for t in 0..n {
        let snap = odtw.step(&frames[t], 1.0);
        assert_eq!(snap.total_pages, 3);
        if let Some(target) = snap.page_turn {
            events.push((t, target));
        }
    }

    // Offset 5 means boundary 40 fires when position first reaches 35,
    // boundary 70 when it reaches 65 — exactly once each.
    assert_eq!(events, vec![(35, 2), (65, 3)]);
}

#[test]
fn displayed_page_follows_position() {
    let n = 100;
    let frames = random_unit_frames(n, 5);
    let score = Arc::new(ReferenceScore::new(frames.clone(), vec![40, 70]).unwrap());
    let cfg = TrackerConfig {
        start_threshold: 0.0,
        page_turn_offset: 5,
        finish_tolerance: 1,
        ..TrackerConfig::default()
    };
    let mut odtw = Odtw::new(score, &cfg, tempo());

    for t in 0..n {
        let snap = odtw.step(&frames[t], 1.0);
        let expected = match snap.position {
            p if p < 40 => 1,
            p if p < 70 => 2,
            _ => 3,
        };
        assert_eq!(snap.page, expected, "step {t}");
    }
}

#[test]
fn nothing_fires_while_the_start_gate_is_closed() {
    let n = 100;
    let frames = random_unit_frames(n, 9);
    let score = Arc::new(ReferenceScore::new(frames.clone(), vec![40, 70]).unwrap());
    let cfg = TrackerConfig {
        start_threshold: 0.5,
        page_turn_offset: 5,
        ..TrackerConfig::default()
    };
    let mut odtw = Odtw::new(score, &cfg, tempo());

    for t in 0..20 {
        let snap = odtw.step(&frames[t.min(n - 1)], 0.01);
        assert!(!snap.running);
        assert_eq!(snap.position, 0);
        assert_eq!(snap.page_turn, None);
    }

    // First energetic frame opens the gate and is tracked immediately.
    let snap = odtw.step(&frames[0], 0.9);
    assert!(snap.running);
}
