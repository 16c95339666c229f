//! End-to-end: a synthesized performance replayed through the full
//! producer/consumer session tracks its own reference to the end.

use std::f32::consts::PI;
use std::sync::{Arc, atomic::AtomicBool};

use segue::audio::BlockSource;
use segue::audio::ring::SampleRing;
use segue::audio::wav::WavSource;
use segue::chroma::{Chroma, ChromaExtractor};
use segue::config::AppConfig;
use segue::score::ReferenceScore;
use segue::session::Session;

/// A little four-note melody: A4, C5, E5, A5, 0.75 s each.
fn melody(sample_rate: u32) -> Vec<f32> {
    let tones = [440.0f32, 523.25, 659.25, 880.0];
    let note_len = (sample_rate as f32 * 0.75) as usize;
    let mut samples = Vec::with_capacity(tones.len() * note_len);
    for &freq in &tones {
        for i in 0..note_len {
            let t = i as f32 / sample_rate as f32;
            samples.push((2.0 * PI * freq * t).sin() * 0.5);
        }
    }
    samples
}

fn analyze(samples: &[f32], cfg: &AppConfig) -> Vec<Chroma> {
    let mut ring = SampleRing::new(cfg.audio.block_size);
    let mut extractor = ChromaExtractor::new(cfg.audio.sample_rate, cfg.audio.block_size);
    samples
        .chunks(cfg.audio.hop_size)
        .map(|hop| {
            ring.push(hop);
            extractor.extract(ring.as_slice())
        })
        .collect()
}

#[test]
fn session_follows_a_recording_of_itself() {
    let mut cfg = AppConfig::default();
    // A little slack at the tail: the last replayed block is zero-padded,
    // so the final frame need not match exactly.
    cfg.tracker.finish_tolerance = 10;
    let samples = melody(cfg.audio.sample_rate);

    let frames = analyze(&samples, &cfg);
    let n = frames.len();
    assert!(n > 100, "melody should produce a useful number of frames");

    let boundary = n / 2;
    let score = Arc::new(ReferenceScore::from_frames(frames, vec![boundary]).unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let session = Session::spawn(
        score,
        &cfg,
        move || Ok(Box::new(WavSource::from_samples(samples)) as Box<dyn BlockSource>),
        stop,
    );
    let summary = session.join().expect("session should run to completion");

    assert!(summary.finished, "summary: {summary:?}");
    assert!(
        summary.final_position + 20 >= n,
        "ended at frame {} of {n}",
        summary.final_position
    );
    assert_eq!(summary.recoveries, 0, "clean playback must not recover");
}
