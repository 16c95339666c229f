// Entry point: builds the reference from a recording, then runs the
// producer/consumer tracking session against a WAV or the microphone.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use segue::audio::input::MicSource;
use segue::audio::ring::SampleRing;
use segue::audio::wav::{WavSource, read_mono};
use segue::audio::BlockSource;
use segue::chroma::{Chroma, ChromaExtractor};
use segue::cli::Args;
use segue::config::{AppConfig, AudioConfig};
use segue::score::ReferenceScore;
use segue::session::Session;

/// Parse a comma-separated list like "40,70" into frame indices.
fn parse_pages(s: &str) -> Vec<usize> {
    s.split(',')
        .filter_map(|t| t.trim().parse::<usize>().ok())
        .collect()
}

/// Evenly split `frames` into `num_pages` pages (page-end indices).
fn split_pages(frames: usize, num_pages: usize) -> Vec<usize> {
    if num_pages <= 1 {
        return Vec::new();
    }
    (1..num_pages).map(|i| i * frames / num_pages).collect()
}

/// Run the chroma extractor over a recording, one frame per hop.
fn analyze_reference(samples: &[f32], audio: &AudioConfig) -> Vec<Chroma> {
    let mut ring = SampleRing::new(audio.block_size);
    let mut extractor = ChromaExtractor::new(audio.sample_rate, audio.block_size);
    samples
        .chunks(audio.hop_size)
        .map(|hop| {
            ring.push(hop);
            extractor.extract(ring.as_slice())
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = AppConfig::load_or_default(&args.config);

    let (ref_samples, ref_rate) = read_mono(&args.reference)?;
    if ref_rate != cfg.audio.sample_rate {
        warn!(
            "{}: sample rate {ref_rate} differs from configured {}",
            args.reference, cfg.audio.sample_rate
        );
    }
    let frames = analyze_reference(&ref_samples, &cfg.audio);
    let page_ends = match &args.pages {
        Some(s) => parse_pages(s),
        None => split_pages(frames.len(), args.num_pages),
    };
    let score = Arc::new(ReferenceScore::from_frames(frames, page_ends)?);
    info!(
        "reference ready: {} frames, {} pages",
        score.len(),
        score.total_pages()
    );

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_for_ctrlc = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_for_ctrlc.store(true, Ordering::SeqCst);
    })?;

    let session = match args.input.clone() {
        Some(path) => {
            let rate = cfg.audio.sample_rate;
            let hop = cfg.audio.hop_size;
            let realtime = args.realtime;
            Session::spawn(
                score,
                &cfg,
                move || {
                    Ok(Box::new(WavSource::open(&path, rate, hop, realtime)?)
                        as Box<dyn BlockSource>)
                },
                stop_flag,
            )
        }
        None => {
            let rate = cfg.audio.sample_rate;
            let hop = cfg.audio.hop_size;
            let stop_source = stop_flag.clone();
            Session::spawn(
                score,
                &cfg,
                move || {
                    Ok(Box::new(MicSource::open(rate, hop, stop_source)?)
                        as Box<dyn BlockSource>)
                },
                stop_flag,
            )
        }
    };

    let summary = session.join()?;
    info!(
        "session done: {} steps, {} recoveries, finished={}, final frame {}",
        summary.steps, summary.recoveries, summary.finished, summary.final_position
    );
    Ok(())
}
