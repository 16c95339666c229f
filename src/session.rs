//! Streaming harness: a producer thread drives capture -> features ->
//! tracking and publishes snapshots over a bounded latest-wins channel; a
//! consumer thread polls the channel and applies only the newest state.
//!
//! The producer's cadence is never a function of consumer speed: publishing
//! either succeeds immediately or evicts the oldest queued snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};
use thiserror::Error;
use tracing::{debug, info};

use crate::audio::ring::SampleRing;
use crate::audio::{AudioError, BlockRead, BlockSource};
use crate::chroma::ChromaExtractor;
use crate::config::AppConfig;
use crate::recovery::RecoveryTracker;
use crate::score::{ReferenceScore, ScoreError, TempoMap};
use crate::tracker::{Odtw, Snapshot};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Score(#[from] ScoreError),
}

/// Totals reported once the producer exits.
#[derive(Debug, Clone, Default)]
pub struct SessionSummary {
    pub steps: u64,
    pub recoveries: u32,
    pub finished: bool,
    pub final_position: usize,
}

/// Non-blocking publish with a latest-wins overflow policy: when the channel
/// is full, the oldest queued snapshot is evicted and the new one inserted.
/// Requires a channel of capacity >= 1.
pub fn publish_latest(tx: &Sender<Snapshot>, rx: &Receiver<Snapshot>, snapshot: Snapshot) {
    let mut pending = snapshot;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return,
            Err(TrySendError::Full(s)) => {
                let _ = rx.try_recv();
                pending = s;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

/// Capture loop: block -> ring -> chroma/RMS -> tracking step -> publish.
/// Exits on the stop flag, source exhaustion, or a finished piece.
pub fn producer_loop(
    source: &mut dyn BlockSource,
    tracker: &mut RecoveryTracker,
    extractor: &mut ChromaExtractor,
    ring: &mut SampleRing,
    hop: usize,
    tx: &Sender<Snapshot>,
    rx: &Receiver<Snapshot>,
    stop: &AtomicBool,
) -> Result<SessionSummary, SessionError> {
    let mut block = vec![0.0f32; hop];
    let mut summary = SessionSummary::default();

    loop {
        if stop.load(Ordering::SeqCst) {
            info!("stop requested; capture loop exiting");
            break;
        }
        match source.read_block(&mut block)? {
            BlockRead::Block => {}
            BlockRead::Finished => break,
        }

        ring.push(&block);
        let samples = ring.as_slice();
        let energy = ChromaExtractor::rms(samples);
        let chroma = extractor.extract(samples);

        let (snapshot, _recovered) = tracker.step(&chroma, energy);
        summary.steps += 1;
        summary.finished = snapshot.finished;
        summary.final_position = snapshot.position;
        let finished = snapshot.finished;
        publish_latest(tx, rx, snapshot);
        if finished {
            break;
        }
    }

    summary.recoveries = tracker.recovery_count();
    Ok(summary)
}

/// Polling consumer: each tick drains everything queued and applies only the
/// most recent snapshot, so a burst of frames never builds up display lag.
/// Ends on a finished snapshot or once the producer is gone (it drops its
/// sender on exit, which is how "stop flag set and producer terminated"
/// becomes observable here).
pub fn consumer_loop(
    rx: &Receiver<Snapshot>,
    poll_interval: Duration,
    mut apply: impl FnMut(&Snapshot),
) {
    loop {
        thread::sleep(poll_interval);

        let mut latest = None;
        let mut disconnected = false;
        loop {
            match rx.try_recv() {
                Ok(s) => latest = Some(s),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if let Some(s) = latest {
            apply(&s);
            if s.finished {
                break;
            }
        }
        if disconnected {
            break;
        }
    }
}

/// Console display state for the consumer side.
pub struct ConsoleDisplay {
    last_page: usize,
    announced_finish: bool,
}

impl ConsoleDisplay {
    pub fn new() -> Self {
        Self {
            last_page: 0,
            announced_finish: false,
        }
    }

    pub fn apply(&mut self, s: &Snapshot) {
        if let Some(target) = s.page_turn {
            info!(">>> turn to page {target} <<<");
        }
        if s.page != self.last_page {
            info!("page {}/{}", s.page, s.total_pages);
            self.last_page = s.page;
        }
        debug!(
            "frame {}/{} ({:.1}%) measure {} beat {} cost {:.2} rms {:.3}",
            s.position,
            s.score_len,
            s.progress * 100.0,
            s.measure,
            s.beat,
            s.cost,
            s.energy
        );
        if s.finished && !self.announced_finish {
            info!("performance finished at frame {}/{}", s.position, s.score_len);
            self.announced_finish = true;
        }
    }
}

impl Default for ConsoleDisplay {
    fn default() -> Self {
        Self::new()
    }
}

/// One running producer/consumer pair over a shared snapshot channel.
pub struct Session {
    producer: thread::JoinHandle<Result<SessionSummary, SessionError>>,
    consumer: thread::JoinHandle<()>,
}

impl Session {
    /// Spawn both threads. `make_source` runs on the producer thread, so
    /// sources that are not `Send` (the cpal stream) are fine.
    pub fn spawn<F>(
        score: Arc<ReferenceScore>,
        cfg: &AppConfig,
        make_source: F,
        stop: Arc<AtomicBool>,
    ) -> Session
    where
        F: FnOnce() -> Result<Box<dyn BlockSource>, AudioError> + Send + 'static,
    {
        let (tx, rx) = bounded::<Snapshot>(cfg.session.channel_capacity.max(1));
        let poll_interval = Duration::from_millis(cfg.session.poll_interval_ms.max(1));

        let tempo = TempoMap {
            bpm: cfg.tracker.bpm,
            beats_per_measure: cfg.tracker.beats_per_measure,
            hop: cfg.audio.hop_size,
            sample_rate: cfg.audio.sample_rate,
        };
        let audio_cfg = cfg.audio.clone();
        let tracker_cfg = cfg.tracker.clone();
        let recovery_cfg = cfg.recovery.clone();

        let rx_producer = rx.clone();
        let producer = thread::Builder::new()
            .name("producer".into())
            .spawn(move || {
                let mut source = make_source()?;
                let mut tracker =
                    RecoveryTracker::new(Odtw::new(score, &tracker_cfg, tempo), &recovery_cfg);
                let mut extractor =
                    ChromaExtractor::new(audio_cfg.sample_rate, audio_cfg.block_size);
                let mut ring = SampleRing::new(audio_cfg.block_size);
                producer_loop(
                    source.as_mut(),
                    &mut tracker,
                    &mut extractor,
                    &mut ring,
                    audio_cfg.hop_size,
                    &tx,
                    &rx_producer,
                    &stop,
                )
            })
            .expect("spawn producer");

        let consumer = thread::Builder::new()
            .name("consumer".into())
            .spawn(move || {
                let mut display = ConsoleDisplay::new();
                consumer_loop(&rx, poll_interval, |s| display.apply(s));
            })
            .expect("spawn consumer");

        Session { producer, consumer }
    }

    /// Wait for both sides; producer result carries the summary.
    pub fn join(self) -> Result<SessionSummary, SessionError> {
        let summary = self.producer.join().expect("producer thread panicked");
        let _ = self.consumer.join();
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(position: usize) -> Snapshot {
        Snapshot {
            position,
            page: 1,
            total_pages: 1,
            score_len: 100,
            progress: position as f32 / 100.0,
            cost: 0.0,
            energy: 0.0,
            running: true,
            finished: false,
            page_turn: None,
            measure: 1,
            beat: 1,
        }
    }

    #[test]
    fn publish_latest_evicts_oldest() {
        let (tx, rx) = bounded::<Snapshot>(3);
        for i in 0..10 {
            publish_latest(&tx, &rx, snap(i));
        }
        let queued: Vec<usize> = rx.try_iter().map(|s| s.position).collect();
        assert_eq!(queued, vec![7, 8, 9], "only the newest snapshots survive");
    }

    #[test]
    fn publish_latest_never_blocks_without_consumer() {
        let (tx, rx) = bounded::<Snapshot>(1);
        for i in 0..1000 {
            publish_latest(&tx, &rx, snap(i));
        }
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn consumer_applies_only_latest_per_tick() {
        let (tx, rx) = bounded::<Snapshot>(8);
        for i in 0..5 {
            publish_latest(&tx, &rx, snap(i));
        }
        drop(tx);

        let mut applied = Vec::new();
        consumer_loop(&rx, Duration::from_millis(1), |s| applied.push(s.position));
        assert_eq!(applied, vec![4], "intermediate snapshots are discarded");
    }
}
