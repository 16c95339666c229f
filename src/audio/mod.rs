//! Capture-side audio: sample accumulation and block sources (microphone,
//! WAV replay). Everything here feeds the producer loop; nothing in this
//! module knows about tracking.

pub mod input;
pub mod ring;
pub mod wav;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("no default input device")]
    NoInputDevice,

    #[error("querying input device config failed: {0}")]
    StreamConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("building input stream failed: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("starting input stream failed: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("wav input: {0}")]
    Wav(#[from] hound::Error),
}

/// Result of pulling one capture block from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRead {
    /// `out` was filled with a full block.
    Block,
    /// The source has no more data (end of file, or stop requested).
    Finished,
}

/// A source of fixed-size sample blocks at the capture cadence. The producer
/// loop owns its source and blocks only here, waiting for the next block.
pub trait BlockSource {
    fn read_block(&mut self, out: &mut [f32]) -> Result<BlockRead, AudioError>;
}
