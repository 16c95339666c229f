//! WAV replay: serves a recording as hop-sized blocks, optionally paced at
//! the real capture cadence, so offline runs and tests exercise the same
//! producer path as the microphone.

use std::time::{Duration, Instant};

use hound::{SampleFormat, WavReader};
use tracing::warn;

use super::{AudioError, BlockRead, BlockSource};

/// Read a WAV file, mixing all channels down to mono. Returns the samples
/// and the file's sample rate.
pub fn read_mono(path: &str) -> Result<(Vec<f32>, u32), AudioError> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u32 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let mono = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };
    Ok((mono, spec.sample_rate))
}

pub struct WavSource {
    samples: Vec<f32>,
    pos: usize,
    // Real-time pacing: deadline per hop, as the capture device would tick.
    pacing: Option<Pacing>,
}

struct Pacing {
    next_deadline: Instant,
    hop_duration: Duration,
}

impl WavSource {
    /// `realtime` paces blocks at `hop / sample_rate` seconds apiece;
    /// otherwise blocks are served as fast as the consumer of this source
    /// asks for them.
    pub fn open(path: &str, expected_rate: u32, hop: usize, realtime: bool) -> Result<Self, AudioError> {
        let (samples, rate) = read_mono(path)?;
        if rate != expected_rate {
            warn!(
                "{path}: sample rate {rate} differs from configured {expected_rate}; \
                 pitch classes will be misaligned"
            );
        }
        let pacing = realtime.then(|| Pacing {
            next_deadline: Instant::now(),
            hop_duration: Duration::from_secs_f32(hop as f32 / expected_rate as f32),
        });
        Ok(Self {
            samples,
            pos: 0,
            pacing,
        })
    }

    pub fn from_samples(samples: Vec<f32>) -> Self {
        Self {
            samples,
            pos: 0,
            pacing: None,
        }
    }
}

impl BlockSource for WavSource {
    fn read_block(&mut self, out: &mut [f32]) -> Result<BlockRead, AudioError> {
        if self.pos >= self.samples.len() {
            return Ok(BlockRead::Finished);
        }

        if let Some(pacing) = &mut self.pacing {
            pacing.next_deadline += pacing.hop_duration;
            let now = Instant::now();
            if now < pacing.next_deadline {
                std::thread::sleep(pacing.next_deadline - now);
            } else {
                pacing.next_deadline = now;
            }
        }

        let available = (self.samples.len() - self.pos).min(out.len());
        out[..available].copy_from_slice(&self.samples[self.pos..self.pos + available]);
        out[available..].fill(0.0);
        self.pos += available;
        Ok(BlockRead::Block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serves_blocks_then_finishes() {
        let mut src = WavSource::from_samples((0..10).map(|i| i as f32).collect());
        let mut block = [0.0f32; 4];

        assert_eq!(src.read_block(&mut block).unwrap(), BlockRead::Block);
        assert_eq!(block, [0.0, 1.0, 2.0, 3.0]);
        assert_eq!(src.read_block(&mut block).unwrap(), BlockRead::Block);
        assert_eq!(block, [4.0, 5.0, 6.0, 7.0]);

        // Last partial block is zero-padded.
        assert_eq!(src.read_block(&mut block).unwrap(), BlockRead::Block);
        assert_eq!(block, [8.0, 9.0, 0.0, 0.0]);

        assert_eq!(src.read_block(&mut block).unwrap(), BlockRead::Finished);
    }
}
