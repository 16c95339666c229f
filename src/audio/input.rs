//! Microphone capture: a cpal input stream pushes samples into an SPSC ring,
//! and the producer loop pops fixed hop-sized blocks out of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::traits::*;
use ringbuf::{HeapCons, HeapRb};
use tracing::{info, warn};

use super::{AudioError, BlockRead, BlockSource};

/// Live microphone block source. Not `Send`: the cpal stream must live on
/// the thread that created it, so construct this inside the producer thread.
pub struct MicSource {
    _stream: cpal::Stream,
    cons: HeapCons<f32>,
    stop: Arc<AtomicBool>,
}

impl MicSource {
    pub fn open(sample_rate: u32, hop: usize, stop: Arc<AtomicBool>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(AudioError::NoInputDevice)?;

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let config = cpal::StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        // Generous transport capacity; a slow producer iteration must not
        // immediately turn into dropped samples.
        let rb = HeapRb::<f32>::new(hop * 64);
        let (mut prod, cons) = rb.split();

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                // Take channel 0 of each frame; the tracker is mono.
                let mut dropped = 0usize;
                for frame in data.chunks(channels as usize) {
                    if prod.try_push(frame[0]).is_err() {
                        dropped += 1;
                    }
                }
                if dropped > 0 {
                    warn!("capture overflow: dropped {dropped} samples");
                }
            },
            |err| warn!("input stream error: {err}"),
            None,
        )?;
        stream.play()?;
        info!(
            "capture started ({} Hz, {} channel(s), hop {hop})",
            sample_rate, channels
        );

        Ok(Self {
            _stream: stream,
            cons,
            stop,
        })
    }
}

impl BlockSource for MicSource {
    fn read_block(&mut self, out: &mut [f32]) -> Result<BlockRead, AudioError> {
        let mut filled = 0;
        while filled < out.len() {
            if self.stop.load(Ordering::SeqCst) {
                return Ok(BlockRead::Finished);
            }
            filled += self.cons.pop_slice(&mut out[filled..]);
            if filled < out.len() {
                std::thread::sleep(std::time::Duration::from_micros(200));
            }
        }
        Ok(BlockRead::Block)
    }
}
