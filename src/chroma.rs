//! Chroma feature extraction: audio block -> 12-dim pitch-class vector + RMS.

use rustfft::{Fft, FftPlanner, num_complex::Complex32};
use std::sync::Arc;

pub const NUM_CHROMA: usize = 12;

/// One pitch-class energy vector (C, C#, ..., B) for a single analysis frame.
pub type Chroma = [f32; NUM_CHROMA];

/// Band limits for the frequency-to-pitch-class fold. Content below ~50 Hz is
/// dominated by rumble, content above 4 kHz carries little note identity.
const FOLD_FMIN_HZ: f32 = 50.0;
const FOLD_FMAX_HZ: f32 = 4000.0;

/// Magnitude noise gate applied per FFT bin before folding.
const MAG_GATE: f32 = 1e-4;

/// Symmetric Hann window, w[i] = 0.5 * (1 - cos(2*pi*i/(N-1))).
fn hann_window(n: usize) -> Vec<f32> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let two_pi = std::f32::consts::PI * 2.0;
            let denom = (n - 1) as f32;
            (0..n)
                .map(|i| 0.5 * (1.0 - (two_pi * i as f32 / denom).cos()))
                .collect()
        }
    }
}

/// L2-normalize a chroma vector. Near-zero vectors (norm < 1e-4) are returned
/// unchanged so a silent frame never turns into NaN.
pub fn l2_normalized(v: &Chroma) -> Chroma {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm < 1e-4 {
        return *v;
    }
    let mut out = [0.0; NUM_CHROMA];
    for (o, x) in out.iter_mut().zip(v.iter()) {
        *o = x / norm;
    }
    out
}

/// Cosine distance `1 - dot(a, b)` with the dot product clamped to [-1, 1].
/// For unit vectors the result lies in [0, 2].
pub fn cosine_distance(a: &Chroma, b: &Chroma) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    1.0 - dot.clamp(-1.0, 1.0)
}

/// Computes chroma vectors from fixed-size audio blocks.
///
/// Hann window -> FFT -> magnitude spectrum -> fold each bin onto its pitch
/// class via `midi = 69 + 12*log2(f/440)` -> max-normalize. The output is
/// deliberately not L2-normalized; the tracker normalizes after smoothing.
pub struct ChromaExtractor {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    buf: Vec<Complex32>,
    sample_rate: u32,
    block_size: usize,
}

impl ChromaExtractor {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(block_size);
        Self {
            fft,
            window: hann_window(block_size),
            buf: vec![Complex32::new(0.0, 0.0); block_size],
            sample_rate,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Extract one chroma vector from a full analysis block.
    pub fn extract(&mut self, samples: &[f32]) -> Chroma {
        debug_assert_eq!(samples.len(), self.block_size);

        for (b, (&s, &w)) in self.buf.iter_mut().zip(samples.iter().zip(&self.window)) {
            *b = Complex32::new(s * w, 0.0);
        }
        self.fft.process(&mut self.buf);

        let mut chroma = [0.0f32; NUM_CHROMA];
        let bin_hz = self.sample_rate as f32 / self.block_size as f32;
        // Skip bins 0..2: DC and near-DC carry no pitch information.
        for bin in 2..self.block_size / 2 {
            let freq = bin as f32 * bin_hz;
            if freq < FOLD_FMIN_HZ {
                continue;
            }
            if freq > FOLD_FMAX_HZ {
                break;
            }
            let magnitude = self.buf[bin].norm();
            if magnitude < MAG_GATE {
                continue;
            }
            let midi = 69.0 + 12.0 * (freq / 440.0).log2();
            let class = (midi.round() as i32).rem_euclid(12) as usize;
            chroma[class] += magnitude;
        }

        // Max-normalize so dynamics do not change the profile shape.
        let max = chroma.iter().cloned().fold(0.0f32, f32::max);
        if max > 1e-3 {
            for c in chroma.iter_mut() {
                *c /= max;
            }
        }
        chroma
    }

    /// RMS energy of a block, used for the tracker's start gate and display.
    pub fn rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }
}
