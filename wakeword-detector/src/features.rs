/// Spectral feature extraction
///
/// Short-time analysis of a ~1 second chunk: Hann-windowed FFT frames give
/// the spectral centroid, the per-frame energy envelope gives voicing and
/// syllable-like energy peaks. Pure function of the input.

use crate::audio_buffer::{AudioSample, SAMPLE_RATE};
use crate::vad::mean_energy;
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;
use thiserror::Error;

/// Samples per analysis frame (32 ms at 16kHz)
pub const ANALYSIS_FRAME: usize = 512;

/// Hop between analysis frames (16 ms at 16kHz)
pub const ANALYSIS_HOP: usize = 256;

/// Frame energy below which a frame is treated as unvoiced
pub const DEFAULT_VOICED_FLOOR: f32 = 0.0005;

#[derive(Error, Debug, PartialEq)]
pub enum FeatureError {
    #[error("Empty audio chunk")]
    EmptyChunk,

    #[error("Audio chunk contains non-finite sample at index {0}")]
    NonFinite(usize),
}

/// Features of one audio chunk
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    /// Root-mean-square amplitude of the whole chunk
    pub rms: f32,

    /// Fraction of adjacent sample pairs that change sign
    pub zero_crossing_rate: f32,

    /// Mean spectral centroid of voiced frames, in Hz (0 when nothing is voiced)
    pub spectral_centroid_hz: f32,

    /// Fraction of analysis frames above the voicing floor
    pub voiced_ratio: f32,

    /// Distinct peaks in the frame-energy envelope (syllable nuclei)
    pub energy_peaks: usize,

    /// Chunk length in milliseconds
    pub duration_ms: u64,
}

/// Windowed-FFT feature extractor with pre-planned FFT and scratch space
pub struct FeatureExtractor {
    sample_rate: usize,
    voiced_floor: f32,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex32>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::with_params(SAMPLE_RATE, DEFAULT_VOICED_FLOOR)
    }

    pub fn with_params(sample_rate: usize, voiced_floor: f32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(ANALYSIS_FRAME);

        let window = (0..ANALYSIS_FRAME)
            .map(|n| 0.5 - 0.5 * ((2.0 * PI * n as f32) / (ANALYSIS_FRAME - 1) as f32).cos())
            .collect();

        Self {
            sample_rate,
            voiced_floor,
            fft,
            window,
            scratch: vec![Complex32::new(0.0, 0.0); ANALYSIS_FRAME],
        }
    }

    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Compute the feature vector of a chunk
    pub fn extract(&mut self, chunk: &[AudioSample]) -> Result<FeatureVector, FeatureError> {
        if chunk.is_empty() {
            return Err(FeatureError::EmptyChunk);
        }
        if let Some(index) = chunk.iter().position(|s| !s.is_finite()) {
            return Err(FeatureError::NonFinite(index));
        }

        let rms = mean_energy(chunk).sqrt();
        let zero_crossing_rate = zero_crossing_rate(chunk);

        let mut envelope = Vec::new();
        let mut centroid_sum = 0.0f32;
        let mut voiced = 0usize;

        let mut start = 0;
        loop {
            let end = (start + ANALYSIS_FRAME).min(chunk.len());
            let frame = &chunk[start..end];

            let energy = mean_energy(frame);
            envelope.push(energy);

            if energy > self.voiced_floor {
                voiced += 1;
                centroid_sum += self.frame_centroid(frame);
            }

            if start + ANALYSIS_FRAME >= chunk.len() {
                break;
            }
            start += ANALYSIS_HOP;
        }

        let spectral_centroid_hz = if voiced > 0 {
            centroid_sum / voiced as f32
        } else {
            0.0
        };

        Ok(FeatureVector {
            rms,
            zero_crossing_rate,
            spectral_centroid_hz,
            voiced_ratio: voiced as f32 / envelope.len() as f32,
            energy_peaks: count_energy_peaks(&envelope, self.voiced_floor),
            duration_ms: (chunk.len() * 1000 / self.sample_rate) as u64,
        })
    }

    /// Spectral centroid of one frame; short frames are zero-padded
    fn frame_centroid(&mut self, frame: &[AudioSample]) -> f32 {
        for (i, dst) in self.scratch.iter_mut().enumerate() {
            let sample = frame.get(i).copied().unwrap_or(0.0);
            *dst = Complex32::new(sample * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let bin_hz = self.sample_rate as f32 / ANALYSIS_FRAME as f32;
        let (weighted, total) = self.scratch[1..ANALYSIS_FRAME / 2]
            .iter()
            .enumerate()
            .fold((0.0f32, 0.0f32), |(weighted, total), (i, c)| {
                let magnitude = c.norm();
                (weighted + (i + 1) as f32 * bin_hz * magnitude, total + magnitude)
            });

        if total > f32::EPSILON {
            weighted / total
        } else {
            0.0
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Zero-crossing rate (ZCR)
///
/// Speech typically has moderate ZCR, silence and hum very low ZCR.
pub fn zero_crossing_rate(samples: &[AudioSample]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }

    let crossings = samples
        .windows(2)
        .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
        .count();

    crossings as f32 / (samples.len() - 1) as f32
}

/// Count rising excursions of the energy envelope with hysteresis.
///
/// A peak starts when the smoothed envelope crosses half its maximum and
/// must fall below a quarter of the maximum before another peak can start.
fn count_energy_peaks(envelope: &[f32], floor: f32) -> usize {
    let smoothed: Vec<f32> = (0..envelope.len())
        .map(|i| {
            let lo = i.saturating_sub(1);
            let hi = (i + 2).min(envelope.len());
            envelope[lo..hi].iter().sum::<f32>() / (hi - lo) as f32
        })
        .collect();

    let max = smoothed.iter().copied().fold(0.0f32, f32::max);
    if max <= floor {
        return 0;
    }

    let rise = max * 0.5;
    let fall = max * 0.25;
    let mut peaks = 0;
    let mut armed = true;

    for &energy in &smoothed {
        if armed && energy >= rise {
            peaks += 1;
            armed = false;
        } else if !armed && energy < fall {
            armed = true;
        }
    }

    peaks
}
