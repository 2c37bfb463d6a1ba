/// Audio preprocessing module
///
/// Turns whatever a capture device delivers (any rate, any channel count,
/// integer or float samples) into the normalized 16kHz mono stream the
/// pipeline expects, cut into fixed-size frames.

use crate::audio_buffer::AudioSample;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;
use tracing::debug;

/// Input samples fed to the resampler per processing call
const RESAMPLER_CHUNK: usize = 1024;

#[derive(Error, Debug)]
pub enum PreprocessorError {
    #[error("Invalid sample rate: {0} Hz (must be > 0)")]
    InvalidSampleRate(u32),

    #[error("Resampling failed: {0}")]
    ResamplingError(String),
}

/// Average interleaved multi-channel audio down to mono
pub fn downmix(interleaved: &[AudioSample], channels: usize) -> Vec<AudioSample> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Convert i16 PCM samples to f32
pub fn i16_to_f32(samples: &[i16]) -> Vec<AudioSample> {
    samples
        .iter()
        .map(|&s| s as f32 / i16::MAX as f32)
        .collect()
}

/// Convert unsigned 16-bit PCM samples to f32
pub fn u16_to_f32(samples: &[u16]) -> Vec<AudioSample> {
    samples
        .iter()
        .map(|&s| (s as f32 - 32768.0) / 32768.0)
        .collect()
}

/// Convert f32 samples to i16 PCM
pub fn f32_to_i16(samples: &[AudioSample]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            (clamped * i16::MAX as f32) as i16
        })
        .collect()
}

/// Streaming sample-rate converter
///
/// Keeps the sinc resampler and a carry-over buffer alive between calls so
/// arbitrary block sizes can be pushed. Same-rate input passes straight
/// through.
pub struct StreamResampler {
    inner: Option<SincFixedIn<f32>>,
    pending: Vec<AudioSample>,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, PreprocessorError> {
        if input_rate == 0 {
            return Err(PreprocessorError::InvalidSampleRate(input_rate));
        }
        if output_rate == 0 {
            return Err(PreprocessorError::InvalidSampleRate(output_rate));
        }

        let inner = if input_rate == output_rate {
            None
        } else {
            debug!("Resampling: {} Hz -> {} Hz", input_rate, output_rate);

            let params = SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            };

            let resampler = SincFixedIn::<f32>::new(
                output_rate as f64 / input_rate as f64,
                2.0,
                params,
                RESAMPLER_CHUNK,
                1, // mono
            )
            .map_err(|e| PreprocessorError::ResamplingError(e.to_string()))?;

            Some(resampler)
        };

        Ok(Self {
            inner,
            pending: Vec::new(),
            input_rate,
            output_rate,
        })
    }

    /// Push input samples, returning whatever output is ready
    pub fn process(&mut self, samples: &[AudioSample]) -> Result<Vec<AudioSample>, PreprocessorError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);

        let mut output = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }

            let chunk: Vec<AudioSample> = self.pending.drain(..needed).collect();
            let waves = resampler
                .process(&[chunk], None)
                .map_err(|e| PreprocessorError::ResamplingError(e.to_string()))?;

            if let Some(channel) = waves.first() {
                output.extend_from_slice(channel);
            }
        }

        Ok(output)
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }
}

/// Cuts a continuous sample stream into fixed-size frames
pub struct Framer {
    frame_size: usize,
    pending: Vec<AudioSample>,
}

impl Framer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Push samples and drain every complete frame
    pub fn push(&mut self, samples: &[AudioSample]) -> Vec<Vec<AudioSample>> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.frame_size;
        let mut frames = Vec::with_capacity(complete);
        for _ in 0..complete {
            frames.push(self.pending.drain(..self.frame_size).collect());
        }

        frames
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Samples waiting for the next frame
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
