/// Voice Activity Detection (VAD) module
///
/// Classifies each frame as speech-bearing or silent from its mean energy.
/// Used as a gate in front of feature extraction and classification so that
/// silent stretches cost almost nothing. Quiet speech may be missed; that
/// trade-off is accepted.

use crate::audio_buffer::AudioSample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

#[derive(Error, Debug)]
pub enum VadError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// VAD configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VadConfig {
    /// Mean squared amplitude above which a frame counts as speech (0.0 - 1.0)
    pub energy_threshold: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 0.0005, // ~-33 dBFS RMS
        }
    }
}

impl VadConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), VadError> {
        if !(0.0..=1.0).contains(&self.energy_threshold) {
            return Err(VadError::InvalidConfig(
                "energy_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Stateless energy-based voice activity detector
#[derive(Debug, Clone, Default)]
pub struct VoiceActivityDetector {
    config: VadConfig,
}

impl VoiceActivityDetector {
    /// Create a new VAD with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new VAD with custom configuration
    pub fn with_config(config: VadConfig) -> Self {
        Self { config }
    }

    /// Whether the frame carries enough energy to be worth analysing
    pub fn is_active(&self, frame: &[AudioSample]) -> bool {
        let energy = mean_energy(frame);
        let active = energy > self.config.energy_threshold;

        trace!(energy, active, "VAD frame decision");
        active
    }

    /// Get current configuration
    pub fn config(&self) -> &VadConfig {
        &self.config
    }
}

/// Mean squared amplitude of a frame (0.0 for an empty frame)
pub fn mean_energy(samples: &[AudioSample]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum();

    (sum_squares / samples.len() as f64) as f32
}
