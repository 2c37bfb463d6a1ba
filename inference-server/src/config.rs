/// Inference server configuration
///
/// Read from `INFERENCE_*` environment variables with local defaults.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ServerConfigError {
    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub bind: SocketAddr,

    /// Wake phrases scored by the heuristic model
    pub wake_words: Vec<String>,

    /// Language assumed until a client sends `SET_LANGUAGE`
    pub language: String,

    /// Threshold assumed until a client sends `SET_SENSITIVITY`
    pub sensitivity: f32,

    /// Rate of the PCM clients send
    pub sample_rate: u32,

    /// Audio scored per verdict
    pub chunk_duration_ms: u64,

    /// Audio history kept per session
    pub buffer_duration_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8765)),
            wake_words: vec!["orion".to_string()],
            language: "en-US".to_string(),
            sensitivity: 0.5,
            sample_rate: 16000,
            chunk_duration_ms: 1000,
            buffer_duration_ms: 3000,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment
    pub fn from_env() -> Result<Self, ServerConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ServerConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("INFERENCE_BIND") {
            config.bind = raw.trim().parse().map_err(|_| ServerConfigError::InvalidValue {
                key: "INFERENCE_BIND",
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup("INFERENCE_WAKE_WORDS") {
            config.wake_words = raw
                .split(',')
                .map(|w| w.trim().to_string())
                .filter(|w| !w.is_empty())
                .collect();
        }

        if let Some(raw) = lookup("INFERENCE_SENSITIVITY") {
            config.sensitivity = raw.trim().parse().map_err(|_| ServerConfigError::InvalidValue {
                key: "INFERENCE_SENSITIVITY",
                value: raw.clone(),
            })?;
        }

        if let Some(raw) = lookup("INFERENCE_SAMPLE_RATE") {
            config.sample_rate = raw.trim().parse().map_err(|_| ServerConfigError::InvalidValue {
                key: "INFERENCE_SAMPLE_RATE",
                value: raw.clone(),
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ServerConfigError> {
        if self.wake_words.is_empty() {
            return Err(ServerConfigError::Invalid(
                "at least one wake word is required".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(ServerConfigError::Invalid(
                "sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !(8000..=48000).contains(&self.sample_rate) {
            return Err(ServerConfigError::Invalid(
                "sample_rate must be between 8000 and 48000".to_string(),
            ));
        }

        if self.chunk_duration_ms == 0 || self.buffer_duration_ms < self.chunk_duration_ms {
            return Err(ServerConfigError::Invalid(
                "buffer must hold at least one non-empty chunk".to_string(),
            ));
        }

        Ok(())
    }
}
