/// Engine configuration
///
/// JSON (camelCase) with every field defaulted, plus environment overrides
/// for the handful of settings operators change most often.

use crate::transport::TransportConfig;
use crate::vad::{VadConfig, VadError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

impl From<VadError> for ConfigError {
    fn from(e: VadError) -> Self {
        ConfigError::Invalid(e.to_string())
    }
}

/// Wake word engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Minimum confidence that triggers a detection (0.0 - 1.0)
    pub sensitivity: f32,

    /// Classify in process instead of via the remote service
    pub use_local_processing: bool,

    /// Remote inference endpoint; absent forces local processing
    #[serde(rename = "webSocketUrl")]
    pub web_socket_url: Option<String>,

    /// Wake phrases for languages without an override
    pub wake_words: Vec<String>,

    #[serde(rename = "enableVAD")]
    pub enable_vad: bool,

    /// History kept in the circular buffer
    pub buffer_duration_ms: u64,

    /// BCP-47 language tag
    pub language: String,

    /// Per-language wake phrase overrides
    pub language_wake_words: HashMap<String, Vec<String>>,

    pub sample_rate: u32,

    /// Samples per capture frame
    pub frame_size: usize,

    /// Audio scored per local classification
    pub chunk_duration_ms: u64,

    /// Spacing between classifications
    pub analysis_interval_ms: u64,

    /// Quiet period after a detection
    pub cooldown_ms: u64,

    pub vad: VadConfig,

    pub transport: TransportConfig,

    pub battery_poll_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sensitivity: 0.5,
            use_local_processing: true,
            web_socket_url: None,
            wake_words: vec!["orion".to_string()],
            enable_vad: true,
            buffer_duration_ms: 3000,
            language: "en-US".to_string(),
            language_wake_words: HashMap::new(),
            sample_rate: 16000,
            frame_size: 512,
            chunk_duration_ms: 1000,
            analysis_interval_ms: 250,
            cooldown_ms: 3000,
            vad: VadConfig::default(),
            transport: TransportConfig::default(),
            battery_poll_interval_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        debug!(path = %path.as_ref().display(), "Loaded engine config");
        Ok(config)
    }

    /// Apply `WAKEWORD_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("WAKEWORD_SENSITIVITY") {
            self.sensitivity = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("WAKEWORD_SENSITIVITY is not a number: {}", raw)))?;
        }

        if let Some(url) = lookup("WAKEWORD_URL") {
            let url = url.trim().to_string();
            self.web_socket_url = (!url.is_empty()).then_some(url);
        }

        if let Some(language) = lookup("WAKEWORD_LANGUAGE") {
            self.language = language.trim().to_string();
        }

        if let Some(raw) = lookup("WAKEWORD_LOCAL") {
            self.use_local_processing = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::Invalid(format!(
                        "WAKEWORD_LOCAL must be a boolean: {}",
                        raw
                    )))
                }
            };
        }

        Ok(())
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.sensitivity) {
            return Err(ConfigError::Invalid(
                "sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.wake_words.iter().all(|w| w.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "at least one wake word is required".to_string(),
            ));
        }

        if self.language.trim().is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".to_string()));
        }

        if !(8000..=48000).contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(
                "sample_rate must be between 8000 and 48000".to_string(),
            ));
        }

        if self.frame_size == 0 {
            return Err(ConfigError::Invalid("frame_size must be positive".to_string()));
        }

        if self.chunk_duration_ms == 0 || self.analysis_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "chunk_duration_ms and analysis_interval_ms must be positive".to_string(),
            ));
        }

        if self.buffer_duration_ms < self.chunk_duration_ms {
            return Err(ConfigError::Invalid(
                "buffer_duration_ms must hold at least one chunk".to_string(),
            ));
        }

        if self.battery_poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "battery_poll_interval_ms must be positive".to_string(),
            ));
        }

        if self.transport.reconnect_base_delay_ms == 0 || self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transport delays must be positive".to_string(),
            ));
        }

        if let Some(url) = &self.web_socket_url {
            if !(url.starts_with("ws://") || url.starts_with("wss://")) {
                return Err(ConfigError::Invalid(format!(
                    "webSocketUrl must be a ws:// or wss:// URL: {}",
                    url
                )));
            }
        }

        self.vad.validate()?;

        Ok(())
    }

    /// Local processing is forced when no remote endpoint is configured
    pub fn is_local(&self) -> bool {
        self.use_local_processing || self.web_socket_url.is_none()
    }

    /// Wake phrases active for `language`
    pub fn wake_words_for(&self, language: &str) -> Vec<String> {
        self.language_wake_words
            .get(language)
            .filter(|words| !words.is_empty())
            .unwrap_or(&self.wake_words)
            .clone()
    }

    pub fn analysis_interval(&self) -> Duration {
        Duration::from_millis(self.analysis_interval_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn battery_poll_interval(&self) -> Duration {
        Duration::from_millis(self.battery_poll_interval_ms)
    }
}
