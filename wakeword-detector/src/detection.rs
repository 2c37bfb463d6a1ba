/// Detection evidence flowing into the engine
///
/// Every classifier (local audio model, remote inference peer, transcript
/// matcher) reports through the same event type so the engine never needs to
/// know which one is active.

use serde::{Deserialize, Serialize};

/// Where a piece of detection evidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// In-process audio classifier
    Local,
    /// Remote inference service over the streaming transport
    Remote,
    /// Text match against a command transcript
    Transcript,
}

/// A single classifier verdict
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionEvent {
    confidence: f32,
    timestamp: i64,
    source: DetectionSource,
}

impl DetectionEvent {
    /// Build an event stamped with the current time.
    ///
    /// Confidence is clamped into range; NaN is treated as no confidence.
    pub fn new(confidence: f32, source: DetectionSource) -> Self {
        Self::at(confidence, now_millis(), source)
    }

    pub fn at(confidence: f32, timestamp: i64, source: DetectionSource) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };

        Self {
            confidence,
            timestamp,
            source,
        }
    }

    /// Confidence score, always within 0.0 - 1.0
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Milliseconds since the Unix epoch
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn source(&self) -> DetectionSource {
        self.source
    }

    /// Whether this event clears the given sensitivity threshold
    pub fn exceeds(&self, sensitivity: f32) -> bool {
        self.confidence >= sensitivity
    }
}

/// Current time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
