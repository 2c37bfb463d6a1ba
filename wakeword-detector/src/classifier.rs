/// Wake word classification strategies
///
/// Local classification runs the feature extractor and a pluggable scoring
/// model in process. Remote classification ships audio chunks to an inference
/// service over the streaming transport and turns its verdicts into the same
/// `DetectionEvent`s.

use crate::audio_buffer::AudioSample;
use crate::detection::{DetectionEvent, DetectionSource};
use crate::features::{FeatureError, FeatureExtractor, FeatureVector};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::{
    DuplexConnector, StreamingTransport, TransportConfig, TransportError, TransportEvent,
    TransportState,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Speech band used by the heuristic centroid score, in Hz
pub const SPEECH_BAND_HZ: (f32, f32) = (400.0, 3500.0);

/// RMS below which a chunk is considered too quiet to hold a wake word
const MIN_SPEECH_RMS: f32 = 0.01;

/// RMS at which the energy score saturates
const FULL_SPEECH_RMS: f32 = 0.05;

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Feature extraction failed: {0}")]
    Feature(#[from] FeatureError),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Remote classifier unavailable: {0}")]
    Transport(#[from] TransportError),
}

/// Scores a feature vector as wake-word evidence
#[cfg_attr(test, mockall::automock)]
pub trait WakeWordModel: Send {
    /// Called whenever the active wake phrases or language change
    fn configure(&mut self, wake_words: &[String], language: &str);

    /// Confidence in `[0, 1]` that the chunk holds a wake phrase
    fn score(&self, features: &FeatureVector) -> Result<f32, ClassifierError>;
}

/// Heuristic acoustic model.
///
/// This is NOT a trained wake-word model: it rewards chunks that look like a
/// short spoken phrase whose syllable count matches one of the wake phrases.
/// Scores are deterministic.
#[derive(Debug, Clone, Default)]
pub struct HeuristicModel {
    syllables: Vec<usize>,
}

impl HeuristicModel {
    pub fn new(wake_words: &[String]) -> Self {
        let mut model = Self::default();
        model.configure(wake_words, "");
        model
    }

    /// Expected syllable count per configured phrase
    pub fn syllables(&self) -> &[usize] {
        &self.syllables
    }

    fn syllable_score(&self, peaks: usize) -> f32 {
        self.syllables
            .iter()
            .map(|&expected| {
                let diff = (peaks as f32 - expected as f32).abs();
                (1.0 - diff / expected.max(1) as f32).max(0.0)
            })
            .fold(0.0f32, f32::max)
    }
}

impl WakeWordModel for HeuristicModel {
    fn configure(&mut self, wake_words: &[String], _language: &str) {
        self.syllables = wake_words.iter().map(|w| count_syllables(w)).collect();
        debug!(syllables = ?self.syllables, "heuristic model configured");
    }

    fn score(&self, features: &FeatureVector) -> Result<f32, ClassifierError> {
        let energy = ((features.rms - MIN_SPEECH_RMS) / (FULL_SPEECH_RMS - MIN_SPEECH_RMS)).clamp(0.0, 1.0);
        if energy == 0.0 {
            return Ok(0.0);
        }

        let score = 0.35 * self.syllable_score(features.energy_peaks)
            + 0.25 * centroid_score(features.spectral_centroid_hz)
            + 0.2 * energy
            + 0.2 * voiced_score(features.voiced_ratio);

        Ok(score.clamp(0.0, 1.0))
    }
}

fn centroid_score(centroid: f32) -> f32 {
    let (low, high) = SPEECH_BAND_HZ;
    if centroid <= 0.0 {
        0.0
    } else if centroid < low {
        centroid / low
    } else if centroid > high {
        high / centroid
    } else {
        1.0
    }
}

/// A spoken phrase leaves gaps; a wall of sound or a click does not
fn voiced_score(ratio: f32) -> f32 {
    if ratio < 0.2 {
        ratio / 0.2
    } else if ratio > 0.9 {
        ((1.0 - ratio) / 0.1).max(0.0)
    } else {
        1.0
    }
}

/// Rough syllable count: vowel groups per word, at least one per word
pub fn count_syllables(phrase: &str) -> usize {
    phrase
        .split(|c: char| !c.is_alphabetic())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut groups = 0;
            let mut in_vowel = false;
            for ch in word.chars().flat_map(char::to_lowercase) {
                let vowel = is_vowel(ch);
                if vowel && !in_vowel {
                    groups += 1;
                }
                in_vowel = vowel;
            }
            groups.max(1)
        })
        .sum()
}

fn is_vowel(ch: char) -> bool {
    matches!(
        ch,
        'a' | 'e' | 'i' | 'o' | 'u' | 'y'
            | 'à' | 'á' | 'â' | 'ä' | 'è' | 'é' | 'ê' | 'ë'
            | 'ì' | 'í' | 'î' | 'ï' | 'ò' | 'ó' | 'ô' | 'ö'
            | 'ù' | 'ú' | 'û' | 'ü'
    )
}

/// In-process classifier
pub struct LocalClassifier {
    extractor: FeatureExtractor,
    model: Box<dyn WakeWordModel>,
}

impl LocalClassifier {
    pub fn new(extractor: FeatureExtractor, model: Box<dyn WakeWordModel>) -> Self {
        Self { extractor, model }
    }

    /// Classifier backed by the heuristic model
    pub fn heuristic(extractor: FeatureExtractor, wake_words: &[String], language: &str) -> Self {
        let mut model = HeuristicModel::default();
        model.configure(wake_words, language);
        Self::new(extractor, Box::new(model))
    }

    pub fn configure(&mut self, wake_words: &[String], language: &str) {
        self.model.configure(wake_words, language);
    }

    /// Score one chunk
    pub fn classify(&mut self, chunk: &[AudioSample]) -> Result<DetectionEvent, ClassifierError> {
        let features = self.extractor.extract(chunk)?;
        let confidence = self.model.score(&features)?;

        Ok(DetectionEvent::new(confidence, DetectionSource::Local))
    }
}

/// Classifier delegating to a remote inference service
pub struct RemoteClassifier {
    transport: StreamingTransport,
    language: String,
    sensitivity: f32,
}

impl RemoteClassifier {
    /// Build the classifier and the receiver for its transport events
    pub fn new(
        url: impl Into<String>,
        config: TransportConfig,
        connector: Arc<dyn DuplexConnector>,
        language: impl Into<String>,
        sensitivity: f32,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (transport, events) = StreamingTransport::new(url, config, connector);

        let classifier = Self {
            transport,
            language: language.into(),
            sensitivity,
        };
        classifier.refresh_handshake();

        (classifier, events)
    }

    pub fn transport_state(&self) -> TransportState {
        self.transport.state()
    }

    /// Begin streaming; connection progress arrives as transport events
    pub fn start(&mut self) {
        info!(url = %self.transport.url(), "Starting remote classification");
        self.refresh_handshake();
        self.transport.open();
    }

    /// Tell the peer to stop and release the connection
    pub async fn stop(&mut self) {
        if self.transport.state() == TransportState::Connected {
            let _ = self.transport.send(ClientMessage::Stop);
        }
        self.transport.disconnect().await;
    }

    pub fn send_audio(&self, samples: &[AudioSample]) -> Result<(), ClassifierError> {
        Ok(self.transport.send(ClientMessage::audio_chunk(samples))?)
    }

    /// Update the peer's threshold now and on every reconnect
    pub fn set_sensitivity(&mut self, sensitivity: f32) {
        self.sensitivity = sensitivity;
        self.refresh_handshake();

        if self.transport.state() == TransportState::Connected {
            let _ = self
                .transport
                .send(ClientMessage::SetSensitivity { data: sensitivity });
        }
    }

    /// Takes effect on the next (re)connect
    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
        self.refresh_handshake();
    }

    fn refresh_handshake(&self) {
        self.transport.set_handshake(vec![
            ClientMessage::SetLanguage {
                data: self.language.clone(),
            },
            ClientMessage::SetSensitivity {
                data: self.sensitivity,
            },
            ClientMessage::Start,
        ]);
    }

    /// Detection evidence carried by a transport event, if any.
    ///
    /// The peer's own `detected` verdict is ignored; the engine applies its
    /// current sensitivity to the confidence like any other evidence.
    pub fn interpret(event: &TransportEvent) -> Option<DetectionEvent> {
        match event {
            TransportEvent::Message(ServerMessage::Detection {
                confidence,
                timestamp,
                ..
            }) => Some(DetectionEvent::at(*confidence, *timestamp, DetectionSource::Remote)),
            _ => None,
        }
    }
}

/// The active classification strategy
pub enum Classifier {
    Local(LocalClassifier),
    Remote(RemoteClassifier),
}

impl Classifier {
    pub fn is_local(&self) -> bool {
        matches!(self, Classifier::Local(_))
    }
}
