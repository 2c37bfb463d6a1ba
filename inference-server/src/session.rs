/// Per-connection inference session
///
/// Each WebSocket client gets its own buffer, extractor and model. Every
/// inbound message produces exactly one reply; malformed input is answered
/// with `ERROR` and the session carries on.

use crate::config::ServerConfig;
use std::sync::Arc;
use tracing::{debug, info, warn};
use wakeword_detector::classifier::ClassifierError;
use wakeword_detector::detection::now_millis;
use wakeword_detector::features::DEFAULT_VOICED_FLOOR;
use wakeword_detector::protocol::decode_pcm;
use wakeword_detector::{
    AudioBuffer, ClientMessage, FeatureExtractor, HeuristicModel, ServerMessage, WakeWordModel,
};

pub struct InferenceSession {
    config: Arc<ServerConfig>,
    buffer: AudioBuffer,
    extractor: FeatureExtractor,
    model: Box<dyn WakeWordModel>,
    language: String,
    sensitivity: f32,
    active: bool,
    chunks_scored: u64,
}

impl InferenceSession {
    /// Session scoring with the heuristic model
    pub fn new(config: Arc<ServerConfig>) -> Self {
        let model = HeuristicModel::new(&config.wake_words);
        Self::with_model(config, Box::new(model))
    }

    pub fn with_model(config: Arc<ServerConfig>, mut model: Box<dyn WakeWordModel>) -> Self {
        let sample_rate = config.sample_rate as usize;
        model.configure(&config.wake_words, &config.language);

        Self {
            buffer: AudioBuffer::with_duration(config.buffer_duration_ms, sample_rate),
            extractor: FeatureExtractor::with_params(sample_rate, DEFAULT_VOICED_FLOOR),
            model,
            language: config.language.clone(),
            sensitivity: config.sensitivity,
            active: false,
            chunks_scored: 0,
            config,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn sensitivity(&self) -> f32 {
        self.sensitivity
    }

    pub fn chunks_scored(&self) -> u64 {
        self.chunks_scored
    }

    /// Handle one raw text frame
    pub fn handle_text(&mut self, raw: &str) -> ServerMessage {
        match ClientMessage::from_json(raw) {
            Ok(message) => self.handle(message),
            Err(e) => {
                warn!("Rejecting malformed client message: {}", e);
                ServerMessage::error(format!("Malformed message: {}", e))
            }
        }
    }

    pub fn handle(&mut self, message: ClientMessage) -> ServerMessage {
        match message {
            ClientMessage::Start => {
                self.active = true;
                info!(language = %self.language, sensitivity = self.sensitivity, "Session started");
                ServerMessage::status("Listening")
            }
            ClientMessage::Stop => {
                self.active = false;
                self.buffer.clear();
                info!(chunks = self.chunks_scored, "Session stopped");
                ServerMessage::status("Stopped")
            }
            ClientMessage::SetLanguage { data } => {
                if data.trim().is_empty() {
                    return ServerMessage::error("Language must not be empty");
                }
                self.model.configure(&self.config.wake_words, &data);
                self.language = data;
                ServerMessage::status(format!("Language set to {}", self.language))
            }
            ClientMessage::SetSensitivity { data } => {
                if !(0.0..=1.0).contains(&data) {
                    return ServerMessage::error(format!(
                        "Sensitivity must be between 0.0 and 1.0, got {}",
                        data
                    ));
                }
                self.sensitivity = data;
                ServerMessage::status(format!("Sensitivity set to {:.2}", data))
            }
            ClientMessage::AudioChunk { data, .. } => {
                if !self.active {
                    return ServerMessage::error("Session not started");
                }
                match self.score_chunk(&data) {
                    Ok(message) => message,
                    Err(message) => ServerMessage::error(message),
                }
            }
        }
    }

    fn score_chunk(&mut self, data: &str) -> Result<ServerMessage, String> {
        let samples = decode_pcm(data).map_err(|e| format!("Invalid audio chunk: {}", e))?;
        self.buffer.write(&samples);

        let chunk = self.buffer.extract(self.config.chunk_duration_ms);
        let confidence = self
            .extractor
            .extract(&chunk)
            .map_err(ClassifierError::from)
            .and_then(|features| self.model.score(&features))
            .map_err(|e| format!("Classification failed: {}", e))?;

        self.chunks_scored += 1;
        let detected = confidence >= self.sensitivity;
        debug!(confidence, detected, "chunk scored");

        Ok(ServerMessage::Detection {
            detected,
            confidence,
            timestamp: now_millis(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;
    use wakeword_detector::protocol::encode_pcm;

    fn session() -> InferenceSession {
        InferenceSession::new(Arc::new(ServerConfig::default()))
    }

    fn audio(samples: &[f32]) -> String {
        ClientMessage::audio_chunk(samples).to_json().unwrap()
    }

    #[test]
    fn test_start_and_stop_reply_with_status() {
        let mut session = session();

        assert!(matches!(session.handle(ClientMessage::Start), ServerMessage::Status { .. }));
        assert!(session.is_active());
        assert!(matches!(session.handle(ClientMessage::Stop), ServerMessage::Status { .. }));
        assert!(!session.is_active());
    }

    #[test]
    fn test_audio_before_start_is_rejected() {
        let mut session = session();
        let reply = session.handle_text(&audio(&[0.1; 1600]));

        assert!(matches!(reply, ServerMessage::Error { message, .. } if message.contains("not started")));
        assert_eq!(session.chunks_scored(), 0);
    }

    #[test_case("{not json" ; "invalid json")]
    #[test_case(r#"{"type":"REWIND"}"# ; "unknown type")]
    #[test_case(r#"{"type":"SET_SENSITIVITY","data":"high"}"# ; "wrong payload")]
    fn test_malformed_input_gets_error_reply(raw: &str) {
        let mut session = session();
        session.handle(ClientMessage::Start);

        let reply = session.handle_text(raw);
        assert!(matches!(reply, ServerMessage::Error { message, .. } if message.starts_with("Malformed")));
        assert!(session.is_active());
    }

    #[test_case(-0.1 ; "below range")]
    #[test_case(1.5 ; "above range")]
    fn test_out_of_range_sensitivity_is_rejected(value: f32) {
        let mut session = session();
        let reply = session.handle(ClientMessage::SetSensitivity { data: value });

        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert_eq!(session.sensitivity(), 0.5);
    }

    #[test]
    fn test_language_update() {
        let mut session = session();

        assert!(matches!(
            session.handle(ClientMessage::SetLanguage { data: "fr-FR".to_string() }),
            ServerMessage::Status { .. }
        ));
        assert_eq!(session.language(), "fr-FR");

        assert!(matches!(
            session.handle(ClientMessage::SetLanguage { data: " ".to_string() }),
            ServerMessage::Error { .. }
        ));
        assert_eq!(session.language(), "fr-FR");
    }

    #[test]
    fn test_silence_is_not_a_detection() {
        let mut session = session();
        session.handle(ClientMessage::Start);

        match session.handle_text(&audio(&[0.0; 4096])) {
            ServerMessage::Detection { detected, confidence, .. } => {
                assert!(!detected);
                assert_eq!(confidence, 0.0);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(session.chunks_scored(), 1);
    }

    #[test]
    fn test_zero_sensitivity_accepts_every_chunk() {
        let mut session = session();
        session.handle(ClientMessage::Start);
        session.handle(ClientMessage::SetSensitivity { data: 0.0 });

        let reply = session.handle_text(&audio(&[0.0; 512]));
        assert!(matches!(reply, ServerMessage::Detection { detected: true, .. }));
    }

    #[test]
    fn test_invalid_pcm_is_rejected() {
        let mut session = session();
        session.handle(ClientMessage::Start);

        let odd = format!(
            r#"{{"type":"AUDIO_CHUNK","data":"{}","timestamp":1}}"#,
            &encode_pcm(&[0.5])[..2]
        );
        let reply = session.handle_text(&odd);
        assert!(matches!(reply, ServerMessage::Error { .. }));
        assert_eq!(session.chunks_scored(), 0);
    }
}
