/// Remote inference wire protocol
///
/// JSON messages tagged by `type`. Audio travels as base64-encoded 16-bit
/// little-endian mono PCM at the engine sample rate.

use crate::audio_buffer::AudioSample;
use crate::detection::now_millis;
use crate::preprocess::{f32_to_i16, i16_to_f32};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("PCM payload has odd byte length {0}")]
    OddPcmLength(usize),
}

/// Messages sent by the engine to the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    AudioChunk { data: String, timestamp: i64 },
    SetLanguage { data: String },
    SetSensitivity { data: f32 },
    Start,
    Stop,
}

impl ClientMessage {
    /// Package samples as an `AUDIO_CHUNK` stamped now
    pub fn audio_chunk(samples: &[AudioSample]) -> Self {
        ClientMessage::AudioChunk {
            data: encode_pcm(samples),
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Messages pushed by the inference service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    Detection {
        detected: bool,
        confidence: f32,
        timestamp: i64,
    },
    Status {
        message: String,
        timestamp: i64,
    },
    Error {
        message: String,
        timestamp: i64,
    },
}

impl ServerMessage {
    pub fn status(message: impl Into<String>) -> Self {
        ServerMessage::Status {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            timestamp: now_millis(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Encode normalized samples as base64 16-bit little-endian PCM
pub fn encode_pcm(samples: &[AudioSample]) -> String {
    let bytes: Vec<u8> = f32_to_i16(samples)
        .into_iter()
        .flat_map(i16::to_le_bytes)
        .collect();

    STANDARD.encode(bytes)
}

/// Decode base64 16-bit little-endian PCM into normalized samples
pub fn decode_pcm(data: &str) -> Result<Vec<AudioSample>, ProtocolError> {
    let bytes = STANDARD.decode(data)?;
    if bytes.len() % 2 != 0 {
        return Err(ProtocolError::OddPcmLength(bytes.len()));
    }

    let pcm: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok(i16_to_f32(&pcm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use serde_json::json;

    #[test]
    fn test_client_message_shapes() {
        let start = serde_json::to_value(ClientMessage::Start).unwrap();
        assert_eq!(start, json!({"type": "START"}));

        let language = serde_json::to_value(ClientMessage::SetLanguage { data: "fr-FR".into() }).unwrap();
        assert_eq!(language, json!({"type": "SET_LANGUAGE", "data": "fr-FR"}));

        let sensitivity = serde_json::to_value(ClientMessage::SetSensitivity { data: 0.5 }).unwrap();
        assert_eq!(sensitivity, json!({"type": "SET_SENSITIVITY", "data": 0.5}));

        let chunk = serde_json::to_value(ClientMessage::AudioChunk {
            data: "AAA=".into(),
            timestamp: 42,
        })
        .unwrap();
        assert_eq!(chunk, json!({"type": "AUDIO_CHUNK", "data": "AAA=", "timestamp": 42}));
    }

    #[test]
    fn test_parse_inbound_messages() {
        let detection = ServerMessage::from_json(
            r#"{"type":"DETECTION","detected":true,"confidence":0.87,"timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(
            detection,
            ServerMessage::Detection {
                detected: true,
                confidence: 0.87,
                timestamp: 1_700_000_000_000,
            }
        );

        let status = ServerMessage::from_json(r#"{"type":"STATUS","message":"ready","timestamp":1}"#).unwrap();
        assert!(matches!(status, ServerMessage::Status { ref message, .. } if message == "ready"));
    }

    #[test]
    fn test_malformed_messages_are_errors() {
        assert!(ServerMessage::from_json("not json").is_err());
        assert!(ServerMessage::from_json(r#"{"type":"BOGUS"}"#).is_err());
        assert!(ServerMessage::from_json(r#"{"type":"DETECTION","detected":true}"#).is_err());
    }

    #[test]
    fn test_pcm_encoding_is_little_endian() {
        let encoded = encode_pcm(&[1.0, 0.0]);
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(bytes, vec![0xFF, 0x7F, 0x00, 0x00]);
    }

    #[test]
    fn test_pcm_decoding() {
        let decoded = decode_pcm(&encode_pcm(&[0.5, -0.25, 0.0])).unwrap();

        assert_eq!(decoded.len(), 3);
        assert_relative_eq!(decoded[0], 0.5, epsilon = 0.001);
        assert_relative_eq!(decoded[1], -0.25, epsilon = 0.001);
        assert_relative_eq!(decoded[2], 0.0);
    }

    #[test]
    fn test_pcm_decoding_errors() {
        assert!(matches!(decode_pcm("***"), Err(ProtocolError::Base64(_))));
        assert!(matches!(decode_pcm(&STANDARD.encode([1u8, 2, 3])), Err(ProtocolError::OddPcmLength(3))));
    }
}
