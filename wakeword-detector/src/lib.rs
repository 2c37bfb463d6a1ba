/// Wake-word detector library
///
/// Continuous capture into a circular buffer, energy VAD gating, spectral
/// features and confidence-thresholded wake-word classification, either in
/// process or against a remote inference service over a reconnecting
/// WebSocket transport. `WakeWordEngine` ties the pipeline together.

pub mod audio_buffer;
pub mod battery;
pub mod capture;
pub mod classifier;
pub mod config;
pub mod detection;
pub mod engine;
pub mod features;
pub mod matcher;
pub mod preprocess;
pub mod protocol;
pub mod sources;
pub mod transport;
pub mod vad;

// Re-export main types
pub use audio_buffer::{AudioBuffer, AudioSample, SAMPLE_RATE};
pub use battery::{BatteryImpact, BatteryProbe, BatteryStatus, NoBattery, SysfsBattery};
pub use capture::{AudioCapture, AudioFrame, AudioSource, CaptureError, SourceStream, StreamGuard};
pub use classifier::{
    Classifier, ClassifierError, HeuristicModel, LocalClassifier, RemoteClassifier, WakeWordModel,
};
pub use config::{ConfigError, EngineConfig};
pub use detection::{DetectionEvent, DetectionSource};
pub use engine::{
    EngineBuilder, EngineError, EngineEvent, EngineSnapshot, EngineState, EngineStats,
    WakeWordEngine, WakeWordEvent,
};
pub use features::{FeatureError, FeatureExtractor, FeatureVector};
pub use matcher::{MatchKind, PhraseMatch, PhraseMatcher};
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use sources::{CpalSource, WavFileSource};
pub use transport::{
    DuplexChannel, DuplexConnector, StreamingTransport, TransportConfig, TransportError,
    TransportEvent, TransportState, WsConnector,
};
pub use vad::{VadConfig, VadError, VoiceActivityDetector};
