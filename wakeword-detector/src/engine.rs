/// Wake word engine
///
/// Orchestrates capture, buffering, VAD gating, classification and the
/// detection state machine. All mutable state lives in one actor task; the
/// public handle only sends commands and reads published snapshots, so every
/// state transition is serialized.
///
/// ```text
/// Idle -> Starting -> Listening <-> Detected
///   ^                    |            |
///   +---- Stopping <-----+------------+        Error reachable from any state
/// ```

use crate::audio_buffer::{ms_to_samples, AudioBuffer, AudioSample};
use crate::battery::{BatteryImpact, BatteryProbe, NoBattery, SysfsBattery};
use crate::capture::{AudioCapture, AudioFrame, AudioSource, CaptureError};
use crate::classifier::{Classifier, HeuristicModel, LocalClassifier, RemoteClassifier, WakeWordModel};
use crate::config::{ConfigError, EngineConfig};
use crate::detection::{DetectionEvent, DetectionSource};
use crate::features::FeatureExtractor;
use crate::matcher::PhraseMatcher;
use crate::protocol::ServerMessage;
use crate::sources::CpalSource;
use crate::transport::{DuplexConnector, TransportEvent, WsConnector};
use crate::vad::VoiceActivityDetector;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// Frames buffered between the capture pump and the engine
const FRAME_QUEUE: usize = 32;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Audio capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Engine task is no longer running")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Idle,
    Starting,
    Listening,
    /// Cooling down after a detection
    Detected,
    Stopping,
    Error,
}

impl EngineState {
    /// Whether a capture session is (or is about to be) running
    pub fn is_running(self) -> bool {
        matches!(
            self,
            EngineState::Starting | EngineState::Listening | EngineState::Detected
        )
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Idle => "idle",
            EngineState::Starting => "starting",
            EngineState::Listening => "listening",
            EngineState::Detected => "detected",
            EngineState::Stopping => "stopping",
            EngineState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Wake-word detection delivered to the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct WakeWordEvent {
    pub confidence: f32,
    pub source: DetectionSource,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Most recent chunk of audio at detection time
    pub audio_context: Vec<AudioSample>,
}

/// Consumer-facing notifications
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    WakeWordDetected(WakeWordEvent),
    StatusChanged(String),
    StateChanged(EngineState),
    BatteryImpact(BatteryImpact),
}

/// Engine counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_processed: u64,
    pub chunks_analyzed: u64,
    pub chunks_skipped_silent: u64,
    pub classification_failures: u64,
    pub detections: u64,
}

/// Read-only view of the engine, republished on every change.
/// Frame counters are refreshed once per analysis interval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub state: EngineState,
    pub sensitivity: f32,
    pub language: String,
    pub wake_words: Vec<String>,
    pub local_processing: bool,
    pub battery_impact: Option<BatteryImpact>,
    pub stats: EngineStats,
}

enum Command {
    Start(oneshot::Sender<Result<(), EngineError>>),
    Stop(oneshot::Sender<()>),
    SetLanguage(String, oneshot::Sender<Result<(), EngineError>>),
    SetSensitivity(f32, oneshot::Sender<Result<(), EngineError>>),
    Detection(DetectionEvent),
    Transcript(String, oneshot::Sender<bool>),
}

/// Assembles an engine from its collaborators
pub struct EngineBuilder {
    config: EngineConfig,
    source: Option<Arc<dyn AudioSource>>,
    model: Option<Box<dyn WakeWordModel>>,
    connector: Option<Arc<dyn DuplexConnector>>,
    battery: Option<Box<dyn BatteryProbe>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            source: None,
            model: None,
            connector: None,
            battery: None,
        }
    }

    /// Audio input (default: system microphone)
    pub fn source(mut self, source: Arc<dyn AudioSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Local scoring model (default: `HeuristicModel`)
    pub fn model(mut self, model: Box<dyn WakeWordModel>) -> Self {
        self.model = Some(model);
        self
    }

    /// Remote connector (default: WebSocket)
    pub fn connector(mut self, connector: Arc<dyn DuplexConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Battery probe (default: sysfs)
    pub fn battery(mut self, battery: Box<dyn BatteryProbe>) -> Self {
        self.battery = Some(battery);
        self
    }

    /// Validate the config and spawn the engine task.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> Result<WakeWordEngine, EngineError> {
        let config = self.config;
        config.validate()?;

        let language = config.language.clone();
        let wake_words = config.wake_words_for(&language);

        let (classifier, transport_events) = match (config.is_local(), config.web_socket_url.clone()) {
            (false, Some(url)) => {
                let connector = self.connector.unwrap_or_else(|| Arc::new(WsConnector));
                let (remote, events) = RemoteClassifier::new(
                    url,
                    config.transport.clone(),
                    connector,
                    language.clone(),
                    config.sensitivity,
                );
                (Classifier::Remote(remote), Some(events))
            }
            _ => {
                let extractor =
                    FeatureExtractor::with_params(config.sample_rate as usize, config.vad.energy_threshold);
                let model = self.model.unwrap_or_else(|| Box::new(HeuristicModel::default()));
                let mut local = LocalClassifier::new(extractor, model);
                local.configure(&wake_words, &language);
                (Classifier::Local(local), None)
            }
        };

        let source = self
            .source
            .unwrap_or_else(|| Arc::new(CpalSource::default_input()));
        let battery = self
            .battery
            .unwrap_or_else(|| Box::new(SysfsBattery::new()));

        let buffer = Arc::new(AudioBuffer::with_duration(
            config.buffer_duration_ms,
            config.sample_rate as usize,
        ));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        info!(
            local = classifier.is_local(),
            language = %language,
            wake_words = ?wake_words,
            sensitivity = config.sensitivity,
            "Creating wake word engine"
        );

        let actor = EngineActor {
            capture: AudioCapture::new(source, config.sample_rate, config.frame_size),
            vad: VoiceActivityDetector::with_config(config.vad.clone()),
            buffer: Arc::clone(&buffer),
            matcher: PhraseMatcher::new(&wake_words),
            analysis_hop: ms_to_samples(config.analysis_interval_ms, config.sample_rate as usize).max(1),
            sensitivity: config.sensitivity,
            language,
            wake_words,
            classifier,
            battery,
            battery_impact: None,
            state: EngineState::Idle,
            stats: EngineStats::default(),
            cooldown_until: None,
            samples_since_analysis: 0,
            voiced_since_analysis: false,
            events: event_tx,
            snapshot: watch::channel(EngineSnapshot {
                state: EngineState::Idle,
                sensitivity: config.sensitivity,
                language: config.language.clone(),
                wake_words: Vec::new(),
                local_processing: config.is_local(),
                battery_impact: None,
                stats: EngineStats::default(),
            })
            .0,
            config,
        };

        let snapshot = actor.snapshot.subscribe();
        actor.publish();
        tokio::spawn(actor.run(command_rx, transport_events));

        Ok(WakeWordEngine {
            commands: command_tx,
            event_rx: Arc::new(RwLock::new(event_rx)),
            snapshot,
            buffer,
        })
    }
}

/// Handle to a running wake word engine
///
/// Dropping the handle stops the engine and releases its resources.
pub struct WakeWordEngine {
    commands: mpsc::UnboundedSender<Command>,
    event_rx: Arc<RwLock<mpsc::UnboundedReceiver<EngineEvent>>>,
    snapshot: watch::Receiver<EngineSnapshot>,
    buffer: Arc<AudioBuffer>,
}

impl WakeWordEngine {
    /// Engine with default model, connector and battery probe
    pub fn new(config: EngineConfig, source: Arc<dyn AudioSource>) -> Result<Self, EngineError> {
        EngineBuilder::new(config).source(source).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Start listening. A no-op while already running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Stop listening and release the microphone and connection. Never fails.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(Command::Stop(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Switch language; a running engine restarts once
    pub async fn set_language(&self, language: impl Into<String>) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetLanguage(language.into(), tx))?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Change the detection threshold immediately
    pub async fn set_sensitivity(&self, sensitivity: f32) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::SetSensitivity(sensitivity, tx))?;
        rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Feed externally produced evidence through the detection gate
    pub fn submit_detection(&self, event: DetectionEvent) -> Result<(), EngineError> {
        self.send(Command::Detection(event))
    }

    /// Match a command transcript against the active wake phrases.
    ///
    /// Returns whether a phrase matched; the resulting detection still goes
    /// through the usual state and cooldown checks.
    pub async fn submit_transcript(&self, transcript: impl Into<String>) -> Result<bool, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Transcript(transcript.into(), tx))?;
        rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> EngineState {
        self.snapshot.borrow().state
    }

    pub fn stats(&self) -> EngineStats {
        self.snapshot.borrow().stats.clone()
    }

    /// Watch snapshot changes
    pub fn subscribe(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    /// Copy of the most recent `duration_ms` of captured audio
    pub fn recent_audio(&self, duration_ms: u64) -> Vec<AudioSample> {
        self.buffer.extract(duration_ms)
    }

    /// Wait for the next engine event
    pub async fn recv_event(&self) -> Option<EngineEvent> {
        let mut rx = self.event_rx.write().await;
        rx.recv().await
    }

    /// Next engine event, if one is queued
    pub async fn try_recv_event(&self) -> Option<EngineEvent> {
        let mut rx = self.event_rx.write().await;
        rx.try_recv().ok()
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::ChannelClosed)
    }
}

struct EngineActor {
    config: EngineConfig,
    sensitivity: f32,
    language: String,
    wake_words: Vec<String>,
    matcher: PhraseMatcher,
    state: EngineState,
    capture: AudioCapture,
    vad: VoiceActivityDetector,
    buffer: Arc<AudioBuffer>,
    classifier: Classifier,
    battery: Box<dyn BatteryProbe>,
    battery_impact: Option<BatteryImpact>,
    stats: EngineStats,
    cooldown_until: Option<Instant>,
    analysis_hop: usize,
    samples_since_analysis: usize,
    voiced_since_analysis: bool,
    events: mpsc::UnboundedSender<EngineEvent>,
    snapshot: watch::Sender<EngineSnapshot>,
}

type FrameRx = Option<mpsc::Receiver<AudioFrame>>;

impl EngineActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut transport_events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    ) {
        let mut frames: FrameRx = None;
        let mut battery_tick = tokio::time::interval(self.config.battery_poll_interval());
        battery_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command, &mut frames).await,
                    None => break,
                },
                frame = next_frame(&mut frames) => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => self.on_capture_ended(&mut frames).await,
                },
                event = next_transport_event(&mut transport_events) => match event {
                    Some(event) => self.on_transport_event(event, &mut frames).await,
                    None => transport_events = None,
                },
                _ = cooldown_elapsed(self.cooldown_until) => self.end_cooldown(),
                _ = battery_tick.tick() => self.sample_battery().await,
            }
        }

        debug!("Engine handle dropped, shutting down");
        self.release(&mut frames).await;
    }

    async fn handle_command(&mut self, command: Command, frames: &mut FrameRx) {
        match command {
            Command::Start(reply) => {
                let result = self.start(frames).await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.stop(frames).await;
                let _ = reply.send(());
            }
            Command::SetLanguage(language, reply) => {
                let result = self.set_language(language, frames).await;
                let _ = reply.send(result);
            }
            Command::SetSensitivity(sensitivity, reply) => {
                let _ = reply.send(self.set_sensitivity(sensitivity));
            }
            Command::Detection(event) => self.on_detection(event),
            Command::Transcript(transcript, reply) => {
                let found = self.matcher.find(&transcript);
                let matched = found.is_some();
                if let Some(found) = found {
                    debug!(phrase = %found.phrase, kind = ?found.kind, "Transcript matched wake phrase");
                    self.on_detection(found.into_detection());
                }
                let _ = reply.send(matched);
            }
        }
    }

    async fn start(&mut self, frames: &mut FrameRx) -> Result<(), EngineError> {
        if self.state.is_running() {
            debug!(state = %self.state, "Start ignored, engine already running");
            return Ok(());
        }

        self.set_state(EngineState::Starting);
        self.buffer.clear();
        self.samples_since_analysis = 0;
        self.voiced_since_analysis = false;
        self.cooldown_until = None;

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_QUEUE);
        if let Err(e) = self.capture.initialize(frame_tx).await {
            error!("Failed to start audio capture: {}", e);
            self.status(format!("Microphone unavailable: {}", e));
            self.set_state(EngineState::Error);
            return Err(e.into());
        }
        *frames = Some(frame_rx);

        if let Classifier::Remote(remote) = &mut self.classifier {
            remote.start();
            self.status("Connecting to inference service".to_string());
        }

        self.set_state(EngineState::Listening);
        self.status(format!("Listening for {}", self.wake_words.join(", ")));
        info!(language = %self.language, "Wake word engine listening");

        Ok(())
    }

    async fn stop(&mut self, frames: &mut FrameRx) {
        if self.state == EngineState::Idle {
            self.release(frames).await;
            return;
        }

        self.set_state(EngineState::Stopping);
        self.release(frames).await;
        self.set_state(EngineState::Idle);
        self.status("Stopped".to_string());
        info!("Wake word engine stopped");
    }

    /// Release capture and transport; infallible and idempotent
    async fn release(&mut self, frames: &mut FrameRx) {
        self.capture.stop().await;
        *frames = None;

        if let Classifier::Remote(remote) = &mut self.classifier {
            remote.stop().await;
        }

        self.cooldown_until = None;
        self.samples_since_analysis = 0;
        self.voiced_since_analysis = false;
    }

    async fn fail(&mut self, reason: String, frames: &mut FrameRx) {
        error!("Wake word engine error: {}", reason);
        self.release(frames).await;
        self.set_state(EngineState::Error);
        self.status(reason);
    }

    async fn set_language(&mut self, language: String, frames: &mut FrameRx) -> Result<(), EngineError> {
        let language = language.trim().to_string();
        if language.is_empty() {
            return Err(ConfigError::Invalid("language must not be empty".to_string()).into());
        }
        if language == self.language {
            return Ok(());
        }

        let was_running = self.state.is_running();
        info!(from = %self.language, to = %language, "Changing language");

        self.wake_words = self.config.wake_words_for(&language);
        self.matcher = PhraseMatcher::new(&self.wake_words);
        match &mut self.classifier {
            Classifier::Local(local) => local.configure(&self.wake_words, &language),
            Classifier::Remote(remote) => remote.set_language(language.clone()),
        }
        self.language = language;
        self.publish();

        if was_running {
            let cooldown = self.cooldown_until.filter(|until| *until > Instant::now());

            self.stop(frames).await;
            self.start(frames).await?;

            // A restart does not shorten a cooldown already in progress
            if let Some(until) = cooldown {
                self.cooldown_until = Some(until);
                self.set_state(EngineState::Detected);
            }
        }

        Ok(())
    }

    fn set_sensitivity(&mut self, sensitivity: f32) -> Result<(), EngineError> {
        if !(0.0..=1.0).contains(&sensitivity) {
            return Err(ConfigError::Invalid(format!(
                "sensitivity must be between 0.0 and 1.0, got {}",
                sensitivity
            ))
            .into());
        }

        debug!(from = self.sensitivity, to = sensitivity, "Sensitivity changed");
        self.sensitivity = sensitivity;
        if let Classifier::Remote(remote) = &mut self.classifier {
            remote.set_sensitivity(sensitivity);
        }
        self.publish();

        Ok(())
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        self.stats.frames_processed += 1;
        self.buffer.write(frame.samples());

        if !self.config.enable_vad || self.vad.is_active(frame.samples()) {
            self.voiced_since_analysis = true;
        }

        self.samples_since_analysis += frame.len();
        if self.samples_since_analysis < self.analysis_hop {
            return;
        }

        let hop = std::mem::take(&mut self.samples_since_analysis);
        let voiced = std::mem::take(&mut self.voiced_since_analysis);

        // Cooldown and transitional states skip analysis entirely
        if self.state != EngineState::Listening {
            return;
        }

        if !voiced {
            self.stats.chunks_skipped_silent += 1;
            trace!(sequence = frame.sequence(), "Silent interval skipped");
            self.publish();
            return;
        }

        let verdict = match &mut self.classifier {
            Classifier::Local(local) => {
                let chunk = self.buffer.extract(self.config.chunk_duration_ms);
                self.stats.chunks_analyzed += 1;
                Some(local.classify(&chunk))
            }
            Classifier::Remote(remote) => {
                let audio = self.buffer.latest(hop);
                match remote.send_audio(&audio) {
                    Ok(()) => self.stats.chunks_analyzed += 1,
                    Err(e) => trace!("Audio chunk not sent: {}", e),
                }
                None
            }
        };

        match verdict {
            Some(Ok(event)) => {
                trace!(confidence = event.confidence(), "Chunk classified");
                self.on_detection(event);
            }
            Some(Err(e)) => {
                self.stats.classification_failures += 1;
                warn!("Classification failed, chunk skipped: {}", e);
            }
            None => {}
        }

        self.publish();
    }

    async fn on_capture_ended(&mut self, frames: &mut FrameRx) {
        *frames = None;
        if self.state.is_running() {
            self.fail("Audio capture ended unexpectedly".to_string(), frames).await;
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent, frames: &mut FrameRx) {
        match event {
            TransportEvent::Connected => self.status("Connected to inference service".to_string()),
            TransportEvent::Disconnected { reason } => {
                self.status(format!("Connection to inference service lost: {}", reason))
            }
            TransportEvent::Reconnecting { attempt, delay } => self.status(format!(
                "Reconnecting to inference service (attempt {}) in {} ms",
                attempt,
                delay.as_millis()
            )),
            TransportEvent::Message(ServerMessage::Status { message, .. }) => self.status(message),
            TransportEvent::Message(ServerMessage::Error { message, .. }) => {
                warn!("Inference service reported an error: {}", message);
                self.status(format!("Inference service error: {}", message));
            }
            event @ TransportEvent::Message(ServerMessage::Detection { .. }) => {
                if let Some(detection) = RemoteClassifier::interpret(&event) {
                    self.on_detection(detection);
                }
            }
            TransportEvent::Malformed { error } => {
                self.status(format!("Ignored malformed message from inference service: {}", error));
            }
            TransportEvent::Failed { attempts } => {
                if self.state.is_running() {
                    self.fail(
                        format!("Inference service unreachable after {} reconnect attempts", attempts),
                        frames,
                    )
                    .await;
                }
            }
        }
    }

    /// Apply the detection gate: only while listening, only at or above the
    /// current sensitivity
    fn on_detection(&mut self, event: DetectionEvent) {
        if self.state != EngineState::Listening {
            trace!(state = %self.state, "Detection dropped outside listening state");
            return;
        }
        if !event.exceeds(self.sensitivity) {
            return;
        }

        info!(
            confidence = event.confidence(),
            source = ?event.source(),
            "Wake word detected"
        );

        self.stats.detections += 1;
        self.cooldown_until = Some(Instant::now() + self.config.cooldown());
        self.set_state(EngineState::Detected);

        self.emit(EngineEvent::WakeWordDetected(WakeWordEvent {
            confidence: event.confidence(),
            source: event.source(),
            timestamp: event.timestamp(),
            audio_context: self.buffer.extract(self.config.chunk_duration_ms),
        }));
    }

    fn end_cooldown(&mut self) {
        self.cooldown_until = None;
        if self.state == EngineState::Detected {
            debug!("Cooldown over");
            self.set_state(EngineState::Listening);
        }
    }

    /// Probes may touch the filesystem, so sampling runs on the blocking pool
    async fn sample_battery(&mut self) {
        let mut probe: Box<dyn BatteryProbe> = std::mem::replace(&mut self.battery, Box::new(NoBattery));
        let sampled = tokio::task::spawn_blocking(move || {
            let reading = probe.sample();
            (probe, reading)
        })
        .await;

        let status = match sampled {
            Ok((probe, reading)) => {
                self.battery = probe;
                reading
            }
            Err(e) => {
                warn!("Battery probe failed, disabling battery sampling: {}", e);
                None
            }
        };
        let Some(status) = status else {
            return;
        };

        let impact = status.impact();
        if self.battery_impact != Some(impact) {
            debug!(level = status.level, charging = status.charging, ?impact, "Battery impact changed");
            self.battery_impact = Some(impact);
            self.emit(EngineEvent::BatteryImpact(impact));
            self.publish();
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }

        debug!("Engine state: {} -> {}", self.state, state);
        self.state = state;
        self.emit(EngineEvent::StateChanged(state));
        self.publish();
    }

    fn status(&self, message: String) {
        debug!(status = %message, "Engine status");
        self.emit(EngineEvent::StatusChanged(message));
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is fine
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.snapshot.send_replace(EngineSnapshot {
            state: self.state,
            sensitivity: self.sensitivity,
            language: self.language.clone(),
            wake_words: self.wake_words.clone(),
            local_processing: self.classifier.is_local(),
            battery_impact: self.battery_impact,
            stats: self.stats.clone(),
        });
    }
}

async fn next_frame(frames: &mut FrameRx) -> Option<AudioFrame> {
    match frames {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_transport_event(
    events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>,
) -> Option<TransportEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn cooldown_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_states() {
        assert!(EngineState::Starting.is_running());
        assert!(EngineState::Listening.is_running());
        assert!(EngineState::Detected.is_running());
        assert!(!EngineState::Idle.is_running());
        assert!(!EngineState::Stopping.is_running());
        assert!(!EngineState::Error.is_running());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(EngineState::Listening.to_string(), "listening");
        assert_eq!(serde_json::to_string(&EngineState::Detected).unwrap(), "\"detected\"");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = EngineConfig {
            sensitivity: 2.0,
            ..Default::default()
        };
        let result = WakeWordEngine::builder(config).build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }
}
