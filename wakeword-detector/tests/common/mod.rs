//! Test doubles shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use wakeword_detector::{
    AudioSample, AudioSource, BatteryProbe, BatteryStatus, CaptureError, ClassifierError,
    DuplexChannel, DuplexConnector, EngineEvent, EngineState, FeatureVector, SourceStream,
    StreamGuard, TransportError, WakeWordEngine, WakeWordModel, SAMPLE_RATE,
};

pub const WAIT: Duration = Duration::from_secs(5);

type BlockSlot = Arc<Mutex<Option<mpsc::Sender<Vec<AudioSample>>>>>;

/// Audio source driven by the test
pub struct FakeSource {
    opens: AtomicUsize,
    releases: Arc<AtomicUsize>,
    slot: BlockSlot,
    next_failure: Mutex<Option<CaptureError>>,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            opens: AtomicUsize::new(0),
            releases: Arc::new(AtomicUsize::new(0)),
            slot: Arc::new(Mutex::new(None)),
            next_failure: Mutex::new(None),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn fail_next_open(&self, error: CaptureError) {
        *self.next_failure.lock() = Some(error);
    }

    /// Deliver a block; false when no session is open
    pub async fn push(&self, block: Vec<AudioSample>) -> bool {
        let sender = self.slot.lock().clone();
        match sender {
            Some(sender) => sender.send(block).await.is_ok(),
            None => false,
        }
    }

    /// Simulate the device disappearing mid-session
    pub fn end_stream(&self) {
        self.slot.lock().take();
    }
}

struct FakeGuard {
    slot: BlockSlot,
    releases: Arc<AtomicUsize>,
    released: bool,
}

impl StreamGuard for FakeGuard {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.slot.lock().take();
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl AudioSource for FakeSource {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn open(&self, blocks: mpsc::Sender<Vec<AudioSample>>) -> Result<SourceStream, CaptureError> {
        if let Some(error) = self.next_failure.lock().take() {
            return Err(error);
        }

        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.slot.lock() = Some(blocks);

        Ok(SourceStream::new(
            SAMPLE_RATE as u32,
            Box::new(FakeGuard {
                slot: Arc::clone(&self.slot),
                releases: Arc::clone(&self.releases),
                released: false,
            }),
        ))
    }
}

/// Model returning a fixed, adjustable score
#[derive(Clone)]
pub struct FixedModel {
    score: Arc<Mutex<f32>>,
    calls: Arc<AtomicUsize>,
    configured: Arc<Mutex<Vec<(Vec<String>, String)>>>,
}

impl FixedModel {
    pub fn new(score: f32) -> Self {
        Self {
            score: Arc::new(Mutex::new(score)),
            calls: Arc::new(AtomicUsize::new(0)),
            configured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_score(&self, score: f32) {
        *self.score.lock() = score;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every (wake words, language) pair the model was configured with
    pub fn configured(&self) -> Vec<(Vec<String>, String)> {
        self.configured.lock().clone()
    }
}

impl WakeWordModel for FixedModel {
    fn configure(&mut self, wake_words: &[String], language: &str) {
        self.configured
            .lock()
            .push((wake_words.to_vec(), language.to_string()));
    }

    fn score(&self, _features: &FeatureVector) -> Result<f32, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(*self.score.lock())
    }
}

/// Battery probe replaying a script, repeating the last reading
pub struct ScriptedBattery {
    readings: VecDeque<BatteryStatus>,
    last: Option<BatteryStatus>,
}

impl ScriptedBattery {
    pub fn new(readings: Vec<BatteryStatus>) -> Self {
        Self {
            readings: readings.into(),
            last: None,
        }
    }
}

impl BatteryProbe for ScriptedBattery {
    fn sample(&mut self) -> Option<BatteryStatus> {
        if let Some(next) = self.readings.pop_front() {
            self.last = Some(next);
        }
        self.last
    }
}

/// Test end of a fake duplex channel
pub struct Peer {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl Peer {
    /// Next message from the engine, parsed as JSON
    pub async fn next_json(&mut self) -> serde_json::Value {
        let raw = tokio::time::timeout(WAIT, self.from_client.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("client channel closed");
        serde_json::from_str(&raw).expect("client sent invalid JSON")
    }

    /// Skip messages until one with the given `type`
    pub async fn next_of_type(&mut self, kind: &str) -> serde_json::Value {
        loop {
            let message = self.next_json().await;
            if message["type"] == kind {
                return message;
            }
        }
    }

    pub fn send(&self, raw: &str) {
        self.to_client.send(raw.to_string()).expect("client gone");
    }
}

struct FakeChannel {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl DuplexChannel for FakeChannel {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Send("peer gone".to_string()))
    }

    async fn recv_text(&mut self) -> Option<Result<String, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}

/// In-memory connector handing each new connection's peer to the test
pub struct FakeConnector {
    pub online: AtomicBool,
    calls: AtomicUsize,
    peers: mpsc::UnboundedSender<Peer>,
}

impl FakeConnector {
    pub fn new(online: bool) -> (Arc<Self>, mpsc::UnboundedReceiver<Peer>) {
        let (peers, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            online: AtomicBool::new(online),
            calls: AtomicUsize::new(0),
            peers,
        });
        (connector, peers_rx)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DuplexConnector for FakeConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn DuplexChannel>, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.online.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.peers.send(Peer { to_client, from_client });

        Ok(Box::new(FakeChannel { inbound, outbound }))
    }
}

/// Wait for the first event matching `predicate`, discarding the rest
pub async fn wait_for_event<F>(engine: &WakeWordEngine, predicate: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            match engine.recv_event().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("engine event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for engine event")
}

pub async fn wait_for_state(engine: &WakeWordEngine, state: EngineState) {
    let mut snapshots = engine.subscribe();
    tokio::time::timeout(WAIT, snapshots.wait_for(|s| s.state == state))
        .await
        .expect("timed out waiting for engine state")
        .expect("engine stopped publishing");
}

/// Drain every queued event
pub async fn drain_events(engine: &WakeWordEngine) -> Vec<EngineEvent> {
    let mut events = Vec::new();
    while let Some(event) = engine.try_recv_event().await {
        events.push(event);
    }
    events
}

/// Wait until the engine has processed every command sent so far
pub async fn settle(engine: &WakeWordEngine) {
    let sensitivity = engine.snapshot().sensitivity;
    engine.set_sensitivity(sensitivity).await.expect("engine alive");
}

pub fn detections(events: &[EngineEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, EngineEvent::WakeWordDetected(_)))
        .count()
}

/// Speech-like audio: two formant bursts within one second
pub fn speech_like() -> Vec<AudioSample> {
    let burst = |samples: usize| -> Vec<AudioSample> {
        (0..samples)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                let envelope = 0.5 - 0.5 * (2.0 * PI * i as f32 / samples as f32).cos();
                envelope * (0.3 * (2.0 * PI * 700.0 * t).sin() + 0.2 * (2.0 * PI * 1220.0 * t).sin())
            })
            .collect()
    };

    let mut audio = vec![0.0; 1600];
    audio.extend(burst(4000));
    audio.extend(vec![0.0; 2400]);
    audio.extend(burst(4000));
    audio.resize(SAMPLE_RATE, 0.0);
    audio
}
