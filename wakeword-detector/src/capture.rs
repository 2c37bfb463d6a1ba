/// Audio capture sessions
///
/// An `AudioSource` delivers raw mono blocks at its native rate; `AudioCapture`
/// resamples them to the engine rate, cuts fixed-size frames and forwards them
/// to the consumer until stopped. At most one session is active at a time.

use crate::audio_buffer::AudioSample;
use crate::preprocess::{Framer, StreamResampler};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Raw blocks buffered between a source and the framing task
pub const BLOCK_QUEUE: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("A capture session is already active")]
    AlreadyActive,
}

/// Fixed-size run of normalized mono samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    samples: Vec<AudioSample>,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<AudioSample>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    pub fn samples(&self) -> &[AudioSample] {
        &self.samples
    }

    /// Position of this frame within its capture session, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Releases the device behind an open source. Must be idempotent.
pub trait StreamGuard: Send {
    fn release(&mut self);
}

/// An open source; dropping it releases the device
pub struct SourceStream {
    sample_rate: u32,
    guard: Box<dyn StreamGuard>,
}

impl SourceStream {
    pub fn new(sample_rate: u32, guard: Box<dyn StreamGuard>) -> Self {
        Self { sample_rate, guard }
    }

    /// Native rate of the blocks this source produces
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for SourceStream {
    fn drop(&mut self) {
        self.guard.release();
    }
}

/// Platform audio input
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Human readable description for logs
    fn describe(&self) -> String;

    /// Start producing mono blocks into `blocks`.
    ///
    /// Implementations release everything they acquired before returning an
    /// error. Blocks that cannot be queued may be dropped.
    async fn open(&self, blocks: mpsc::Sender<Vec<AudioSample>>) -> Result<SourceStream, CaptureError>;
}

struct CaptureSession {
    stream: SourceStream,
    cancel: CancellationToken,
    pump: JoinHandle<()>,
}

/// Capture session manager
pub struct AudioCapture {
    source: Arc<dyn AudioSource>,
    sample_rate: u32,
    frame_size: usize,
    session: Option<CaptureSession>,
}

impl AudioCapture {
    pub fn new(source: Arc<dyn AudioSource>, sample_rate: u32, frame_size: usize) -> Self {
        Self {
            source,
            sample_rate,
            frame_size,
            session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Open the source and start delivering frames into `frames`
    pub async fn initialize(&mut self, frames: mpsc::Sender<AudioFrame>) -> Result<(), CaptureError> {
        if self.session.is_some() {
            return Err(CaptureError::AlreadyActive);
        }

        let (blocks_tx, blocks_rx) = mpsc::channel(BLOCK_QUEUE);
        let stream = self.source.open(blocks_tx).await?;

        // Dropping `stream` on the error path releases the device
        let resampler = StreamResampler::new(stream.sample_rate(), self.sample_rate)
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        info!(
            source = %self.source.describe(),
            native_rate = stream.sample_rate(),
            target_rate = self.sample_rate,
            frame_size = self.frame_size,
            "Audio capture started"
        );

        let cancel = CancellationToken::new();
        let pump = tokio::spawn(pump_frames(
            blocks_rx,
            frames,
            resampler,
            Framer::new(self.frame_size),
            cancel.clone(),
        ));

        self.session = Some(CaptureSession {
            stream,
            cancel,
            pump,
        });

        Ok(())
    }

    /// End the session and release the device. Safe to call when idle.
    pub async fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        session.cancel.cancel();

        // Releasing a device may join its capture thread
        let stream = session.stream;
        if let Err(e) = tokio::task::spawn_blocking(move || drop(stream)).await {
            warn!("Releasing the audio source failed: {}", e);
        }

        if let Err(e) = session.pump.await {
            warn!("Capture pump ended abnormally: {}", e);
        }
        info!("Audio capture stopped");
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
    }
}

async fn pump_frames(
    mut blocks: mpsc::Receiver<Vec<AudioSample>>,
    frames: mpsc::Sender<AudioFrame>,
    mut resampler: StreamResampler,
    mut framer: Framer,
    cancel: CancellationToken,
) {
    let mut sequence = 0u64;

    loop {
        let block = tokio::select! {
            _ = cancel.cancelled() => break,
            block = blocks.recv() => match block {
                Some(block) => block,
                None => {
                    debug!("Audio source closed its block stream");
                    break;
                }
            },
        };

        let resampled = match resampler.process(&block) {
            Ok(samples) => samples,
            Err(e) => {
                warn!("Dropping audio block: {}", e);
                continue;
            }
        };

        for samples in framer.push(&resampled) {
            let frame = AudioFrame::new(samples, sequence);
            sequence += 1;
            trace!(sequence, "frame ready");

            tokio::select! {
                _ = cancel.cancelled() => return,
                sent = frames.send(frame) => {
                    if sent.is_err() {
                        debug!("Frame consumer gone, ending capture pump");
                        return;
                    }
                }
            }
        }
    }
}
