/// Concrete audio sources
///
/// `CpalSource` captures from a system input device. `WavFileSource` replays
/// a WAV file, which makes the whole pipeline testable without hardware.

use crate::audio_buffer::AudioSample;
use crate::capture::{AudioSource, CaptureError, SourceStream, StreamGuard};
use crate::preprocess::{downmix, i16_to_f32, u16_to_f32};
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Samples per block when replaying files (32 ms at 16kHz)
pub const WAV_BLOCK_SIZE: usize = 512;

/// System microphone via cpal
#[derive(Debug, Clone, Default)]
pub struct CpalSource {
    device_name: Option<String>,
}

impl CpalSource {
    /// The host's default input device
    pub fn default_input() -> Self {
        Self::default()
    }

    /// A specific input device by name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }
}

#[async_trait]
impl AudioSource for CpalSource {
    fn describe(&self) -> String {
        match &self.device_name {
            Some(name) => format!("cpal:{}", name),
            None => "cpal:default".to_string(),
        }
    }

    async fn open(&self, blocks: mpsc::Sender<Vec<AudioSample>>) -> Result<SourceStream, CaptureError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let device_name = self.device_name.clone();

        // cpal streams are not Send; the stream lives and dies on this thread
        let thread = std::thread::Builder::new()
            .name("wakeword-capture".to_string())
            .spawn(move || run_input_stream(device_name, blocks, ready_tx, stop_rx))
            .map_err(|e| CaptureError::Stream(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(sample_rate)) => Ok(SourceStream::new(
                sample_rate,
                Box::new(CpalGuard {
                    stop: Some(stop_tx),
                    thread: Some(thread),
                }),
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(CaptureError::Stream("capture thread exited during setup".to_string()))
            }
        }
    }
}

struct CpalGuard {
    stop: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StreamGuard for CpalGuard {
    fn release(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Capture thread panicked");
            }
        }
    }
}

fn run_input_stream(
    device_name: Option<String>,
    blocks: mpsc::Sender<Vec<AudioSample>>,
    ready: oneshot::Sender<Result<u32, CaptureError>>,
    stop: std::sync::mpsc::Receiver<()>,
) {
    let (stream, sample_rate) = match build_input_stream(device_name.as_deref(), blocks) {
        Ok(built) => built,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let err = match e {
            cpal::PlayStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable(e.to_string()),
            other => classify_backend_message(other.to_string()),
        };
        let _ = ready.send(Err(err));
        return;
    }

    if ready.send(Ok(sample_rate)).is_err() {
        return;
    }

    // Returns on release or when the guard is dropped
    let _ = stop.recv();
    drop(stream);
    debug!("Input stream closed");
}

fn build_input_stream(
    device_name: Option<&str>,
    blocks: mpsc::Sender<Vec<AudioSample>>,
) -> Result<(cpal::Stream, u32), CaptureError> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("no input device named '{}'", name)))?,
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string()))?,
    };

    info!("Audio input device: {}", device.name().unwrap_or_default());

    let supported = device.default_input_config().map_err(|e| match e {
        cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceUnavailable(e.to_string()),
        other => classify_backend_message(other.to_string()),
    })?;

    let channels = supported.channels() as usize;
    let sample_rate = supported.sample_rate().0;
    let format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();

    info!("Audio config: rate={}Hz channels={} format={:?}", sample_rate, channels, format);

    let err_fn = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let stream = match format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| forward(&blocks, downmix(data, channels)),
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                forward(&blocks, downmix(&i16_to_f32(data), channels))
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                forward(&blocks, downmix(&u16_to_f32(data), channels))
            },
            err_fn,
            None,
        ),
        other => {
            return Err(CaptureError::Stream(format!("unsupported sample format {:?}", other)));
        }
    }
    .map_err(|e| match e {
        cpal::BuildStreamError::DeviceNotAvailable => CaptureError::DeviceUnavailable(e.to_string()),
        other => classify_backend_message(other.to_string()),
    })?;

    Ok((stream, sample_rate))
}

/// Queue a block from the audio callback; full queues drop data (lossy)
fn forward(blocks: &mpsc::Sender<Vec<AudioSample>>, block: Vec<AudioSample>) {
    match blocks.try_send(block) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => trace!("block queue full, dropping audio"),
        Err(TrySendError::Closed(_)) => {}
    }
}

/// Map a backend error description onto the capture taxonomy
fn classify_backend_message(message: String) -> CaptureError {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        CaptureError::PermissionDenied
    } else {
        CaptureError::Stream(message)
    }
}

/// Replays a WAV file as if it were a microphone
#[derive(Debug, Clone)]
pub struct WavFileSource {
    path: PathBuf,
    realtime: bool,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: false,
        }
    }

    /// Pace blocks at the file's own rate instead of as fast as consumed
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }
}

#[async_trait]
impl AudioSource for WavFileSource {
    fn describe(&self) -> String {
        format!("wav:{}", self.path.display())
    }

    async fn open(&self, blocks: mpsc::Sender<Vec<AudioSample>>) -> Result<SourceStream, CaptureError> {
        let path = self.path.clone();
        let (samples, sample_rate) = tokio::task::spawn_blocking(move || read_wav(&path))
            .await
            .map_err(|e| CaptureError::Stream(e.to_string()))??;

        info!(path = %self.path.display(), samples = samples.len(), sample_rate, "Replaying WAV file");

        let cancel = CancellationToken::new();
        tokio::spawn(replay(samples, sample_rate, blocks, self.realtime, cancel.clone()));

        Ok(SourceStream::new(sample_rate, Box::new(ReplayGuard { cancel })))
    }
}

struct ReplayGuard {
    cancel: CancellationToken,
}

impl StreamGuard for ReplayGuard {
    fn release(&mut self) {
        self.cancel.cancel();
    }
}

async fn replay(
    samples: Vec<AudioSample>,
    sample_rate: u32,
    blocks: mpsc::Sender<Vec<AudioSample>>,
    realtime: bool,
    cancel: CancellationToken,
) {
    let block_duration = Duration::from_secs_f64(WAV_BLOCK_SIZE as f64 / sample_rate as f64);

    for block in samples.chunks(WAV_BLOCK_SIZE) {
        if realtime {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(block_duration) => {}
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            sent = blocks.send(block.to_vec()) => {
                if sent.is_err() {
                    return;
                }
            }
        }
    }

    debug!("WAV replay finished, idling until released");
    cancel.cancelled().await;
}

/// Read a WAV file as normalized mono samples
pub fn read_wav(path: &Path) -> Result<(Vec<AudioSample>, u32), CaptureError> {
    let reader = hound::WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => CaptureError::DeviceUnavailable(format!("{}: {}", path.display(), io)),
        other => CaptureError::Stream(format!("{}: {}", path.display(), other)),
    })?;

    let spec = reader.spec();
    let channels = spec.channels as usize;

    let interleaved: Vec<AudioSample> = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Float, 32) => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| CaptureError::Stream(e.to_string()))?,
        (hound::SampleFormat::Int, 16) => {
            let pcm = reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| CaptureError::Stream(e.to_string()))?;
            i16_to_f32(&pcm)
        }
        (hound::SampleFormat::Int, bits) if (8..=32).contains(&bits) => {
            let scale = (1i64 << (bits - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| CaptureError::Stream(e.to_string()))?
        }
        (format, bits) => {
            warn!("Unsupported WAV encoding {:?}/{} bits", format, bits);
            return Err(CaptureError::Stream(format!(
                "unsupported WAV encoding {:?} with {} bits",
                format, bits
            )));
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}
