/// Wake-word detection service binary
///
/// Listens on the default microphone (or replays a WAV file) and logs
/// wake-word detections until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use wakeword_detector::{
    AudioSource, CpalSource, EngineConfig, EngineEvent, WakeWordEngine, WavFileSource,
};

#[derive(Parser, Debug)]
#[command(name = "wakeword-service", about = "Wake-word detection service")]
struct Args {
    /// JSON engine configuration
    #[arg(short, long, env = "WAKEWORD_CONFIG")]
    config: Option<PathBuf>,

    /// Replay a WAV file instead of capturing from the microphone
    #[arg(long)]
    wav: Option<PathBuf>,

    /// Pace WAV replay in real time
    #[arg(long, requires = "wav")]
    realtime: bool,

    /// Input device name (default device when omitted)
    #[arg(long, conflicts_with = "wav")]
    device: Option<String>,

    /// Remote inference endpoint, enables remote classification
    #[arg(long)]
    url: Option<String>,

    /// Recognition language
    #[arg(long)]
    language: Option<String>,

    /// Detection threshold (0.0 - 1.0)
    #[arg(long)]
    sensitivity: Option<f32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("wakeword_detector=info".parse()?),
        )
        .init();

    let args = Args::parse();
    info!("Starting wake-word detection service");

    let config = load_config(&args)?;

    let source: Arc<dyn AudioSource> = match (&args.wav, &args.device) {
        (Some(path), _) => Arc::new(WavFileSource::new(path).realtime(args.realtime)),
        (None, Some(name)) => Arc::new(CpalSource::named(name)),
        (None, None) => Arc::new(CpalSource::default_input()),
    };

    let engine = WakeWordEngine::new(config, source).context("failed to create engine")?;
    engine.start().await.context("failed to start engine")?;

    let snapshot = engine.snapshot();
    info!(
        "Listening for {:?} ({}, {})",
        snapshot.wake_words,
        snapshot.language,
        if snapshot.local_processing { "local" } else { "remote" }
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            event = engine.recv_event() => match event {
                Some(EngineEvent::WakeWordDetected(event)) => info!(
                    "Wake-word detected! confidence={:.2}, source={:?}, timestamp={}",
                    event.confidence, event.source, event.timestamp
                ),
                Some(EngineEvent::StatusChanged(status)) => info!("Status: {}", status),
                Some(EngineEvent::StateChanged(state)) => info!("State: {}", state),
                Some(EngineEvent::BatteryImpact(impact)) => info!("Battery impact: {:?}", impact),
                None => {
                    warn!("Event channel closed, shutting down");
                    break;
                }
            },
        }
    }

    engine.stop().await;
    let stats = engine.stats();
    info!(
        frames = stats.frames_processed,
        chunks = stats.chunks_analyzed,
        detections = stats.detections,
        "Wake-word detection service stopped"
    );

    Ok(())
}

/// Config file, then environment, then command line
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => EngineConfig::default(),
    };

    config.apply_env_overrides()?;

    if let Some(url) = &args.url {
        config.web_socket_url = Some(url.clone());
        config.use_local_processing = false;
    }
    if let Some(language) = &args.language {
        config.language = language.clone();
    }
    if let Some(sensitivity) = args.sensitivity {
        config.sensitivity = sensitivity;
    }

    config.validate()?;
    Ok(config)
}
