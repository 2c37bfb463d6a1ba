/// End-to-end tests against a live inference service on a loopback port

use futures::{SinkExt, StreamExt};
use inference_server::{serve, ServerConfig};
use std::f32::consts::PI;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use wakeword_detector::{
    DetectionSource, EngineConfig, EngineEvent, NoBattery, ServerMessage, TransportConfig,
    WakeWordEngine, WavFileSource,
};

const WAIT: Duration = Duration::from_secs(10);

async fn spawn_service() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(
        listener,
        Arc::new(ServerConfig::default()),
        std::future::pending(),
    ));
    addr
}

/// Two formant bursts per second, repeated
fn speech_like(seconds: usize) -> Vec<f32> {
    let mut audio = Vec::with_capacity(seconds * 16000);
    for _ in 0..seconds {
        let mut second = vec![0.0f32; 16000];
        for start in [1600usize, 8000] {
            for i in 0..4000 {
                let t = i as f32 / 16000.0;
                let envelope = 0.5 - 0.5 * (2.0 * PI * i as f32 / 4000.0).cos();
                second[start + i] =
                    envelope * (0.3 * (2.0 * PI * 700.0 * t).sin() + 0.2 * (2.0 * PI * 1220.0 * t).sin());
            }
        }
        audio.extend(second);
    }
    audio
}

async fn next_reply<S>(socket: &mut S) -> ServerMessage
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for reply")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return ServerMessage::from_json(&text).expect("server sent invalid JSON");
        }
    }
}

#[tokio::test]
async fn test_protocol_round_trip_over_websocket() {
    let addr = spawn_service().await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    socket.send(Message::Text(r#"{"type":"START"}"#.to_string())).await.unwrap();
    assert!(matches!(next_reply(&mut socket).await, ServerMessage::Status { .. }));

    // Malformed input is answered and the connection survives
    socket.send(Message::Text("{not json".to_string())).await.unwrap();
    assert!(matches!(next_reply(&mut socket).await, ServerMessage::Error { .. }));

    let chunk = wakeword_detector::ClientMessage::audio_chunk(&speech_like(1));
    socket.send(Message::Text(chunk.to_json().unwrap())).await.unwrap();
    match next_reply(&mut socket).await {
        ServerMessage::Detection { confidence, timestamp, .. } => {
            assert!((0.0..=1.0).contains(&confidence));
            assert!(timestamp > 0);
        }
        other => panic!("unexpected reply {:?}", other),
    }

    socket.send(Message::Text(r#"{"type":"STOP"}"#.to_string())).await.unwrap();
    assert!(matches!(next_reply(&mut socket).await, ServerMessage::Status { .. }));
}

#[tokio::test]
async fn test_health_counts_open_sessions() {
    let addr = spawn_service().await;
    let (mut socket, _) = connect_async(format!("ws://{}/ws", addr)).await.unwrap();

    // One exchange guarantees the session is registered
    socket.send(Message::Text(r#"{"type":"START"}"#.to_string())).await.unwrap();
    next_reply(&mut socket).await;

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::io::AsyncWriteExt::write_all(
        &mut stream,
        b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await
    .unwrap();
    let mut response = String::new();
    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
        .await
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(r#""activeSessions":1"#));
}

#[tokio::test]
async fn test_engine_detects_through_remote_service() {
    let addr = spawn_service().await;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("phrase.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in speech_like(3) {
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();

    // Threshold zero: any verdict from the service counts
    let config = EngineConfig {
        use_local_processing: false,
        web_socket_url: Some(format!("ws://{}/ws", addr)),
        sensitivity: 0.0,
        transport: TransportConfig {
            max_reconnect_attempts: 3,
            reconnect_base_delay_ms: 100,
            connect_timeout_ms: 2000,
        },
        ..Default::default()
    };

    let engine = WakeWordEngine::builder(config)
        .source(Arc::new(WavFileSource::new(&path).realtime(true)))
        .battery(Box::new(NoBattery))
        .build()
        .unwrap();
    engine.start().await.unwrap();

    let event = tokio::time::timeout(WAIT, async {
        loop {
            match engine.recv_event().await {
                Some(EngineEvent::WakeWordDetected(event)) => return event,
                Some(_) => continue,
                None => panic!("engine event channel closed"),
            }
        }
    })
    .await
    .expect("no detection from the inference service");

    assert_eq!(event.source, DetectionSource::Remote);
    assert!((0.0..=1.0).contains(&event.confidence));

    engine.stop().await;
}
