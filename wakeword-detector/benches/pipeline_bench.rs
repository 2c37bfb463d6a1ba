/// Detection pipeline benchmarks
///
/// Measures the per-chunk cost of feature extraction and local
/// classification, and the per-frame cost of buffering and VAD.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::f32::consts::PI;
use wakeword_detector::{
    AudioBuffer, AudioSample, FeatureExtractor, LocalClassifier, VoiceActivityDetector, SAMPLE_RATE,
};

/// Generate speech-like audio: formant tones under a slow envelope
fn generate_audio(duration_ms: usize) -> Vec<AudioSample> {
    let num_samples = SAMPLE_RATE * duration_ms / 1000;

    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let envelope = (2.0 * PI * 2.0 * t).sin().abs();
            envelope * (0.3 * (2.0 * PI * 700.0 * t).sin() + 0.2 * (2.0 * PI * 1220.0 * t).sin())
        })
        .collect()
}

fn bench_feature_extraction(c: &mut Criterion) {
    let mut group = c.benchmark_group("feature_extraction");

    for &duration_ms in &[250usize, 500, 1000] {
        let audio = generate_audio(duration_ms);
        let mut extractor = FeatureExtractor::new();

        group.bench_with_input(
            BenchmarkId::new("extract", format!("{}ms", duration_ms)),
            &audio,
            |b, audio| {
                b.iter(|| {
                    let features = extractor.extract(black_box(audio)).unwrap();
                    black_box(features);
                });
            },
        );
    }

    group.finish();
}

fn bench_local_classification(c: &mut Criterion) {
    let audio = generate_audio(1000);
    let mut classifier =
        LocalClassifier::heuristic(FeatureExtractor::new(), &["hey orion".to_string()], "en-US");

    c.bench_function("classify_1s_chunk", |b| {
        b.iter(|| {
            let event = classifier.classify(black_box(&audio)).unwrap();
            black_box(event);
        });
    });
}

fn bench_frame_path(c: &mut Criterion) {
    let buffer = AudioBuffer::new();
    let vad = VoiceActivityDetector::new();
    let frame = generate_audio(32);

    c.bench_function("buffer_and_vad_per_frame", |b| {
        b.iter(|| {
            buffer.write(black_box(&frame));
            black_box(vad.is_active(black_box(&frame)));
        });
    });

    c.bench_function("extract_1s_from_buffer", |b| {
        b.iter(|| black_box(buffer.extract(1000)));
    });
}

criterion_group!(
    benches,
    bench_feature_extraction,
    bench_local_classification,
    bench_frame_path
);
criterion_main!(benches);
