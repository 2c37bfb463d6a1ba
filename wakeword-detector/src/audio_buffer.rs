/// Audio buffer module for storing rolling audio data
///
/// Implements the circular buffer that retains the most recent few seconds of
/// normalized 16kHz mono audio. Writers never block on readers: once the
/// buffer is full the oldest samples are overwritten. Every read path returns
/// a copy, never a view into storage that a writer may be overwriting.

use cache_padded::CachePadded;
use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use tracing::{debug, trace};

/// Audio sample format (normalized float PCM, -1.0 to 1.0)
pub type AudioSample = f32;

/// Default retention: 3 seconds at 16kHz sample rate
pub const BUFFER_DURATION_SECS: usize = 3;
pub const SAMPLE_RATE: usize = 16000;
pub const BUFFER_SIZE: usize = BUFFER_DURATION_SECS * SAMPLE_RATE; // 48,000 samples

type RingBuffer = HeapRb<AudioSample>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Convert a duration in milliseconds to a sample count at `sample_rate`.
pub fn ms_to_samples(duration_ms: u64, sample_rate: usize) -> usize {
    (duration_ms as usize * sample_rate) / 1000
}

/// Ring buffer for audio samples
///
/// Producer and consumer halves sit behind separate locks so a capture thread
/// can write while another task snapshots recent audio. Lock order is always
/// producer before consumer.
pub struct AudioBuffer {
    producer: CachePadded<Mutex<RingProducer>>,
    consumer: CachePadded<Mutex<RingConsumer>>,
    sample_rate: usize,
    capacity: usize,
}

impl AudioBuffer {
    /// Create a new audio buffer with default 3-second capacity
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    /// Create a buffer retaining `duration_ms` of audio at `sample_rate`
    pub fn with_duration(duration_ms: u64, sample_rate: usize) -> Self {
        let mut buffer = Self::with_capacity(ms_to_samples(duration_ms, sample_rate));
        buffer.sample_rate = sample_rate;
        buffer
    }

    /// Create a buffer with custom capacity (in samples)
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!("Creating audio buffer with capacity: {} samples", capacity);

        let rb = HeapRb::<AudioSample>::new(capacity);
        let (producer, consumer) = rb.split();

        Self {
            producer: CachePadded::new(Mutex::new(producer)),
            consumer: CachePadded::new(Mutex::new(consumer)),
            sample_rate: SAMPLE_RATE,
            capacity,
        }
    }

    /// Append samples, overwriting the oldest audio once capacity is reached.
    ///
    /// A write larger than the whole buffer keeps only its trailing
    /// `capacity` samples. Returns the number of samples now retained from
    /// this write.
    pub fn write(&self, samples: &[AudioSample]) -> usize {
        if samples.is_empty() {
            return 0;
        }

        let mut producer = self.producer.lock();

        let retained = if samples.len() >= self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let vacant = producer.vacant_len();
        if retained.len() > vacant {
            let to_drop = retained.len() - vacant;
            let mut consumer = self.consumer.lock();
            consumer.skip(to_drop);
            trace!("Buffer full, overwrote {} oldest samples", to_drop);
        }

        producer.push_slice(retained)
    }

    /// Copy of the most recent `duration_ms` of audio.
    ///
    /// Zero-padded at the front when less history than requested exists.
    pub fn extract(&self, duration_ms: u64) -> Vec<AudioSample> {
        self.latest(ms_to_samples(duration_ms, self.sample_rate))
    }

    /// Copy of the most recent `count` samples, zero-padded at the front.
    pub fn latest(&self, count: usize) -> Vec<AudioSample> {
        // Holding the producer keeps `available` in step with the iterator
        let _producer = self.producer.lock();
        let consumer = self.consumer.lock();
        let available = consumer.occupied_len();

        let mut result = Vec::with_capacity(count);
        if count > available {
            result.resize(count - available, 0.0);
            result.extend(consumer.iter().take(available).copied());
        } else {
            result.extend(consumer.iter().skip(available - count).take(count).copied());
        }

        result
    }

    /// Get the number of samples currently in the buffer
    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Clear all data from the buffer
    pub fn clear(&self) {
        let mut consumer = self.consumer.lock();
        let occupied = consumer.occupied_len();
        consumer.skip(occupied);
        debug!("Cleared audio buffer");
    }

    /// Get the sample rate
    pub fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    /// Get duration of audio currently in buffer (in seconds)
    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(start: usize, len: usize) -> Vec<AudioSample> {
        (start..start + len).map(|i| i as f32).collect()
    }

    #[test]
    fn test_buffer_creation() {
        let buffer = AudioBuffer::new();
        assert_eq!(buffer.capacity(), BUFFER_SIZE);
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
        assert_eq!(buffer.sample_rate(), SAMPLE_RATE);
    }

    #[test]
    fn test_with_duration() {
        let buffer = AudioBuffer::with_duration(2000, 8000);
        assert_eq!(buffer.capacity(), 16000);
        assert_eq!(buffer.sample_rate(), 8000);
    }

    #[test]
    fn test_latest_returns_most_recent() {
        let buffer = AudioBuffer::with_capacity(1000);
        buffer.write(&ramp(0, 100));

        let latest = buffer.latest(10);
        assert_eq!(latest, ramp(90, 10));
        assert_eq!(buffer.len(), 100); // Nothing consumed
    }

    #[test]
    fn test_zero_padding_when_history_is_short() {
        let buffer = AudioBuffer::with_capacity(1000);
        buffer.write(&[1.0, 2.0, 3.0]);

        let latest = buffer.latest(5);
        assert_eq!(latest, vec![0.0, 0.0, 1.0, 2.0, 3.0]);

        let empty = AudioBuffer::with_capacity(10);
        assert_eq!(empty.latest(4), vec![0.0; 4]);
    }

    #[test]
    fn test_overwrite_keeps_newest_in_order() {
        let buffer = AudioBuffer::with_capacity(10);

        for chunk in 0..7 {
            buffer.write(&ramp(chunk * 4, 4));
        }

        // 28 samples written into a 10-slot buffer
        assert_eq!(buffer.len(), 10);
        assert_eq!(buffer.latest(10), ramp(18, 10));
        assert_eq!(buffer.latest(3), ramp(25, 3));
    }

    #[test]
    fn test_oversized_write_keeps_tail() {
        let buffer = AudioBuffer::with_capacity(100);
        buffer.write(&ramp(0, 40));

        let retained = buffer.write(&ramp(1000, 150));
        assert_eq!(retained, 100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.latest(100), ramp(1050, 100));
    }

    #[test]
    fn test_extract_uses_sample_rate() {
        let buffer = AudioBuffer::with_duration(1000, 1000);
        buffer.write(&ramp(0, 1000));

        let last_100ms = buffer.extract(100);
        assert_eq!(last_100ms.len(), 100);
        assert_eq!(last_100ms[0], 900.0);
        assert_eq!(last_100ms[99], 999.0);
    }

    #[test]
    fn test_extraction_is_a_copy() {
        let buffer = AudioBuffer::with_capacity(8);
        buffer.write(&ramp(0, 8));

        let snapshot = buffer.latest(8);
        buffer.write(&ramp(100, 8));

        assert_eq!(snapshot, ramp(0, 8));
        assert_eq!(buffer.latest(8), ramp(100, 8));
    }

    #[test]
    fn test_clear() {
        let buffer = AudioBuffer::with_capacity(1000);
        buffer.write(&vec![1.0; 500]);
        assert_eq!(buffer.len(), 500);

        buffer.clear();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_duration_calculation() {
        let buffer = AudioBuffer::new();
        buffer.write(&vec![0.0; SAMPLE_RATE]); // 1 second of audio

        assert_relative_eq!(buffer.duration_secs(), 1.0, epsilon = 0.01);
    }

    #[test]
    fn test_concurrent_writer_and_reader() {
        use std::sync::Arc;

        let buffer = Arc::new(AudioBuffer::with_capacity(256));
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    buffer.write(&[i as f32; 16]);
                }
            })
        };

        for _ in 0..500 {
            let snapshot = buffer.latest(64);
            assert_eq!(snapshot.len(), 64);
            // Samples never go backwards in time
            assert!(snapshot.windows(2).all(|w| w[0] <= w[1]));
        }

        writer.join().unwrap();
        assert_eq!(buffer.latest(1), vec![1999.0]);
    }

    #[test]
    fn test_snapshot_length_is_exact_under_oversized_writes() {
        use std::sync::Arc;

        let buffer = Arc::new(AudioBuffer::with_capacity(256));
        let writer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..2000 {
                    let len = if i % 3 == 0 { 300 } else { 40 };
                    buffer.write(&vec![i as f32; len]);
                }
            })
        };

        for _ in 0..1000 {
            assert_eq!(buffer.latest(64).len(), 64);

            // Longer than capacity: padding plus at most `capacity` samples
            let padded = buffer.latest(512);
            assert_eq!(padded.len(), 512);
            assert!(padded[..256].iter().all(|&s| s == 0.0));
        }

        writer.join().unwrap();
        assert_eq!(buffer.latest(1), vec![1999.0]);
    }
}
