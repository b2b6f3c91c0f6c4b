use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::models::format::SampleEncoding;
use crate::processing::convert;

/// Circular storage for normalized samples. Not thread-safe on its own.
///
/// Overflow behavior: drops the newest incoming samples, never the retained ones.
#[derive(Debug)]
struct RingBuffer {
    buffer: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0.0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.available
    }

    /// Append as many of `samples` as fit. Returns the number accepted.
    fn write(&mut self, samples: &[f32]) -> usize {
        let accepted = samples.len().min(self.free());
        if accepted == 0 {
            return 0;
        }
        let capacity = self.capacity();
        let first = accepted.min(capacity - self.write_index);
        self.buffer[self.write_index..self.write_index + first].copy_from_slice(&samples[..first]);
        self.buffer[..accepted - first].copy_from_slice(&samples[first..accepted]);
        self.write_index = (self.write_index + accepted) % capacity;
        self.available += accepted;
        accepted
    }

    /// Move up to `count` samples into `out`. Returns the number moved.
    fn read_into(&mut self, count: usize, out: &mut Vec<f32>) -> usize {
        let to_read = count.min(self.available);
        if to_read == 0 {
            return 0;
        }
        let capacity = self.capacity();
        let first = to_read.min(capacity - self.read_index);
        out.extend_from_slice(&self.buffer[self.read_index..self.read_index + first]);
        out.extend_from_slice(&self.buffer[..to_read - first]);
        self.read_index = (self.read_index + to_read) % capacity;
        self.available -= to_read;
        to_read
    }

    fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }
}

/// Bounded, thread-safe queue of normalized samples for one capture source.
///
/// The hardware callback thread calls [`push`](Self::push); the drain
/// scheduler calls [`pop_up_to`](Self::pop_up_to) and
/// [`available_count`](Self::available_count). Raw bytes are decoded before
/// the lock is taken, so the lock is held only for the copy.
///
/// Samples are stored interleaved and the queue only ever accepts or yields
/// whole frames, so a reader never sees a frame split across two reads.
/// When full, incoming frames are dropped and counted; the producer never
/// blocks and the queue never grows.
#[derive(Debug)]
pub struct SampleQueue {
    ring: Mutex<RingBuffer>,
    encoding: SampleEncoding,
    channels: usize,
    accepted: AtomicU64,
    dropped: AtomicU64,
}

impl SampleQueue {
    /// Create a queue holding up to `capacity_frames` frames of `channels` samples,
    /// decoding pushed bytes as `encoding`.
    pub fn new(capacity_frames: usize, channels: u16, encoding: SampleEncoding) -> Self {
        let channels = channels.max(1) as usize;
        Self {
            ring: Mutex::new(RingBuffer::new(capacity_frames.max(1) * channels)),
            encoding,
            channels,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Decode the first `byte_count` bytes of `raw` and append them.
    ///
    /// A trailing partial frame is discarded. Returns the number of samples kept.
    pub fn push(&self, raw: &[u8], byte_count: usize) -> usize {
        let raw = &raw[..byte_count.min(raw.len())];
        let frame_bytes = self.encoding.bytes_per_sample() * self.channels;
        let whole = raw.len() - raw.len() % frame_bytes;
        let samples = convert::decode(&raw[..whole], self.encoding);
        self.push_samples(&samples)
    }

    /// Append already-normalized interleaved samples.
    pub fn push_samples(&self, samples: &[f32]) -> usize {
        let whole = samples.len() - samples.len() % self.channels;
        if whole == 0 {
            return 0;
        }
        let accepted = {
            let mut ring = self.ring.lock();
            let fit = ring.free() - ring.free() % self.channels;
            ring.write(&samples[..whole.min(fit)])
        };
        self.accepted.fetch_add(accepted as u64, Ordering::Relaxed);
        let dropped = samples.len() - accepted;
        if dropped > 0 {
            self.dropped.fetch_add(dropped as u64, Ordering::Relaxed);
        }
        accepted
    }

    /// Remove and return up to `max_count` samples, rounded down to whole frames.
    pub fn pop_up_to(&self, max_count: usize) -> Vec<f32> {
        let mut out = Vec::new();
        self.pop_frames_into(max_count / self.channels, &mut out);
        out
    }

    /// Move up to `max_frames` frames into `out`. Returns the number of frames moved.
    pub fn pop_frames_into(&self, max_frames: usize, out: &mut Vec<f32>) -> usize {
        let samples = self.ring.lock().read_into(max_frames.saturating_mul(self.channels), out);
        samples / self.channels
    }

    /// Samples currently queued. Never exceeds [`capacity`](Self::capacity).
    pub fn available_count(&self) -> usize {
        self.ring.lock().available
    }

    pub fn available_frames(&self) -> usize {
        self.available_count() / self.channels
    }

    /// Capacity in samples.
    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    pub fn encoding(&self) -> SampleEncoding {
        self.encoding
    }

    /// Samples discarded because the queue was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Samples accepted since creation.
    pub fn accepted_count(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    /// Discard everything queued. Counters are kept.
    pub fn clear(&self) {
        self.ring.lock().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn i16_bytes(values: &[i16]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn basic_push_pop() {
        let queue = SampleQueue::new(10, 1, SampleEncoding::Float32);
        queue.push_samples(&[0.1, 0.2, 0.3]);

        assert_eq!(queue.available_count(), 3);
        assert_eq!(queue.pop_up_to(3), vec![0.1, 0.2, 0.3]);
        assert_eq!(queue.available_count(), 0);
    }

    #[test]
    fn push_decodes_raw_bytes() {
        let queue = SampleQueue::new(10, 1, SampleEncoding::Int16);
        let raw = i16_bytes(&[16384, -16384]);

        assert_eq!(queue.push(&raw, raw.len()), 2);
        assert_eq!(queue.pop_up_to(10), vec![0.5, -0.5]);
    }

    #[test]
    fn push_honours_byte_count() {
        let queue = SampleQueue::new(10, 1, SampleEncoding::Int16);
        let raw = i16_bytes(&[100, 200, 300]);

        assert_eq!(queue.push(&raw, 4), 2);
        assert_eq!(queue.available_count(), 2);
    }

    #[test]
    fn short_reads() {
        let queue = SampleQueue::new(10, 1, SampleEncoding::Float32);
        queue.push_samples(&[1.0, 2.0]);

        assert_eq!(queue.pop_up_to(5), vec![1.0, 2.0]);
        assert!(queue.pop_up_to(5).is_empty());
    }

    #[test]
    fn overflow_drops_newest() {
        let queue = SampleQueue::new(4, 1, SampleEncoding::Float32);
        queue.push_samples(&[1.0, 2.0, 3.0]);
        let accepted = queue.push_samples(&[4.0, 5.0, 6.0]);

        assert_eq!(accepted, 1);
        assert_eq!(queue.dropped_count(), 2);
        assert_eq!(queue.available_count(), 4);
        assert_eq!(queue.pop_up_to(4), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn continuous_push_at_capacity_never_reorders_or_duplicates() {
        let queue = SampleQueue::new(64, 1, SampleEncoding::Float32);
        let mut next = 0.0f32;
        let mut received = Vec::new();

        for round in 0..50 {
            let block: Vec<f32> = (0..16)
                .map(|_| {
                    next += 1.0;
                    next
                })
                .collect();
            queue.push_samples(&block);
            assert!(queue.available_count() <= queue.capacity());

            // Drain slower than we fill.
            if round % 3 == 0 {
                received.extend(queue.pop_up_to(10));
            }
        }
        received.extend(queue.pop_up_to(usize::MAX));

        assert!(received.windows(2).all(|w| w[0] < w[1]), "retained samples must stay ordered");
        assert_eq!(received[0], 1.0);
        assert_eq!(
            received.len() as u64 + queue.dropped_count(),
            50 * 16,
            "every sample is either delivered or counted as dropped"
        );
    }

    #[test]
    fn wraparound() {
        let queue = SampleQueue::new(4, 1, SampleEncoding::Float32);
        queue.push_samples(&[1.0, 2.0, 3.0]);
        queue.pop_up_to(2);
        queue.push_samples(&[4.0, 5.0, 6.0]);

        assert_eq!(queue.available_count(), 4);
        assert_eq!(queue.pop_up_to(4), vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn stereo_keeps_whole_frames() {
        let queue = SampleQueue::new(2, 2, SampleEncoding::Float32);
        queue.push_samples(&[0.1, 0.2, 0.3]); // trailing half-frame discarded
        assert_eq!(queue.available_frames(), 1);

        queue.push_samples(&[0.5, 0.6, 0.7, 0.8]); // only one frame fits
        assert_eq!(queue.available_count(), 4);

        // Odd request rounds down to one frame.
        assert_eq!(queue.pop_up_to(3), vec![0.1, 0.2]);
        assert_eq!(queue.pop_up_to(4), vec![0.5, 0.6]);
    }

    #[test]
    fn clear_empties_queue() {
        let queue = SampleQueue::new(10, 1, SampleEncoding::Float32);
        queue.push_samples(&[1.0, 2.0, 3.0]);
        queue.clear();

        assert_eq!(queue.available_count(), 0);
        assert!(queue.pop_up_to(10).is_empty());
        assert_eq!(queue.accepted_count(), 3);
    }

    #[test]
    fn concurrent_producer_and_consumer() {
        use std::sync::Arc;
        use std::thread;

        let queue = Arc::new(SampleQueue::new(256, 1, SampleEncoding::Float32));
        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for i in 0..10_000u32 {
                    queue.push_samples(&[i as f32]);
                }
            })
        };

        let mut received = Vec::new();
        while !producer.is_finished() || queue.available_count() > 0 {
            received.extend(queue.pop_up_to(64));
        }
        producer.join().unwrap();
        received.extend(queue.pop_up_to(usize::MAX));

        assert!(received.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(received.len() as u64 + queue.dropped_count(), 10_000);
    }
}
