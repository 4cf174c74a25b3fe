//! Single-producer/single-consumer ring of interleaved audio frames.
//!
//! The producer is the render thread; the consumer is the device callback.
//! Neither side allocates or locks. Positions are absolute frame counters so
//! the full capacity is usable; wrap-around copies split into two segments.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct RingShared {
    samples: UnsafeCell<Box<[f32]>>,
    capacity_frames: usize,
    channels: usize,
    /// Total frames ever written, wrapping.
    write_pos: AtomicUsize,
    /// Total frames ever read, wrapping.
    read_pos: AtomicUsize,
}

// Safety: the sample storage is only written by the single producer in the
// region [read_pos, write_pos) exclusion discipline below, and only read by
// the single consumer. The position atomics publish those regions.
unsafe impl Send for RingShared {}
unsafe impl Sync for RingShared {}

/// Creates a ring holding `capacity_frames` frames of `channels` interleaved
/// samples and splits it into its two endpoints.
pub fn frame_ring(channels: usize, capacity_frames: usize) -> (RingProducer, RingConsumer) {
    let channels = channels.max(1);
    let capacity_frames = capacity_frames.max(1);
    let shared = Arc::new(RingShared {
        samples: UnsafeCell::new(vec![0.0; channels * capacity_frames].into_boxed_slice()),
        capacity_frames,
        channels,
        write_pos: AtomicUsize::new(0),
        read_pos: AtomicUsize::new(0),
    });
    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

/// Render-thread half of the ring.
pub struct RingProducer {
    shared: Arc<RingShared>,
}

impl RingProducer {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames
    }

    /// Frames that can be written without overrunning the reader.
    pub fn available_write_frames(&self) -> usize {
        let write = self.shared.write_pos.load(Ordering::Relaxed);
        let read = self.shared.read_pos.load(Ordering::Acquire);
        self.shared.capacity_frames - write.wrapping_sub(read)
    }

    /// Writes up to `src.len() / channels` frames, returning how many were
    /// accepted. `src` must hold whole interleaved frames.
    pub fn write_frames(&mut self, src: &[f32]) -> usize {
        let channels = self.shared.channels;
        let frames = src.len() / channels;
        let n = frames.min(self.available_write_frames());
        if n == 0 {
            return 0;
        }

        let write = self.shared.write_pos.load(Ordering::Relaxed);
        let start = (write % self.shared.capacity_frames) * channels;
        let total = n * channels;
        let first = ((self.shared.capacity_frames - write % self.shared.capacity_frames)
            * channels)
            .min(total);

        // Safety: this region is outside [read, write) so the consumer never
        // touches it until write_pos is published below. Raw copies keep the
        // two halves from forming overlapping references.
        unsafe {
            let base = (*self.shared.samples.get()).as_mut_ptr();
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(start), first);
            if total > first {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(first), base, total - first);
            }
        }

        self.shared
            .write_pos
            .store(write.wrapping_add(n), Ordering::Release);
        n
    }
}

/// Device-callback half of the ring.
pub struct RingConsumer {
    shared: Arc<RingShared>,
}

impl RingConsumer {
    pub fn channels(&self) -> usize {
        self.shared.channels
    }

    /// Frames ready to be read.
    pub fn available_read_frames(&self) -> usize {
        let read = self.shared.read_pos.load(Ordering::Relaxed);
        let write = self.shared.write_pos.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }

    /// Drains up to `dst.len() / channels` frames into `dst`, returning the
    /// number of frames copied. The caller is responsible for padding the
    /// remainder with silence on underflow.
    pub fn read_frames(&mut self, dst: &mut [f32]) -> usize {
        let channels = self.shared.channels;
        let frames = dst.len() / channels;
        let n = frames.min(self.available_read_frames());
        if n == 0 {
            return 0;
        }

        let read = self.shared.read_pos.load(Ordering::Relaxed);
        let start = (read % self.shared.capacity_frames) * channels;
        let total = n * channels;
        let first = ((self.shared.capacity_frames - read % self.shared.capacity_frames)
            * channels)
            .min(total);

        // Safety: this region is inside [read, write) so the producer never
        // writes it until read_pos is published below.
        unsafe {
            let base = (*self.shared.samples.get()).as_ptr();
            std::ptr::copy_nonoverlapping(base.add(start), dst.as_mut_ptr(), first);
            if total > first {
                std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first), total - first);
            }
        }

        self.shared
            .read_pos
            .store(read.wrapping_add(n), Ordering::Release);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_across_the_boundary() {
        let (mut producer, mut consumer) = frame_ring(2, 4);
        assert_eq!(producer.available_write_frames(), 4);

        let frames = [1.0, -1.0, 2.0, -2.0, 3.0, -3.0];
        assert_eq!(producer.write_frames(&frames), 3);

        let mut out = [0.0; 4];
        assert_eq!(consumer.read_frames(&mut out), 2);
        assert_eq!(out, [1.0, -1.0, 2.0, -2.0]);

        // Next write straddles the end of the storage.
        let more = [4.0, -4.0, 5.0, -5.0, 6.0, -6.0];
        assert_eq!(producer.write_frames(&more), 3);
        assert_eq!(producer.available_write_frames(), 0);

        let mut rest = [0.0; 8];
        assert_eq!(consumer.read_frames(&mut rest), 4);
        assert_eq!(rest, [3.0, -3.0, 4.0, -4.0, 5.0, -5.0, 6.0, -6.0]);
        assert_eq!(consumer.available_read_frames(), 0);
    }

    #[test]
    fn underflow_reports_short_read() {
        let (mut producer, mut consumer) = frame_ring(1, 8);
        producer.write_frames(&[0.5; 3]);
        let mut out = [9.0; 8];
        assert_eq!(consumer.read_frames(&mut out), 3);
        assert_eq!(&out[..3], &[0.5; 3]);
        // The caller pads the rest; the ring leaves it untouched.
        assert_eq!(&out[3..], &[9.0; 5]);
    }

    #[test]
    fn concurrent_stream_is_not_corrupted() {
        let (mut producer, mut consumer) = frame_ring(1, 64);
        let writer = std::thread::spawn(move || {
            let mut next = 0u32;
            while next < 10_000 {
                let chunk: Vec<f32> = (next..next + 16).map(|v| v as f32).collect();
                let written = producer.write_frames(&chunk);
                next += written as u32;
                if written == 0 {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0u32;
        let mut out = [0.0f32; 16];
        while expected < 10_000 {
            let read = consumer.read_frames(&mut out);
            for &sample in &out[..read] {
                assert_eq!(sample, expected as f32);
                expected += 1;
            }
            if read == 0 {
                std::thread::yield_now();
            }
        }
        writer.join().unwrap();
    }
}
