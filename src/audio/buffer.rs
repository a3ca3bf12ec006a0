//! Audio frames and the trailing sample buffer
//!
//! Frames are produced on the real-time thread and moved to the processing
//! thread; the ring buffer keeps the most recent `capacity` samples and is
//! only ever written by the processing thread.

use parking_lot::Mutex;
use std::sync::Arc;

/// One callback's worth of gain-scaled samples
///
/// Samples are shared, so cloning a frame never copies audio data.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    samples: Arc<[f32]>,
    channels: u16,
    raw_level: f32,
    level: f32,
    sequence: u64,
}

impl AudioFrame {
    pub fn new(
        samples: Arc<[f32]>,
        channels: u16,
        raw_level: f32,
        level: f32,
        sequence: u64,
    ) -> Self {
        Self {
            samples,
            channels: channels.max(1),
            raw_level,
            level,
            sequence,
        }
    }

    /// Scale `input` by `gain` and measure its mean absolute amplitude
    pub fn from_input(input: &[f32], channels: u16, gain: f32, sequence: u64) -> Self {
        let raw_level = mean_abs(input);
        let samples: Arc<[f32]> = input.iter().map(|s| s * gain).collect();
        Self::new(samples, channels, raw_level, raw_level * gain, sequence)
    }

    /// Gain-scaled samples (interleaved when `channels > 1`)
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Mean absolute amplitude of the input before gain
    pub fn raw_level(&self) -> f32 {
        self.raw_level
    }

    /// Mean absolute amplitude after gain
    pub fn level(&self) -> f32 {
        self.level
    }

    /// Position of this frame within its stream
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

}

/// Mean absolute amplitude, zero for an empty slice
pub fn mean_abs(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|s| s.abs() as f64).sum();
    (sum / samples.len() as f64) as f32
}

/// Fixed-length trailing window of samples
///
/// The window starts zero-filled and its length never changes; pushing
/// evicts the oldest samples first.
pub struct RingBuffer {
    samples: Mutex<Vec<f32>>,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(vec![0.0; capacity]),
            capacity,
        }
    }

    /// Shift the window left by `new.len()` and append `new` at the tail
    ///
    /// When `new` is longer than the window only its newest samples are kept.
    pub fn push_samples(&self, new: &[f32]) {
        if new.is_empty() || self.capacity == 0 {
            return;
        }

        let mut samples = self.samples.lock();
        if new.len() >= self.capacity {
            samples.copy_from_slice(&new[new.len() - self.capacity..]);
            return;
        }

        let keep = self.capacity - new.len();
        samples.copy_within(new.len().., 0);
        samples[keep..].copy_from_slice(new);
    }

    /// Independent copy of the current window, oldest sample first
    pub fn snapshot(&self) -> Vec<f32> {
        self.samples.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.capacity == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Thread-safe handle to a ring buffer
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer
pub fn create_shared_buffer(capacity: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity))
}
