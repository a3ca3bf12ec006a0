//! Capture backend abstraction
//!
//! The backend is the audio API that owns the hardware: it lists devices and
//! opens input streams that call back on a real-time thread with fixed-size
//! frames. [`CpalBackend`](crate::audio::cpal_backend::CpalBackend) is the
//! production implementation.

use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Parameters of one opened capture stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Interleaved input channels
    pub channels: u16,

    /// Samples per channel delivered by each callback
    pub frame_size: usize,

    /// Trailing buffer capacity in samples
    pub buffer_size: usize,

    /// Backend device index
    pub device_index: usize,

    /// Linear gain applied when the stream was opened
    pub gain: f32,
}

impl StreamConfig {
    /// Samples in one callback across all channels
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.channels as usize
    }

    /// Frame period in microseconds
    pub fn frame_period_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frame_size as u64 * 1_000_000) / self.sample_rate as u64
    }

    pub fn validate(&self) -> Result<(), AudioError> {
        if self.sample_rate == 0 {
            return Err(AudioError::InvalidConfig("sample rate must be positive".into()));
        }
        if self.channels == 0 {
            return Err(AudioError::InvalidConfig("channel count must be positive".into()));
        }
        if self.frame_size == 0 {
            return Err(AudioError::InvalidConfig("frame size must be positive".into()));
        }
        if self.samples_per_frame() > self.buffer_size {
            return Err(AudioError::InvalidConfig(format!(
                "frame of {} samples does not fit a buffer of {}",
                self.samples_per_frame(),
                self.buffer_size
            )));
        }
        if self.gain.is_nan() || self.gain < 0.0 {
            return Err(AudioError::InvalidConfig(format!("gain {} is negative", self.gain)));
        }
        Ok(())
    }
}

/// Read-only description of a device reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureDevice {
    /// Position in the backend's enumeration order
    pub index: usize,
    pub name: String,
    pub max_input_channels: u16,
    pub default_sample_rate: Option<u32>,
}

impl CaptureDevice {
    pub fn is_input(&self) -> bool {
        self.max_input_channels > 0
    }
}

/// Per-callback flags reported by the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatus {
    /// The backend discarded input because the callback ran late
    pub input_overflow: bool,
}

/// Real-time callback: one fixed-size frame of interleaved `f32` samples
pub type InputCallback = Box<dyn FnMut(&[f32], StreamStatus) + Send + 'static>;

/// An open capture stream
///
/// Dropping the handle closes the stream as well.
pub trait CaptureStream: Send {
    /// Stop callbacks and release the device; calling twice is harmless
    fn close(&mut self);
}

/// Audio API that enumerates devices and opens input streams
pub trait CaptureBackend: Send + Sync {
    /// All devices in backend order, input-capable or not
    fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>, AudioError>;

    /// Index of the system default input device
    fn default_input_device(&self) -> Option<usize>;

    /// Open a stream on `config.device_index` and start calling `callback`
    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: InputCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}
