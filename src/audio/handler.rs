//! Client frame handlers
//!
//! An [`AudioSource`](crate::audio::AudioSource) holds at most one handler at
//! a time and calls it on its processing thread for every frame.

use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::audio::level_meter::LevelMeter;
use crate::error::CallbackError;

/// Receives processed frames
///
/// Runs on the processing thread, so it should return quickly. Errors and
/// panics are logged by the source and never stop the processing loop.
pub trait FrameHandler: Send + Sync {
    /// Handle one frame; `level` is its post-gain mean absolute amplitude
    fn handle_frame(&self, frame: &AudioFrame, level: f32) -> Result<(), CallbackError>;
}

impl<F> FrameHandler for F
where
    F: Fn(&AudioFrame, f32) + Send + Sync,
{
    fn handle_frame(&self, frame: &AudioFrame, level: f32) -> Result<(), CallbackError> {
        self(frame, level);
        Ok(())
    }
}

/// Feeds every frame into a shared [`LevelMeter`]
#[derive(Clone)]
pub struct MeterHandler {
    meter: Arc<LevelMeter>,
}

impl MeterHandler {
    pub fn new(meter: Arc<LevelMeter>) -> Self {
        Self { meter }
    }

    pub fn meter(&self) -> &Arc<LevelMeter> {
        &self.meter
    }
}

impl FrameHandler for MeterHandler {
    fn handle_frame(&self, frame: &AudioFrame, _level: f32) -> Result<(), CallbackError> {
        let (rms, peak) = self.meter.process_interleaved(frame.samples(), frame.channels());
        tracing::trace!(sequence = frame.sequence(), rms, peak, "metered frame");
        Ok(())
    }
}
