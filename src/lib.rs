//! Live audio capture with runtime gain and level metering
//!
//! An [`AudioSource`](audio::AudioSource) opens an input stream through a
//! [`CaptureBackend`](audio::CaptureBackend), scales every frame by a
//! runtime-adjustable gain on the real-time thread, and hands frames to its
//! own processing thread, which keeps a trailing sample buffer and calls a
//! client [`FrameHandler`](audio::FrameHandler). A
//! [`LevelMeter`](audio::LevelMeter) turns frames into RMS and peak-hold
//! levels that any thread can poll in decibels.

pub mod audio;
pub mod config;
pub mod constants;
pub mod error;

pub use error::{AudioError, CallbackError, Error};

/// Crate-level result type
pub type Result<T> = std::result::Result<T, Error>;
