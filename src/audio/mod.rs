//! Модуль аудио-подсистемы
//!
//! Содержит бэкенды захвата, перечисление устройств, конвейер захвата и
//! измерение уровня.

pub mod backend;
pub mod buffer;
pub mod cpal_backend;
pub mod device;
pub mod handler;
pub mod level_meter;
pub mod source;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{CaptureBackend, CaptureDevice, CaptureStream, InputCallback, StreamConfig, StreamStatus};
pub use buffer::{AudioFrame, RingBuffer};
pub use cpal_backend::CpalBackend;
pub use device::{DeviceCatalog, DevicePredicate};
pub use handler::{FrameHandler, MeterHandler};
pub use level_meter::{LevelMeter, LevelSnapshot, MeterParams, RmsWindow};
pub use source::{AudioSource, SourceConfig, SourceStats};
