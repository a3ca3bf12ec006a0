//! In-process capture backend driven by the test itself

use parking_lot::Mutex;
use std::sync::Arc;

use crate::audio::backend::{
    CaptureBackend, CaptureDevice, CaptureStream, InputCallback, StreamConfig, StreamStatus,
};
use crate::error::AudioError;

#[derive(Default)]
struct MockShared {
    callback: Option<(u64, InputCallback)>,
    next_stream_id: u64,
    opened: usize,
    closed: usize,
    last_config: Option<StreamConfig>,
    fail_open: bool,
}

pub(crate) struct MockBackend {
    devices: Vec<CaptureDevice>,
    default_device: Option<usize>,
    shared: Arc<Mutex<MockShared>>,
}

impl MockBackend {
    pub(crate) fn new(devices: Vec<CaptureDevice>, default_device: Option<usize>) -> Self {
        Self {
            devices,
            default_device,
            shared: Arc::new(Mutex::new(MockShared::default())),
        }
    }

    /// `names` with their input channel counts, default at `default_device`
    pub(crate) fn with_devices(names: &[(&str, u16)], default_device: Option<usize>) -> Self {
        let devices = names
            .iter()
            .enumerate()
            .map(|(index, (name, channels))| device(index, name, *channels))
            .collect();
        Self::new(devices, default_device)
    }

    /// One mono microphone at index 0
    pub(crate) fn single_input() -> Self {
        Self::with_devices(&[("Test Microphone", 1)], Some(0))
    }

    pub(crate) fn set_fail_open(&self, fail: bool) {
        self.shared.lock().fail_open = fail;
    }

    /// Deliver one frame to the open stream; false when nothing is open
    pub(crate) fn feed(&self, samples: &[f32]) -> bool {
        self.feed_with_status(samples, StreamStatus::default())
    }

    pub(crate) fn feed_with_status(&self, samples: &[f32], status: StreamStatus) -> bool {
        let mut shared = self.shared.lock();
        match shared.callback.as_mut() {
            Some((_, callback)) => {
                callback(samples, status);
                true
            }
            None => false,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.shared.lock().callback.is_some()
    }

    pub(crate) fn opened_count(&self) -> usize {
        self.shared.lock().opened
    }

    pub(crate) fn closed_count(&self) -> usize {
        self.shared.lock().closed
    }

    pub(crate) fn last_config(&self) -> Option<StreamConfig> {
        self.shared.lock().last_config.clone()
    }
}

pub(crate) fn device(index: usize, name: &str, max_input_channels: u16) -> CaptureDevice {
    CaptureDevice {
        index,
        name: name.to_string(),
        max_input_channels,
        default_sample_rate: Some(44_100),
    }
}

impl CaptureBackend for MockBackend {
    fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>, AudioError> {
        Ok(self.devices.clone())
    }

    fn default_input_device(&self) -> Option<usize> {
        self.default_device
    }

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: InputCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let device = self
            .devices
            .get(config.device_index)
            .ok_or(AudioError::InvalidDevice(config.device_index))?;
        if device.max_input_channels < config.channels {
            return Err(AudioError::NoInputChannels(config.device_index));
        }

        let mut shared = self.shared.lock();
        if shared.fail_open {
            return Err(AudioError::StreamOpen("device busy".to_string()));
        }

        let id = shared.next_stream_id;
        shared.next_stream_id += 1;
        shared.opened += 1;
        shared.last_config = Some(config.clone());
        shared.callback = Some((id, callback));

        Ok(Box::new(MockStream {
            id,
            shared: self.shared.clone(),
            closed: false,
        }))
    }
}

struct MockStream {
    id: u64,
    shared: Arc<Mutex<MockShared>>,
    closed: bool,
}

impl CaptureStream for MockStream {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let mut shared = self.shared.lock();
        shared.closed += 1;
        if matches!(shared.callback, Some((id, _)) if id == self.id) {
            shared.callback = None;
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.close();
    }
}
