//! Capture device enumeration and default selection

use std::fmt;
use std::sync::Arc;

use crate::audio::backend::{CaptureBackend, CaptureDevice};

/// Name test used to prefer a device over the system default
pub type DevicePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Read-only view of the backend's capture devices
#[derive(Clone)]
pub struct DeviceCatalog {
    backend: Arc<dyn CaptureBackend>,
    preferred: Option<DevicePredicate>,
}

impl DeviceCatalog {
    pub fn new(backend: Arc<dyn CaptureBackend>) -> Self {
        Self {
            backend,
            preferred: None,
        }
    }

    /// Prefer the first input device whose name satisfies `predicate`
    pub fn with_preference<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        self.preferred = Some(Arc::new(predicate));
        self
    }

    /// Prefer the first input device whose name contains `fragment`
    pub fn prefer_name_containing(self, fragment: impl Into<String>) -> Self {
        let fragment = fragment.into();
        self.with_preference(move |name| name.contains(&fragment))
    }

    /// Input-capable devices as (index, name), in backend order
    pub fn list_devices(&self) -> Vec<(usize, String)> {
        self.input_devices()
            .into_iter()
            .map(|device| (device.index, device.name))
            .collect()
    }

    /// Input-capable devices with full descriptors
    pub fn input_devices(&self) -> Vec<CaptureDevice> {
        match self.backend.enumerate_devices() {
            Ok(devices) => devices
                .into_iter()
                .filter(|device| {
                    if device.is_input() {
                        tracing::debug!("Found input device {}: {}", device.index, device.name);
                    }
                    device.is_input()
                })
                .collect(),
            Err(e) => {
                tracing::error!("Error listing audio devices: {}", e);
                Vec::new()
            }
        }
    }

    /// Device to capture from when the user has not picked one
    ///
    /// Preference match first, then the system default, then the first
    /// input device; `None` when there are no input devices at all.
    pub fn default_device(&self) -> Option<usize> {
        let devices = self.input_devices();
        if devices.is_empty() {
            tracing::warn!("No input devices found");
            return None;
        }

        if let Some(preferred) = &self.preferred {
            if let Some(device) = devices.iter().find(|d| preferred(d.name.as_str())) {
                tracing::info!("Using preferred input device {}: {}", device.index, device.name);
                return Some(device.index);
            }
        }

        if let Some(index) = self.backend.default_input_device() {
            if devices.iter().any(|d| d.index == index) {
                tracing::info!("Using system default input device: {}", index);
                return Some(index);
            }
            tracing::warn!("System default device {} is not an input device", index);
        }

        let first = &devices[0];
        tracing::info!("Falling back to first input device {}: {}", first.index, first.name);
        Some(first.index)
    }

    /// Descriptor of the device at `index`, input-capable or not
    pub fn device_info(&self, index: usize) -> Option<CaptureDevice> {
        match self.backend.enumerate_devices() {
            Ok(devices) => devices.into_iter().find(|d| d.index == index),
            Err(e) => {
                tracing::error!("Error getting device info: {}", e);
                None
            }
        }
    }
}

impl fmt::Debug for DeviceCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCatalog")
            .field("has_preference", &self.preferred.is_some())
            .finish()
    }
}
