//! cpal-backed capture backend
//!
//! Each stream is built and kept alive on its own thread because cpal
//! streams are not `Send` on every platform. The open result is reported
//! back before `open_stream` returns; closing the handle drops the stop
//! channel, the thread wakes and drops the stream.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use crossbeam_channel::{bounded, Sender};
use std::thread::{self, JoinHandle};

use crate::audio::backend::{
    CaptureBackend, CaptureDevice, CaptureStream, InputCallback, StreamConfig, StreamStatus,
};
use crate::error::AudioError;

/// Capture backend over a cpal host
#[derive(Debug, Clone, Copy)]
pub struct CpalBackend {
    host_id: cpal::HostId,
}

impl CpalBackend {
    /// Backend over the platform's default host
    pub fn new() -> Self {
        Self {
            host_id: cpal::default_host().id(),
        }
    }

    /// Backend over a specific host (e.g. ALSA vs JACK)
    pub fn with_host(host_id: cpal::HostId) -> Self {
        Self { host_id }
    }

    /// Hosts compiled in and available on this machine
    pub fn available_hosts() -> Vec<cpal::HostId> {
        cpal::available_hosts()
    }

    pub fn host_name(&self) -> &'static str {
        self.host_id.name()
    }

    fn host(&self) -> Result<cpal::Host, AudioError> {
        cpal::host_from_id(self.host_id).map_err(|e| AudioError::Enumeration(e.to_string()))
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for CpalBackend {
    fn enumerate_devices(&self) -> Result<Vec<CaptureDevice>, AudioError> {
        let host = self.host()?;
        let devices = host
            .devices()
            .map_err(|e| AudioError::Enumeration(e.to_string()))?;

        Ok(devices
            .enumerate()
            .map(|(index, device)| describe_device(index, &device))
            .collect())
    }

    fn default_input_device(&self) -> Option<usize> {
        let host = self.host().ok()?;
        let default_name = host.default_input_device()?.name().ok()?;
        let mut devices = host.devices().ok()?;
        devices.position(|device| device.name().map(|n| n == default_name).unwrap_or(false))
    }

    fn open_stream(
        &self,
        config: &StreamConfig,
        callback: InputCallback,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        config.validate()?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let host_id = self.host_id;
        let config = config.clone();
        let device_index = config.device_index;

        let handle = thread::Builder::new()
            .name(format!("capture-device-{}", device_index))
            .spawn(move || {
                let stream = match build_stream(host_id, &config, callback) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamPlay(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Disconnects when the handle is closed or dropped
                let _ = stop_rx.recv();
                drop(stream);
                tracing::debug!("Capture stream on device {} released", config.device_index);
            })
            .map_err(|e| AudioError::Thread(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalStream {
                stop_tx: Some(stop_tx),
                thread_handle: Some(handle),
            })),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(AudioError::Thread(format!(
                    "capture thread for device {} exited before reporting",
                    device_index
                )))
            }
        }
    }
}

/// Handle to a stream owned by its capture thread
struct CpalStream {
    stop_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CaptureStream for CpalStream {
    fn close(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.close();
    }
}

fn describe_device(index: usize, device: &cpal::Device) -> CaptureDevice {
    let name = device
        .name()
        .unwrap_or_else(|_| format!("Unknown device {}", index));

    let max_input_channels = device
        .supported_input_configs()
        .map(|configs| configs.map(|c| c.channels()).max().unwrap_or(0))
        .unwrap_or(0);

    let default_sample_rate = if max_input_channels > 0 {
        device
            .default_input_config()
            .ok()
            .map(|c| c.sample_rate().0)
    } else {
        None
    };

    CaptureDevice {
        index,
        name,
        max_input_channels,
        default_sample_rate,
    }
}

fn build_stream(
    host_id: cpal::HostId,
    config: &StreamConfig,
    callback: InputCallback,
) -> Result<cpal::Stream, AudioError> {
    let host = cpal::host_from_id(host_id).map_err(|e| AudioError::StreamOpen(e.to_string()))?;
    let device = host
        .devices()
        .map_err(|e| AudioError::Enumeration(e.to_string()))?
        .nth(config.device_index)
        .ok_or(AudioError::InvalidDevice(config.device_index))?;

    let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    let supported: Vec<cpal::SupportedStreamConfigRange> = device
        .supported_input_configs()
        .map(|configs| configs.collect())
        .unwrap_or_default();

    let max_channels = supported.iter().map(|c| c.channels()).max().unwrap_or(0);
    if max_channels == 0 {
        return Err(AudioError::NoInputChannels(config.device_index));
    }
    if config.channels > max_channels {
        return Err(AudioError::StreamOpen(format!(
            "device '{}' supports at most {} input channels, {} requested",
            name, max_channels, config.channels
        )));
    }

    let sample_format = device
        .default_input_config()
        .map_err(|e| AudioError::StreamOpen(e.to_string()))?
        .sample_format();

    let buffer_size = if supports_fixed_buffer(&supported, config.frame_size) {
        cpal::BufferSize::Fixed(config.frame_size as u32)
    } else {
        cpal::BufferSize::Default
    };

    let stream_config = cpal::StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size,
    };

    tracing::info!(
        "Opening '{}' at {} Hz, {} channel(s), {} samples per frame, {:?}",
        name,
        config.sample_rate,
        config.channels,
        config.frame_size,
        sample_format
    );

    let chunker = FrameChunker::new(config.samples_per_frame(), callback);
    let index = config.device_index;

    match sample_format {
        cpal::SampleFormat::F32 => build_typed::<f32>(&device, &stream_config, chunker, index),
        cpal::SampleFormat::I16 => build_typed::<i16>(&device, &stream_config, chunker, index),
        cpal::SampleFormat::U16 => build_typed::<u16>(&device, &stream_config, chunker, index),
        format => Err(AudioError::UnsupportedFormat(format!("{:?}", format))),
    }
}

fn supports_fixed_buffer(supported: &[cpal::SupportedStreamConfigRange], frame_size: usize) -> bool {
    supported.iter().any(|range| match range.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max } => {
            (*min as usize..=*max as usize).contains(&frame_size)
        }
        cpal::SupportedBufferSize::Unknown => false,
    })
}

fn build_typed<T>(
    device: &cpal::Device,
    stream_config: &cpal::StreamConfig,
    mut chunker: FrameChunker,
    device_index: usize,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + Send + 'static,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            stream_config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                chunker.push(
                    data.iter().map(|&s| <f32 as Sample>::from_sample(s)),
                    StreamStatus::default(),
                );
            },
            move |err| {
                tracing::error!("Capture stream error on device {}: {}", device_index, err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamOpen(e.to_string()))
}

/// Regroups device buffers of arbitrary size into fixed-size frames
struct FrameChunker {
    pending: Vec<f32>,
    frame_len: usize,
    callback: InputCallback,
}

impl FrameChunker {
    fn new(frame_len: usize, callback: InputCallback) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            pending: Vec::with_capacity(frame_len),
            frame_len,
            callback,
        }
    }

    fn push<I>(&mut self, samples: I, status: StreamStatus)
    where
        I: IntoIterator<Item = f32>,
    {
        for sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.frame_len {
                (self.callback)(&self.pending, status);
                self.pending.clear();
            }
        }
    }
}
