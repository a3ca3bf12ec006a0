//! Audio source: capture stream, gain, handoff queue and processing thread
//!
//! ```text
//! backend thread ──(gain, try_send)──► handoff queue ──► processing thread
//!                                                        ├─► ring buffer
//!                                                        └─► frame handler
//! ```
//!
//! The real-time callback never blocks and never unwinds into the backend:
//! when the queue is full the frame is dropped and counted. The processing
//! thread is created with the source and lives until [`AudioSource::shutdown`]
//! or drop; it waits on the queue with a bounded timeout and exits once the
//! shutdown channel is closed.

use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crate::audio::backend::{
    CaptureBackend, CaptureStream, InputCallback, StreamConfig, StreamStatus,
};
use crate::audio::buffer::{create_shared_buffer, AudioFrame, SharedRingBuffer};
use crate::audio::handler::FrameHandler;
use crate::constants::*;
use crate::error::{AudioError, CallbackError};

/// Settings an [`AudioSource`] is built with
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Samples per channel per callback
    pub frame_size: usize,
    /// Trailing buffer capacity in samples
    pub buffer_size: usize,
    pub gain: f32,
    /// Start capturing from this device right away
    pub device_index: Option<usize>,
    /// Frames the handoff queue can hold
    pub handoff_capacity: usize,
    /// Bounded wait of the processing thread
    pub poll_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_size: DEFAULT_FRAME_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            gain: DEFAULT_GAIN,
            device_index: None,
            handoff_capacity: HANDOFF_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(PROCESSOR_POLL_INTERVAL_MS),
        }
    }
}

impl SourceConfig {
    fn stream_config(&self, device_index: usize, gain: f32) -> StreamConfig {
        StreamConfig {
            sample_rate: self.sample_rate,
            channels: self.channels,
            frame_size: self.frame_size,
            buffer_size: self.buffer_size,
            device_index,
            gain,
        }
    }
}

/// Pipeline counters
#[derive(Debug, Default)]
struct SourceCounters {
    frames_captured: AtomicU64,
    frames_dropped: AtomicU64,
    frames_processed: AtomicU64,
    callback_errors: AtomicU64,
}

/// Point-in-time copy of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SourceStats {
    /// Frames delivered by the backend
    pub frames_captured: u64,
    /// Frames dropped because the handoff queue was full
    pub frames_dropped: u64,
    /// Frames written to the ring buffer
    pub frames_processed: u64,
    /// Handler invocations that failed or panicked
    pub callback_errors: u64,
}

type HandlerSlot = Arc<Mutex<Option<Arc<dyn FrameHandler>>>>;

#[derive(Default)]
struct ActiveStream {
    handle: Option<Box<dyn CaptureStream>>,
    config: Option<StreamConfig>,
}

struct Processor {
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
    thread_id: ThreadId,
}

/// Live capture source with gain, trailing buffer and a client callback
pub struct AudioSource {
    backend: Arc<dyn CaptureBackend>,
    config: SourceConfig,
    gain: Arc<AtomicCell<f32>>,
    stream: Mutex<ActiveStream>,
    buffer: SharedRingBuffer,
    handler: HandlerSlot,
    frame_tx: Sender<AudioFrame>,
    counters: Arc<SourceCounters>,
    processor: Mutex<Processor>,
}

impl AudioSource {
    /// Create the source and its processing thread
    ///
    /// Starts capturing immediately when `config.device_index` is set.
    pub fn new(backend: Arc<dyn CaptureBackend>, config: SourceConfig) -> Result<Self, AudioError> {
        config.stream_config(0, config.gain.max(0.0)).validate()?;
        if config.handoff_capacity == 0 {
            return Err(AudioError::InvalidConfig("handoff queue needs room for one frame".into()));
        }

        let buffer = create_shared_buffer(config.buffer_size);
        let handler: HandlerSlot = Arc::new(Mutex::new(None));
        let counters = Arc::new(SourceCounters::default());
        let (frame_tx, frame_rx) = bounded::<AudioFrame>(config.handoff_capacity);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let thread_handle = {
            let buffer = buffer.clone();
            let handler = handler.clone();
            let counters = counters.clone();
            let poll_interval = config.poll_interval;
            thread::Builder::new()
                .name(PROCESSOR_THREAD_NAME.to_string())
                .spawn(move || {
                    processing_loop(frame_rx, shutdown_rx, buffer, handler, counters, poll_interval)
                })
                .map_err(|e| AudioError::Thread(e.to_string()))?
        };

        let source = Self {
            backend,
            gain: Arc::new(AtomicCell::new(config.gain.max(0.0))),
            stream: Mutex::new(ActiveStream::default()),
            buffer,
            handler,
            frame_tx,
            counters,
            processor: Mutex::new(Processor {
                shutdown_tx: Some(shutdown_tx),
                thread_id: thread_handle.thread().id(),
                thread_handle: Some(thread_handle),
            }),
            config,
        };

        if let Some(index) = source.config.device_index {
            source.start(index)?;
        }

        Ok(source)
    }

    /// Open a stream on `device_index`, replacing any stream already open
    ///
    /// Fails with [`AudioError::ShutDown`] once [`shutdown`](Self::shutdown)
    /// has run.
    pub fn start(&self, device_index: usize) -> Result<(), AudioError> {
        let mut active = self.stream.lock();
        if self.processor.lock().shutdown_tx.is_none() {
            return Err(AudioError::ShutDown);
        }

        if let Some(mut previous) = active.handle.take() {
            tracing::info!("Stopping existing stream...");
            previous.close();
        }
        active.config = None;

        let config = self.config.stream_config(device_index, self.gain());
        tracing::info!(
            "Starting audio stream with device {} ({} Hz, {} channel(s), {} samples per frame)",
            device_index,
            config.sample_rate,
            config.channels,
            config.frame_size
        );

        let callback = self.realtime_callback(&config);
        let handle = self.backend.open_stream(&config, callback).map_err(|e| {
            tracing::error!("Error starting audio stream: {}", e);
            e
        })?;

        active.handle = Some(handle);
        active.config = Some(config);
        tracing::info!("Audio stream started successfully");
        Ok(())
    }

    /// Close the current stream; does nothing when none is open
    ///
    /// The processing thread keeps running and the buffer keeps its contents.
    pub fn stop(&self) {
        let mut active = self.stream.lock();
        if let Some(mut handle) = active.handle.take() {
            handle.close();
            tracing::info!("Audio stream stopped");
        }
        active.config = None;
    }

    /// Set the linear gain (negative and NaN become 0) for the next callback
    pub fn set_gain(&self, gain: f32) {
        self.gain.store(gain.max(0.0));
    }

    pub fn gain(&self) -> f32 {
        self.gain.load()
    }

    /// Install the frame handler, replacing the previous one
    pub fn set_callback<H>(&self, handler: H)
    where
        H: FrameHandler + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    pub fn clear_callback(&self) {
        self.handler.lock().take();
    }

    /// Independent copy of the trailing buffer, oldest sample first
    pub fn buffer(&self) -> Vec<f32> {
        self.buffer.snapshot()
    }

    pub fn buffer_capacity(&self) -> usize {
        self.buffer.capacity()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.lock().handle.is_some()
    }

    /// Configuration of the open stream
    pub fn stream_config(&self) -> Option<StreamConfig> {
        self.stream.lock().config.clone()
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            frames_dropped: self.counters.frames_dropped.load(Ordering::Relaxed),
            frames_processed: self.counters.frames_processed.load(Ordering::Relaxed),
            callback_errors: self.counters.callback_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the stream and end the processing thread
    ///
    /// Safe to call more than once. Joins the thread unless called from the
    /// processing thread itself (e.g. by a handler).
    pub fn shutdown(&self) {
        let handle = {
            let mut processor = self.processor.lock();
            if processor.shutdown_tx.take().is_some() {
                tracing::debug!("Signalled audio processor to stop");
            }
            if thread::current().id() == processor.thread_id {
                None
            } else {
                processor.thread_handle.take()
            }
        };

        // A racing `start` either sees the signal or gets closed here
        self.stop();

        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Audio processor thread panicked");
            }
        }
    }

    /// Build the callback run on the backend's real-time thread
    fn realtime_callback(&self, config: &StreamConfig) -> InputCallback {
        let gain = self.gain.clone();
        let frame_tx = self.frame_tx.clone();
        let counters = self.counters.clone();
        let channels = config.channels;
        let device_index = config.device_index;
        let mut sequence = 0u64;
        let mut overflows = 0u64;

        Box::new(move |samples: &[f32], status: StreamStatus| {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                if status.input_overflow {
                    overflows += 1;
                    if should_log_drop(overflows) {
                        tracing::warn!(
                            overflows,
                            "Audio callback status: input overflow on device {}",
                            device_index
                        );
                    }
                }

                let frame = AudioFrame::from_input(samples, channels, gain.load(), sequence);
                sequence = sequence.wrapping_add(1);
                counters.frames_captured.fetch_add(1, Ordering::Relaxed);

                if frame.raw_level() > 1e-4 {
                    tracing::trace!("Raw audio level: {:.6}", frame.raw_level());
                }

                match frame_tx.try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(frame)) => {
                        let dropped = counters.frames_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if should_log_drop(dropped) {
                            tracing::warn!(
                                sequence = frame.sequence(),
                                dropped,
                                "Handoff queue full, dropping audio frame"
                            );
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        tracing::debug!("Audio processor gone, dropping audio frame");
                    }
                }
            }));

            if let Err(payload) = outcome {
                tracing::error!(
                    "Error in audio callback: {}",
                    CallbackError::from_panic(payload)
                );
            }
        })
    }
}

impl Drop for AudioSource {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// First occurrence, then every `DROP_LOG_INTERVAL`-th
fn should_log_drop(count: u64) -> bool {
    count == 1 || count % DROP_LOG_INTERVAL == 0
}

fn processing_loop(
    frame_rx: Receiver<AudioFrame>,
    shutdown_rx: Receiver<()>,
    buffer: SharedRingBuffer,
    handler: HandlerSlot,
    counters: Arc<SourceCounters>,
    poll_interval: Duration,
) {
    tracing::info!("Starting audio processor thread");

    loop {
        select! {
            recv(frame_rx) -> msg => match msg {
                Ok(frame) => process_frame(&frame, &buffer, &handler, &counters),
                Err(_) => break,
            },
            // Only ever disconnects
            recv(shutdown_rx) -> _ => break,
            default(poll_interval) => continue,
        }
    }

    tracing::info!("Audio processor thread stopped");
}

fn process_frame(
    frame: &AudioFrame,
    buffer: &SharedRingBuffer,
    handler: &HandlerSlot,
    counters: &SourceCounters,
) {
    buffer.push_samples(frame.samples());
    counters.frames_processed.fetch_add(1, Ordering::Relaxed);

    let Some(handler) = handler.lock().clone() else {
        return;
    };

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        handler.handle_frame(frame, frame.level())
    }))
    .unwrap_or_else(|payload| Err(CallbackError::from_panic(payload)));

    if let Err(e) = result {
        counters.callback_errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(sequence = frame.sequence(), "Error processing audio: {}", e);
    }
}
