//! Default values shared by configuration and audio components

/// Default capture sample rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

/// Default input channel count
pub const DEFAULT_CHANNELS: u16 = 1;

/// Default frame size in samples per channel per callback
pub const DEFAULT_FRAME_SIZE: usize = 1024;

/// Default trailing buffer capacity in samples (one second at 44.1 kHz)
pub const DEFAULT_BUFFER_SIZE: usize = 44_100;

/// Default linear input gain
pub const DEFAULT_GAIN: f32 = 1.0;

/// Frames the handoff queue holds before the real-time callback starts dropping
pub const HANDOFF_QUEUE_CAPACITY: usize = 64;

/// Dropped frames between two "handoff queue full" warnings
pub const DROP_LOG_INTERVAL: u64 = 100;

/// Bounded wait of the processing thread between shutdown checks
pub const PROCESSOR_POLL_INTERVAL_MS: u64 = 100;

/// Default peak hold time in seconds
pub const DEFAULT_PEAK_HOLD_SECS: f64 = 1.0;

/// Level floor used before taking the logarithm (-200 dB)
pub const LEVEL_EPSILON: f32 = 1e-10;

/// Lowest level reported in decibels
pub const MIN_DB: f32 = -200.0;

/// Refresh period of level consumers such as the terminal monitor
pub const DEFAULT_REFRESH_MS: u64 = 50;

/// Lowest dB value shown on a meter bar
pub const DEFAULT_METER_FLOOR_DB: f32 = -60.0;

/// Width of the terminal meter bar in characters
pub const DEFAULT_BAR_WIDTH: usize = 50;

/// Name of the processing thread owned by each audio source
pub const PROCESSOR_THREAD_NAME: &str = "audio-processor";
