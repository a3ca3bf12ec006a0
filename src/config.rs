//! Configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::level_meter::{MeterParams, RmsWindow};
use crate::audio::source::SourceConfig;
use crate::constants::*;

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Capture stream configuration
    pub stream: StreamSettings,

    /// Handoff queue and processing thread
    pub pipeline: PipelineConfig,

    /// Level meter configuration
    pub meter: MeterConfig,

    /// Device selection
    pub devices: DeviceConfig,

    /// Terminal monitor
    pub monitor: MonitorConfig,
}

/// Capture stream configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    /// Sample rate in Hz
    pub sample_rate: u32,

    /// Input channel count
    pub channels: u16,

    /// Samples per channel per callback
    pub frame_size: usize,

    /// Trailing buffer capacity in samples
    pub buffer_size: usize,

    /// Initial linear gain
    pub gain: f32,

    /// Device index to capture from (default device when unset)
    pub device_index: Option<usize>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            frame_size: DEFAULT_FRAME_SIZE,
            buffer_size: DEFAULT_BUFFER_SIZE,
            gain: DEFAULT_GAIN,
            device_index: None,
        }
    }
}

/// Handoff queue and processing thread configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frames the handoff queue holds before frames are dropped
    pub handoff_capacity: usize,

    /// Bounded wait of the processing thread in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            handoff_capacity: HANDOFF_QUEUE_CAPACITY,
            poll_interval_ms: PROCESSOR_POLL_INTERVAL_MS,
        }
    }
}

/// Level meter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// RMS span: `"per_frame"` or `{ samples = N }`
    pub window: RmsWindow,

    /// Peak hold time in seconds
    pub peak_hold_secs: f64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            window: RmsWindow::PerFrame,
            peak_hold_secs: DEFAULT_PEAK_HOLD_SECS,
        }
    }
}

/// Device selection
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Prefer the first input device whose name contains this text
    pub preferred_name: Option<String>,
}

/// Terminal monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Level refresh period in milliseconds
    pub refresh_ms: u64,

    /// Lowest dB value shown on the bar
    pub floor_db: f32,

    /// Bar width in characters
    pub bar_width: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            refresh_ms: DEFAULT_REFRESH_MS,
            floor_db: DEFAULT_METER_FLOOR_DB,
            bar_width: DEFAULT_BAR_WIDTH,
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "audio-level-source", "level-monitor")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Settings for an [`AudioSource`](crate::audio::AudioSource)
    pub fn source_config(&self) -> SourceConfig {
        SourceConfig {
            sample_rate: self.stream.sample_rate,
            channels: self.stream.channels,
            frame_size: self.stream.frame_size,
            buffer_size: self.stream.buffer_size,
            gain: self.stream.gain,
            device_index: None,
            handoff_capacity: self.pipeline.handoff_capacity,
            poll_interval: Duration::from_millis(self.pipeline.poll_interval_ms),
        }
    }

    /// Parameters for a [`LevelMeter`](crate::audio::LevelMeter) matching the stream
    pub fn meter_params(&self) -> MeterParams {
        MeterParams {
            window: self.meter.window,
            peak_hold_secs: self.meter.peak_hold_secs,
            sample_rate: self.stream.sample_rate,
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.refresh_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.stream.sample_rate, 44_100);
        assert_eq!(config.stream.frame_size, 1024);
        assert_eq!(config.monitor.refresh_ms, 50);
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::from_toml(
            r#"
            [stream]
            sample_rate = 48000
            gain = 2.5

            [meter]
            window = { samples = 4800 }
            peak_hold_secs = 0.5

            [devices]
            preferred_name = "USB"
            "#,
        )
        .unwrap();

        assert_eq!(config.stream.sample_rate, 48_000);
        assert_eq!(config.stream.channels, 1);
        assert_eq!(config.stream.gain, 2.5);
        assert_eq!(config.meter.window, RmsWindow::Samples(4800));
        assert_eq!(config.devices.preferred_name.as_deref(), Some("USB"));

        let params = config.meter_params();
        assert_eq!(params.sample_rate, 48_000);
        assert_eq!(params.hold_samples(), 24_000);
    }

    #[test]
    fn test_per_frame_window_string() {
        let config = AppConfig::from_toml("[meter]\nwindow = \"per_frame\"\n").unwrap();
        assert_eq!(config.meter.window, RmsWindow::PerFrame);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::from_toml("[stream]\nsample_rate = \"fast\"").unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn test_source_config_mapping() {
        let mut config = AppConfig::default();
        config.pipeline.poll_interval_ms = 25;
        config.stream.buffer_size = 2048;

        let source = config.source_config();
        assert_eq!(source.poll_interval, Duration::from_millis(25));
        assert_eq!(source.buffer_size, 2048);
        assert_eq!(source.device_index, None);
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("audio-level-source-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.stream.device_index = Some(2);
        config.meter.window = RmsWindow::Samples(2048);
        config.devices.preferred_name = Some("Studio".to_string());
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
