//! Configuration for wave-rider.

use crate::core::ring_buffer::DEFAULT_FILL;
use crate::device::{MonitorConfig, ReaderConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default location of the headset's encrypted character device.
pub const DEFAULT_DEVICE_PATH: &str = "/dev/eeg/encrypted";

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Character device carrying encrypted frames
    pub device_path: PathBuf,

    /// Headset serial number, used to derive the AES key
    pub serial_number: String,

    /// Number of samples kept in the rolling signal window
    pub window_len: usize,

    /// Value unwritten window rows are filled with
    pub fill_value: f64,

    /// How long the reader waits for data before checking for a stop request
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,

    /// How often the device monitor checks for the device file
    #[serde(with = "duration_millis")]
    pub monitor_interval: Duration,

    /// Packet queue bound; unbounded when absent
    pub queue_capacity: Option<usize>,

    /// Directory for CSV recordings
    pub recording_path: PathBuf,

    /// Directory for persisted statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wave-rider");

        Self {
            device_path: PathBuf::from(DEFAULT_DEVICE_PATH),
            serial_number: "SN20120229000254".to_string(),
            window_len: 768,
            fill_value: DEFAULT_FILL,
            poll_interval: Duration::from_millis(100),
            monitor_interval: Duration::from_millis(100),
            queue_capacity: None,
            recording_path: data_dir.join("recordings"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wave-rider")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.recording_path)?;
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Path of the persisted acquisition statistics.
    pub fn stats_path(&self) -> PathBuf {
        self.data_path.join("acquisition.json")
    }

    pub fn reader_config(&self) -> ReaderConfig {
        ReaderConfig {
            device_path: self.device_path.clone(),
            poll_interval: self.poll_interval,
            queue_capacity: self.queue_capacity,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            device_path: self.device_path.clone(),
            poll_interval: self.monitor_interval,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
}

/// Serde support for Duration as whole milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
