//! Engine configuration
//!
//! Loaded from `config.toml` in the platform config directory; every
//! section falls back to its defaults when missing.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::VideoFormat;
use crate::constants::{DEFAULT_APP_PORT, IDLE_FPS, VIDEO_RECV_BUFFER};
use crate::error::ConfigError;
use crate::protocol::Resolution;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub timing: TimingConfig,
    pub stream: StreamConfig,
    pub client: ClientConfig,
}

/// Socket settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address direct dials are bound to
    pub bind_address: Option<IpAddr>,
    pub connect_timeout_ms: u64,
    /// How long a stream read may stall before the connection is dropped
    pub io_timeout_ms: u64,
    /// Response wait on the control channel
    pub control_timeout_ms: u64,
    pub video_recv_buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: None,
            connect_timeout_ms: 3000,
            io_timeout_ms: 5000,
            control_timeout_ms: 1000,
            video_recv_buffer: VIDEO_RECV_BUFFER,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }
}

/// Loop pacing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// One frame period; idle loops sleep this long per iteration
    pub idle_period_ms: u64,
    /// Sleep after a failed connect or a dropped stream
    pub retry_delay_ms: u64,
    /// Delay between video start and the audio dial
    pub audio_dial_delay_ms: u64,
    pub status_poll_secs: u64,
    pub tally_retry_delay_ms: u64,
    /// Decode worker backoff when the ready queue is empty
    pub decode_poll_ms: u64,
    /// Upper bound on any blocking wait slice
    pub stop_check_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            idle_period_ms: 1000 / IDLE_FPS,
            retry_delay_ms: 2000,
            audio_dial_delay_ms: 1000,
            status_poll_secs: 30,
            tally_retry_delay_ms: 5000,
            decode_poll_ms: 5,
            stop_check_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn idle_period(&self) -> Duration {
        Duration::from_millis(self.idle_period_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn audio_dial_delay(&self) -> Duration {
        Duration::from_millis(self.audio_dial_delay_ms)
    }

    pub fn status_poll(&self) -> Duration {
        Duration::from_secs(self.status_poll_secs)
    }

    pub fn tally_retry_delay(&self) -> Duration {
        Duration::from_millis(self.tally_retry_delay_ms)
    }

    pub fn decode_poll(&self) -> Duration {
        Duration::from_millis(self.decode_poll_ms)
    }

    pub fn stop_check(&self) -> Duration {
        Duration::from_millis(self.stop_check_ms.max(1))
    }
}

/// Initial stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub video_format: VideoFormat,
    pub resolution: Resolution,
    pub enable_audio: bool,
    pub use_hw_accel: bool,
    /// Stop streaming while the output is hidden
    pub deactivate_when_hidden: bool,
    pub app_port: u16,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            video_format: VideoFormat::Avc,
            resolution: Resolution::Hd720,
            enable_audio: false,
            use_hw_accel: true,
            deactivate_when_hidden: false,
            app_port: DEFAULT_APP_PORT,
        }
    }
}

/// How this client identifies itself in stream-start requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub platform: String,
    pub host_version: String,
    pub version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
            host_version: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "camstream")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load from the default location, falling back to defaults
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        match Self::load(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}
