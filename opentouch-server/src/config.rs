//! Configuration for the OpenTouch server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use opentouch_core::{CaptureConfig, HubConfig, QualityConfig, RouterConfig};
use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Screen capture settings.
    pub screen: ScreenConfig,
    /// Adaptive quality settings.
    pub quality: QualitySettings,
    /// Remote input settings.
    pub input: InputConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind.
    pub host: String,
    /// Preferred WebSocket port.
    pub port: u16,
    /// Ports tried after `port` if it is taken.
    pub port_scan_attempts: u16,
}

/// Screen capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Target frames per second (10-60).
    pub fps: u32,
    /// Monitor index to capture (0 = primary).
    pub monitor_index: u32,
    /// Skip frames that barely differ from the last one sent.
    pub change_detection: bool,
    /// Mean colour difference (0-1) below which frames count as identical.
    pub change_threshold: f64,
    /// Identical frames skipped in a row before a forced refresh.
    pub skip_cap: u32,
    /// Pause after a failed capture tick, in milliseconds.
    pub error_backoff_ms: u64,
}

/// Adaptive quality configuration. Qualities are fractions in 0-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub base: f64,
    pub min: f64,
    pub max: f64,
    /// Latency samples kept for the moving mean.
    pub window: usize,
    /// Samples required before quality changes.
    pub min_samples: usize,
    pub low_latency_ms: f64,
    pub high_latency_ms: f64,
    /// Minimum quality change that is applied.
    pub hysteresis: f64,
    /// Interval between latency probes, in milliseconds.
    pub probe_interval_ms: u64,
}

/// Remote input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Minimum spacing between injected events, in milliseconds.
    pub min_interval_ms: u64,
    /// Multiplier applied to scroll deltas.
    pub scroll_factor: f64,
    /// Upper bound on the click count of one click event.
    pub max_click_count: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            port_scan_attempts: 100,
        }
    }
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            monitor_index: 0,
            change_detection: true,
            change_threshold: 0.02,
            skip_cap: 5,
            error_backoff_ms: 10,
        }
    }
}

impl Default for QualitySettings {
    fn default() -> Self {
        let q = QualityConfig::default();
        Self {
            base: q.base,
            min: q.min,
            max: q.max,
            window: q.window,
            min_samples: q.min_samples,
            low_latency_ms: q.low_latency_ms,
            high_latency_ms: q.high_latency_ms,
            hysteresis: q.hysteresis,
            probe_interval_ms: 1000,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 5,
            scroll_factor: 1.0,
            max_click_count: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Why a config file could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// `Ok(None)` means there is no file at `path`. Nothing is logged
    /// here since this runs before the subscriber is installed.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        Self::parse(&contents)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Render the default configuration as TOML.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Effective frames per second after clamping.
    pub fn fps(&self) -> u32 {
        self.screen.fps.clamp(10, 60)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.quality.probe_interval_ms.max(50))
    }

    /// Convert into the pipeline configuration, clamping out-of-range values.
    pub fn to_hub_config(&self) -> HubConfig {
        let q = &self.quality;
        let min = q.min.clamp(0.01, 1.0);
        let max = q.max.clamp(min, 1.0);

        HubConfig {
            capture: CaptureConfig {
                target_fps: self.fps(),
                change_detection: self.screen.change_detection,
                change_threshold: self.screen.change_threshold.clamp(0.0, 1.0),
                skip_cap: self.screen.skip_cap,
                error_backoff: Duration::from_millis(self.screen.error_backoff_ms),
                ..CaptureConfig::default()
            },
            quality: QualityConfig {
                base: q.base.clamp(0.1, 1.0),
                min,
                max,
                window: q.window.max(1),
                min_samples: q.min_samples,
                low_latency_ms: q.low_latency_ms,
                high_latency_ms: q.high_latency_ms,
                hysteresis: q.hysteresis.max(0.0),
            },
            router: RouterConfig {
                min_interval: Duration::from_millis(self.input.min_interval_ms),
                scroll_factor: self.input.scroll_factor,
                max_click_count: self.input.max_click_count.max(1),
            },
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
