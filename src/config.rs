//! Runtime configuration.
//!
//! Defaults come from the embedded `config.toml`. A user file is merged over them key by key,
//! the result is deserialized and then validated.
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::BridgeError;
use crate::host::ClockHostConfig;
use crate::transport::SimulatedTransport;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "PLUGIN_BRIDGE_CONFIG";

/// `[client]` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Client name and window title; empty selects the plugin name.
    pub name: String,
}

/// `[host]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Sample rate of the clock host.
    pub sample_rate: f64,
    /// Frames per cycle.
    pub buffer_size: u32,
}

/// `[transport]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransportConfig {
    /// Whether the simulated transport rolls.
    pub rolling: bool,
    /// Tempo.
    pub beats_per_minute: f64,
    /// Time signature numerator.
    pub beats_per_bar: f32,
    /// Time signature denominator.
    pub beat_type: f32,
    /// Tick resolution.
    pub ticks_per_beat: f64,
}

/// `[channel]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Note channel size in bytes.
    pub capacity: usize,
    /// Back the channel with an anonymous shared mapping instead of the heap.
    pub shared_memory: bool,
}

/// `[midi]` section.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MidiConfig {
    /// Forward consumed control and program changes to the core as well.
    pub forward_intercepted: bool,
}

/// `[ui]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UiConfig {
    /// Run the interactive console; `false` runs headless.
    pub enabled: bool,
    /// Milliseconds between idle ticks.
    pub idle_interval_ms: u64,
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Maximum level: `trace`, `debug`, `info`, `warn` or `error`.
    pub level: String,
}

impl LoggingConfig {
    /// Parsed maximum level.
    pub fn level(&self) -> Result<Level, BridgeError> {
        Level::from_str(&self.level)
            .map_err(|_| BridgeError::InvalidConfig(format!("unknown log level `{}`", self.level)))
    }
}

/// Complete bridge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BridgeConfig {
    /// Client naming.
    pub client: ClientConfig,
    /// Host timing.
    pub host: HostConfig,
    /// Simulated transport.
    pub transport: TransportConfig,
    /// UI note channel.
    pub channel: ChannelConfig,
    /// MIDI handling.
    pub midi: MidiConfig,
    /// User interface.
    pub ui: UiConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            host: HostConfig {
                sample_rate: 48_000.0,
                buffer_size: 256,
            },
            transport: TransportConfig {
                rolling: true,
                beats_per_minute: 120.0,
                beats_per_bar: 4.0,
                beat_type: 4.0,
                ticks_per_beat: 1920.0,
            },
            channel: ChannelConfig {
                capacity: 4096,
                shared_memory: false,
            },
            midi: MidiConfig::default(),
            ui: UiConfig {
                enabled: true,
                idle_interval_ms: 30,
            },
            logging: LoggingConfig {
                level: "info".into(),
            },
        }
    }
}

impl BridgeConfig {
    /// Configuration described by the embedded defaults alone.
    pub fn embedded() -> Result<Self, BridgeError> {
        Self::from_toml_str("")
    }

    /// Merge `user` over the embedded defaults.
    pub fn from_toml_str(user: &str) -> Result<Self, BridgeError> {
        let mut base: toml::Table = DEFAULT_CONFIG.parse()?;
        let overrides: toml::Table = user.parse()?;
        merge_tables(&mut base, overrides);
        let config: Self = toml::Value::Table(base).try_into()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the file named by [`CONFIG_ENV`], or the embedded defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, BridgeError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let Some(path) = path else {
            return Self::embedded();
        };
        let contents = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&contents)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Reject values the bridge cannot run with.
    pub fn validate(&self) -> Result<(), BridgeError> {
        let invalid = |message: String| Err(BridgeError::InvalidConfig(message));
        if self.channel.capacity < 3 {
            return invalid(format!(
                "channel.capacity must hold one 3-byte note, got {}",
                self.channel.capacity
            ));
        }
        if !(1..=8192).contains(&self.host.buffer_size) {
            return invalid(format!(
                "host.buffer_size must be within 1..=8192, got {}",
                self.host.buffer_size
            ));
        }
        if !(8_000.0..=384_000.0).contains(&self.host.sample_rate) {
            return invalid(format!(
                "host.sample_rate must be within 8000..=384000, got {}",
                self.host.sample_rate
            ));
        }
        if self.ui.idle_interval_ms == 0 {
            return invalid("ui.idle_interval_ms must be at least 1".into());
        }
        if self.transport.beats_per_minute <= 0.0 || self.transport.beats_per_bar <= 0.0 {
            return invalid("transport tempo and beats_per_bar must be positive".into());
        }
        self.logging.level()?;
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, BridgeError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Time between UI idle ticks.
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.ui.idle_interval_ms)
    }

    /// Clock host settings for a core with the given port counts.
    pub fn clock_host(&self, inputs: usize, outputs: usize) -> ClockHostConfig {
        ClockHostConfig {
            sample_rate: self.host.sample_rate,
            buffer_size: self.host.buffer_size,
            inputs,
            outputs,
            transport: SimulatedTransport {
                rolling: self.transport.rolling,
                beats_per_minute: self.transport.beats_per_minute,
                beats_per_bar: self.transport.beats_per_bar,
                beat_type: self.transport.beat_type,
                ticks_per_beat: self.transport.ticks_per_beat,
            },
        }
    }
}

fn merge_tables(base: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base)), toml::Value::Table(value)) => {
                merge_tables(base, value);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
