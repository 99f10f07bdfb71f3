pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;
pub mod utils;

use std::path::Path;

use capture::{FlashPolicy, FpsRange, PixelFormat, Size, StreamConfig};
use config::{ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

pub use capture::{Camera, CaptureState, Frame};
pub use error::{Error, ErrorKind, Result};
pub use pipeline::{ColorBucket, HistogramResult};

/// System configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub pipeline: PipelineConfig,
    pub session: SessionConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Target frame-rate range of the repeating preview request
    pub min_fps: u32,
    pub max_fps: u32,
    pub flash_policy: FlashPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of dominant colours reported per frame
    pub top_n: usize,
    /// In-flight frames between device and worker; only 1 is supported
    pub queue_depth: usize,
    /// How long the worker waits for a frame before re-checking for shutdown
    pub pop_timeout_ms: u64,
    /// Pin the worker thread to this core
    pub worker_core: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Bounded wait for the device permit when opening
    pub open_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Log one histogram out of this many
    pub log_every: u64,
    /// Seconds between automatic "take picture" intents in the demo binary, 0 disables
    pub capture_interval_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 320,
            height: 240,
            format: PixelFormat::Rgb24,
            min_fps: 5,
            max_fps: 8,
            flash_policy: FlashPolicy::Auto,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_n: 5,
            queue_depth: 1,
            pop_timeout_ms: 100,
            worker_core: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));
        if self.top_n == 0 {
            return invalid("pipeline.top_n must be at least 1");
        }
        if self.queue_depth != 1 {
            return invalid("pipeline.queue_depth is fixed at 1");
        }
        if self.pop_timeout_ms == 0 {
            return invalid("pipeline.pop_timeout_ms must be non-zero");
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: 2500,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            log_every: 8,
            capture_interval_secs: 5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            pipeline: PipelineConfig::default(),
            session: SessionConfig::default(),
            display: DisplayConfig::default(),
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `CHROMA__SECTION__KEY`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let mut builder = config::Config::builder().add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(Environment::with_prefix("CHROMA").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with an inline TOML document.
    pub fn from_toml_str(toml: &str) -> std::result::Result<Self, ConfigError> {
        let config: Config = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.pipeline.validate()?;
        let invalid = |msg: &str| Err(ConfigError::Message(msg.to_string()));
        if self.session.open_timeout_ms == 0 {
            return invalid("session.open_timeout_ms must be non-zero");
        }
        if self.capture.min_fps == 0 || self.capture.min_fps > self.capture.max_fps {
            return invalid("capture fps range must satisfy 1 <= min_fps <= max_fps");
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return invalid("capture size must be non-zero");
        }
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            format: self.capture.format,
            size: Size::new(self.capture.width, self.capture.height),
            fps: FpsRange {
                min: self.capture.min_fps,
                max: self.capture.max_fps,
            },
        }
    }
}
