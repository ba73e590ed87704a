//! Bridge configuration using Figment
//!
//! Configuration is layered, lowest priority first:
//! 1. Built-in defaults (the rig's wiring and camera constants)
//! 2. A TOML file (`config/bridge.toml` unless another path is given)
//! 3. Environment variables prefixed with `BEAN_BRIDGE_`, using `__` between
//!    section and key, e.g. `BEAN_BRIDGE_SERIAL__PORT=/dev/ttyACM0`
//!
//! # Example
//! ```no_run
//! use bean_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::load()?;
//! println!("Serial port: {}", config.serial.port);
//! # Ok::<(), bean_bridge::error::BridgeError>(())
//! ```

use crate::camera::{CameraTiming, CaptureMode, PixelLayout};
use crate::error::{BridgeError, BridgeResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/bridge.toml";

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "BEAN_BRIDGE_";

/// Top-level bridge configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Serial link to the motion controller
    pub serial: SerialConfig,
    /// Camera device and timing
    pub camera: CameraConfig,
    /// Image persistence
    pub storage: StorageConfig,
    /// Classifier selection
    pub classifier: ClassifierConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
    /// Include source file and line in log events
    pub log_file_line: bool,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Bean Bridge".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            log_file_line: false,
        }
    }
}

/// Serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Read timeout in milliseconds; also the shutdown polling interval
    pub read_timeout_ms: u64,
    /// Wait after opening the port; the controller resets when the port opens
    pub open_settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            read_timeout_ms: 200,
            open_settle_ms: 2000,
        }
    }
}

impl SerialConfig {
    /// Read timeout as a `Duration`
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    /// Open settle interval as a `Duration`
    pub fn open_settle(&self) -> Duration {
        Duration::from_millis(self.open_settle_ms)
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Backend name: "mock", or "v4l2" (needs the `v4l2` cargo feature)
    pub backend: String,
    /// Device path for hardware backends
    pub device: String,
    /// Capture width in pixels
    pub width: u32,
    /// Capture height in pixels
    pub height: u32,
    /// Native pixel layout requested from the device
    pub pixel_layout: PixelLayout,
    /// Whether to trigger autofocus before every capture
    pub autofocus: bool,
    /// Wait after triggering autofocus
    pub autofocus_settle_ms: u64,
    /// Wait between closing a faulted session and reopening it
    pub restart_settle_ms: u64,
    /// Wait after opening a session before it is used
    pub start_settle_ms: u64,
    /// Frames discarded after stream start (hardware backends)
    pub warmup_frames: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: "v4l2".to_string(),
            device: "/dev/video0".to_string(),
            width: 2304,
            height: 1296,
            pixel_layout: PixelLayout::Bgr8,
            autofocus: true,
            autofocus_settle_ms: 250,
            restart_settle_ms: 300,
            start_settle_ms: 300,
            warmup_frames: 2,
        }
    }
}

impl CameraConfig {
    /// Fixed capture mode requested on every session open
    pub fn capture_mode(&self) -> CaptureMode {
        CaptureMode {
            width: self.width,
            height: self.height,
            layout: self.pixel_layout,
        }
    }

    /// Settle intervals around device operations
    pub fn timing(&self) -> CameraTiming {
        CameraTiming {
            autofocus_settle: Duration::from_millis(self.autofocus_settle_ms),
            restart_settle: Duration::from_millis(self.restart_settle_ms),
            start_settle: Duration::from_millis(self.start_settle_ms),
        }
    }
}

/// Image storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory receiving captured images
    pub base_dir: PathBuf,
    /// Encoded file format: "jpeg" or "png"
    pub format: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Documents")
            .join("bean_images");
        Self {
            base_dir,
            format: "jpeg".to_string(),
        }
    }
}

/// Classifier configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Classifier kind: "alternating" or "fixed"
    pub kind: String,
    /// Label emitted when capture or classification fails
    pub fail_safe_label: u8,
    /// Label returned by the "fixed" classifier
    pub fixed_label: u8,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            kind: "alternating".to_string(),
            fail_safe_label: 1,
            fixed_label: 0,
        }
    }
}

impl BridgeConfig {
    /// Load configuration from `config/bridge.toml` and environment variables
    pub fn load() -> BridgeResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let config: Self = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// The layered figment used by [`BridgeConfig::load_from`]
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(BridgeConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> BridgeResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        if self.serial.port.trim().is_empty() {
            return Err(BridgeError::Configuration(
                "serial.port must not be empty".to_string(),
            ));
        }

        if self.serial.baud_rate == 0 {
            return Err(BridgeError::Configuration(
                "serial.baud_rate must be positive".to_string(),
            ));
        }

        if self.serial.read_timeout_ms == 0 {
            return Err(BridgeError::Configuration(
                "serial.read_timeout_ms must be positive".to_string(),
            ));
        }

        let valid_backends = ["mock", "v4l2"];
        if !valid_backends.contains(&self.camera.backend.as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid camera backend '{}'. Must be one of: {}",
                self.camera.backend,
                valid_backends.join(", ")
            )));
        }

        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(BridgeError::Configuration(format!(
                "Invalid capture resolution {}x{}",
                self.camera.width, self.camera.height
            )));
        }

        let valid_formats = ["jpeg", "png"];
        if !valid_formats.contains(&self.storage.format.as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid storage format '{}'. Must be one of: {}",
                self.storage.format,
                valid_formats.join(", ")
            )));
        }

        let valid_kinds = ["alternating", "fixed"];
        if !valid_kinds.contains(&self.classifier.kind.as_str()) {
            return Err(BridgeError::Configuration(format!(
                "Invalid classifier kind '{}'. Must be one of: {}",
                self.classifier.kind,
                valid_kinds.join(", ")
            )));
        }

        if self.classifier.fail_safe_label > 9 || self.classifier.fixed_label > 9 {
            return Err(BridgeError::Configuration(
                "classifier labels must be single digits (0-9)".to_string(),
            ));
        }

        Ok(())
    }
}
