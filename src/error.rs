//! Custom error types for the bridge.
//!
//! This module defines the primary error type, `BridgeError`, together with the two
//! narrower error types that flow through the capture pipeline:
//!
//! - **`BridgeError`**: process-level failures. Configuration loading and validation,
//!   opening the serial port or the camera at startup, and transport failures that
//!   end the main loop.
//! - **`CaptureFault`**: a single capture attempt failed. These are recovered in-process
//!   by restarting the camera session and are answered with the fail-safe label; they
//!   never stop the bridge.
//! - **`ProtocolError`**: a `CAP` line that could not be parsed. Logged and dropped.
//!
//! By using `#[from]`, `BridgeError` can be created from the underlying library errors,
//! which keeps startup code terse with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the bridge error type.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

/// Process-level error for the bridge node.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration file or environment could not be parsed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds invalid values.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The serial port could not be opened at startup.
    #[error("Failed to open serial port '{port}': {source}")]
    SerialOpen {
        /// Port path that failed to open.
        port: String,
        /// Underlying serial error.
        #[source]
        source: tokio_serial::Error,
    },

    /// The camera could not be opened at startup.
    #[error("Failed to start camera: {0}")]
    CameraStart(String),

    /// The image storage directory is unusable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// The serial link reached end-of-stream or was closed locally.
    #[error("Serial transport closed")]
    TransportClosed,

    /// The serial link failed mid-operation.
    #[error("Serial transport error: {0}")]
    Transport(String),
}

impl From<figment::Error> for BridgeError {
    fn from(value: figment::Error) -> Self {
        BridgeError::Config(Box::new(value))
    }
}

/// Failure of one capture attempt.
///
/// Each variant names the pipeline stage that failed. Every fault triggers exactly
/// one camera restart before it reaches the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureFault {
    /// No camera session was open when the capture started.
    #[error("no open camera session")]
    NoSession,

    /// Autofocus trigger was rejected by the device.
    #[error("autofocus failed: {0}")]
    Autofocus(String),

    /// Reading a frame from the device failed.
    #[error("frame read failed: {0}")]
    Read(String),

    /// The frame could not be converted to the encoder's channel order.
    #[error("frame conversion failed: {0}")]
    Frame(String),

    /// Encoding or writing the image file failed.
    #[error("persisting image failed: {0}")]
    Persist(String),
}

/// A `CAP` line that is syntactically invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// `CAP` must be followed by exactly two fields.
    #[error("expected 3 tokens, got {0}")]
    FieldCount(usize),

    /// A field is not a non-negative integer in range.
    #[error("invalid {field} '{value}'")]
    InvalidField {
        /// Field name (`bean_id` or `position`).
        field: &'static str,
        /// Raw token that failed to parse.
        value: String,
    },
}

impl BridgeError {
    /// Whether the error is fatal at startup (the process must not enter the main loop).
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            BridgeError::SerialOpen { .. }
                | BridgeError::CameraStart(_)
                | BridgeError::Storage(_)
                | BridgeError::Config(_)
                | BridgeError::Configuration(_)
        )
    }
}
