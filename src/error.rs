//! Error handling for the GPU mining core
//!
//! Covers device initialisation, template construction, wire encoding and the
//! surrounding configuration and I/O concerns.

use thiserror::Error;

/// Result type alias for mining operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the mining core
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The worker thread could not be bound to its device
    #[error("Failed to bind device {device_id}: {message}")]
    DeviceBind { device_id: usize, message: String },

    /// Execution stream creation or submission failed
    #[error("Stream error on device {device_id}: {message}")]
    Stream { device_id: usize, message: String },

    /// Host-pinned or device-resident allocation failed
    #[error("Failed to allocate {bytes} bytes on device {device_id}: {message}")]
    Allocation {
        device_id: usize,
        bytes: usize,
        message: String,
    },

    /// A worker could not be initialised; always fatal
    #[error("Worker {worker_id} on device {device_id} failed to initialise: {source}")]
    WorkerInit {
        worker_id: u32,
        device_id: usize,
        #[source]
        source: Box<Error>,
    },

    /// Job or template construction errors
    #[error("Invalid template: {message}")]
    Template { message: String },

    /// Target validation errors
    #[error("Invalid target: {message}")]
    Target { message: String },

    /// Wire format errors
    #[error("Codec error: {message}")]
    Codec { message: String },

    /// Block sink errors
    #[error("Block sink error: {message}")]
    Sink { message: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a device binding error
    pub fn device_bind(device_id: usize, message: impl Into<String>) -> Self {
        Self::DeviceBind {
            device_id,
            message: message.into(),
        }
    }

    /// Create a stream error
    pub fn stream(device_id: usize, message: impl Into<String>) -> Self {
        Self::Stream {
            device_id,
            message: message.into(),
        }
    }

    /// Create an allocation error
    pub fn allocation(device_id: usize, bytes: usize, message: impl Into<String>) -> Self {
        Self::Allocation {
            device_id,
            bytes,
            message: message.into(),
        }
    }

    /// Wrap an initialisation failure with the identity of the worker it happened on
    pub fn worker_init(worker_id: u32, device_id: usize, source: Error) -> Self {
        Self::WorkerInit {
            worker_id,
            device_id,
            source: Box::new(source),
        }
    }

    /// Create a template error
    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }

    /// Create a target error
    pub fn target(message: impl Into<String>) -> Self {
        Self::Target {
            message: message.into(),
        }
    }

    /// Create a codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Create a block sink error
    pub fn sink(message: impl Into<String>) -> Self {
        Self::Sink {
            message: message.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Whether the error leaves a worker unable to make progress.
    ///
    /// There is no degraded mode: callers terminate the process on these.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::DeviceBind { .. }
                | Error::Stream { .. }
                | Error::Allocation { .. }
                | Error::WorkerInit { .. }
        )
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Config { .. } => "config",
            Error::DeviceBind { .. } => "device_bind",
            Error::Stream { .. } => "stream",
            Error::Allocation { .. } => "allocation",
            Error::WorkerInit { .. } => "worker_init",
            Error::Template { .. } => "template",
            Error::Target { .. } => "target",
            Error::Codec { .. } => "codec",
            Error::Sink { .. } => "sink",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}
