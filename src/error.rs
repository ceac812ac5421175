//! Error types for Pipeworks
//!
//! Failures inside worker threads never reach this type: copy failures end
//! the pump silently and reader faults are returned by the next read. What
//! remains are construction, configuration and platform binding errors.

use thiserror::Error;

/// Main error type for Pipeworks operations
#[derive(Error, Debug)]
pub enum PipeError {
    /// I/O error outside a worker thread
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A worker thread could not be started
    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        /// Name the thread was given
        name: String,
        /// Error from the thread builder
        #[source]
        source: std::io::Error,
    },

    /// Scratch buffers must hold at least one byte
    #[error("Invalid buffer size: {0}")]
    InvalidBufferSize(usize),

    /// Handler registration was refused by the platform
    #[cfg(unix)]
    #[error("Unable to register for SIG{signal}")]
    SignalRegistration {
        /// Signal name without the `SIG` prefix
        signal: String,
        /// Error from `sigaction`
        #[source]
        source: nix::Error,
    },

    /// The signal name does not map to a known signal
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// Terminal attributes could not be read or changed
    #[cfg(unix)]
    #[error("Unable to toggle terminal echo: {0}")]
    EchoToggle(#[source] nix::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipeError {
    /// Create a spawn error for the named thread
    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            name: name.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Name of the signal this error refers to, if any
    pub fn signal_name(&self) -> Option<&str> {
        match self {
            #[cfg(unix)]
            Self::SignalRegistration { signal, .. } => Some(signal),
            Self::UnknownSignal(name) => Some(name),
            _ => None,
        }
    }
}

/// Result type alias for Pipeworks operations
pub type Result<T> = std::result::Result<T, PipeError>;

impl From<serde_json::Error> for PipeError {
    fn from(err: serde_json::Error) -> Self {
        PipeError::Config(err.to_string())
    }
}
