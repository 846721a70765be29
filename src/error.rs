//! Error types for relaycast.
//!
//! Errors are split into two categories:
//! - **Fatal errors** ([`StartupError`]): prevent the server from starting
//! - **Recoverable errors** ([`BrocaError`]): delivery failures handled by
//!   the broca's own retry/reconnect loop, never fatal to the pipeline

use std::path::PathBuf;

/// Fatal errors raised while loading configuration or wiring the server.
///
/// Any of these aborts startup with a non-zero exit. Runtime trouble
/// (stalled sinks, overruns, transient network failures) never surfaces
/// here; it is logged and absorbed by the stage that saw it.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The configuration file could not be read.
    #[error("cannot open configuration file {}: {source}", path.display())]
    ConfigRead {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or has the wrong shape.
    #[error("configuration parse error: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A configuration value failed validation.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What was wrong with it.
        reason: String,
    },

    /// No outputs were configured.
    #[error("no outputs configured - add at least one output")]
    NoOutputs,

    /// An output references an encoder name that is not registered.
    #[error("unknown encoder '{name}'")]
    UnknownEncoder {
        /// The name that was not found.
        name: String,
    },

    /// An output references a broca name that is not registered.
    #[error("unknown broca '{name}'")]
    UnknownBroca {
        /// The name that was not found.
        name: String,
    },

    /// A command entry references a decoder name that is not registered.
    #[error("unknown decoder '{name}'")]
    UnknownDecoder {
        /// The name that was not found.
        name: String,
    },

    /// The shell or a publish entry references an unknown queue transport.
    #[error("unknown queue '{name}'")]
    UnknownQueue {
        /// The name that was not found.
        name: String,
    },

    /// The resampler type is not registered.
    #[error("unknown resampler '{name}'")]
    UnknownResampler {
        /// The name that was not found.
        name: String,
    },

    /// A file a plugin needs could not be opened.
    #[error("cannot open {}: {source}", path.display())]
    FileOpen {
        /// Path that was attempted.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

impl StartupError {
    /// Creates an invalid-configuration error with the given reason.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }
}

/// Errors that can occur while a broca delivers packets to its sink.
///
/// These are recoverable from the pipeline's point of view: the broca
/// retries, reconnects, or exits its own loop, and everything upstream
/// keeps running.
#[derive(Debug, thiserror::Error)]
pub enum BrocaError {
    /// A write to the destination failed.
    #[error("write failed: {reason}")]
    WriteFailed {
        /// Description of what went wrong.
        reason: String,
    },

    /// File I/O error.
    #[error("file error: {}: {source}", path.display())]
    File {
        /// Path to the file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Connecting to the remote server failed.
    #[error("connect to {endpoint} failed: {reason}")]
    Connect {
        /// host:port that was attempted.
        endpoint: String,
        /// Why the connection failed.
        reason: String,
    },

    /// The server rejected the source handshake.
    #[error("source handshake rejected: {status}")]
    HandshakeRejected {
        /// Status line the server returned.
        status: String,
    },
}

impl BrocaError {
    /// Creates a write-failed error with the given reason.
    pub fn write_failed(reason: impl Into<String>) -> Self {
        Self::WriteFailed {
            reason: reason.into(),
        }
    }

    /// Creates a file error for the given path.
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::File {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_error_display() {
        let err = StartupError::UnknownEncoder {
            name: "flac".to_string(),
        };
        assert_eq!(err.to_string(), "unknown encoder 'flac'");
    }

    #[test]
    fn test_invalid_config_helper() {
        let err = StartupError::invalid_config("duration cannot be negative");
        assert_eq!(
            err.to_string(),
            "invalid configuration: duration cannot be negative"
        );
    }

    #[test]
    fn test_broca_error_display() {
        let err = BrocaError::write_failed("connection reset");
        assert_eq!(err.to_string(), "write failed: connection reset");
    }

    #[test]
    fn test_broca_file_error_carries_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = BrocaError::file("/tmp/out.mp3", io);
        assert!(err.to_string().contains("/tmp/out.mp3"));
    }
}
