use thiserror::Error;

/// Result type for AVR operations
pub type Result<T> = std::result::Result<T, AvrError>;

/// Errors that can occur when talking to the receiver
#[derive(Error, Debug)]
pub enum AvrError {
    /// None of the candidate ports accepted a connection
    #[error("Could not connect to {host} on any of ports {ports:?}")]
    Connection {
        /// Host that was tried
        host: String,
        /// Ports that were tried, in order
        ports: Vec<u16>,
    },

    /// The socket reported a pending error (`SO_ERROR`)
    #[error("Socket error {code}: {message}")]
    Socket {
        /// OS error code, `-1` when the platform did not report one
        code: i32,
        /// OS error message
        message: String,
    },

    /// A status line did not match the expected field layout
    #[error("Malformed {prefix} line {line:?}: {reason}")]
    Decode {
        /// Prefix the line was classified under
        prefix: &'static str,
        /// The offending line
        line: String,
        /// What was wrong with it
        reason: String,
    },

    /// The channel id is not part of the receiver's input table
    #[error("Unknown input channel: {0}")]
    UnknownInput(u8),

    /// Connection was closed (by the peer or by `close`)
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl AvrError {
    /// Build a [`AvrError::Socket`] from an OS-level error.
    pub(crate) fn socket(err: &std::io::Error) -> Self {
        AvrError::Socket {
            code: err.raw_os_error().unwrap_or(-1),
            message: err.to_string(),
        }
    }

    pub(crate) fn decode(prefix: &'static str, line: &str, reason: impl Into<String>) -> Self {
        AvrError::Decode {
            prefix,
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}
