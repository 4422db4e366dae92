//! Error types for the Tor control protocol library.

use std::io;
use thiserror::Error;

/// The main error type for all Tor control operations.
#[derive(Error, Debug)]
pub enum TorCtlError {
    /// I/O error while connecting or writing to the control stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Input that violates the wire grammar (short line, non-digit
    /// status, unterminated data block, stream cut mid-reply). Fatal
    /// for the reader; latched for the rest of the connection's life.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A well-formed reply with a non-2xx status. Local to one
    /// command; the connection remains usable.
    #[error("error reply (code {code}): {message}")]
    Server {
        /// The 3-digit status code Tor sent.
        code: u16,
        /// The human-readable message from that reply line.
        message: String,
    },

    /// The control stream ended or failed. Fatal for the reader;
    /// latched; all pending commands are failed with this.
    #[error("control connection closed")]
    TransportClosed,

    /// A pending command was abandoned by its caller or by engine
    /// shutdown before a reply arrived.
    #[error("command canceled")]
    Canceled,

    /// Rejected before any bytes were sent (unknown event name, empty
    /// port list, malformed key spec, command not valid in this
    /// connection state).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Authentication with Tor failed.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A well-formed reply whose payload could not be interpreted.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result type alias for Tor control operations.
pub type Result<T> = std::result::Result<T, TorCtlError>;
