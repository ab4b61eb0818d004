//! Error types for the icnd forwarder.

use thiserror::Error;

/// All possible errors that can occur within the icnd implementation.
#[derive(Error, Debug)]
pub enum Error {
    /// Error related to wire encoding/decoding.
    #[error("wire format error: {0}")]
    Wire(String),

    /// Error related to ICN packet processing.
    #[error("packet error: {0}")]
    Packet(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("other error: {0}")]
    Other(String),
}
