//! # Error Types
//!
//! Comprehensive error handling for the protocol connection core.
//!
//! This module defines all error variants that can occur while driving a
//! connection, from low-level I/O errors to wire-format violations.
//!
//! ## Error Categories
//! - **I/O Errors**: socket read/write failures
//! - **Wire Errors**: malformed varints, corrupt or oversized frames
//! - **Compression Errors**: deflate/inflate failures, size limit violations
//! - **Encryption Errors**: invalid secrets, double initialization
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

/// ProtocolError is the primary error type for all connection operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A varint ran past its 5-byte limit or the input ended mid-value.
    #[error("Malformed varint")]
    MalformedVarint,

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Frame too large: {0} bytes")]
    OversizedFrame(usize),

    /// An outbound message carried no valid id.
    #[error("Invalid message id: {0}")]
    InvalidMessage(i32),

    /// A registered shape failed to decode a message body.
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    /// `init_encryption` was called on an already-encrypted connection.
    #[error("Encryption already initialized")]
    AlreadyEncrypted,

    /// The shared secret was not the expected 16 bytes.
    #[error("Invalid shared secret length: {0} bytes")]
    InvalidSecret(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
