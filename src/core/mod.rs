//! # Core Wire Components
//!
//! Low-level varint, cursor, and frame handling.
//!
//! This module provides the foundation for the protocol: the
//! variable-length integer codec used for all lengths and ids, the
//! byte-stream cursor that carries the optional encryption transform, and
//! whole-frame read/write in both framing modes.
//!
//! ## Wire Format
//! ```text
//! Uncompressed: [VarInt total_len] [VarInt id] [body]
//! Compressed:   [VarInt outer_len] [VarInt uncompressed_len] [payload]
//! ```
//!
//! ## Security
//! - Maximum frame size: 2 MiB (prevents memory exhaustion)
//! - Claimed decompressed sizes validated before inflating
pub mod frame;
pub mod stream;
pub mod varint;
