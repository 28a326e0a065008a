//! # Protocol Layer
//!
//! The connection state machine, message-id resolution, and the
//! per-connection pipeline of read, dispatch, and write loops.
pub mod connection;
pub mod registry;
pub mod state;
pub mod unknown;
