//! # craft-protocol
//!
//! Connection core for a stateful, length-prefixed, optionally-compressed
//! and optionally-encrypted binary protocol, modeled on the Minecraft
//! Java wire format.
//!
//! Each [`Connection`] owns one bidirectional socket and runs three
//! independent loops - network read, message dispatch, network write -
//! connected by bounded hand-off queues. Inbound frames are resolved
//! against an external [`MessageRegistry`] keyed by (direction, state,
//! id); decoded messages are delivered to a caller-supplied sink. The
//! message catalogue itself lives outside this crate.
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use craft_protocol::config::ConnectionConfig;
//! use craft_protocol::protocol::connection::Connection;
//! use craft_protocol::protocol::registry::HandlerRegistry;
//! use craft_protocol::protocol::state::Direction;
//!
//! # async fn run() -> craft_protocol::error::Result<()> {
//! let registry = Arc::new(HandlerRegistry::new());
//! let conn = Connection::connect(
//!     "127.0.0.1:25565".parse().unwrap(),
//!     Direction::Clientbound,
//!     registry,
//!     ConnectionConfig::default(),
//! )
//! .await?;
//!
//! conn.set_message_sink(|message| println!("received {message:?}"));
//! conn.set_closed_sink(|notified| println!("closed, peer notified: {notified}"));
//! conn.initialize()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod utils;

pub use crate::config::ConnectionConfig;
pub use crate::core::frame::Frame;
pub use crate::error::{ProtocolError, Result};
pub use crate::protocol::connection::Connection;
pub use crate::protocol::registry::{HandlerRegistry, Message, MessageRegistry, MessageShape};
pub use crate::protocol::state::{ConnectionState, Direction};
