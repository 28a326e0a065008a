//! Message traits and the id-resolution registry.
//!
//! The connection core has no knowledge of the message catalogue. It
//! consumes a [`MessageRegistry`] that resolves a (direction, state, id)
//! triple to a decodable [`MessageShape`], and hands decoded messages to a
//! sink. [`HandlerRegistry`] is the standard registry implementation,
//! keyed routing over a locked map.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::error::{ProtocolError, Result};
use crate::protocol::state::{ConnectionState, Direction};

/// A decoded (or to-be-encoded) protocol message.
pub trait Message: Send + Sync + fmt::Debug {
    /// Numeric wire id. A negative id marks a message that cannot be sent.
    fn id(&self) -> i32;

    /// Encode the message body (everything after the id varint) into `buf`.
    fn encode(&self, buf: &mut Vec<u8>) -> Result<()>;

    /// Whether sends of this message should be logged individually.
    fn should_log(&self) -> bool {
        false
    }
}

/// The decodable shape registered for one (direction, state, id) triple.
pub trait MessageShape: Send + Sync {
    /// Field-level decode of a message body.
    fn decode(&self, body: &[u8]) -> Result<Box<dyn Message>>;
}

/// Plain closures work as shapes.
impl<F> MessageShape for F
where
    F: Fn(&[u8]) -> Result<Box<dyn Message>> + Send + Sync,
{
    fn decode(&self, body: &[u8]) -> Result<Box<dyn Message>> {
        self(body)
    }
}

/// Resolves numeric ids against the current direction and state.
pub trait MessageRegistry: Send + Sync {
    fn resolve(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
    ) -> Option<Arc<dyn MessageShape>>;
}

type ShapeKey = (Direction, ConnectionState, i32);

/// Registry with locked keyed routing: shapes are registered up front and
/// looked up on every inbound frame.
pub struct HandlerRegistry {
    shapes: Arc<RwLock<HashMap<ShapeKey, Arc<dyn MessageShape>>>>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            shapes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a shape for one (direction, state, id) triple, replacing
    /// any previous registration.
    pub fn register<S>(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
        shape: S,
    ) -> Result<()>
    where
        S: MessageShape + 'static,
    {
        let mut shapes = self.shapes.write().map_err(|_| {
            ProtocolError::Custom("Failed to acquire write lock on registry".to_string())
        })?;

        shapes.insert((direction, state, id), Arc::new(shape));
        Ok(())
    }
}

impl MessageRegistry for HandlerRegistry {
    fn resolve(
        &self,
        direction: Direction,
        state: ConnectionState,
        id: i32,
    ) -> Option<Arc<dyn MessageShape>> {
        let shapes = self.shapes.read().ok()?;
        shapes.get(&(direction, state, id)).cloned()
    }
}
