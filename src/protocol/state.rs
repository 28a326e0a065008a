//! Connection protocol phases and message direction.
//!
//! Every inbound frame is resolved against the (direction, state, id)
//! triple. State transitions are driven by message handlers outside this
//! crate; the core only reads the current value.

use std::fmt;

/// The connection's current protocol phase.
///
/// Legal flow: `Handshake -> Status | Login`, `Login -> Play`. `Status`
/// closes after one exchange; `Play` is the normal operating state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Handshake,
    Status,
    Login,
    Play,
}

impl ConnectionState {
    /// All states, in protocol order. Useful for per-state tables.
    pub const ALL: [ConnectionState; 4] = [
        ConnectionState::Handshake,
        ConnectionState::Status,
        ConnectionState::Login,
        ConnectionState::Play,
    ];

    /// Stable index for per-state arenas.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            ConnectionState::Handshake => 0,
            ConnectionState::Status => 1,
            ConnectionState::Login => 2,
            ConnectionState::Play => 3,
        }
    }

    /// Get human-readable name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ConnectionState::Handshake => "Handshake",
            ConnectionState::Status => "Status",
            ConnectionState::Login => "Login",
            ConnectionState::Play => "Play",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which logical endpoint a message travels toward. Ids are only unique
/// within (direction, state).
///
/// A connection is constructed with the direction of the messages it
/// *receives*: a client passes [`Direction::Clientbound`], a server
/// [`Direction::Serverbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Messages traveling toward the server.
    Serverbound,
    /// Messages traveling toward the client.
    Clientbound,
}

impl Direction {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Direction::Serverbound => "Serverbound",
            Direction::Clientbound => "Clientbound",
        }
    }

    /// The opposite direction; what this endpoint sends.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Direction::Serverbound => Direction::Clientbound,
            Direction::Clientbound => Direction::Serverbound,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
