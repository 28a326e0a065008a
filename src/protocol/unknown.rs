//! Per-state accounting of unrecognized message ids.
//!
//! A mismatched or hostile peer can flood a connection with ids the
//! registry does not know. Each (state, id) pair is logged once and
//! counted thereafter, and the totals are flushed as a summary at
//! teardown, so log volume stays bounded without losing the signal.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::warn;

use crate::protocol::state::ConnectionState;

/// Id -> occurrence count, one table per connection state.
#[derive(Default)]
pub struct UnknownMessageTable {
    tables: [Mutex<HashMap<i32, u64>>; 4],
}

impl UnknownMessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence and return the new count. A return of 1 means
    /// this is the first sighting of the id in this state.
    pub fn record(&self, state: ConnectionState, id: i32) -> u64 {
        let mut table = match self.tables[state.index()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let count = table.entry(id).or_insert(0);
        *count += 1;
        *count
    }

    /// Current count for one (state, id) pair.
    pub fn count(&self, state: ConnectionState, id: i32) -> u64 {
        let table = match self.tables[state.index()].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.get(&id).copied().unwrap_or(0)
    }

    /// Log a summary of everything recorded, then clear the tables.
    pub fn flush_summary(&self) {
        for state in ConnectionState::ALL {
            let mut table = match self.tables[state.index()].lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for (id, count) in table.iter() {
                warn!(
                    state = %state,
                    id = %format_args!("0x{id:02x}"),
                    count,
                    "Unhandled message id"
                );
            }
            table.clear();
        }
    }
}
