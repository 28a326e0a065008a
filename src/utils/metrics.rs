//! Observability and Metrics
//!
//! This module provides metrics collection and observability features
//! for monitoring connection health and wire traffic.
//!
//! Uses atomic counters for thread-safe metrics collection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Global metrics collector for connection operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections established
    pub connections_total: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Total frames read off the wire
    pub frames_read: AtomicU64,
    /// Total frames written to the wire
    pub frames_sent: AtomicU64,
    /// Total bytes read off the wire
    pub bytes_read: AtomicU64,
    /// Total bytes written to the wire
    pub bytes_sent: AtomicU64,
    /// Messages handed to the inbound sink
    pub messages_dispatched: AtomicU64,
    /// Frames dropped because no shape was registered for their id
    pub unknown_messages: AtomicU64,
    /// Field-level decode failures
    pub decode_errors: AtomicU64,
    /// Connections torn down by a transport or framing fault
    pub connection_faults: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            frames_read: AtomicU64::new(0),
            frames_sent: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            messages_dispatched: AtomicU64::new(0),
            unknown_messages: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            connection_faults: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a frame read off the wire
    pub fn frame_read(&self, byte_count: u64) {
        self.frames_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a frame queued and written
    pub fn frame_sent(&self, byte_count: u64) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record a message handed to the sink
    pub fn message_dispatched(&self) {
        self.messages_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped for lack of a registered shape
    pub fn unknown_message(&self) {
        self.unknown_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a field-level decode failure
    pub fn decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection torn down by a fault
    pub fn connection_fault(&self) {
        self.connection_faults.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            messages_dispatched: self.messages_dispatched.load(Ordering::Relaxed),
            unknown_messages: self.unknown_messages.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            connection_faults: self.connection_faults.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            frames_read = snapshot.frames_read,
            frames_sent = snapshot.frames_sent,
            bytes_read = snapshot.bytes_read,
            bytes_sent = snapshot.bytes_sent,
            messages_dispatched = snapshot.messages_dispatched,
            unknown_messages = snapshot.unknown_messages,
            decode_errors = snapshot.decode_errors,
            connection_faults = snapshot.connection_faults,
            uptime_seconds = snapshot.uptime_seconds,
            "Connection metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub frames_read: u64,
    pub frames_sent: u64,
    pub bytes_read: u64,
    pub bytes_sent: u64,
    pub messages_dispatched: u64,
    pub unknown_messages: u64,
    pub decode_errors: u64,
    pub connection_faults: u64,
    pub uptime_seconds: u64,
}

/// Global metrics instance (lazy static for simplicity)
static METRICS: once_cell::sync::Lazy<Metrics> = once_cell::sync::Lazy::new(Metrics::new);

/// Get the global metrics instance
pub fn global_metrics() -> &'static Metrics {
    &METRICS
}
