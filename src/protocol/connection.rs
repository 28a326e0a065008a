//! The connection: one instance per socket, owning the read, dispatch,
//! and write loops.
//!
//! A connection is created bound to an already-connected socket in the
//! `Handshake` state. `initialize()` starts three independent tasks:
//!
//! 1. **Read loop** - decodes frames off the wire, resolves ids against
//!    the registry, and either dispatches inline (negotiation states) or
//!    queues the resolved shape and raw body for the dispatch loop
//!    (`Play`).
//! 2. **Dispatch loop** - runs the field-level decode and invokes the
//!    message sink. A bad message is logged and skipped; it never kills
//!    the connection.
//! 3. **Write loop** - drains fully framed buffers onto the wire.
//!
//! Negotiation steps (state transitions, compression, encryption) are
//! applied by the owning connection only, via the methods here. Shutdown
//! is guarded by a compare-and-swap so the teardown sequence runs at most
//! once no matter which loop, fault, or caller triggers it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use tokio::io::BufReader;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::core::frame::{self, Frame};
use crate::core::stream::{StreamCrypto, WireReader, WireWriter};
use crate::core::varint::varint_len;
use crate::error::{ProtocolError, Result};
use crate::protocol::registry::{Message, MessageRegistry, MessageShape};
use crate::protocol::state::{ConnectionState, Direction};
use crate::protocol::unknown::UnknownMessageTable;
use crate::utils::metrics::global_metrics;

/// Callback receiving each successfully decoded inbound message.
pub type MessageSink = dyn Fn(Box<dyn Message>) + Send + Sync;

/// Callback receiving the single closed notification. The flag is `true`
/// when teardown was a graceful, caller-initiated stop and `false` for a
/// detected or abrupt disconnect.
pub type ClosedSink = dyn Fn(bool) + Send + Sync;

#[derive(Default)]
struct Sinks {
    on_message: Option<Arc<MessageSink>>,
    on_closed: Option<Arc<ClosedSink>>,
}

/// A resolved-but-undecoded inbound frame queued for the dispatch loop.
struct QueuedInbound {
    shape: Arc<dyn MessageShape>,
    body: Bytes,
}

/// Socket halves and queue receivers held between `new` and `initialize`.
struct Startup {
    read_half: OwnedReadHalf,
    write_half: OwnedWriteHalf,
    write_rx: mpsc::Receiver<Vec<u8>>,
    handle_rx: mpsc::Receiver<QueuedInbound>,
}

/// One bidirectional protocol connection over a TCP socket.
pub struct Connection {
    peer_addr: SocketAddr,
    direction: Direction,
    config: ConnectionConfig,
    registry: Arc<dyn MessageRegistry>,

    state: RwLock<ConnectionState>,
    compression_enabled: AtomicBool,
    compression_threshold: AtomicI32,
    crypto: Arc<StreamCrypto>,

    connected: AtomicBool,
    /// Cleared by the read or write loop when the transport faults, before
    /// shutdown is triggered. Stands in for a socket liveness probe when
    /// `stop()` decides whether the peer was notified.
    stream_healthy: AtomicBool,
    shutting_down: AtomicBool,
    log_faults: AtomicBool,
    cancel: CancellationToken,

    write_tx: mpsc::Sender<Vec<u8>>,
    handle_tx: mpsc::Sender<QueuedInbound>,
    unknown: UnknownMessageTable,
    sinks: RwLock<Sinks>,
    startup: Mutex<Option<Startup>>,
}

impl Connection {
    /// Bind a connection to an already-connected socket. The connection
    /// starts in `Handshake` and does nothing until `initialize()`.
    ///
    /// `direction` is the direction of the messages this endpoint
    /// *receives*: clients pass [`Direction::Clientbound`], servers
    /// [`Direction::Serverbound`].
    pub fn new(
        stream: TcpStream,
        direction: Direction,
        registry: Arc<dyn MessageRegistry>,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (write_tx, write_rx) = mpsc::channel(config.write_queue_capacity);
        let (handle_tx, handle_rx) = mpsc::channel(config.handle_queue_capacity);

        let log_faults = config.log_faults;
        let connection = Arc::new(Self {
            peer_addr,
            direction,
            config,
            registry,
            state: RwLock::new(ConnectionState::Handshake),
            compression_enabled: AtomicBool::new(false),
            compression_threshold: AtomicI32::new(0),
            crypto: Arc::new(StreamCrypto::new()),
            connected: AtomicBool::new(true),
            stream_healthy: AtomicBool::new(true),
            shutting_down: AtomicBool::new(false),
            log_faults: AtomicBool::new(log_faults),
            cancel: CancellationToken::new(),
            write_tx,
            handle_tx,
            unknown: UnknownMessageTable::new(),
            sinks: RwLock::new(Sinks::default()),
            startup: Mutex::new(Some(Startup {
                read_half,
                write_half,
                write_rx,
                handle_rx,
            })),
        });

        global_metrics().connection_established();
        Ok(connection)
    }

    /// Connect to a remote endpoint and bind a connection to the socket.
    pub async fn connect(
        addr: SocketAddr,
        direction: Direction,
        registry: Arc<dyn MessageRegistry>,
        config: ConnectionConfig,
    ) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).await?;
        Self::new(stream, direction, registry, config)
    }

    /// Register the inbound-message sink. Must be set before `initialize()`
    /// for messages to be observed.
    pub fn set_message_sink<F>(&self, sink: F)
    where
        F: Fn(Box<dyn Message>) + Send + Sync + 'static,
    {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.on_message = Some(Arc::new(sink));
        }
    }

    /// Register the connection-closed sink, invoked exactly once.
    pub fn set_closed_sink<F>(&self, sink: F)
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        if let Ok(mut sinks) = self.sinks.write() {
            sinks.on_closed = Some(Arc::new(sink));
        }
    }

    /// Start the read, dispatch, and write loops. Must be called from
    /// within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails if the connection was already initialized.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        let startup = self
            .startup
            .lock()
            .map_err(|_| ProtocolError::Custom("startup lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| ProtocolError::Custom("connection already initialized".to_string()))?;

        let reader = WireReader::new(BufReader::new(startup.read_half), self.crypto.clone());
        let writer = WireWriter::new(startup.write_half, self.crypto.clone());

        let conn = Arc::clone(self);
        tokio::spawn(async move { conn.read_loop(reader).await });

        let conn = Arc::clone(self);
        let handle_rx = startup.handle_rx;
        tokio::spawn(async move { conn.dispatch_loop(handle_rx).await });

        let conn = Arc::clone(self);
        let write_rx = startup.write_rx;
        tokio::spawn(async move { conn.write_loop(writer, write_rx).await });

        debug!(peer = %self.peer_addr, direction = %self.direction, "Connection initialized");
        Ok(())
    }

    // ---- observable state ----

    /// Current protocol state.
    pub fn state(&self) -> ConnectionState {
        self.state
            .read()
            .map(|s| *s)
            .unwrap_or(ConnectionState::Handshake)
    }

    /// Apply a state transition. Called by message handlers driving the
    /// protocol negotiation; the core never validates transition legality.
    pub fn set_state(&self, state: ConnectionState) {
        if let Ok(mut current) = self.state.write() {
            debug!(peer = %self.peer_addr, from = %*current, to = %state, "State transition");
            *current = state;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Remote endpoint identity.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Direction of this endpoint's inbound messages.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Occurrences of an unrecognized id observed in a state.
    pub fn unknown_message_count(&self, state: ConnectionState, id: i32) -> u64 {
        self.unknown.count(state, id)
    }

    /// Turn off fault logging, for callers driving expected disconnects.
    pub fn suppress_fault_logging(&self) {
        self.log_faults.store(false, Ordering::Release);
    }

    // ---- negotiation steps ----

    /// Enable or disable compressed framing for both directions from this
    /// point forward. `threshold` is the body size at or above which
    /// outbound frames are compressed.
    pub fn set_compression(&self, enabled: bool, threshold: i32) {
        self.compression_threshold.store(threshold, Ordering::Release);
        self.compression_enabled.store(enabled, Ordering::Release);
        debug!(peer = %self.peer_addr, enabled, threshold, "Compression updated");
    }

    /// Install the shared secret, switching the socket into encrypted mode
    /// from the next byte in each direction. One-shot and irreversible: a
    /// second call fails with [`ProtocolError::AlreadyEncrypted`].
    pub fn init_encryption(&self, shared_secret: &[u8]) -> Result<()> {
        self.crypto.arm(shared_secret)?;
        debug!(peer = %self.peer_addr, "Encryption initialized");
        Ok(())
    }

    /// Whether encryption has been initialized.
    pub fn encryption_initiated(&self) -> bool {
        self.crypto.is_armed()
    }

    /// Whether compressed framing is active.
    pub fn compression_enabled(&self) -> bool {
        self.compression_enabled.load(Ordering::Acquire)
    }

    // ---- outbound ----

    /// Encode, frame, and enqueue a message for the write loop.
    ///
    /// Sends are asynchronous: queue overflow and send-side socket faults
    /// are logged and absorbed, never surfaced here.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::InvalidMessage`] if the message carries no valid
    /// id; encode errors from the message itself are passed through.
    pub fn send(&self, message: &dyn Message) -> Result<()> {
        let id = message.id();
        if id < 0 {
            return Err(ProtocolError::InvalidMessage(id));
        }

        let mut body = Vec::new();
        message.encode(&mut body)?;

        let compression = if self.compression_enabled.load(Ordering::Acquire) {
            Some(self.compression_threshold.load(Ordering::Acquire))
        } else {
            None
        };
        let framed = frame::encode_frame(id, &body, compression)?;

        if message.should_log() {
            info!(
                peer = %self.peer_addr,
                id = %format_args!("0x{id:02x}"),
                compressed = compression.is_some(),
                encrypted = self.crypto.is_armed(),
                "Sending message"
            );
        }

        match self.write_tx.try_send(framed) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    peer = %self.peer_addr,
                    id = %format_args!("0x{id:02x}"),
                    "Outbound queue full, dropping frame"
                );
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer = %self.peer_addr, "Send after close discarded");
                Ok(())
            }
        }
    }

    // ---- lifecycle ----

    /// Initiate shutdown. Idempotent; safe to call from any task or
    /// thread, any number of times.
    pub fn stop(&self) {
        if self.shutting_down.load(Ordering::Acquire) {
            return;
        }
        // Peer is considered notified if the stream was still healthy when
        // the caller asked to stop.
        self.disconnected(self.stream_healthy.load(Ordering::Acquire));
    }

    /// One-shot teardown: first caller wins, everyone else returns.
    fn disconnected(&self, notified: bool) {
        if self
            .shutting_down
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.cancel.cancel();
        self.connected.store(false, Ordering::Release);
        global_metrics().connection_closed();

        let sink = self.sinks.read().ok().and_then(|s| s.on_closed.clone());
        if let Some(sink) = sink {
            sink(notified);
        }

        info!(peer = %self.peer_addr, notified, "Connection closed");
        self.unknown.flush_summary();
    }

    // ---- loops ----

    async fn read_loop(self: Arc<Self>, mut reader: WireReader<BufReader<OwnedReadHalf>>) {
        let mut last_id: i32 = 0;

        let fault = loop {
            if self.cancel.is_cancelled() {
                break None;
            }

            let compression = self.compression_enabled.load(Ordering::Acquire);
            let result = tokio::select! {
                () = self.cancel.cancelled() => break None,
                r = frame::read_frame(&mut reader, compression, self.config.max_frame_len) => r,
            };

            let frame = match result {
                Ok(frame) => frame,
                Err(error) => break Some(error),
            };

            global_metrics().frame_read((varint_len(frame.id) + frame.body.len()) as u64);
            last_id = frame.id;

            // Fresh read per frame: a transition applied by the previous
            // handler must gate this frame's resolution.
            let state = self.state();
            match self.registry.resolve(self.direction, state, frame.id) {
                None => self.record_unknown(state, &frame),
                Some(shape) => {
                    if state == ConnectionState::Play {
                        let queued = QueuedInbound {
                            shape,
                            body: frame.body,
                        };
                        tokio::select! {
                            () = self.cancel.cancelled() => break None,
                            sent = self.handle_tx.send(queued) => {
                                if sent.is_err() {
                                    break None;
                                }
                            }
                        }
                    } else {
                        // Negotiation exchanges are low-volume and
                        // latency-sensitive; decode and handle inline.
                        match shape.decode(&frame.body) {
                            Ok(message) => self.dispatch(message),
                            Err(error) => break Some(error),
                        }
                    }
                }
            }
        };

        if let Some(error) = fault {
            self.stream_healthy.store(false, Ordering::Release);
            if is_clean_disconnect(&error) {
                debug!(peer = %self.peer_addr, "Peer disconnected");
            } else {
                global_metrics().connection_fault();
                if self.log_faults.load(Ordering::Acquire) {
                    warn!(
                        peer = %self.peer_addr,
                        state = %self.state(),
                        last_id = %format_args!("0x{last_id:02x}"),
                        error = %error,
                        "Failed to process network stream"
                    );
                }
            }
        }

        self.disconnected(false);
    }

    fn record_unknown(&self, state: ConnectionState, frame: &Frame) {
        global_metrics().unknown_message();
        if self.unknown.record(state, frame.id) == 1 {
            debug!(
                peer = %self.peer_addr,
                state = %state,
                id = %format_args!("0x{:02x}", frame.id),
                "Unhandled message id"
            );
        }
    }

    fn dispatch(&self, message: Box<dyn Message>) {
        global_metrics().message_dispatched();
        let sink = self.sinks.read().ok().and_then(|s| s.on_message.clone());
        match sink {
            Some(sink) => sink(message),
            None => debug!(peer = %self.peer_addr, "Message dropped, no sink registered"),
        }
    }

    async fn dispatch_loop(self: Arc<Self>, mut handle_rx: mpsc::Receiver<QueuedInbound>) {
        loop {
            let queued = tokio::select! {
                () = self.cancel.cancelled() => break,
                item = handle_rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            match queued.shape.decode(&queued.body) {
                Ok(message) => self.dispatch(message),
                Err(error) => {
                    // One bad message must not kill the connection.
                    global_metrics().decode_error();
                    warn!(peer = %self.peer_addr, error = %error, "Exception when handling message");
                }
            }
        }
    }

    async fn write_loop(
        self: Arc<Self>,
        mut writer: WireWriter<OwnedWriteHalf>,
        mut write_rx: mpsc::Receiver<Vec<u8>>,
    ) {
        loop {
            let buffer = tokio::select! {
                () = self.cancel.cancelled() => break,
                item = write_rx.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if let Err(error) = writer.write_all(&buffer).await {
                self.stream_healthy.store(false, Ordering::Release);
                if !is_clean_disconnect(&error) {
                    global_metrics().connection_fault();
                    if self.log_faults.load(Ordering::Acquire) {
                        warn!(peer = %self.peer_addr, error = %error, "Failed to send data");
                    }
                }
                self.disconnected(false);
                break;
            }

            global_metrics().frame_sent(buffer.len() as u64);
        }

        // Flush a FIN on the clean path; the socket closes when the halves
        // drop.
        let _ = writer.shutdown().await;
    }
}

/// Transport conditions that mean "peer went away", not "something broke".
fn is_clean_disconnect(error: &ProtocolError) -> bool {
    match error {
        ProtocolError::Io(e) => matches!(
            e.kind(),
            std::io::ErrorKind::UnexpectedEof
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::NotConnected
        ),
        _ => false,
    }
}
