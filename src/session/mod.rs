//! Per-connection runtime state

#[cfg(test)]
mod session_test;

mod heartbeat;
mod signal;

pub use heartbeat::{Beat, Heartbeat};
pub use signal::{DataSignal, ResponseSlot};

use bytes::BytesMut;
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Instant;

use crate::buffer::{shared_buffer, SharedBuffer};
use crate::codec::MessageLoader;
use crate::context::{ContextId, SocketContext};
use crate::error::{Error, Result};
use crate::event::{EventProcess, EventTrigger};
use crate::executor::{in_io_loop, WorkerPool};
use crate::handler::Message;
use crate::tls::TlsParser;
use crate::transport::{TransportContext, TransportWrite};

/// Identifies a live [Session]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Attribute = Box<dyn Any + Send + Sync>;

/// One live connection.
///
/// A session owns its read buffer, its TLS parser and its message loader. It
/// refers to its context by [ContextId] plus a shared handle on the immutable
/// [SocketContext]; the registry of sessions lives with the server, never in
/// the context.
pub struct Session {
    id: SessionId,
    this: Weak<Session>,
    context_id: ContextId,
    context: Arc<SocketContext>,
    transport: Arc<dyn TransportWrite>,
    outbound: Mutex<()>,
    attributes: Mutex<HashMap<String, Attribute>>,
    read_buffer: SharedBuffer,
    signal: DataSignal,
    tls_parser: OnceLock<TlsParser>,
    heartbeat: OnceLock<Heartbeat>,
    loader: Mutex<MessageLoader>,
    responses: ResponseSlot,
    trigger: EventTrigger,
    connected: AtomicBool,
    prepared: AtomicBool,
    eof: AtomicBool,
    closing: AtomicBool,
}

impl Session {
    /// Creates a connected session writing through `transport`
    pub fn new(
        context: Arc<SocketContext>,
        transport: Arc<dyn TransportWrite>,
        pool: Arc<WorkerPool>,
    ) -> Arc<Session> {
        let buffer_size = context.buffer_size();
        Arc::new_cyclic(|this| Session {
            id: SessionId::next(),
            this: this.clone(),
            context_id: context.id(),
            context,
            transport,
            outbound: Mutex::new(()),
            attributes: Mutex::new(HashMap::new()),
            read_buffer: shared_buffer(buffer_size),
            signal: DataSignal::new(),
            tls_parser: OnceLock::new(),
            heartbeat: OnceLock::new(),
            loader: Mutex::new(MessageLoader::new()),
            responses: ResponseSlot::new(),
            trigger: EventTrigger::new(pool),
            connected: AtomicBool::new(true),
            prepared: AtomicBool::new(false),
            eof: AtomicBool::new(false),
            closing: AtomicBool::new(false),
        })
    }

    /// Identifier of this session
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Identifier of the owning context
    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// The owning context
    pub fn context(&self) -> &Arc<SocketContext> {
        &self.context
    }

    /// A strong handle on this session, unless it is being dropped
    pub fn arc(&self) -> Option<Arc<Session>> {
        self.this.upgrade()
    }

    /// Local and peer addresses
    pub fn transport_context(&self) -> TransportContext {
        TransportContext {
            local_addr: self.transport.local_addr(),
            peer_addr: self.transport.peer_addr(),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // attributes

    /// Stores a handler-owned value under `key`, replacing any previous value
    pub fn set_attribute<T: Any + Send + Sync>(&self, key: &str, value: T) {
        self.attributes
            .lock()
            .insert(key.to_string(), Box::new(value));
    }

    /// A copy of the value under `key`, if present with type `T`
    pub fn attribute<T: Any + Clone>(&self, key: &str) -> Option<T> {
        self.attributes
            .lock()
            .get(key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    /// Removes the value under `key`, returning whether one was present
    pub fn remove_attribute(&self, key: &str) -> bool {
        self.attributes.lock().remove(key).is_some()
    }

    /// Whether a value is stored under `key`
    pub fn contains_attribute(&self, key: &str) -> bool {
        self.attributes.lock().contains_key(key)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // state

    /// Whether the connection is still usable
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Whether every plugin finished `prepare`
    pub fn is_prepared(&self) -> bool {
        self.prepared.load(Ordering::SeqCst)
    }

    /// Whether the peer closed its side of the stream
    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    /// Whether the TLS handshake is done, or the session carries no TLS
    pub fn is_handshake_done(&self) -> bool {
        self.tls_parser
            .get()
            .map(|parser| parser.is_handshake_done())
            .unwrap_or(true)
    }

    pub(crate) fn mark_prepared(&self) {
        self.prepared.store(true, Ordering::SeqCst);
        self.signal.notify();
    }

    pub(crate) fn mark_eof(&self) {
        self.eof.store(true, Ordering::SeqCst);
        self.signal.notify();
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // buffers and collaborators

    /// The session-visible buffer that framing reads from
    pub fn read_buffer(&self) -> &SharedBuffer {
        &self.read_buffer
    }

    /// The buffer inbound socket bytes land in: the last plugin that owns a
    /// buffer, otherwise the session-visible one
    pub fn inbound_buffer(&self) -> SharedBuffer {
        self.context
            .plugins()
            .read_buffer(self)
            .unwrap_or_else(|| self.read_buffer.clone())
    }

    /// Wakes every wait on this session's data
    pub fn signal(&self) -> &DataSignal {
        &self.signal
    }

    /// Values parked for [Session::sync_read]
    pub fn responses(&self) -> &ResponseSlot {
        &self.responses
    }

    /// Event trigger of this session
    pub fn trigger(&self) -> &EventTrigger {
        &self.trigger
    }

    /// The TLS parser, once a TLS plugin installed it
    pub fn tls_parser(&self) -> Option<&TlsParser> {
        self.tls_parser.get()
    }

    /// Installs the TLS parser; a session holds at most one, so later calls
    /// keep the first parser
    pub fn install_tls_parser(&self, parser: TlsParser) -> &TlsParser {
        self.tls_parser.get_or_init(|| parser)
    }

    /// Attaches a heartbeat; later calls keep the first one
    pub fn attach_heartbeat(&self, heartbeat: Heartbeat) -> &Heartbeat {
        self.heartbeat.get_or_init(|| heartbeat)
    }

    /// The attached heartbeat
    pub fn heartbeat(&self) -> Option<&Heartbeat> {
        self.heartbeat.get()
    }

    pub(crate) fn loader(&self) -> &Mutex<MessageLoader> {
        &self.loader
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // inbound

    /// Feeds bytes read from the socket into the session.
    ///
    /// Bytes land in the inbound buffer, plugins move what they can into the
    /// session-visible buffer, heartbeat marks are cut out, waiters are woken
    /// and a pooled RECEIVE is raised. Failures are funneled to the handler; they never reach the
    /// caller.
    pub fn receive_bytes(&self, bytes: &[u8]) {
        trace!("session {} received {} bytes", self.id, bytes.len());
        self.inbound_buffer().lock().write_end(bytes);
        if let Err(err) = self.context.plugins().unwrap(self) {
            if !err.is_disconnect() {
                let _ = self.trigger.fire_exception_thread(self, err);
            }
            self.close();
            return;
        }
        if let Some(heartbeat) = self.heartbeat.get() {
            if self.is_handshake_done() {
                heartbeat.intercept(&self.read_buffer);
            }
        }
        self.signal.notify();
        if let Err(err) = self.trigger.fire_receive_thread(self) {
            warn!("session {} could not raise receive: {}", self.id, err);
        }
    }

    /// Waits until `buffer` holds at least `n` bytes
    pub fn wait_for_bytes(&self, buffer: &SharedBuffer, n: usize) -> Result<()> {
        let deadline = Instant::now() + self.context.read_timeout();
        self.signal.wait_until(deadline, || {
            buffer.lock().size() >= n || !self.is_connected() || self.is_eof()
        });
        if buffer.lock().size() >= n {
            Ok(())
        } else if !self.is_connected() {
            Err(Error::Closed)
        } else if self.is_eof() {
            Err(Error::RemoteDisconnect)
        } else {
            Err(Error::Timeout(format!("waiting for {} bytes", n)))
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // outbound

    /// Encodes `msg` through the filter chain and sends it, raising SENT
    pub fn send(&self, msg: Message) -> Result<()> {
        if let Some(encoded) = self.context.filters().encode(self, msg)? {
            EventProcess::send_message(self, encoded)?;
        }
        Ok(())
    }

    /// Sends bytes through the plugin wrap chain with no filters and no
    /// events, returning how many plaintext bytes were accepted
    pub fn send_raw(&self, bytes: &[u8]) -> Result<usize> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        // wrapped records hit the socket in the order they were produced
        let _order = self.outbound.lock();
        if let Some(wrapped) = self
            .context
            .plugins()
            .wrap(self, BytesMut::from(bytes))?
        {
            self.write_transport(&wrapped)?;
        }
        Ok(bytes.len())
    }

    /// Writes the bytes `produce` returns to the socket, ordered against
    /// every [Session::send_raw] on this session
    pub fn write_records(&self, produce: impl FnOnce() -> Result<Vec<u8>>) -> Result<()> {
        let _order = self.outbound.lock();
        let records = produce()?;
        if records.is_empty() {
            return Ok(());
        }
        self.write_transport(&records)
    }

    /// Writes directly to the socket, below every plugin
    pub fn write_transport(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::Closed);
        }
        trace!("session {} write {} bytes", self.id, bytes.len());
        self.transport.write(bytes).map_err(Error::from)
    }

    /// Waits for preparation to finish, then sends like [Session::send]
    pub fn sync_send(&self, msg: Message) -> Result<()> {
        let deadline = Instant::now() + self.context.read_timeout();
        self.signal
            .wait_until(deadline, || self.is_prepared() || !self.is_connected());
        if !self.is_connected() {
            return Err(Error::Send(Box::new(Error::Closed)));
        }
        if !self.is_prepared() {
            return Err(Error::Send(Box::new(Error::Timeout(
                "session preparation".to_string(),
            ))));
        }
        self.send(msg)
    }

    /// Blocks until the event path parks a decoded value for this session.
    ///
    /// Requires the context handler to be a [SynchronousHandler](crate::SynchronousHandler).
    /// Errors stashed by the event path come back wrapped in [Error::Read].
    pub fn sync_read(&self) -> Result<Message> {
        if in_io_loop() {
            return Err(Error::Read(Box::new(Error::Config(
                "sync_read would block an I/O thread".to_string(),
            ))));
        }
        if !self.context.handler().is_synchronous() {
            return Err(Error::Read(Box::new(Error::Config(
                "sync_read requires a synchronous handler".to_string(),
            ))));
        }

        let deadline = Instant::now() + self.context.read_timeout();
        let mut response = None;
        self.signal.wait_until(deadline, || {
            response = self.responses.pop();
            response.is_some() || !self.is_connected()
        });
        match response {
            Some(Ok(msg)) => Ok(msg),
            Some(Err(err)) => Err(Error::Read(Box::new(err))),
            None if !self.is_connected() => Err(Error::Read(Box::new(Error::Closed))),
            None => Err(Error::Read(Box::new(Error::Timeout(
                "synchronous read".to_string(),
            )))),
        }
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // teardown

    /// Closes the session.
    ///
    /// Plugins are released while the socket is still writable, then every
    /// wait on the session observes the flag and returns. DISCONNECT is raised
    /// exactly once, after the in-flight RECEIVE finishes.
    pub fn close(&self) {
        if self.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("session {} closing", self.id);
        self.context.plugins().release(self);
        self.connected.store(false, Ordering::SeqCst);
        self.transport.shutdown();
        self.signal.notify();

        if let Err(err) = self.trigger.fire_disconnect_thread(self) {
            warn!("session {} could not raise disconnect: {}", self.id, err);
            EventProcess::on_disconnect(self);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("context_id", &self.context_id)
            .field("connected", &self.is_connected())
            .field("prepared", &self.is_prepared())
            .field("tls", &self.tls_parser.get().is_some())
            .finish()
    }
}
