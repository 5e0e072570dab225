use bytes::BytesMut;
use log::{debug, trace};
use parking_lot::Mutex;
use rustls::Connection;
use std::io::{ErrorKind, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::buffer::{shared_buffer, SharedBuffer};
use crate::error::{Error, Result};

/// Iterations the handshake loop may spend before it gives up on the peer
pub const HANDSHAKE_BOUND: usize = 20;

const PLAINTEXT_CHUNK: usize = 4096;

/// What the handshake needs next
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// Received records wait to be processed
    NeedTask,
    /// Records wait to be sent
    NeedWrap,
    /// More records from the peer are needed
    NeedUnwrap,
    /// The handshake just completed
    Finished,
    /// No handshake is in progress
    NotHandshaking,
}

/// How a [TlsParser] exchanges handshake records with its peer
pub trait HandshakeIo {
    /// Sends handshake records to the peer
    fn send_handshake(&self, bytes: &[u8]) -> Result<()>;

    /// Blocks until `net` holds bytes or `deadline` passes. Errors when the
    /// connection is gone or the wait timed out.
    fn wait_for_net(&self, net: &SharedBuffer, deadline: Instant) -> Result<()>;
}

/// Per-session TLS state machine.
///
/// Inbound records accumulate in the parser's network buffer. The handshake
/// loop drives the connection until it stops handshaking; after that `wrap`
/// and `unwrap` only transform application data.
pub struct TlsParser {
    conn: Mutex<Connection>,
    net: SharedBuffer,
    handshake_done: AtomicBool,
    pending_task: AtomicBool,
    finished_reported: AtomicBool,
}

impl TlsParser {
    /// Wraps a rustls client or server connection
    pub fn new(conn: impl Into<Connection>, buffer_size: usize) -> Self {
        Self {
            conn: Mutex::new(conn.into()),
            net: shared_buffer(buffer_size),
            handshake_done: AtomicBool::new(false),
            pending_task: AtomicBool::new(false),
            finished_reported: AtomicBool::new(false),
        }
    }

    /// Whether this parser plays the client role
    pub fn is_client(&self) -> bool {
        matches!(*self.conn.lock(), Connection::Client(_))
    }

    /// Buffer that inbound network bytes land in
    pub fn net_buffer(&self) -> &SharedBuffer {
        &self.net
    }

    /// Whether the handshake loop reached [HandshakeStatus::NotHandshaking]
    pub fn is_handshake_done(&self) -> bool {
        self.handshake_done.load(Ordering::SeqCst)
    }

    /// Current handshake status. [HandshakeStatus::Finished] is reported once,
    /// on the first look after the connection stops handshaking.
    pub fn handshake_status(&self) -> HandshakeStatus {
        let conn = self.conn.lock();
        if self.pending_task.load(Ordering::SeqCst) {
            HandshakeStatus::NeedTask
        } else if conn.wants_write() {
            HandshakeStatus::NeedWrap
        } else if conn.is_handshaking() {
            HandshakeStatus::NeedUnwrap
        } else if !self.finished_reported.swap(true, Ordering::SeqCst) {
            HandshakeStatus::Finished
        } else {
            HandshakeStatus::NotHandshaking
        }
    }

    /// Runs the handshake to completion.
    ///
    /// Each step performs one unit of work and re-reads the status. Running
    /// out of [HANDSHAKE_BOUND] steps is a failure, as is the peer staying
    /// silent for `read_timeout`.
    pub fn do_handshake(&self, io: &dyn HandshakeIo, read_timeout: Duration) -> Result<()> {
        if self.is_handshake_done() {
            return Ok(());
        }

        let mut status = self.handshake_status();
        let mut iterations = 0;
        while iterations < HANDSHAKE_BOUND {
            if status == HandshakeStatus::NotHandshaking {
                self.handshake_done.store(true, Ordering::SeqCst);
                debug!("tls handshake done after {} steps", iterations);
                return Ok(());
            }
            iterations += 1;
            trace!("tls handshake step {} {:?}", iterations, status);

            status = match status {
                HandshakeStatus::NeedTask => self.run_delegated_tasks(io)?,
                HandshakeStatus::NeedWrap => self.handshake_wrap(io)?,
                HandshakeStatus::NeedUnwrap => self.handshake_unwrap(io, read_timeout)?,
                HandshakeStatus::Finished | HandshakeStatus::NotHandshaking => {
                    self.handshake_status()
                }
            };
        }

        if status == HandshakeStatus::NotHandshaking {
            self.handshake_done.store(true, Ordering::SeqCst);
            return Ok(());
        }
        Err(Error::HandshakeExhausted(HANDSHAKE_BOUND))
    }

    fn run_delegated_tasks(&self, io: &dyn HandshakeIo) -> Result<HandshakeStatus> {
        self.pending_task.store(false, Ordering::SeqCst);
        let result = self.conn.lock().process_new_packets();
        if let Err(err) = result {
            // let the peer see the alert before giving up
            let alert = self.drain_records()?;
            if !alert.is_empty() {
                let _ = io.send_handshake(&alert);
            }
            return Err(err.into());
        }
        Ok(self.handshake_status())
    }

    fn handshake_wrap(&self, io: &dyn HandshakeIo) -> Result<HandshakeStatus> {
        let records = self.drain_records()?;
        trace!("tls handshake wrap {} bytes", records.len());
        io.send_handshake(&records)?;
        Ok(self.handshake_status())
    }

    fn handshake_unwrap(&self, io: &dyn HandshakeIo, read_timeout: Duration) -> Result<HandshakeStatus> {
        io.wait_for_net(&self.net, Instant::now() + read_timeout)?;

        {
            let mut conn = self.conn.lock();
            let pending = self.net.lock().read_all();
            if !pending.is_empty() {
                let consumed = feed(&mut conn, &pending)?;
                trace!("tls handshake unwrap {} of {} bytes", consumed, pending.len());
                if consumed < pending.len() {
                    self.net.lock().write_head(&pending[consumed..]);
                }
                if consumed > 0 {
                    self.pending_task.store(true, Ordering::SeqCst);
                }
            }
        }
        Ok(self.handshake_status())
    }

    /// Takes every record the connection has queued for the peer, in the
    /// order they were produced
    pub fn pending_records(&self) -> Result<Vec<u8>> {
        self.drain_records()
    }

    fn drain_records(&self) -> Result<Vec<u8>> {
        let mut conn = self.conn.lock();
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out)?;
        }
        Ok(out)
    }

    /// Encrypts application data into records ready for the socket
    pub fn wrap(&self, plain: &[u8]) -> Result<BytesMut> {
        let mut conn = self.conn.lock();
        conn.writer().write_all(plain)?;
        let mut out = Vec::new();
        while conn.wants_write() {
            conn.write_tls(&mut out)?;
        }
        Ok(BytesMut::from(&out[..]))
    }

    /// Decrypts every buffered record into `app`.
    ///
    /// Records the connection produces in response stay queued until
    /// [TlsParser::pending_records] takes them. A close_notify from the peer
    /// is [Error::RemoteDisconnect].
    pub fn unwrap(&self, app: &SharedBuffer) -> Result<()> {
        let mut conn = self.conn.lock();
        let pending = self.net.lock().read_all();

        let mut plain = Vec::new();
        let mut offset = 0;
        let mut closed = false;
        loop {
            let before = offset;
            if offset < pending.len() {
                offset += feed(&mut conn, &pending[offset..]).unwrap_or(0);
            }
            conn.process_new_packets()?;

            let mut chunk = [0u8; PLAINTEXT_CHUNK];
            loop {
                match conn.reader().read(&mut chunk) {
                    Ok(0) => {
                        closed = true;
                        break;
                    }
                    Ok(n) => plain.extend_from_slice(&chunk[..n]),
                    Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                    Err(err) => return Err(err.into()),
                }
            }

            if closed || offset >= pending.len() {
                break;
            }
            if offset == before {
                return Err(Error::Tls("record buffer is full".to_string()));
            }
        }
        if !closed && offset < pending.len() {
            self.net.lock().write_head(&pending[offset..]);
        }
        if !plain.is_empty() {
            trace!("tls unwrap {} plaintext bytes", plain.len());
            app.lock().write_end(&plain);
        }
        drop(conn);

        if closed {
            return Err(Error::RemoteDisconnect);
        }
        Ok(())
    }

    /// Records announcing the end of this side's stream
    pub fn close(&self) -> Result<Vec<u8>> {
        self.conn.lock().send_close_notify();
        self.drain_records()
    }
}

/// Hands as many bytes as the connection accepts to `read_tls`
fn feed(conn: &mut Connection, bytes: &[u8]) -> Result<usize> {
    let mut consumed = 0;
    while consumed < bytes.len() {
        let mut rd = &bytes[consumed..];
        match conn.read_tls(&mut rd) {
            Ok(0) => break,
            Ok(n) => consumed += n,
            Err(_) if consumed > 0 => break,
            Err(err) => return Err(Error::Tls(err.to_string())),
        }
    }
    Ok(consumed)
}
