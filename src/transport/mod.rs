//! Socket plumbing beneath the plugin chain


use async_net::TcpStream;
use futures_lite::{AsyncReadExt, AsyncWriteExt};
use log::{trace, warn};
use parking_lot::Mutex;
use smol::Timer;
use std::net::{Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use waitgroup::Worker;

use crate::session::Session;

/// Local address and optional peer address of a session
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportContext {
    /// Local socket address, either IPv4 or IPv6
    pub local_addr: Option<SocketAddr>,
    /// Peer socket address, either IPv4 or IPv6
    pub peer_addr: Option<SocketAddr>,
}

/// Outbound half of a connection.
///
/// Writes block the calling worker until the bytes are handed to the socket.
pub trait TransportWrite: Send + Sync {
    /// Writes all of `buf`
    fn write(&self, buf: &[u8]) -> std::io::Result<()>;

    /// Shuts both directions down, which ends the read loop
    fn shutdown(&self);

    /// Local address, if known
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Peer address, if known
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// [TransportWrite] over an [async_net::TcpStream]
pub struct TcpTransport {
    stream: TcpStream,
    write_lock: Mutex<()>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl TcpTransport {
    /// Wraps a connected stream
    pub fn new(stream: TcpStream) -> Self {
        let local_addr = stream.local_addr().ok();
        let peer_addr = stream.peer_addr().ok();
        Self {
            stream,
            write_lock: Mutex::new(()),
            local_addr,
            peer_addr,
        }
    }
}

impl TransportWrite for TcpTransport {
    fn write(&self, buf: &[u8]) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        let mut stream = self.stream.clone();
        smol::block_on(async {
            stream.write_all(buf).await?;
            stream.flush().await
        })?;
        trace!("socket write {} bytes", buf.len());
        Ok(())
    }

    fn shutdown(&self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            trace!("socket shutdown error {}", err);
        }
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }
}

/// Reads `stream` until end-of-stream or error, feeding every chunk into
/// `session`, then closes the session.
pub(crate) async fn read_loop(session: Arc<Session>, mut stream: TcpStream, worker: Option<Worker>) {
    let _w = worker;

    let mut buf = vec![0u8; session.context().buffer_size()];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) => {
                trace!("session {} read eof", session.id());
                session.mark_eof();
                break;
            }
            Ok(n) => {
                trace!("socket read {} bytes", n);
                session.receive_bytes(&buf[..n]);
                if !session.is_connected() {
                    break;
                }
            }
            Err(err) => {
                if session.is_connected() {
                    warn!("session {} socket read error {}", session.id(), err);
                }
                break;
            }
        }
    }
    session.close();
}

/// Raises IDLE on `session` every `interval` until the session closes
pub(crate) async fn idle_loop(session: Arc<Session>, interval: Duration) {
    loop {
        Timer::after(interval).await;
        if !session.is_connected() {
            trace!("session {} idle timer stopped", session.id());
            return;
        }
        if let Err(err) = session.trigger().fire_idle_thread(&session) {
            warn!("session {} could not raise idle: {}", session.id(), err);
        }
    }
}
