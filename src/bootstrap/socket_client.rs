use async_net::TcpStream;
use log::debug;
use parking_lot::Mutex;
use smol::Timer;
use std::sync::Arc;
use waitgroup::WaitGroup;

use crate::context::{ConnectRole, SocketContext};
use crate::error::{Error, Result};
use crate::executor::{in_io_loop, IoLoop, WorkerPool};
use crate::handler::Message;
use crate::session::Session;
use crate::transport::{idle_loop, read_loop, TcpTransport};

/// One outbound connection for a client [SocketContext].
///
/// `connect` returns once every plugin is prepared: a SOCKS5 tunnel is open
/// and the TLS handshake is done.
pub struct SocketClient {
    session: Arc<Session>,
    wg: Mutex<Option<WaitGroup>>,
}

impl SocketClient {
    /// Connects to the context's host and port within its read timeout, then
    /// runs ACCEPT and CONNECT on the calling thread.
    /// Must not be called from an I/O loop thread.
    pub fn connect(context: SocketContext, pool: Arc<WorkerPool>, io: &IoLoop) -> Result<Self> {
        if context.role() != ConnectRole::Client {
            return Err(Error::Config("a client needs a client context".to_string()));
        }
        if in_io_loop() {
            return Err(Error::Config("connect would block an I/O thread".to_string()));
        }

        let context = Arc::new(context);
        let address = context.config().address();
        let timeout = context.read_timeout();
        let stream = smol::block_on(smol::future::or(
            async { TcpStream::connect(address.as_str()).await.map(Some) },
            async {
                Timer::after(timeout).await;
                Ok(None)
            },
        ))?
        .ok_or_else(|| Error::Timeout(format!("connect to {}", address)))?;

        let transport = Arc::new(TcpTransport::new(stream.clone()));
        let session = Session::new(context, transport, pool);
        session.trigger().fire_accept(&session)?;

        let wg = WaitGroup::new();
        io.spawn(read_loop(Arc::clone(&session), stream, Some(wg.worker())))
            .detach();
        session.trigger().fire_connect(&session)?;
        if let Some(interval) = session.context().idle_interval() {
            io.spawn(idle_loop(Arc::clone(&session), interval)).detach();
        }
        debug!("session {} connected to {}", session.id(), address);

        Ok(Self {
            session,
            wg: Mutex::new(Some(wg)),
        })
    }

    /// The client session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Whether the connection is still usable
    pub fn is_connected(&self) -> bool {
        self.session.is_connected()
    }

    /// Sends through the filter and plugin chains
    pub fn send(&self, msg: Message) -> Result<()> {
        self.session.send(msg)
    }

    /// See [Session::sync_send]
    pub fn sync_send(&self, msg: Message) -> Result<()> {
        self.session.sync_send(msg)
    }

    /// See [Session::sync_read]
    pub fn sync_read(&self) -> Result<Message> {
        self.session.sync_read()
    }

    /// Closes the session and waits for its read task to exit
    pub fn close(&self) {
        self.session.close();
        let wg = self.wg.lock().take();
        if let Some(wg) = wg {
            smol::block_on(wg.wait());
        }
    }
}
