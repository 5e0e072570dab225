use async_net::{TcpListener, TcpStream};
use log::{debug, trace, warn};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use waitgroup::{WaitGroup, Worker};

use crate::bootstrap::SessionRegistry;
use crate::context::{ConnectRole, SocketContext};
use crate::error::{Error, Result};
use crate::executor::{IoLoop, WorkerPool};
use crate::session::Session;
use crate::transport::{idle_loop, read_loop, TcpTransport};

/// Accepts TCP connections for one [SocketContext].
///
/// Every accepted socket becomes a [Session]: ACCEPT runs inline on the I/O
/// loop, a read task is spawned for the socket and CONNECT is raised on the
/// worker pool.
pub struct SocketServer {
    context: Arc<SocketContext>,
    pool: Arc<WorkerPool>,
    io: Arc<IoLoop>,
    registry: Arc<SessionRegistry>,
    close_tx: Mutex<Option<smol::channel::Sender<()>>>,
    wg: Mutex<Option<WaitGroup>>,
}

impl SocketServer {
    /// Creates a server; nothing listens until [SocketServer::bind]
    pub fn new(context: SocketContext, pool: Arc<WorkerPool>, io: Arc<IoLoop>) -> Self {
        Self {
            context: Arc::new(context),
            pool,
            io,
            registry: Arc::new(SessionRegistry::new()),
            close_tx: Mutex::new(None),
            wg: Mutex::new(None),
        }
    }

    /// Shared context of every accepted session
    pub fn context(&self) -> &Arc<SocketContext> {
        &self.context
    }

    /// Binds the context's host and port and starts accepting.
    /// Returns the bound address.
    pub fn bind(&self) -> Result<SocketAddr> {
        if self.context.role() != ConnectRole::Server {
            return Err(Error::Config("a server needs a server context".to_string()));
        }
        if self.close_tx.lock().is_some() {
            return Err(Error::Config("server is already bound".to_string()));
        }

        let listener = smol::block_on(TcpListener::bind(self.context.config().address()))?;
        let local_addr = listener.local_addr()?;

        let (close_tx, close_rx) = smol::channel::bounded(1);
        {
            let mut tx = self.close_tx.lock();
            *tx = Some(close_tx);
        }

        let worker = {
            let workgroup = WaitGroup::new();
            let worker = workgroup.worker();
            {
                let mut wg = self.wg.lock();
                *wg = Some(workgroup);
            }
            worker
        };

        let context = Arc::clone(&self.context);
        let pool = Arc::clone(&self.pool);
        let io = Arc::clone(&self.io);
        let registry = Arc::clone(&self.registry);
        self.io
            .spawn(async move {
                let _w = worker;

                let child_wg = WaitGroup::new();
                loop {
                    tokio::select! {
                        _ = close_rx.recv() => {
                            trace!("listener exit loop");
                            break;
                        }
                        res = listener.accept() => {
                            match res {
                                Ok((stream, peer_addr)) => {
                                    trace!("listener accepted {}", peer_addr);
                                    Self::accept(
                                        stream,
                                        &context,
                                        &pool,
                                        &io,
                                        &registry,
                                        child_wg.worker(),
                                    );
                                }
                                Err(err) => {
                                    warn!("listener accept error {}", err);
                                    break;
                                }
                            }
                        }
                    }
                }
                registry.close_all();
                child_wg.wait().await;
            })
            .detach();

        debug!("server {} listening on {}", self.context.id(), local_addr);
        Ok(local_addr)
    }

    fn accept(
        stream: TcpStream,
        context: &Arc<SocketContext>,
        pool: &Arc<WorkerPool>,
        io: &IoLoop,
        registry: &SessionRegistry,
        worker: Worker,
    ) {
        let transport = Arc::new(TcpTransport::new(stream.clone()));
        let session = Session::new(Arc::clone(context), transport, Arc::clone(pool));
        registry.insert(Arc::clone(&session));

        if let Err(err) = session.trigger().fire_accept(&session) {
            warn!("session {} accept failed: {}", session.id(), err);
            return;
        }
        io.spawn(read_loop(Arc::clone(&session), stream, Some(worker)))
            .detach();
        if let Some(interval) = context.idle_interval() {
            io.spawn(idle_loop(Arc::clone(&session), interval)).detach();
        }
        if let Err(err) = session.trigger().fire_connect_thread(&session) {
            warn!("session {} connect rejected: {}", session.id(), err);
            session.close();
        }
    }

    /// Connected sessions of this server
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.registry.connected()
    }

    /// Stops accepting, closes every session and waits for their read tasks.
    /// Must not be called from an I/O loop thread.
    pub fn stop(&self) {
        {
            let mut close_tx = self.close_tx.lock();
            if let Some(close_tx) = close_tx.take() {
                let _ = close_tx.try_send(());
            }
        }
        self.registry.close_all();
        let wg = {
            let mut wg = self.wg.lock();
            wg.take()
        };
        if let Some(wg) = wg {
            smol::block_on(wg.wait());
        }
        debug!("server {} stopped", self.context.id());
    }
}
