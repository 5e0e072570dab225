use parking_lot::Mutex;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ContextBuilder, ContextConfig, SocketContext};
use crate::executor::{PoolConfig, WorkerPool};
use crate::handler::{Handler, Message};
use crate::session::Session;
use crate::transport::TransportWrite;

#[derive(Default)]
pub(crate) struct MockTransport {
    written: Mutex<Vec<u8>>,
    shutdown: AtomicBool,
}

impl MockTransport {
    pub(crate) fn written(&self) -> Vec<u8> {
        self.written.lock().clone()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

impl TransportWrite for MockTransport {
    fn write(&self, buf: &[u8]) -> std::io::Result<()> {
        if self.is_shutdown() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "mock transport is shut down",
            ));
        }
        self.written.lock().extend_from_slice(buf);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        SocketAddr::from_str("127.0.0.1:1234").ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        SocketAddr::from_str("127.0.0.1:4321").ok()
    }
}

pub(crate) struct NoopHandler;

impl Handler for NoopHandler {
    fn on_receive(&self, _session: &Session, _msg: Message) -> Option<Message> {
        None
    }
}

pub(crate) fn test_pool() -> Arc<WorkerPool> {
    let pool = WorkerPool::new(PoolConfig {
        core_size: 4,
        growth_step: 2,
        max_core_size: 8,
        keep_alive: Duration::from_secs(5),
        ..PoolConfig::for_cpus(1)
    });
    pool.start().unwrap();
    pool
}

pub(crate) fn test_config() -> ContextConfig {
    ContextConfig::server("127.0.0.1", 0).with_read_timeout(Duration::from_millis(300))
}

pub(crate) fn mock_session(builder: ContextBuilder) -> (Arc<Session>, Arc<MockTransport>) {
    mock_session_in(builder, test_pool())
}

pub(crate) fn mock_session_in(
    builder: ContextBuilder,
    pool: Arc<WorkerPool>,
) -> (Arc<Session>, Arc<MockTransport>) {
    let context: Arc<SocketContext> = Arc::new(builder.build().unwrap());
    let transport = Arc::new(MockTransport::default());
    let session = Session::new(context, transport.clone(), pool);
    (session, transport)
}

pub(crate) fn noop_context() -> ContextBuilder {
    SocketContext::builder(test_config()).handler(NoopHandler)
}
