#[cfg(test)]
mod tests {
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    use sockflow::bootstrap::{SocketClient, SocketServer};
    use sockflow::codec::{LineSplitter, TerminatorType};
    use sockflow::context::{ContextConfig, SocketContext};
    use sockflow::executor::{IoLoop, PoolConfig, WorkerPool};
    use sockflow::filter::StringFilter;
    use sockflow::session::{Heartbeat, Session};
    use sockflow::{Error, Handler, Message, SynchronousHandler};

    ////////////////////////////////////////////////////////////////////////////////////////////////////

    struct EchoHandler {
        count: Arc<AtomicUsize>,
    }

    impl Handler for EchoHandler {
        fn on_receive(&self, _session: &Session, msg: Message) -> Option<Message> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Some(msg)
        }
    }

    #[derive(Default)]
    struct Beats {
        idles: AtomicUsize,
        heard: AtomicUsize,
    }

    struct HeartbeatHandler {
        beats: Arc<Beats>,
    }

    impl Handler for HeartbeatHandler {
        fn on_connect(&self, session: &Session) -> Option<Message> {
            session.attach_heartbeat(Heartbeat::default());
            None
        }

        fn on_receive(&self, _session: &Session, msg: Message) -> Option<Message> {
            Some(msg)
        }

        fn on_idle(&self, session: &Session) {
            self.beats.idles.fetch_add(1, Ordering::SeqCst);
            if let Some(heartbeat) = session.heartbeat() {
                if heartbeat.beat(session) {
                    self.beats.heard.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    fn runtime() -> (Arc<WorkerPool>, Arc<IoLoop>) {
        let pool = WorkerPool::new(PoolConfig {
            core_size: 8,
            ..PoolConfig::for_cpus(1)
        });
        pool.start().unwrap();
        (pool, IoLoop::new(2).unwrap())
    }

    fn shutdown(pool: Arc<WorkerPool>, io: Arc<IoLoop>) {
        io.shutdown();
        pool.shutdown();
        pool.join();
    }

    #[test]
    fn test_echo_ping() {
        let (pool, io) = runtime();
        let count = Arc::new(AtomicUsize::new(0));

        let server_context = SocketContext::builder(ContextConfig::server("127.0.0.1", 0))
            .handler(EchoHandler {
                count: count.clone(),
            })
            .splitter(LineSplitter::new(8192, TerminatorType::NEWLINE))
            .build()
            .unwrap();
        let server = SocketServer::new(server_context, pool.clone(), io.clone());
        let addr = server.bind().unwrap();

        let client_context = SocketContext::builder(
            ContextConfig::client("127.0.0.1", addr.port())
                .with_read_timeout(Duration::from_secs(3)),
        )
        .handler(SynchronousHandler::new())
        .splitter(LineSplitter::new(8192, TerminatorType::NEWLINE))
        .build()
        .unwrap();
        let client = SocketClient::connect(client_context, pool.clone(), &io).unwrap();

        client.sync_send(Box::new("PING\n")).unwrap();
        let reply = client.sync_read().unwrap().downcast::<BytesMut>().unwrap();
        assert_eq!(&reply[..], b"PING\n");
        assert_eq!(count.load(Ordering::SeqCst), 1);

        client.close();
        server.stop();
        shutdown(pool, io);
    }

    #[test]
    fn test_echo_many_lines_with_string_filter() {
        let (pool, io) = runtime();
        let count = Arc::new(AtomicUsize::new(0));

        let server_context = SocketContext::builder(ContextConfig::server("127.0.0.1", 0))
            .handler(EchoHandler {
                count: count.clone(),
            })
            .add_filter(StringFilter::new())
            .splitter(LineSplitter::new(8192, TerminatorType::CarriageNewline))
            .build()
            .unwrap();
        let server = SocketServer::new(server_context, pool.clone(), io.clone());
        let addr = server.bind().unwrap();

        let client_context = SocketContext::builder(
            ContextConfig::client("127.0.0.1", addr.port())
                .with_read_timeout(Duration::from_secs(3)),
        )
        .handler(SynchronousHandler::new())
        .add_filter(StringFilter::new())
        .splitter(LineSplitter::new(8192, TerminatorType::CarriageNewline))
        .build()
        .unwrap();
        let client = SocketClient::connect(client_context, pool.clone(), &io).unwrap();

        let lines: Vec<String> = (0..50).map(|i| format!("line {}\r\n", i)).collect();
        for line in lines.iter() {
            client.sync_send(Box::new(line.clone())).unwrap();
        }
        for line in lines.iter() {
            let reply = client.sync_read().unwrap().downcast::<String>().unwrap();
            assert_eq!(&*reply, line);
        }
        assert_eq!(count.load(Ordering::SeqCst), 50);

        client.close();
        server.stop();
        shutdown(pool, io);
    }

    #[test]
    fn test_server_close_surfaces_to_client() {
        let (pool, io) = runtime();

        let server_context = SocketContext::builder(ContextConfig::server("127.0.0.1", 0))
            .handler(EchoHandler {
                count: Arc::new(AtomicUsize::new(0)),
            })
            .build()
            .unwrap();
        let server = SocketServer::new(server_context, pool.clone(), io.clone());
        let addr = server.bind().unwrap();

        let client_context = SocketContext::builder(
            ContextConfig::client("127.0.0.1", addr.port())
                .with_read_timeout(Duration::from_secs(3)),
        )
        .handler(SynchronousHandler::new())
        .build()
        .unwrap();
        let client = SocketClient::connect(client_context, pool.clone(), &io).unwrap();

        server.stop();
        match client.sync_read() {
            Err(Error::Read(inner)) => assert!(inner.is_disconnect(), "{}", inner),
            Err(err) => panic!("unexpected error {}", err),
            Ok(_) => panic!("unexpected message"),
        }
        client.close();
        shutdown(pool, io);
    }

    #[test]
    fn test_idle_heartbeat_between_peers() {
        let (pool, io) = runtime();
        let server_beats = Arc::new(Beats::default());
        let client_beats = Arc::new(Beats::default());
        let interval = Duration::from_millis(100);

        let server_context = SocketContext::builder(
            ContextConfig::server("127.0.0.1", 0).with_idle_interval(interval),
        )
        .handler(HeartbeatHandler {
            beats: server_beats.clone(),
        })
        .build()
        .unwrap();
        let server = SocketServer::new(server_context, pool.clone(), io.clone());
        let addr = server.bind().unwrap();

        let client_context = SocketContext::builder(
            ContextConfig::client("127.0.0.1", addr.port()).with_idle_interval(interval),
        )
        .handler(HeartbeatHandler {
            beats: client_beats.clone(),
        })
        .build()
        .unwrap();
        let client = SocketClient::connect(client_context, pool.clone(), &io).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while (server_beats.heard.load(Ordering::SeqCst) < 3
            || client_beats.heard.load(Ordering::SeqCst) < 3)
            && Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(20));
        }
        assert!(server_beats.heard.load(Ordering::SeqCst) >= 3);
        assert!(client_beats.heard.load(Ordering::SeqCst) >= 3);
        assert!(client_beats.idles.load(Ordering::SeqCst) >= 3);
        assert!(client.is_connected());

        client.close();
        let idles = client_beats.idles.load(Ordering::SeqCst);
        std::thread::sleep(interval * 3);
        assert!(client_beats.idles.load(Ordering::SeqCst) <= idles + 1);

        server.stop();
        shutdown(pool, io);
    }
}
