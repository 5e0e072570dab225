use super::*;
use crate::context::SocketContext;
use crate::handler::SynchronousHandler;
use crate::test_util::{mock_session, noop_context, test_config};
use crate::tls::TlsManager;

use std::time::Duration;

fn sync_session() -> (Arc<Session>, Arc<crate::test_util::MockTransport>) {
    let (session, transport) =
        mock_session(SocketContext::builder(test_config()).handler(SynchronousHandler::new()));
    session.mark_prepared();
    (session, transport)
}

#[test]
fn test_attributes() {
    let (session, _) = mock_session(noop_context());

    session.set_attribute("count", 3u32);
    assert_eq!(session.attribute::<u32>("count"), Some(3));
    assert_eq!(session.attribute::<String>("count"), None);
    assert!(session.contains_attribute("count"));

    session.set_attribute("count", 4u32);
    assert_eq!(session.attribute::<u32>("count"), Some(4));

    assert!(session.remove_attribute("count"));
    assert!(!session.remove_attribute("count"));
    assert_eq!(session.attribute::<u32>("count"), None);
}

#[test]
fn test_identity_and_addresses() {
    let (a, _) = mock_session(noop_context());
    let (b, _) = mock_session(noop_context());
    assert_ne!(a.id(), b.id());
    assert_eq!(a.context_id(), a.context().id());

    let transport = a.transport_context();
    assert_eq!(transport.local_addr.map(|addr| addr.port()), Some(1234));
    assert_eq!(transport.peer_addr.map(|addr| addr.port()), Some(4321));
}

#[test]
fn test_close_is_idempotent_and_stops_writes() {
    let (session, transport) = mock_session(noop_context());
    assert!(session.is_connected());

    session.close();
    session.close();
    assert!(!session.is_connected());
    assert!(transport.is_shutdown());
    assert_eq!(session.send_raw(b"late"), Err(Error::Closed));
    assert_eq!(session.write_transport(b"late"), Err(Error::Closed));
}

#[test]
fn test_wait_for_bytes() {
    let (session, _) = mock_session(noop_context());
    let buffer = session.read_buffer().clone();

    buffer.lock().write_end(b"abc");
    assert_eq!(session.wait_for_bytes(&buffer, 3), Ok(()));
    assert!(matches!(session.wait_for_bytes(&buffer, 4), Err(Error::Timeout(_))));

    let feeder = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            session.receive_bytes(b"d");
        })
    };
    assert_eq!(session.wait_for_bytes(&buffer, 4), Ok(()));
    feeder.join().unwrap();

    session.mark_eof();
    assert_eq!(session.wait_for_bytes(&buffer, 10), Err(Error::RemoteDisconnect));
}

#[test]
fn test_close_wakes_waiters() {
    let (session, _) = mock_session(
        SocketContext::builder(test_config().with_read_timeout(Duration::from_secs(10)))
            .handler(crate::test_util::NoopHandler),
    );
    let closer = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            session.close();
        })
    };
    let started = Instant::now();
    let buffer = session.read_buffer().clone();
    assert_eq!(session.wait_for_bytes(&buffer, 1), Err(Error::Closed));
    assert!(started.elapsed() < Duration::from_secs(5));
    closer.join().unwrap();
}

#[test]
fn test_sync_read_requires_synchronous_handler() {
    let (session, _) = mock_session(noop_context());
    assert!(matches!(
        session.sync_read(),
        Err(Error::Read(inner)) if matches!(*inner, Error::Config(_))
    ));
}

#[test]
fn test_sync_read_returns_decoded_frame() {
    let (session, _) = sync_session();
    let feeder = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            session.receive_bytes(b"hi\n");
        })
    };
    let msg = session.sync_read().unwrap();
    let frame = msg.downcast::<BytesMut>().unwrap();
    assert_eq!(&frame[..], b"hi\n");
    feeder.join().unwrap();
}

#[test]
fn test_sync_read_timeout_and_close() {
    let (session, _) = sync_session();
    assert!(matches!(
        session.sync_read(),
        Err(Error::Read(inner)) if matches!(*inner, Error::Timeout(_))
    ));

    session.close();
    assert_eq!(
        session.sync_read().err(),
        Some(Error::Read(Box::new(Error::Closed)))
    );
}

#[test]
fn test_sync_read_surfaces_stashed_error() {
    let (session, _) = sync_session();
    session
        .responses()
        .push(Err(Error::Filter {
            filter: "f".to_string(),
            message: "bad".to_string(),
        }));
    assert!(matches!(
        session.sync_read(),
        Err(Error::Read(inner)) if matches!(*inner, Error::Filter { .. })
    ));
}

#[test]
fn test_sync_send_waits_for_preparation() {
    let (session, transport) = mock_session(noop_context());
    assert_eq!(
        session.sync_send(Box::new("x")),
        Err(Error::Send(Box::new(Error::Timeout(
            "session preparation".to_string()
        ))))
    );

    let preparer = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            session.mark_prepared();
        })
    };
    session.sync_send(Box::new("ready")).unwrap();
    assert_eq!(transport.written(), b"ready");
    preparer.join().unwrap();

    session.close();
    assert_eq!(
        session.sync_send(Box::new("x")),
        Err(Error::Send(Box::new(Error::Closed)))
    );
}

#[test]
fn test_unsupported_outbound_value() {
    let (session, transport) = mock_session(noop_context());
    assert!(matches!(
        session.send(Box::new(42u64)),
        Err(Error::Send(inner)) if matches!(*inner, Error::UnsupportedMessage(_))
    ));
    assert!(transport.written().is_empty());
}

#[test]
fn test_single_tls_parser() {
    let (session, _) = mock_session(noop_context());
    assert!(session.tls_parser().is_none());
    assert!(session.is_handshake_done());

    let manager = TlsManager::new("TLS").unwrap().danger_trust_all();
    let first = session.install_tls_parser(manager.create_client_parser("localhost", 1024).unwrap())
        as *const TlsParser;
    let second = session.install_tls_parser(manager.create_client_parser("localhost", 1024).unwrap())
        as *const TlsParser;
    assert_eq!(first, second);
    assert!(!session.is_handshake_done());
}

#[test]
fn test_heartbeat_marks_are_cut_from_the_stream() {
    let (session, _) = mock_session(noop_context());
    let heartbeat = session.attach_heartbeat(Heartbeat::default());
    assert!(session.heartbeat().is_some());

    session.receive_bytes(b"abPINGcd\nPONG");
    assert_eq!(session.read_buffer().lock().as_slice(), b"abcd\n");
    assert_eq!(heartbeat.pending(), 2);

    let again = session.attach_heartbeat(Heartbeat::new("X", "Y"));
    assert_eq!(again.ping(), b"PING");
}

#[test]
fn test_heartbeat_answers_marks_and_counts_misses() {
    let (session, transport) = mock_session(
        SocketContext::builder(test_config().with_idle_interval(Duration::from_millis(50)))
            .handler(crate::test_util::NoopHandler),
    );
    let heartbeat = session.attach_heartbeat(Heartbeat::default());

    // a server opens quietly
    assert!(heartbeat.beat(&session));
    assert!(transport.written().is_empty());

    assert!(!heartbeat.beat(&session));
    assert!(!heartbeat.beat(&session));
    assert_eq!(heartbeat.failures(), 2);

    session.receive_bytes(b"PING");
    assert!(heartbeat.beat(&session));
    assert_eq!(transport.written(), b"PONG");
    assert_eq!(heartbeat.failures(), 0);
    assert_eq!(heartbeat.pending(), 0);
}

#[test]
fn test_client_heartbeat_opens_with_ping() {
    let (session, transport) = mock_session(
        SocketContext::builder(
            crate::context::ContextConfig::client("127.0.0.1", 0)
                .with_idle_interval(Duration::from_millis(50)),
        )
        .handler(crate::test_util::NoopHandler),
    );
    let heartbeat = session.attach_heartbeat(Heartbeat::default());

    assert!(heartbeat.beat(&session));
    assert_eq!(transport.written(), b"PING");

    let feeder = {
        let session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            session.receive_bytes(b"PONG");
        })
    };
    assert!(heartbeat.beat(&session));
    feeder.join().unwrap();
    assert_eq!(transport.written(), b"PINGPING");
}
