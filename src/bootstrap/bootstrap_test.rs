use super::*;
use crate::context::{ContextConfig, SocketContext};
use crate::error::Error;
use crate::executor::IoLoop;
use crate::handler::{Handler, Message, SynchronousHandler};
use crate::test_util::test_pool;

use bytes::BytesMut;
use std::time::{Duration, Instant};

struct EchoHandler;

impl Handler for EchoHandler {
    fn on_receive(&self, _session: &Session, msg: Message) -> Option<Message> {
        Some(msg)
    }
}

struct GreetingHandler;

impl Handler for GreetingHandler {
    fn on_connect(&self, _session: &Session) -> Option<Message> {
        Some(Box::new("hello\n"))
    }

    fn on_receive(&self, _session: &Session, _msg: Message) -> Option<Message> {
        None
    }
}

fn server_context(handler: impl Handler + 'static) -> SocketContext {
    SocketContext::builder(ContextConfig::server("127.0.0.1", 0))
        .handler(handler)
        .build()
        .unwrap()
}

fn client_context(port: u16) -> SocketContext {
    SocketContext::builder(
        ContextConfig::client("127.0.0.1", port).with_read_timeout(Duration::from_secs(2)),
    )
    .handler(SynchronousHandler::new())
    .build()
    .unwrap()
}

fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + deadline;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    done()
}

#[test]
fn test_bind_and_stop() {
    let io = IoLoop::new(1).unwrap();
    let server = SocketServer::new(server_context(EchoHandler), test_pool(), io.clone());

    let addr = server.bind().unwrap();
    assert_ne!(addr.port(), 0);
    assert!(matches!(server.bind(), Err(Error::Config(_))));
    assert!(server.sessions().is_empty());

    server.stop();
    io.shutdown();
}

#[test]
fn test_roles_are_checked() {
    let io = IoLoop::new(1).unwrap();
    let pool = test_pool();

    let server = SocketServer::new(client_context(1), pool.clone(), io.clone());
    assert!(matches!(server.bind(), Err(Error::Config(_))));

    let result = SocketClient::connect(server_context(EchoHandler), pool, &io);
    assert!(matches!(result, Err(Error::Config(_))));
    io.shutdown();
}

#[test]
fn test_client_receives_greeting_and_echo() {
    let io = IoLoop::new(2).unwrap();
    let pool = test_pool();

    let greeter = SocketServer::new(server_context(GreetingHandler), pool.clone(), io.clone());
    let addr = greeter.bind().unwrap();
    let client = SocketClient::connect(client_context(addr.port()), pool.clone(), &io).unwrap();
    let greeting = client.sync_read().unwrap().downcast::<BytesMut>().unwrap();
    assert_eq!(&greeting[..], b"hello\n");
    client.close();
    greeter.stop();

    let echo = SocketServer::new(server_context(EchoHandler), pool.clone(), io.clone());
    let addr = echo.bind().unwrap();
    let client = SocketClient::connect(client_context(addr.port()), pool, &io).unwrap();
    assert!(client.is_connected());
    client.sync_send(Box::new("one\ntwo\n")).unwrap();
    let first = client.sync_read().unwrap().downcast::<BytesMut>().unwrap();
    let second = client.sync_read().unwrap().downcast::<BytesMut>().unwrap();
    assert_eq!(&first[..], b"one\n");
    assert_eq!(&second[..], b"two\n");

    assert!(wait_for(Duration::from_secs(2), || echo.sessions().len() == 1));
    client.close();
    assert!(!client.is_connected());
    assert!(wait_for(Duration::from_secs(2), || echo.sessions().is_empty()));

    echo.stop();
    io.shutdown();
}

#[test]
fn test_stop_closes_sessions() {
    let io = IoLoop::new(1).unwrap();
    let pool = test_pool();
    let server = SocketServer::new(server_context(EchoHandler), pool.clone(), io.clone());
    let addr = server.bind().unwrap();

    let client = SocketClient::connect(client_context(addr.port()), pool, &io).unwrap();
    assert!(wait_for(Duration::from_secs(2), || server.sessions().len() == 1));
    let session = server.sessions()[0].clone();

    server.stop();
    assert!(!session.is_connected());
    assert!(wait_for(Duration::from_secs(2), || !client.is_connected()));
    assert!(matches!(
        client.sync_read(),
        Err(Error::Read(inner)) if *inner == Error::Closed
    ));
    client.close();
    io.shutdown();
}

#[test]
fn test_connect_refused() {
    let io = IoLoop::new(1).unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = SocketClient::connect(client_context(port), test_pool(), &io);
    assert!(matches!(result, Err(Error::Io { .. })));
    io.shutdown();
}
