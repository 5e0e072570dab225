//! The callback contract that upper protocol layers implement

use bytes::{Bytes, BytesMut};
use log::warn;
use std::any::Any;

use crate::error::{Error, Result};
use crate::session::Session;

/// A decoded inbound value or an outbound value before encoding.
///
/// Filters and handlers agree on concrete types by downcasting. The raw frame
/// handed to the first filter is always a [BytesMut].
pub type Message = Box<dyn Any + Send>;

/// Converts an encoded outbound value into the bytes that go on the wire.
///
/// [BytesMut], [Bytes], `Vec<u8>`, [String] and `&'static str` are accepted.
pub fn message_into_bytes(msg: Message) -> Result<BytesMut> {
    let msg = match msg.downcast::<BytesMut>() {
        Ok(buf) => return Ok(*buf),
        Err(msg) => msg,
    };
    let msg = match msg.downcast::<Bytes>() {
        Ok(buf) => return Ok(BytesMut::from(&buf[..])),
        Err(msg) => msg,
    };
    let msg = match msg.downcast::<Vec<u8>>() {
        Ok(buf) => return Ok(BytesMut::from(&buf[..])),
        Err(msg) => msg,
    };
    let msg = match msg.downcast::<String>() {
        Ok(s) => return Ok(BytesMut::from(s.as_bytes())),
        Err(msg) => msg,
    };
    match msg.downcast::<&'static str>() {
        Ok(s) => Ok(BytesMut::from(s.as_bytes())),
        Err(_) => Err(Error::UnsupportedMessage(
            "outbound value must be bytes or a string after encoding".to_string(),
        )),
    }
}

/// Session lifecycle callbacks.
///
/// Callbacks run on worker-pool threads, except CONNECT on the client side
/// which runs on the connecting thread. Returned values go through the filter
/// chain's encode path and are sent on the same session.
pub trait Handler: Send + Sync {
    /// The session finished plugin preparation and may exchange data
    fn on_connect(&self, _session: &Session) -> Option<Message> {
        None
    }

    /// The session is gone; every in-flight RECEIVE has finished
    fn on_disconnect(&self, _session: &Session) {}

    /// A frame passed the decode chain
    fn on_receive(&self, session: &Session, msg: Message) -> Option<Message>;

    /// Bytes were written by a send call
    fn on_sent(&self, _session: &Session, _sent: &[u8]) {}

    /// Event processing failed on this session
    fn on_exception(&self, session: &Session, err: &Error) {
        warn!("session {} exception: {}", session.id(), err);
    }

    /// The context's idle interval elapsed. Sessions with a
    /// [Heartbeat](crate::session::Heartbeat) usually call `beat` here.
    fn on_idle(&self, _session: &Session) {}

    /// Whether decoded values are parked for [Session::sync_read] callers
    fn is_synchronous(&self) -> bool {
        false
    }
}

/// A handler that parks every decoded value, or the error that replaced it,
/// in the session's response slot for [Session::sync_read] to pick up.
#[derive(Debug, Default)]
pub struct SynchronousHandler;

impl SynchronousHandler {
    /// Creates a new SynchronousHandler
    pub fn new() -> Self {
        Self
    }
}

impl Handler for SynchronousHandler {
    fn on_receive(&self, session: &Session, msg: Message) -> Option<Message> {
        session.responses().push(Ok(msg));
        session.signal().notify();
        None
    }

    fn on_exception(&self, session: &Session, err: &Error) {
        session.responses().push(Err(err.clone()));
        session.signal().notify();
    }

    fn is_synchronous(&self) -> bool {
        true
    }
}
