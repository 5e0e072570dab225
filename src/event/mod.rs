//! Session lifecycle events, their trigger and their processing


mod process;
mod trigger;

pub use process::EventProcess;
pub use trigger::EventTrigger;

use bytes::BytesMut;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::Error;
use crate::session::Session;

/// Kind of a session event
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventName {
    /// A connection was accepted and plugins must be initialized
    Accept,
    /// Plugins must be prepared, then the handler greets the peer
    Connect,
    /// The session is gone
    Disconnect,
    /// Bytes arrived
    Receive,
    /// A send completed
    Sent,
    /// Processing failed
    Exception,
    /// The idle interval elapsed
    Idle,
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventName::Accept => "ACCEPT",
            EventName::Connect => "CONNECT",
            EventName::Disconnect => "DISCONNECT",
            EventName::Receive => "RECEIVE",
            EventName::Sent => "SENT",
            EventName::Exception => "EXCEPTION",
            EventName::Idle => "IDLE",
        };
        f.write_str(name)
    }
}

/// Progress of an event
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventState {
    /// Created, not yet picked up
    Ready = 0,
    /// Being processed
    Dispatching = 1,
    /// Done
    Finished = 2,
}

impl EventState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => EventState::Ready,
            1 => EventState::Dispatching,
            _ => EventState::Finished,
        }
    }
}

/// Data carried by an event
#[derive(Debug)]
pub enum EventPayload {
    /// The bytes a send wrote
    Sent(BytesMut),
    /// The failure to report
    Exception(Error),
}

/// One lifecycle event of a session
pub struct Event {
    name: EventName,
    session: Arc<Session>,
    payload: Mutex<Option<EventPayload>>,
    state: AtomicU8,
}

impl Event {
    /// Creates an event in [EventState::Ready]
    pub fn new(name: EventName, session: Arc<Session>, payload: Option<EventPayload>) -> Self {
        Self {
            name,
            session,
            payload: Mutex::new(payload),
            state: AtomicU8::new(EventState::Ready as u8),
        }
    }

    /// Kind of the event
    pub fn name(&self) -> EventName {
        self.name
    }

    /// Owning session
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Current state
    pub fn state(&self) -> EventState {
        EventState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Whether the event reached [EventState::Finished]
    pub fn is_finished(&self) -> bool {
        self.state() == EventState::Finished
    }

    pub(crate) fn set_state(&self, state: EventState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    /// Takes the payload; later calls get `None`
    pub fn take_payload(&self) -> Option<EventPayload> {
        self.payload.lock().take()
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("session", &self.session.id())
            .field("state", &self.state())
            .finish()
    }
}
