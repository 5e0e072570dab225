//! Listening servers and connecting clients that wire sockets to sessions

#[cfg(test)]
mod bootstrap_test;

mod socket_client;
mod socket_server;

pub use socket_client::SocketClient;
pub use socket_server::SocketServer;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::session::{Session, SessionId};

/// Live sessions of one server, keyed by [SessionId].
///
/// Closed sessions are pruned lazily.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session`, pruning closed ones first
    pub fn insert(&self, session: Arc<Session>) {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| s.is_connected());
        sessions.insert(session.id(), session);
    }

    /// Looks a session up by id
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.lock().get(&id).cloned()
    }

    /// Connected sessions, pruning closed ones
    pub fn connected(&self) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock();
        sessions.retain(|_, s| s.is_connected());
        sessions.values().cloned().collect()
    }

    /// Closes and forgets every session
    pub fn close_all(&self) {
        let drained: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in drained {
            session.close();
        }
    }
}
