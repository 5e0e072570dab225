use log::{debug, trace};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use crate::buffer::SharedBuffer;
use crate::context::ConnectRole;
use crate::session::Session;

/// A heartbeat frame seen on the wire
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Beat {
    /// The peer asked for a beat
    Ping,
    /// The peer answered a beat
    Pong,
}

/// Ping/pong liveness check driven by IDLE events.
///
/// Inbound ping and pong marks are cut out of the session buffer before
/// framing sees them. Each [Heartbeat::beat] waits one idle interval for the
/// peer's mark and answers it; a missing mark counts as a failure.
#[derive(Debug)]
pub struct Heartbeat {
    ping: Vec<u8>,
    pong: Vec<u8>,
    beats: Mutex<VecDeque<Beat>>,
    first_beat: AtomicBool,
    failures: AtomicUsize,
}

impl Heartbeat {
    /// Creates a heartbeat using `ping` and `pong` as marks
    pub fn new(ping: impl Into<Vec<u8>>, pong: impl Into<Vec<u8>>) -> Self {
        Self {
            ping: ping.into(),
            pong: pong.into(),
            beats: Mutex::new(VecDeque::new()),
            first_beat: AtomicBool::new(true),
            failures: AtomicUsize::new(0),
        }
    }

    /// Ping mark
    pub fn ping(&self) -> &[u8] {
        &self.ping
    }

    /// Pong mark
    pub fn pong(&self) -> &[u8] {
        &self.pong
    }

    /// Consecutive beats that went unanswered
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Marks received but not yet answered
    pub fn pending(&self) -> usize {
        self.beats.lock().len()
    }

    /// Removes every ping and pong mark from `buffer`, queueing them for
    /// [Heartbeat::beat]. Returns how many marks were removed.
    pub fn intercept(&self, buffer: &SharedBuffer) -> usize {
        let mut buffer = buffer.lock();
        let mut beats = self.beats.lock();
        let mut found = 0;
        loop {
            let ping_at = buffer.index_of(&self.ping);
            let (beat, pos, len) = if ping_at >= 0 {
                (Beat::Ping, ping_at, self.ping.len())
            } else {
                let pong_at = buffer.index_of(&self.pong);
                if pong_at < 0 {
                    break;
                }
                (Beat::Pong, pong_at, self.pong.len())
            };
            buffer.shrink_at(pos as usize, len);
            beats.push_back(beat);
            found += 1;
        }
        found
    }

    /// Runs one heartbeat round for `session`.
    ///
    /// The first round only starts the exchange: the client sends a ping.
    /// Later rounds wait up to one idle interval for the peer's mark, then
    /// answer a ping with a pong and a pong with a ping. Returns whether the
    /// peer was heard from.
    pub fn beat(&self, session: &Session) -> bool {
        if self.first_beat.swap(false, Ordering::SeqCst) {
            if session.context().role() == ConnectRole::Client {
                return self.send(session, Beat::Pong);
            }
            return true;
        }

        let context = session.context();
        let interval = context.idle_interval().unwrap_or_else(|| context.read_timeout());
        let deadline = Instant::now() + interval;
        session.signal().wait_until(deadline, || {
            !self.beats.lock().is_empty() || !session.is_connected()
        });

        let beat = self.beats.lock().pop_front();
        match beat {
            Some(beat) => self.send(session, beat),
            None => {
                let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("session {} heartbeat missed, {} in a row", session.id(), failures);
                false
            }
        }
    }

    /// Answers `heard` with the opposite mark
    fn send(&self, session: &Session, heard: Beat) -> bool {
        let mark = match heard {
            Beat::Ping => &self.pong,
            Beat::Pong => &self.ping,
        };
        match session.send_raw(mark) {
            Ok(_) => {
                trace!("session {} heartbeat answered {:?}", session.id(), heard);
                self.failures.store(0, Ordering::SeqCst);
                true
            }
            Err(err) => {
                debug!("session {} heartbeat send failed: {}", session.id(), err);
                self.failures.fetch_add(1, Ordering::SeqCst);
                false
            }
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new("PING", "PONG")
    }
}
