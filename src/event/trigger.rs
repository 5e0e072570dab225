use bytes::BytesMut;
use log::{trace, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::event::{Event, EventName, EventPayload, EventProcess, EventState};
use crate::executor::WorkerPool;
use crate::session::Session;

/// Raises the events of one session, either inline on the calling thread or
/// on the worker pool.
///
/// RECEIVE is single-flight: it is only dispatched while the session is
/// connected, prepared and past its TLS handshake, and never while another
/// RECEIVE of the same session is unfinished. A suppressed RECEIVE is
/// remembered and raised again when the in-flight one finishes.
pub struct EventTrigger {
    pool: Arc<WorkerPool>,
    outstanding: Mutex<Vec<Arc<Event>>>,
    idle: Condvar,
    rearm: AtomicBool,
}

impl EventTrigger {
    /// Creates a trigger dispatching pooled events on `pool`
    pub fn new(pool: Arc<WorkerPool>) -> Self {
        Self {
            pool,
            outstanding: Mutex::new(vec![]),
            idle: Condvar::new(),
            rearm: AtomicBool::new(false),
        }
    }

    /// Pool that runs pooled events
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // inline

    /// Initializes plugins on the calling thread
    pub fn fire_accept(&self, session: &Session) -> Result<()> {
        self.fire_inline(session, EventName::Accept)
    }

    /// Prepares plugins and greets the peer on the calling thread
    pub fn fire_connect(&self, session: &Session) -> Result<()> {
        self.fire_inline(session, EventName::Connect)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // pooled

    /// Prepares plugins and greets the peer on the pool
    pub fn fire_connect_thread(&self, session: &Session) -> Result<()> {
        self.fire_pooled(session, EventName::Connect, None)
    }

    /// Frames and handles buffered bytes on the pool, unless suppressed
    pub fn fire_receive_thread(&self, session: &Session) -> Result<()> {
        let Some(owner) = session.arc() else {
            return Ok(());
        };
        let event = {
            let mut outstanding = self.outstanding.lock();
            outstanding.retain(|event| !event.is_finished());
            if outstanding
                .iter()
                .any(|event| event.name() == EventName::Receive)
            {
                self.rearm.store(true, Ordering::SeqCst);
                return Ok(());
            }
            if !session.is_connected() || !session.is_prepared() || !session.is_handshake_done() {
                return Ok(());
            }
            let event = Arc::new(Event::new(EventName::Receive, owner, None));
            outstanding.push(event.clone());
            event
        };
        self.dispatch_pooled(event)
    }

    /// Reports written bytes on the pool
    pub fn fire_sent_thread(&self, session: &Session, sent: BytesMut) -> Result<()> {
        self.fire_pooled(session, EventName::Sent, Some(EventPayload::Sent(sent)))
    }

    /// Reports the end of the session on the pool, after in-flight RECEIVE
    pub fn fire_disconnect_thread(&self, session: &Session) -> Result<()> {
        self.fire_pooled(session, EventName::Disconnect, None)
    }

    /// Reports a failure on the pool
    pub fn fire_exception_thread(&self, session: &Session, err: Error) -> Result<()> {
        self.fire_pooled(session, EventName::Exception, Some(EventPayload::Exception(err)))
    }

    /// Reports an elapsed idle interval on the pool. Skipped while the
    /// session is not prepared or a previous IDLE is still running.
    pub fn fire_idle_thread(&self, session: &Session) -> Result<()> {
        let Some(owner) = session.arc() else {
            return Ok(());
        };
        let event = {
            let mut outstanding = self.outstanding.lock();
            outstanding.retain(|event| !event.is_finished());
            if !session.is_connected()
                || !session.is_prepared()
                || outstanding.iter().any(|event| event.name() == EventName::Idle)
            {
                return Ok(());
            }
            let event = Arc::new(Event::new(EventName::Idle, owner, None));
            outstanding.push(event.clone());
            event
        };
        self.dispatch_pooled(event)
    }

    ////////////////////////////////////////////////////////////////////////////////////////////////
    // bookkeeping

    /// Whether an event of kind `name` has not finished yet
    pub fn has_unfinished(&self, name: EventName) -> bool {
        self.outstanding
            .lock()
            .iter()
            .any(|event| event.name() == name && !event.is_finished())
    }

    /// Number of unfinished events
    pub fn unfinished(&self) -> usize {
        self.outstanding
            .lock()
            .iter()
            .filter(|event| !event.is_finished())
            .count()
    }

    /// Waits until no RECEIVE is unfinished, at most `timeout`.
    /// Returns whether the session became idle.
    pub fn wait_receive_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.outstanding.lock();
        loop {
            outstanding.retain(|event| !event.is_finished());
            if !outstanding
                .iter()
                .any(|event| event.name() == EventName::Receive)
            {
                return true;
            }
            if self.idle.wait_until(&mut outstanding, deadline).timed_out() {
                outstanding.retain(|event| !event.is_finished());
                return !outstanding
                    .iter()
                    .any(|event| event.name() == EventName::Receive);
            }
        }
    }

    fn fire_inline(&self, session: &Session, name: EventName) -> Result<()> {
        let Some(owner) = session.arc() else {
            return Err(Error::Closed);
        };
        let event = Arc::new(Event::new(name, owner, None));
        self.outstanding.lock().push(event.clone());
        let result = EventProcess::process(&event);
        self.finish(&event);
        result
    }

    fn fire_pooled(&self, session: &Session, name: EventName, payload: Option<EventPayload>) -> Result<()> {
        let Some(owner) = session.arc() else {
            return Ok(());
        };
        let event = Arc::new(Event::new(name, owner, payload));
        self.outstanding.lock().push(event.clone());
        self.dispatch_pooled(event)
    }

    fn dispatch_pooled(&self, event: Arc<Event>) -> Result<()> {
        trace!("session {} dispatch {}", event.session().id(), event.name());
        let job = event.clone();
        let submitted = self.pool.execute(move || {
            let _ = EventProcess::process(&job);
            job.session().trigger().finish(&job);
        });
        if let Err(err) = submitted {
            warn!(
                "session {} event {} rejected: {}",
                event.session().id(),
                event.name(),
                err
            );
            self.finish(&event);
            return Err(err);
        }
        Ok(())
    }

    fn finish(&self, event: &Arc<Event>) {
        {
            let mut outstanding = self.outstanding.lock();
            event.set_state(EventState::Finished);
            outstanding.retain(|e| !e.is_finished());
            self.idle.notify_all();
        }

        if event.name() == EventName::Receive && self.rearm.swap(false, Ordering::SeqCst) {
            let session = event.session();
            if let Err(err) = self.fire_receive_thread(session) {
                warn!("session {} could not re-raise receive: {}", session.id(), err);
            }
        }
    }
}
