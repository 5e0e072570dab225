use log::{debug, trace};

use crate::error::{Error, Result};
use crate::event::{Event, EventName, EventPayload, EventState};
use crate::handler::{message_into_bytes, Message};
use crate::session::Session;

/// What each event does to its session.
///
/// Failures inside processing never travel back to whoever raised the event:
/// disconnects close the session quietly, everything else reaches the
/// handler's `on_exception` and then closes the session.
pub struct EventProcess;

impl EventProcess {
    /// Processes `event`, returning its outcome for inline callers
    pub fn process(event: &Event) -> Result<()> {
        event.set_state(EventState::Dispatching);
        let session = event.session();

        let result = match event.name() {
            EventName::Accept => Self::on_accepted(session),
            EventName::Connect => Self::on_connect(session),
            EventName::Disconnect => {
                let read_timeout = session.context().read_timeout();
                if !session.trigger().wait_receive_idle(read_timeout) {
                    debug!("session {} disconnect while receive is still running", session.id());
                }
                Self::on_disconnect(session);
                Ok(())
            }
            EventName::Receive => Self::on_read(session),
            EventName::Sent => {
                if let Some(EventPayload::Sent(sent)) = event.take_payload() {
                    Self::on_sent(session, &sent);
                }
                Ok(())
            }
            EventName::Exception => {
                if let Some(EventPayload::Exception(err)) = event.take_payload() {
                    Self::on_exception(session, &err);
                }
                Ok(())
            }
            EventName::Idle => {
                Self::on_idle(session);
                Ok(())
            }
        };

        if let Err(err) = &result {
            Self::fail(session, event.name(), err);
        }
        result
    }

    fn fail(session: &Session, name: EventName, err: &Error) {
        if err.is_disconnect() {
            trace!("session {} {} ended by disconnect", session.id(), name);
        } else {
            Self::on_exception(session, err);
        }
        session.close();
    }

    /// Initializes the plugin chain
    pub fn on_accepted(session: &Session) -> Result<()> {
        session.context().plugins().init(session)
    }

    /// Prepares the plugin chain, greets the peer and picks up bytes that
    /// arrived during preparation
    pub fn on_connect(session: &Session) -> Result<()> {
        let context = session.context().clone();
        context.plugins().prepare(session)?;
        session.mark_prepared();
        debug!("session {} connected", session.id());

        if let Some(greeting) = context.handler().on_connect(session) {
            session.send(greeting)?;
        }
        if !session.read_buffer().lock().is_empty() {
            session.trigger().fire_receive_thread(session)?;
        }
        Ok(())
    }

    /// Tells the handler the session is gone
    pub fn on_disconnect(session: &Session) {
        session.loader().lock().reset();
        session.context().handler().on_disconnect(session);
        debug!("session {} disconnected", session.id());
    }

    /// Frames every complete message, decodes it, hands it to the handler and
    /// sends back what the handler returns
    pub fn on_read(session: &Session) -> Result<()> {
        let context = session.context().clone();
        loop {
            let frame = {
                let mut loader = session.loader().lock();
                loader.read(session)?
            };
            let Some(frame) = frame else {
                return Ok(());
            };
            let Some(value) = context.filters().decode(session, Box::new(frame))? else {
                continue;
            };
            if let Some(reply) = context.handler().on_receive(session, value) {
                session.send(reply)?;
            }
        }
    }

    /// Tells the handler which bytes were written
    pub fn on_sent(session: &Session, sent: &[u8]) {
        session.context().handler().on_sent(session, sent);
    }

    /// Tells the handler the idle interval elapsed
    pub fn on_idle(session: &Session) {
        trace!("session {} idle", session.id());
        session.context().handler().on_idle(session);
    }

    /// Tells the handler about a failure
    pub fn on_exception(session: &Session, err: &Error) {
        session.context().handler().on_exception(session, err);
    }

    /// Writes an encoded value through the plugin chain and raises SENT
    pub fn send_message(session: &Session, msg: Message) -> Result<()> {
        let bytes = message_into_bytes(msg).map_err(|err| Error::Send(Box::new(err)))?;
        session.send_raw(&bytes).map_err(|err| match err {
            Error::Closed => Error::Closed,
            err => Error::Send(Box::new(err)),
        })?;
        session.trigger().fire_sent_thread(session, bytes)
    }
}
