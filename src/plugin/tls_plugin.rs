use bytes::BytesMut;
use log::{debug, trace};
use std::time::Instant;

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::session::Session;
use crate::tls::HandshakeIo;

/// Terminates or originates TLS using the context's
/// [TlsManager](crate::tls::TlsManager).
///
/// Inbound records land in the parser's network buffer; decrypted bytes are
/// moved into the session buffer once the handshake is done.
#[derive(Debug, Default)]
pub struct TlsPlugin;

impl TlsPlugin {
    /// Creates a new TlsPlugin
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for TlsPlugin {
    fn name(&self) -> &str {
        "TlsPlugin"
    }

    fn init(&self, session: &Session) -> Result<()> {
        if session.tls_parser().is_some() {
            return Ok(());
        }
        let context = session.context();
        let manager = context
            .tls_manager()
            .ok_or_else(|| Error::Config("tls plugin without a tls manager".to_string()))?;
        let parser = manager.create_parser(context.role(), context.host(), context.buffer_size())?;
        session.install_tls_parser(parser);
        Ok(())
    }

    fn prepare(&self, session: &Session) -> Result<()> {
        let parser = session
            .tls_parser()
            .ok_or_else(|| Error::Tls("tls parser was not initialized".to_string()))?;
        parser.do_handshake(session, session.context().read_timeout())?;
        debug!("session {} tls handshake done", session.id());
        // records that trailed the handshake may already hold application data
        self.unwrap(session)
    }

    fn read_buffer(&self, session: &Session) -> Option<SharedBuffer> {
        session.tls_parser().map(|parser| parser.net_buffer().clone())
    }

    fn wrap(&self, session: &Session, buf: BytesMut) -> Result<Option<BytesMut>> {
        match session.tls_parser() {
            Some(parser) => parser.wrap(&buf).map(Some),
            None => Ok(Some(buf)),
        }
    }

    fn unwrap(&self, session: &Session) -> Result<()> {
        let parser = match session.tls_parser() {
            Some(parser) if parser.is_handshake_done() => parser,
            _ => return Ok(()),
        };
        parser.unwrap(session.read_buffer())?;
        session.write_records(|| parser.pending_records())
    }

    fn release(&self, session: &Session) {
        if let Some(parser) = session.tls_parser() {
            // the socket may already be gone
            let _ = session.write_records(|| parser.close());
        }
    }
}

impl HandshakeIo for Session {
    fn send_handshake(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.write_transport(bytes)
    }

    fn wait_for_net(&self, net: &SharedBuffer, deadline: Instant) -> Result<()> {
        self.signal().wait_until(deadline, || {
            !net.lock().is_empty() || !self.is_connected() || self.is_eof()
        });
        if !net.lock().is_empty() {
            Ok(())
        } else if !self.is_connected() {
            Err(Error::Closed)
        } else if self.is_eof() {
            Err(Error::RemoteDisconnect)
        } else {
            trace!("session {} tls handshake timed out", self.id());
            Err(Error::Timeout("tls handshake".to_string()))
        }
    }
}
