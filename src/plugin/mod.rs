//! Transport composition stages between the socket and the filter chain


mod socks5_plugin;
mod tls_plugin;

pub use socks5_plugin::{Socks5Plugin, Socks5Target};
pub use tls_plugin::TlsPlugin;

use bytes::BytesMut;
use log::warn;
use std::sync::Arc;

use crate::buffer::SharedBuffer;
use crate::error::Result;
use crate::session::Session;

/// One stage of the transport.
///
/// `init` runs once when the session is created, `prepare` may block to finish
/// a sub-protocol negotiation before any data flows, `wrap` transforms
/// outbound bytes and `unwrap` moves inbound bytes from the plugin's own
/// buffer into the session-visible one.
pub trait Plugin: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// One-time setup
    fn init(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Blocking negotiation before data flows
    fn prepare(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// The buffer inbound socket bytes should land in, if this plugin owns one
    fn read_buffer(&self, _session: &Session) -> Option<SharedBuffer> {
        None
    }

    /// Outbound transform. `None` means the plugin already sent the bytes.
    fn wrap(&self, _session: &Session, buf: BytesMut) -> Result<Option<BytesMut>> {
        Ok(Some(buf))
    }

    /// Moves plugin-private inbound bytes towards the session buffer
    fn unwrap(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Teardown
    fn release(&self, _session: &Session) {}
}

/// Ordered plugins. Setup and inbound steps run front to back, outbound and
/// teardown steps back to front.
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    /// Creates a chain from plugins in front-to-back order
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    /// Number of plugins
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether the chain is empty, meaning raw pass-through
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Plugin names in chain order
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    /// Runs every `init`, front to back
    pub fn init(&self, session: &Session) -> Result<()> {
        for plugin in self.plugins.iter() {
            plugin.init(session)?;
        }
        Ok(())
    }

    /// Runs every `prepare`, front to back, stopping at the first failure
    pub fn prepare(&self, session: &Session) -> Result<()> {
        for plugin in self.plugins.iter() {
            if let Err(err) = plugin.prepare(session) {
                warn!(
                    "session {} plugin {} prepare failed: {}",
                    session.id(),
                    plugin.name(),
                    err
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// The read buffer of the last plugin that owns one
    pub fn read_buffer(&self, session: &Session) -> Option<SharedBuffer> {
        self.plugins
            .iter()
            .filter_map(|plugin| plugin.read_buffer(session))
            .last()
    }

    /// Runs every `wrap`, back to front, stopping once a plugin sent the bytes
    pub fn wrap(&self, session: &Session, buf: BytesMut) -> Result<Option<BytesMut>> {
        let mut buf = buf;
        for plugin in self.plugins.iter().rev() {
            match plugin.wrap(session, buf)? {
                Some(next) => buf = next,
                None => return Ok(None),
            }
        }
        Ok(Some(buf))
    }

    /// Runs every `unwrap`, front to back
    pub fn unwrap(&self, session: &Session) -> Result<()> {
        for plugin in self.plugins.iter() {
            plugin.unwrap(session)?;
        }
        Ok(())
    }

    /// Runs every `release`, back to front
    pub fn release(&self, session: &Session) {
        for plugin in self.plugins.iter().rev() {
            plugin.release(session);
        }
    }
}
