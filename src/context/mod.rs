//! Immutable configuration shared by a listener or an outbound client

#[cfg(test)]
mod context_test;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{LineSplitter, MessageSplitter};
use crate::error::{Error, Result};
use crate::filter::{Filter, FilterChain};
use crate::handler::Handler;
use crate::plugin::{Plugin, PluginChain, TlsPlugin};
use crate::tls::TlsManager;

/// Default bound on every blocking wait of a session
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Default size of the socket read buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Identifies a [SocketContext]; sessions refer to their context by this handle
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ContextId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

/// Which end of the connection a context drives
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum ConnectRole {
    /// Accepts inbound connections
    #[default]
    Server,
    /// Opens an outbound connection
    Client,
}

/// Plain configuration values of a context
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Host to listen on or connect to
    pub host: String,
    /// Port to listen on or connect to
    pub port: u16,
    /// Bound on connect, handshake, framing and synchronous waits
    pub read_timeout: Duration,
    /// Size of each socket read
    pub buffer_size: usize,
    /// Client or server
    pub role: ConnectRole,
    /// Period of the IDLE event; `None` disables it
    pub idle_interval: Option<Duration>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            read_timeout: DEFAULT_READ_TIMEOUT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            role: ConnectRole::Server,
            idle_interval: None,
        }
    }
}

impl ContextConfig {
    /// Configuration for a listener on `host:port`
    pub fn server(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            role: ConnectRole::Server,
            ..Default::default()
        }
    }

    /// Configuration for a client of `host:port`
    pub fn client(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            role: ConnectRole::Client,
            ..Default::default()
        }
    }

    /// Overrides the read timeout
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Overrides the read buffer size
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Raises IDLE every `idle_interval` while a session is connected
    pub fn with_idle_interval(mut self, idle_interval: Duration) -> Self {
        self.idle_interval = Some(idle_interval);
        self
    }

    /// `host:port` form
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration plus the handler, chains, splitter and TLS manager of a
/// listener or client. Immutable once built and shared by all its sessions.
pub struct SocketContext {
    id: ContextId,
    config: ContextConfig,
    handler: Arc<dyn Handler>,
    filters: FilterChain,
    plugins: PluginChain,
    splitter: Arc<dyn MessageSplitter>,
    tls: Option<Arc<TlsManager>>,
}

impl SocketContext {
    /// Starts composing a context
    pub fn builder(config: ContextConfig) -> ContextBuilder {
        ContextBuilder {
            config,
            handler: None,
            filters: FilterChain::new(),
            plugins: vec![],
            splitter: None,
            tls: None,
        }
    }

    /// Identifier of this context
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Plain configuration
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Host
    pub fn host(&self) -> &str {
        &self.config.host
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Bound on blocking waits
    pub fn read_timeout(&self) -> Duration {
        self.config.read_timeout
    }

    /// Socket read size
    pub fn buffer_size(&self) -> usize {
        self.config.buffer_size
    }

    /// Client or server
    pub fn role(&self) -> ConnectRole {
        self.config.role
    }

    /// Period of the IDLE event, if enabled
    pub fn idle_interval(&self) -> Option<Duration> {
        self.config.idle_interval
    }

    /// Lifecycle callbacks
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Encode/decode transforms
    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    /// Transport composition stages
    pub fn plugins(&self) -> &PluginChain {
        &self.plugins
    }

    /// Framing predicate
    pub fn splitter(&self) -> &dyn MessageSplitter {
        self.splitter.as_ref()
    }

    /// TLS manager, when the context terminates or originates TLS
    pub fn tls_manager(&self) -> Option<&Arc<TlsManager>> {
        self.tls.as_ref()
    }
}

impl fmt::Debug for SocketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketContext")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("filters", &self.filters.len())
            .field("plugins", &self.plugins.names())
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

/// Composes a [SocketContext]
pub struct ContextBuilder {
    config: ContextConfig,
    handler: Option<Arc<dyn Handler>>,
    filters: FilterChain,
    plugins: Vec<Arc<dyn Plugin>>,
    splitter: Option<Arc<dyn MessageSplitter>>,
    tls: Option<Arc<TlsManager>>,
}

impl ContextBuilder {
    /// Sets the lifecycle callbacks
    pub fn handler(mut self, handler: impl Handler + 'static) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Appends a filter; decode runs in insertion order, encode in reverse
    pub fn add_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.add_back(filter);
        self
    }

    /// Appends a plugin in front of the TLS stage
    pub fn add_plugin(mut self, plugin: impl Plugin + 'static) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Sets the framing predicate; lines are split by default
    pub fn splitter(mut self, splitter: impl MessageSplitter + 'static) -> Self {
        self.splitter = Some(Arc::new(splitter));
        self
    }

    /// Enables TLS; the TLS stage always runs after the other plugins
    pub fn tls(mut self, manager: TlsManager) -> Self {
        self.tls = Some(Arc::new(manager));
        self
    }

    /// Finishes the context
    pub fn build(self) -> Result<SocketContext> {
        let handler = self
            .handler
            .ok_or_else(|| Error::Config("a handler is required".to_string()))?;
        if self.config.buffer_size == 0 {
            return Err(Error::Config("buffer size must be positive".to_string()));
        }
        if self.config.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be positive".to_string()));
        }
        if self.config.idle_interval.is_some_and(|interval| interval.is_zero()) {
            return Err(Error::Config("idle interval must be positive".to_string()));
        }

        let mut plugins = self.plugins;
        if self.tls.is_some() {
            plugins.push(Arc::new(TlsPlugin::new()));
        }

        Ok(SocketContext {
            id: ContextId::next(),
            config: self.config,
            handler,
            filters: self.filters,
            plugins: PluginChain::new(plugins),
            splitter: self
                .splitter
                .unwrap_or_else(|| Arc::new(LineSplitter::default())),
            tls: self.tls,
        })
    }
}
