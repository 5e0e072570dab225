use bytes::BytesMut;
use log::debug;
use std::fmt;
use std::net::SocketAddr;

use crate::buffer::SharedBuffer;
use crate::context::ConnectRole;
use crate::error::{Error, Result};
use crate::plugin::Plugin;
use crate::session::Session;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_NONE: u8 = 0x00;
const AUTH_PASSWORD: u8 = 0x02;
const AUTH_NO_ACCEPTABLE: u8 = 0xFF;
const AUTH_PASSWORD_VERSION: u8 = 0x01;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

const REP_SUCCESS: u8 = 0x00;

fn reply_message(rep: u8) -> &'static str {
    match rep {
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unassigned reply code",
    }
}

/// Where the proxy should connect to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Socks5Target {
    /// An IPv4 or IPv6 socket address
    Addr(SocketAddr),
    /// A host name resolved by the proxy
    Domain(String, u16),
}

impl fmt::Display for Socks5Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Socks5Target::Addr(addr) => write!(f, "{}", addr),
            Socks5Target::Domain(host, port) => write!(f, "{}:{}", host, port),
        }
    }
}

/// Opens a SOCKS5 CONNECT tunnel during `prepare` (client role only).
///
/// The context's host and port name the proxy; the target is where the
/// tunnel leads. Once the tunnel is up the plugin is pass-through.
#[derive(Debug, Clone)]
pub struct Socks5Plugin {
    target: Socks5Target,
    credentials: Option<(String, String)>,
}

impl Socks5Plugin {
    /// Creates a plugin tunnelling to `target` without authentication
    pub fn new(target: Socks5Target) -> Self {
        Self {
            target,
            credentials: None,
        }
    }

    /// Offers username/password authentication
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    fn greet(&self, session: &Session, inbound: &SharedBuffer) -> Result<()> {
        let greeting: &[u8] = if self.credentials.is_some() {
            &[SOCKS5_VERSION, 2, AUTH_NONE, AUTH_PASSWORD]
        } else {
            &[SOCKS5_VERSION, 1, AUTH_NONE]
        };
        session.write_transport(greeting)?;

        let reply = read_exact(session, inbound, 2)?;
        if reply[0] != SOCKS5_VERSION {
            return Err(Error::Proxy(format!("unsupported SOCKS version: {}", reply[0])));
        }
        match reply[1] {
            AUTH_NONE => Ok(()),
            AUTH_PASSWORD => self.authenticate(session, inbound),
            AUTH_NO_ACCEPTABLE => Err(Error::Proxy("no acceptable auth method".to_string())),
            other => Err(Error::Proxy(format!("unexpected auth method: {}", other))),
        }
    }

    fn authenticate(&self, session: &Session, inbound: &SharedBuffer) -> Result<()> {
        let (username, password) = self
            .credentials
            .as_ref()
            .ok_or_else(|| Error::Proxy("proxy demands credentials".to_string()))?;
        if username.len() > 255 || password.len() > 255 {
            return Err(Error::Proxy("credentials longer than 255 bytes".to_string()));
        }

        let mut request = Vec::with_capacity(3 + username.len() + password.len());
        request.push(AUTH_PASSWORD_VERSION);
        request.push(username.len() as u8);
        request.extend_from_slice(username.as_bytes());
        request.push(password.len() as u8);
        request.extend_from_slice(password.as_bytes());
        session.write_transport(&request)?;

        let reply = read_exact(session, inbound, 2)?;
        if reply[1] != 0 {
            return Err(Error::Proxy("authentication failed".to_string()));
        }
        Ok(())
    }

    fn connect(&self, session: &Session, inbound: &SharedBuffer) -> Result<()> {
        let mut request = vec![SOCKS5_VERSION, CMD_CONNECT, 0x00];
        match &self.target {
            Socks5Target::Addr(SocketAddr::V4(addr)) => {
                request.push(ATYP_IPV4);
                request.extend_from_slice(&addr.ip().octets());
                request.extend_from_slice(&addr.port().to_be_bytes());
            }
            Socks5Target::Addr(SocketAddr::V6(addr)) => {
                request.push(ATYP_IPV6);
                request.extend_from_slice(&addr.ip().octets());
                request.extend_from_slice(&addr.port().to_be_bytes());
            }
            Socks5Target::Domain(host, port) => {
                if host.is_empty() || host.len() > 255 {
                    return Err(Error::Proxy(format!("invalid target host {:?}", host)));
                }
                request.push(ATYP_DOMAIN);
                request.push(host.len() as u8);
                request.extend_from_slice(host.as_bytes());
                request.extend_from_slice(&port.to_be_bytes());
            }
        }
        session.write_transport(&request)?;

        let head = read_exact(session, inbound, 4)?;
        if head[0] != SOCKS5_VERSION {
            return Err(Error::Proxy(format!("unsupported SOCKS version: {}", head[0])));
        }
        if head[1] != REP_SUCCESS {
            return Err(Error::Proxy(format!(
                "connect to {} failed: {}",
                self.target,
                reply_message(head[1])
            )));
        }
        let addr_len = match head[3] {
            ATYP_IPV4 => 4,
            ATYP_IPV6 => 16,
            ATYP_DOMAIN => read_exact(session, inbound, 1)?[0] as usize,
            other => return Err(Error::Proxy(format!("unknown address type: {}", other))),
        };
        // bound address and port are of no use to a CONNECT client
        read_exact(session, inbound, addr_len + 2)?;
        Ok(())
    }
}

fn read_exact(session: &Session, inbound: &SharedBuffer, n: usize) -> Result<BytesMut> {
    session.wait_for_bytes(inbound, n)?;
    inbound
        .lock()
        .read_head(n)
        .ok_or_else(|| Error::Proxy("proxy reply vanished".to_string()))
}

impl Plugin for Socks5Plugin {
    fn name(&self) -> &str {
        "Socks5Plugin"
    }

    fn init(&self, session: &Session) -> Result<()> {
        if session.context().role() != ConnectRole::Client {
            return Err(Error::Config("socks5 plugin only supports the client role".to_string()));
        }
        Ok(())
    }

    fn prepare(&self, session: &Session) -> Result<()> {
        let inbound = session.inbound_buffer();
        self.greet(session, &inbound)?;
        self.connect(session, &inbound)?;
        debug!("session {} socks5 tunnel to {} established", session.id(), self.target);
        Ok(())
    }
}
