//! TLS termination and origination over rustls


mod parser;

pub use parser::{HandshakeIo, HandshakeStatus, TlsParser, HANDSHAKE_BOUND};

use log::{debug, warn};
use parking_lot::Mutex;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::version::{TLS12, TLS13};
use rustls::{
    ClientConfig, ClientConnection, DigitallySignedStruct, DistinguishedName, RootCertStore,
    ServerConfig, ServerConnection, SignatureScheme, SupportedProtocolVersion,
};
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use crate::context::ConnectRole;
use crate::error::{Error, Result};

/// Protocol versions a [TlsManager] negotiates
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlsProtocol {
    /// TLS 1.2 only
    Tls12,
    /// TLS 1.3 only
    Tls13,
    /// Any version rustls supports
    Any,
}

impl TlsProtocol {
    /// Parses a protocol name such as `TLS`, `TLSv1.2` or `TLSv1.3`.
    /// `SSL` and the empty name mean any supported version.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "" | "TLS" | "SSL" | "DEFAULT" => Ok(TlsProtocol::Any),
            "TLSV1.2" | "TLS1.2" => Ok(TlsProtocol::Tls12),
            "TLSV1.3" | "TLS1.3" => Ok(TlsProtocol::Tls13),
            other => Err(Error::Config(format!("unsupported tls protocol {}", other))),
        }
    }

    fn versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        static BOTH: [&SupportedProtocolVersion; 2] = [&TLS13, &TLS12];
        static ONLY_12: [&SupportedProtocolVersion; 1] = [&TLS12];
        static ONLY_13: [&SupportedProtocolVersion; 1] = [&TLS13];
        match self {
            TlsProtocol::Tls12 => &ONLY_12,
            TlsProtocol::Tls13 => &ONLY_13,
            TlsProtocol::Any => &BOTH,
        }
    }
}

/// Certificate chain, private key and trust roots, loaded from PEM
#[derive(Debug, Default)]
pub struct CertificateBundle {
    certs: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    roots: Vec<CertificateDer<'static>>,
}

impl CertificateBundle {
    /// A bundle holding an identity: certificate chain plus private key
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let certs = load_certs(&mut &cert_pem[..])?;
        let key = load_private_key(&mut &key_pem[..])?;
        Ok(Self {
            certs,
            key: Some(key),
            roots: vec![],
        })
    }

    /// Same as [CertificateBundle::from_pem], reading from files
    pub fn from_pem_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self> {
        let certs = load_certs(&mut open(cert_path.as_ref())?)?;
        let key = load_private_key(&mut open(key_path.as_ref())?)?;
        Ok(Self {
            certs,
            key: Some(key),
            roots: vec![],
        })
    }

    /// A bundle holding only trust roots, for clients without an identity
    pub fn trust_roots_pem(roots_pem: &[u8]) -> Result<Self> {
        Self::default().with_roots_pem(roots_pem)
    }

    /// Adds trust roots used to verify the peer
    pub fn with_roots_pem(mut self, roots_pem: &[u8]) -> Result<Self> {
        self.roots.extend(load_certs(&mut &roots_pem[..])?);
        Ok(self)
    }

    fn has_identity(&self) -> bool {
        !self.certs.is_empty() && self.key.is_some()
    }

    fn identity(&self) -> Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
        let key = self.key.as_ref()?.clone_key();
        if self.certs.is_empty() {
            return None;
        }
        Some((self.certs.clone(), key))
    }

    /// Explicit roots, or the bundle's own chain when none were given
    fn root_store(&self) -> Result<Option<RootCertStore>> {
        let source = if self.roots.is_empty() {
            &self.certs
        } else {
            &self.roots
        };
        if source.is_empty() {
            return Ok(None);
        }
        let mut store = RootCertStore::empty();
        for cert in source.iter() {
            store.add(cert.clone())?;
        }
        Ok(Some(store))
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("failed to open {}: {}", path.display(), e)))?;
    Ok(BufReader::new(file))
}

fn load_certs(reader: &mut dyn BufRead) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(Error::Config("no certificate found".to_string()));
    }
    Ok(certs)
}

fn load_private_key(reader: &mut dyn BufRead) -> Result<PrivateKeyDer<'static>> {
    let items = rustls_pemfile::read_all(reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::Config(format!("failed to parse private key: {}", e)))?;
    for item in items {
        match item {
            rustls_pemfile::Item::Pkcs8Key(key) => return Ok(PrivateKeyDer::Pkcs8(key)),
            rustls_pemfile::Item::Pkcs1Key(key) => return Ok(PrivateKeyDer::Pkcs1(key)),
            rustls_pemfile::Item::Sec1Key(key) => return Ok(PrivateKeyDer::Sec1(key)),
            _ => continue,
        }
    }
    Err(Error::Config("no private key found".to_string()))
}

/// Builds one [TlsParser] per session in client or server role.
///
/// Peers are verified against the bundle's roots (or its own chain). With no
/// trust material at all, client parsers can only be built after
/// [TlsManager::danger_trust_all] opted into skipping verification.
pub struct TlsManager {
    protocol: TlsProtocol,
    bundle: Option<CertificateBundle>,
    client_auth: bool,
    trust_all: bool,
    server_name: Option<String>,
    provider: Arc<CryptoProvider>,
    client_config: Mutex<Option<Arc<ClientConfig>>>,
    server_config: Mutex<Option<Arc<ServerConfig>>>,
}

impl TlsManager {
    /// Creates a manager for the named protocol, e.g. `TLSv1.3`
    pub fn new(protocol: &str) -> Result<Self> {
        Ok(Self {
            protocol: TlsProtocol::from_name(protocol)?,
            bundle: None,
            client_auth: false,
            trust_all: false,
            server_name: None,
            provider: Arc::new(rustls::crypto::ring::default_provider()),
            client_config: Mutex::new(None),
            server_config: Mutex::new(None),
        })
    }

    /// Sets the certificate material
    pub fn with_certificate(mut self, bundle: CertificateBundle) -> Self {
        self.bundle = Some(bundle);
        self
    }

    /// Requires clients to present a certificate (server role)
    pub fn with_client_auth(mut self, required: bool) -> Self {
        self.client_auth = required;
        self
    }

    /// Accepts any peer certificate. Insecure; intended for tests and closed
    /// networks.
    pub fn danger_trust_all(mut self) -> Self {
        self.trust_all = true;
        self
    }

    /// Server name sent in SNI and verified against the server certificate,
    /// instead of the context host
    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Negotiated protocol versions
    pub fn protocol(&self) -> TlsProtocol {
        self.protocol
    }

    /// Whether server parsers demand client certificates
    pub fn client_auth(&self) -> bool {
        self.client_auth
    }

    /// Creates a parser for a session of the given role; `host` names the
    /// server for client parsers unless a server name was configured
    pub fn create_parser(&self, role: ConnectRole, host: &str, buffer_size: usize) -> Result<TlsParser> {
        match role {
            ConnectRole::Client => self.create_client_parser(host, buffer_size),
            ConnectRole::Server => self.create_server_parser(buffer_size),
        }
    }

    /// Creates a client-role parser
    pub fn create_client_parser(&self, host: &str, buffer_size: usize) -> Result<TlsParser> {
        let name = self.server_name.as_deref().unwrap_or(host).to_string();
        let server_name = ServerName::try_from(name)
            .map_err(|e| Error::Config(format!("invalid tls server name: {}", e)))?;
        let conn = ClientConnection::new(self.client_config()?, server_name)?;
        Ok(TlsParser::new(conn, buffer_size))
    }

    /// Creates a server-role parser
    pub fn create_server_parser(&self, buffer_size: usize) -> Result<TlsParser> {
        let conn = ServerConnection::new(self.server_config()?)?;
        Ok(TlsParser::new(conn, buffer_size))
    }

    fn client_config(&self) -> Result<Arc<ClientConfig>> {
        let mut cached = self.client_config.lock();
        if let Some(config) = cached.as_ref() {
            return Ok(config.clone());
        }

        let builder = ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.protocol.versions())?;
        let roots = match self.bundle.as_ref() {
            Some(bundle) => bundle.root_store()?,
            None => None,
        };
        let builder = match (roots, self.trust_all) {
            (_, true) => {
                warn!("tls client accepts any server certificate");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(TrustAllVerifier::new(
                        self.provider.clone(),
                    )))
            }
            (Some(roots), false) => builder.with_root_certificates(roots),
            (None, false) => {
                return Err(Error::Config(
                    "no trust roots configured; supply certificates or opt into danger_trust_all"
                        .to_string(),
                ))
            }
        };
        let config = match self.bundle.as_ref().and_then(|b| b.identity()) {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        };

        let config = Arc::new(config);
        *cached = Some(config.clone());
        debug!("tls client config built for {:?}", self.protocol);
        Ok(config)
    }

    fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let mut cached = self.server_config.lock();
        if let Some(config) = cached.as_ref() {
            return Ok(config.clone());
        }

        let bundle = self
            .bundle
            .as_ref()
            .filter(|b| b.has_identity())
            .ok_or_else(|| Error::Config("tls server requires a certificate and key".to_string()))?;
        let builder = ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(self.protocol.versions())?;
        let builder = if !self.client_auth {
            builder.with_no_client_auth()
        } else if self.trust_all {
            warn!("tls server accepts any client certificate");
            builder.with_client_cert_verifier(Arc::new(TrustAllVerifier::new(self.provider.clone())))
        } else {
            let roots = bundle
                .root_store()?
                .ok_or_else(|| Error::Config("client auth requires trust roots".to_string()))?;
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(roots), self.provider.clone())
                    .build()
                    .map_err(|e| Error::Config(format!("client verifier: {}", e)))?;
            builder.with_client_cert_verifier(verifier)
        };
        let (certs, key) = bundle
            .identity()
            .ok_or_else(|| Error::Config("tls server requires a certificate and key".to_string()))?;
        let config = Arc::new(builder.with_single_cert(certs, key)?);

        *cached = Some(config.clone());
        debug!(
            "tls server config built for {:?}, client auth {}",
            self.protocol, self.client_auth
        );
        Ok(config)
    }
}

impl fmt::Debug for TlsManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsManager")
            .field("protocol", &self.protocol)
            .field("identity", &self.bundle.as_ref().map(|b| b.has_identity()))
            .field("client_auth", &self.client_auth)
            .field("trust_all", &self.trust_all)
            .field("server_name", &self.server_name)
            .finish()
    }
}

/// Accepts every certificate while still checking handshake signatures
#[derive(Debug)]
struct TrustAllVerifier {
    provider: Arc<CryptoProvider>,
}

impl TrustAllVerifier {
    fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for TrustAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientCertVerifier for TrustAllVerifier {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        ServerCertVerifier::verify_tls12_signature(self, message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        ServerCertVerifier::verify_tls13_signature(self, message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        ServerCertVerifier::supported_verify_schemes(self)
    }
}
