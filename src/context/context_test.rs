use super::*;
use crate::plugin::{Socks5Plugin, Socks5Target};
use crate::test_util::{mock_session, NoopHandler};

#[test]
fn test_config_defaults() {
    let config = ContextConfig::server("0.0.0.0", 7000);
    assert_eq!(config.read_timeout, DEFAULT_READ_TIMEOUT);
    assert_eq!(config.buffer_size, 8192);
    assert_eq!(config.role, ConnectRole::Server);
    assert_eq!(config.address(), "0.0.0.0:7000");
    assert_eq!(config.idle_interval, None);

    let config = ContextConfig::client("localhost", 443)
        .with_read_timeout(Duration::from_millis(250))
        .with_buffer_size(1024);
    assert_eq!(config.role, ConnectRole::Client);
    assert_eq!(config.read_timeout, Duration::from_millis(250));
    assert_eq!(config.buffer_size, 1024);
}

#[test]
fn test_build_validates() {
    let missing_handler = SocketContext::builder(ContextConfig::default()).build();
    assert!(matches!(missing_handler, Err(Error::Config(_))));

    let zero_buffer = SocketContext::builder(ContextConfig::default().with_buffer_size(0))
        .handler(NoopHandler)
        .build();
    assert!(matches!(zero_buffer, Err(Error::Config(_))));

    let zero_timeout = SocketContext::builder(ContextConfig::default().with_read_timeout(Duration::ZERO))
        .handler(NoopHandler)
        .build();
    assert!(matches!(zero_timeout, Err(Error::Config(_))));

    let zero_idle = SocketContext::builder(ContextConfig::default().with_idle_interval(Duration::ZERO))
        .handler(NoopHandler)
        .build();
    assert!(matches!(zero_idle, Err(Error::Config(_))));

    let context = SocketContext::builder(ContextConfig::default().with_idle_interval(Duration::from_secs(5)))
        .handler(NoopHandler)
        .build()
        .unwrap();
    assert_eq!(context.idle_interval(), Some(Duration::from_secs(5)));
}

#[test]
fn test_tls_stage_is_last() {
    let target = Socks5Target::Domain("example.com".to_string(), 443);
    let context = SocketContext::builder(ContextConfig::client("proxy", 1080))
        .handler(NoopHandler)
        .tls(TlsManager::new("TLS").unwrap().danger_trust_all())
        .add_plugin(Socks5Plugin::new(target))
        .build()
        .unwrap();

    assert_eq!(context.plugins().names(), vec!["Socks5Plugin", "TlsPlugin"]);
    assert!(context.tls_manager().is_some());
    assert_eq!(context.host(), "proxy");
    assert_eq!(context.port(), 1080);
    assert_eq!(context.role(), ConnectRole::Client);
}

#[test]
fn test_ids_are_unique() {
    let a = SocketContext::builder(ContextConfig::default())
        .handler(NoopHandler)
        .build()
        .unwrap();
    let b = SocketContext::builder(ContextConfig::default())
        .handler(NoopHandler)
        .build()
        .unwrap();
    assert_ne!(a.id(), b.id());
    assert!(a.id().to_string().starts_with("ctx-"));
}

#[test]
fn test_default_splitter_splits_lines() {
    let (session, _) = mock_session(SocketContext::builder(ContextConfig::default()).handler(NoopHandler));
    let splitter = session.context().splitter();
    assert!(splitter.can_split(&session, b"abc\n", Duration::ZERO));
    assert!(!splitter.can_split(&session, b"abc", Duration::ZERO));
    assert!(session.context().filters().is_empty());
    assert!(session.context().plugins().is_empty());
}
