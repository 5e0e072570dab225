use super::*;
use crate::test_util::{mock_session, noop_context};
use bytes::BytesMut;
use parking_lot::Mutex;

/// Wraps strings as `tag(...)` on encode and strips the envelope on decode
struct EnvelopeFilter {
    tag: &'static str,
    order: Arc<Mutex<Vec<String>>>,
}

impl EnvelopeFilter {
    fn new(tag: &'static str, order: Arc<Mutex<Vec<String>>>) -> Self {
        Self { tag, order }
    }
}

impl Filter for EnvelopeFilter {
    fn name(&self) -> &str {
        self.tag
    }

    fn encode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        self.order.lock().push(format!("encode {}", self.tag));
        let value = msg.downcast::<String>().map_err(|_| Error::Filter {
            filter: self.tag.to_string(),
            message: "expected a string".to_string(),
        })?;
        Ok(Some(Box::new(format!("{}({})", self.tag, value))))
    }

    fn decode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        self.order.lock().push(format!("decode {}", self.tag));
        let value = msg.downcast::<String>().map_err(|_| Error::Filter {
            filter: self.tag.to_string(),
            message: "expected a string".to_string(),
        })?;
        let inner = value
            .strip_prefix(&format!("{}(", self.tag))
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(|| Error::new(std::io::ErrorKind::InvalidData, value.to_string()))?;
        Ok(Some(Box::new(inner.to_string())))
    }
}

struct DropAll;

impl Filter for DropAll {
    fn name(&self) -> &str {
        "DropAll"
    }

    fn encode(&self, _session: &Session, _msg: Message) -> Result<Option<Message>> {
        Ok(None)
    }

    fn decode(&self, _session: &Session, _msg: Message) -> Result<Option<Message>> {
        Ok(None)
    }
}

fn envelope_chain(order: &Arc<Mutex<Vec<String>>>) -> FilterChain {
    let mut chain = FilterChain::new();
    chain
        .add_back(EnvelopeFilter::new("a", order.clone()))
        .add_back(EnvelopeFilter::new("b", order.clone()))
        .add_back(EnvelopeFilter::new("c", order.clone()));
    chain
}

#[test]
fn test_chain_symmetry() {
    let (session, _) = mock_session(noop_context());
    let order = Arc::new(Mutex::new(vec![]));
    let chain = envelope_chain(&order);
    assert_eq!(chain.len(), 3);

    let wire = "a(b(c(hi)))".to_string();
    let decoded = chain
        .decode(&session, Box::new(wire.clone()))
        .unwrap()
        .unwrap();
    let decoded = decoded.downcast::<String>().unwrap();
    assert_eq!(*decoded, "hi");

    let encoded = chain.encode(&session, decoded).unwrap().unwrap();
    assert_eq!(*encoded.downcast::<String>().unwrap(), wire);

    assert_eq!(
        *order.lock(),
        vec![
            "decode a", "decode b", "decode c", "encode c", "encode b", "encode a"
        ]
    );
}

#[test]
fn test_none_short_circuits() {
    let (session, _) = mock_session(noop_context());
    let order = Arc::new(Mutex::new(vec![]));
    let mut chain = FilterChain::new();
    chain
        .add_back(DropAll)
        .add_back(EnvelopeFilter::new("a", order.clone()));

    assert!(chain
        .decode(&session, Box::new("a(x)".to_string()))
        .unwrap()
        .is_none());
    // encode runs the envelope first, then drops
    assert!(chain
        .encode(&session, Box::new("x".to_string()))
        .unwrap()
        .is_none());
    assert_eq!(*order.lock(), vec!["encode a"]);
}

#[test]
fn test_failure_names_the_filter() {
    let (session, _) = mock_session(noop_context());
    let order = Arc::new(Mutex::new(vec![]));
    let chain = envelope_chain(&order);

    let err = chain
        .decode(&session, Box::new("a(b(oops))".to_string()))
        .err()
        .unwrap();
    match err {
        Error::Filter { filter, .. } => assert_eq!(filter, "c"),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_string_filter() {
    let (session, _) = mock_session(noop_context());
    let filter = StringFilter::new();

    let decoded = filter
        .decode(&session, Box::new(BytesMut::from(&b"PING\n"[..])))
        .unwrap()
        .unwrap();
    assert_eq!(*decoded.downcast::<String>().unwrap(), "PING\n");

    let encoded = filter
        .encode(&session, Box::new("PONG\n".to_string()))
        .unwrap()
        .unwrap();
    assert_eq!(&encoded.downcast::<BytesMut>().unwrap()[..], b"PONG\n");

    // other types pass through untouched
    let passed = filter.encode(&session, Box::new(7u32)).unwrap().unwrap();
    assert_eq!(*passed.downcast::<u32>().unwrap(), 7);

    assert!(filter
        .decode(&session, Box::new(BytesMut::from(&[0xffu8, 0xfe][..])))
        .is_err());
}

#[test]
fn test_byte_filter() {
    let (session, _) = mock_session(noop_context());
    let filter = ByteFilter::new();

    let encoded = filter
        .encode(&session, Box::new(b"hey".to_vec()))
        .unwrap()
        .unwrap();
    let encoded = encoded.downcast::<BytesMut>().unwrap();
    assert_eq!(&encoded[..], &[0, 0, 0, 0, 3, 0, b'h', b'e', b'y']);

    let decoded = filter.decode(&session, encoded).unwrap().unwrap();
    assert_eq!(*decoded.downcast::<Vec<u8>>().unwrap(), b"hey".to_vec());

    assert!(filter
        .decode(&session, Box::new(BytesMut::from(&[1u8, 0, 0, 0, 1, 0, 9][..])))
        .is_err());
    assert!(filter
        .decode(&session, Box::new(BytesMut::from(&[0u8, 0, 0, 0, 5, 0, 9][..])))
        .is_err());
}
