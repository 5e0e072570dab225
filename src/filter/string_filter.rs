use bytes::{BufMut, BytesMut};

use crate::error::Result;
use crate::filter::Filter;
use crate::handler::Message;
use crate::session::Session;

/// Decodes [BytesMut] frames into [String] and encodes [String] back to bytes
#[derive(Debug, Default, Copy, Clone)]
pub struct StringFilter;

impl StringFilter {
    /// Creates a new StringFilter
    pub fn new() -> Self {
        Self
    }
}

impl Filter for StringFilter {
    fn name(&self) -> &str {
        "StringFilter"
    }

    fn encode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        match msg.downcast::<String>() {
            Ok(message) => {
                let mut buf = BytesMut::with_capacity(message.len());
                buf.put(message.as_bytes());
                Ok(Some(Box::new(buf)))
            }
            Err(msg) => Ok(Some(msg)),
        }
    }

    fn decode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        match msg.downcast::<BytesMut>() {
            Ok(buf) => {
                let message = String::from_utf8(buf.to_vec())?;
                Ok(Some(Box::new(message)))
            }
            Err(msg) => Ok(Some(msg)),
        }
    }
}
