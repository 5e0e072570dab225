use bytes::{Buf, BufMut, BytesMut};

use crate::codec::LengthFieldSplitter;
use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::handler::Message;
use crate::session::Session;

/// Wraps `Vec<u8>` payloads in a `[0][u32 big-endian length][0]` header and
/// unwraps them on the way in. Pair with [LengthFieldSplitter].
#[derive(Debug, Default, Copy, Clone)]
pub struct ByteFilter;

impl ByteFilter {
    /// Creates a new ByteFilter
    pub fn new() -> Self {
        Self
    }

    fn malformed(message: &str) -> Error {
        Error::Filter {
            filter: "ByteFilter".to_string(),
            message: message.to_string(),
        }
    }
}

impl Filter for ByteFilter {
    fn name(&self) -> &str {
        "ByteFilter"
    }

    fn encode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        match msg.downcast::<Vec<u8>>() {
            Ok(data) => {
                let length = u32::try_from(data.len())
                    .map_err(|_| Self::malformed("payload exceeds u32 length"))?;
                let mut buf = BytesMut::with_capacity(LengthFieldSplitter::HEAD_LENGTH + data.len());
                buf.put_u8(0);
                buf.put_u32(length);
                buf.put_u8(0);
                buf.put_slice(&data);
                Ok(Some(Box::new(buf)))
            }
            Err(msg) => Ok(Some(msg)),
        }
    }

    fn decode(&self, _session: &Session, msg: Message) -> Result<Option<Message>> {
        let mut buf = match msg.downcast::<BytesMut>() {
            Ok(buf) => *buf,
            Err(msg) => return Ok(Some(msg)),
        };
        if buf.len() < LengthFieldSplitter::HEAD_LENGTH {
            return Err(Self::malformed("not enough data for the length header"));
        }
        if buf.get_u8() != 0 {
            return Err(Self::malformed("payload length head is missing"));
        }
        let length = buf.get_u32() as usize;
        if buf.get_u8() != 0 {
            return Err(Self::malformed("payload length end is missing"));
        }
        if buf.len() < length {
            return Err(Self::malformed("payload is shorter than its header says"));
        }
        if length == 0 {
            return Ok(None);
        }
        Ok(Some(Box::new(buf.split_to(length).to_vec())))
    }
}
