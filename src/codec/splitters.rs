use std::time::Duration;

use crate::codec::MessageSplitter;
use crate::session::Session;

/// Splits after an arbitrary byte sequence, keeping it in the frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelimiterSplitter {
    delimiter: Vec<u8>,
}

impl DelimiterSplitter {
    /// Creates a new DelimiterSplitter
    pub fn new(delimiter: impl Into<Vec<u8>>) -> Self {
        Self {
            delimiter: delimiter.into(),
        }
    }
}

impl MessageSplitter for DelimiterSplitter {
    fn can_split(&self, _session: &Session, buf: &[u8], _elapsed: Duration) -> bool {
        !self.delimiter.is_empty() && buf.ends_with(&self.delimiter)
    }
}

/// Splits every `length` bytes
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FixedLengthSplitter {
    length: usize,
}

impl FixedLengthSplitter {
    /// Creates a new FixedLengthSplitter; a zero length is treated as one
    pub fn new(length: usize) -> Self {
        Self {
            length: length.max(1),
        }
    }
}

impl MessageSplitter for FixedLengthSplitter {
    fn can_split(&self, _session: &Session, buf: &[u8], _elapsed: Duration) -> bool {
        buf.len() >= self.length
    }
}

/// Splits the `[0][u32 big-endian length][0][payload]` frames written by
/// [ByteFilter](crate::filter::ByteFilter)
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct LengthFieldSplitter;

impl LengthFieldSplitter {
    /// Bytes in front of the payload
    pub const HEAD_LENGTH: usize = 6;

    /// Creates a new LengthFieldSplitter
    pub fn new() -> Self {
        Self
    }
}

impl MessageSplitter for LengthFieldSplitter {
    fn can_split(&self, _session: &Session, buf: &[u8], _elapsed: Duration) -> bool {
        if buf.len() < Self::HEAD_LENGTH {
            return false;
        }
        if buf[0] != 0 || buf[5] != 0 {
            // malformed header, hand it to the filter which rejects it
            return true;
        }
        let length = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        buf.len() >= Self::HEAD_LENGTH + length
    }
}

/// Splits whatever has accumulated once the current frame has been pending
/// for `idle`. Suits protocols with no framing where a pause ends a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct IdleSplitter {
    idle: Duration,
}

impl IdleSplitter {
    /// Creates a new IdleSplitter
    pub fn new(idle: Duration) -> Self {
        Self { idle }
    }
}

impl MessageSplitter for IdleSplitter {
    fn can_split(&self, _session: &Session, buf: &[u8], elapsed: Duration) -> bool {
        !buf.is_empty() && elapsed >= self.idle
    }

    fn poll_interval(&self) -> Option<Duration> {
        Some(self.idle)
    }
}
