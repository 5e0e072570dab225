use std::time::Duration;

use crate::codec::MessageSplitter;
use crate::session::Session;

/// Which line endings terminate a frame
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum TerminatorType {
    /// Either `\n` or `\r\n`
    #[default]
    BOTH,
    /// `\n` only
    NEWLINE,
    /// `\r\n` only
    CarriageNewline,
}

/// Splits after each line terminator. The delimiter stays in the frame.
///
/// A line longer than `max_length` without a terminator is cut at
/// `max_length` so one peer cannot grow the buffer without bound.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineSplitter {
    max_length: usize,
    terminator_type: TerminatorType,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::new(8192, TerminatorType::BOTH)
    }
}

impl LineSplitter {
    /// Creates a new LineSplitter
    pub fn new(max_length: usize, terminator_type: TerminatorType) -> Self {
        Self {
            max_length,
            terminator_type,
        }
    }

    fn ends_with_terminator(&self, buf: &[u8]) -> bool {
        match self.terminator_type {
            TerminatorType::NEWLINE | TerminatorType::BOTH => buf.ends_with(b"\n"),
            TerminatorType::CarriageNewline => buf.ends_with(b"\r\n"),
        }
    }
}

impl MessageSplitter for LineSplitter {
    fn can_split(&self, _session: &Session, buf: &[u8], _elapsed: Duration) -> bool {
        !buf.is_empty() && (self.ends_with_terminator(buf) || buf.len() >= self.max_length)
    }
}
