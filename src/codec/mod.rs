//! Framing: splitters decide where a message ends, the loader cuts frames out
//! of the session buffer


mod line_splitter;
mod message_loader;
mod splitters;

pub use line_splitter::{LineSplitter, TerminatorType};
pub use message_loader::{is_stream_end, MessageLoader, SENTINEL};
pub use splitters::{DelimiterSplitter, FixedLengthSplitter, IdleSplitter, LengthFieldSplitter};

use std::time::Duration;

use crate::session::Session;

/// Decides whether the bytes accumulated so far form one complete message.
///
/// The loader asks after every byte it scans, passing the prefix that would
/// become the frame and the time spent on the current frame.
pub trait MessageSplitter: Send + Sync {
    /// Whether `buf` is exactly one complete frame
    fn can_split(&self, session: &Session, buf: &[u8], elapsed: Duration) -> bool;

    /// How often a loader waiting on a partial frame should re-ask even when
    /// no bytes arrive. Only time-based splitters need this.
    fn poll_interval(&self) -> Option<Duration> {
        None
    }
}
