use bytes::BytesMut;
use log::trace;
use std::time::{Duration, Instant};

use crate::buffer::ByteBufferChannel;
use crate::codec::MessageSplitter;
use crate::error::{Error, Result};
use crate::session::Session;

/// Marker byte of the sentinel-fill disconnect heuristic (ASCII EOT)
pub const SENTINEL: u8 = 4;

/// Whether a read of `read_len` bytes into `buf` means the stream is over:
/// either an end-of-stream read (`-1`), or a buffer longer than two bytes whose
/// first, middle and last bytes all equal [SENTINEL].
pub fn is_stream_end(read_len: isize, buf: &[u8]) -> bool {
    if read_len == -1 {
        return true;
    }
    let len = buf.len();
    read_len > 2
        && len > 2
        && buf[0] == SENTINEL
        && buf[len / 2] == SENTINEL
        && buf[len - 1] == SENTINEL
}

/// Cuts one frame at a time out of a session's read buffer.
///
/// Bytes are scanned incrementally: every prefix is offered to the splitter
/// once, and the first accepted prefix is returned. Bytes behind it stay
/// buffered for the next call. A call that finds no complete frame waits for
/// more bytes up to the read timeout and then gives up, keeping its progress.
#[derive(Debug, Default)]
pub struct MessageLoader {
    scanned: usize,
    started: Option<Instant>,
    last_elapsed: Duration,
}

impl MessageLoader {
    /// Creates a new MessageLoader
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets any partially scanned frame
    pub fn reset(&mut self) {
        self.scanned = 0;
        self.started = None;
        self.last_elapsed = Duration::ZERO;
    }

    /// Returns the next frame, `None` when the buffer is drained or the read
    /// timeout passed on a partial frame, or [Error::RemoteDisconnect] when the
    /// stream ended.
    pub fn read(&mut self, session: &Session) -> Result<Option<BytesMut>> {
        let context = session.context();
        let splitter = context.splitter();
        let read_timeout = context.read_timeout();
        let started = *self.started.get_or_insert_with(Instant::now);

        loop {
            let generation = session.signal().generation();
            {
                let mut buf = session.read_buffer().lock();
                if is_stream_end(buf.size() as isize, buf.as_slice()) {
                    buf.clear();
                    self.reset();
                    return Err(Error::RemoteDisconnect);
                }
                if let Some(frame) = self.scan(splitter, session, &mut buf, started.elapsed()) {
                    trace!("session {} framed {} bytes", session.id(), frame.len());
                    self.reset();
                    return Ok(Some(frame));
                }
                if buf.is_empty() {
                    self.reset();
                    return Ok(None);
                }
            }

            if !session.is_connected() || session.is_eof() {
                self.reset();
                return Err(Error::RemoteDisconnect);
            }

            let elapsed = started.elapsed();
            if elapsed >= read_timeout {
                trace!(
                    "session {} partial frame of {} bytes after {:?}",
                    session.id(),
                    self.scanned,
                    elapsed
                );
                return Ok(None);
            }
            let mut wait = read_timeout - elapsed;
            if let Some(interval) = splitter.poll_interval() {
                wait = wait.min(interval);
            }
            session.signal().wait_changed(generation, wait);
        }
    }

    fn scan(
        &mut self,
        splitter: &dyn MessageSplitter,
        session: &Session,
        buf: &mut ByteBufferChannel,
        elapsed: Duration,
    ) -> Option<BytesMut> {
        let size = buf.size();
        if self.scanned > size {
            self.scanned = 0;
        }

        let mut split_at = None;
        {
            let bytes = buf.as_slice();
            if self.scanned > 0
                && self.scanned == size
                && splitter.can_split(session, &bytes[..size], elapsed)
            {
                split_at = Some(size);
            }
            while split_at.is_none() && self.scanned < size {
                self.scanned += 1;
                // bytes behind the newest were already there at the previous look
                let at = if self.scanned == size {
                    elapsed
                } else {
                    self.last_elapsed
                };
                if splitter.can_split(session, &bytes[..self.scanned], at) {
                    split_at = Some(self.scanned);
                }
            }
        }
        self.last_elapsed = elapsed;

        split_at.and_then(|n| buf.read_head(n))
    }
}
