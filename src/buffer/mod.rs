//! Growable byte channel shared between the read loop, plugins and the message loader

#[cfg(test)]
mod buffer_test;

use bytes::{Buf, BufMut, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

/// A [ByteBufferChannel] guarded for hand-off between the I/O loop and event workers
pub type SharedBuffer = Arc<Mutex<ByteBufferChannel>>;

/// Creates an empty [SharedBuffer] with the given initial capacity
pub fn shared_buffer(capacity: usize) -> SharedBuffer {
    Arc::new(Mutex::new(ByteBufferChannel::with_capacity(capacity)))
}

/// A growable byte buffer that can be written and consumed from either end.
///
/// The channel itself does no locking. A session's channel is only mutated by
/// the read loop and the single in-flight RECEIVE event, so callers share it as
/// a [SharedBuffer].
#[derive(Debug, Default, Clone)]
pub struct ByteBufferChannel {
    buf: BytesMut,
}

impl ByteBufferChannel {
    /// Creates an empty channel
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty channel with room for `capacity` bytes before growing
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Number of readable bytes
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Whether no bytes are buffered
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Allocated capacity
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Borrows the readable bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..]
    }

    /// Returns the byte at `index`, if any
    pub fn get(&self, index: usize) -> Option<u8> {
        self.buf.get(index).copied()
    }

    /// Appends bytes after the current content
    pub fn write_end(&mut self, bytes: &[u8]) {
        self.buf.put_slice(bytes);
    }

    /// Inserts bytes in front of the current content
    pub fn write_head(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut buf = BytesMut::with_capacity(bytes.len() + self.buf.len());
        buf.put_slice(bytes);
        buf.put_slice(&self.buf);
        self.buf = buf;
    }

    /// Takes up to `n` bytes from the front, or `None` when the channel is empty
    pub fn read_head(&mut self, n: usize) -> Option<BytesMut> {
        if self.buf.is_empty() {
            return None;
        }
        let n = n.min(self.buf.len());
        Some(self.buf.split_to(n))
    }

    /// Takes up to `n` bytes from the back, or `None` when the channel is empty
    pub fn read_end(&mut self, n: usize) -> Option<BytesMut> {
        if self.buf.is_empty() {
            return None;
        }
        let at = self.buf.len() - n.min(self.buf.len());
        Some(self.buf.split_off(at))
    }

    /// Takes everything that is buffered
    pub fn read_all(&mut self) -> BytesMut {
        self.buf.split()
    }

    /// Takes the bytes in front of the first occurrence of `pattern`, consuming
    /// the pattern itself. Returns `None` when the pattern is not present.
    pub fn read_with_split(&mut self, pattern: &[u8]) -> Option<BytesMut> {
        let index = self.index_of(pattern);
        if index < 0 {
            return None;
        }
        let frame = self.buf.split_to(index as usize);
        self.buf.advance(pattern.len());
        Some(frame)
    }

    /// Discards up to `n` bytes from the front, returning how many were dropped
    pub fn shrink_head(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.advance(n);
        n
    }

    /// Discards up to `n` bytes from the back, returning how many were dropped
    pub fn shrink_end(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.truncate(self.buf.len() - n);
        n
    }

    /// Discards `len` bytes starting at `pos`, returning how many were dropped
    pub fn shrink_at(&mut self, pos: usize, len: usize) -> usize {
        if pos >= self.buf.len() {
            return 0;
        }
        let len = len.min(self.buf.len() - pos);
        let mut tail = self.buf.split_off(pos);
        tail.advance(len);
        self.buf.unsplit(tail);
        len
    }

    /// Offset of the first occurrence of `pattern`, or -1 when it is absent
    pub fn index_of(&self, pattern: &[u8]) -> isize {
        if pattern.is_empty() || pattern.len() > self.buf.len() {
            return -1;
        }
        self.buf
            .windows(pattern.len())
            .position(|window| window == pattern)
            .map(|i| i as isize)
            .unwrap_or(-1)
    }

    /// Releases spare capacity left behind by consumed bytes
    pub fn compact(&mut self) {
        if self.buf.capacity() > self.buf.len() * 2 {
            let mut buf = BytesMut::with_capacity(self.buf.len());
            buf.put_slice(&self.buf);
            self.buf = buf;
        }
    }

    /// Drops every buffered byte
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
