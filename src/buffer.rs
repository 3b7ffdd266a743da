use std::cmp;

/// A contiguous byte staging area with separate read and write cursors.
///
/// Bytes in `[read, write)` are readable; the region from `write` to the
/// end of the allocation is writable.  [`ByteBuffer::writable`] guarantees
/// a caller-requested minimum of contiguous space, compacting the consumed
/// prefix and growing the allocation as needed.  Growth never fails.
pub(crate) struct ByteBuffer {
    buf: Vec<u8>,
    read: usize,
    write: usize,
}

impl ByteBuffer {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity],
            read: 0,
            write: 0,
        }
    }

    /// How many readable bytes we're holding.
    pub(crate) fn bytes(&self) -> usize {
        self.write - self.read
    }

    /// The bytes that have been written but not yet consumed.
    pub(crate) fn readable(&self) -> &[u8] {
        &self.buf[self.read..self.write]
    }

    /// A writable window of at least `min` contiguous bytes.
    ///
    /// Readable bytes are preserved across compaction and growth.  The
    /// returned slice may be larger than `min`; the caller reports how
    /// much it actually filled via [`ByteBuffer::advance_write`].
    pub(crate) fn writable(&mut self, min: usize) -> &mut [u8] {
        if self.buf.len() - self.write < min {
            self.compact();
        }
        if self.buf.len() - self.write < min {
            let new_len = cmp::max(self.buf.len() * 2, self.write + min);
            self.buf.resize(new_len, 0u8);
        }
        &mut self.buf[self.write..]
    }

    /// Mark `used` readable bytes as consumed.
    pub(crate) fn advance_read(&mut self, used: usize) {
        debug_assert!(self.read + used <= self.write);
        self.read += used;
        if self.read == self.write {
            // fully drained: reset so the whole allocation is writable again
            self.read = 0;
            self.write = 0;
        }
    }

    /// Mark `filled` bytes of the writable window as readable.
    pub(crate) fn advance_write(&mut self, filled: usize) {
        debug_assert!(self.write + filled <= self.buf.len());
        self.write += filled;
    }

    /// Append a copy of `bytes` after any existing readable bytes.
    pub(crate) fn inject(&mut self, bytes: &[u8]) {
        let writable = self.writable(bytes.len());
        writable[..bytes.len()].copy_from_slice(bytes);
        self.advance_write(bytes.len());
    }

    fn compact(&mut self) {
        if self.read > 0 {
            self.buf.copy_within(self.read..self.write, 0);
            self.write -= self.read;
            self.read = 0;
        }
    }
}
