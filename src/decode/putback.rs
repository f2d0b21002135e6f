//! A `Read` wrapper that lets the consumer push already-read bytes back
//! so they are replayed before further reads.
//!
//! The resilient decoder uses this to splice a stream after hitting a
//! stray separator: take the offending bytes off, put the remainder back,
//! and hand the reader to a fresh deserializer.

use std::io::{self, Read};

/// Byte-stream wrapper with a single put-back buffer.
///
/// Not safe for concurrent use.
pub struct PutBackReader<R> {
    put_back: Vec<u8>,
    inner: R,
}

impl<R: Read> PutBackReader<R> {
    /// Wrap a reader with an empty put-back store.
    pub fn new(inner: R) -> Self {
        Self {
            put_back: Vec::new(),
            inner,
        }
    }

    /// Store bytes to be replayed on the next read(s), overwriting any
    /// previous store.
    pub fn set_back(&mut self, bytes: Vec<u8>) {
        self.put_back = bytes;
    }
}

impl<R: Read> Read for PutBackReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut copied = 0;
        if !self.put_back.is_empty() {
            copied = buf.len().min(self.put_back.len());
            buf[..copied].copy_from_slice(&self.put_back[..copied]);
            if copied < self.put_back.len() {
                self.put_back.drain(..copied);
                return Ok(copied);
            }
            self.put_back.clear();
        }

        let n = self.inner.read(&mut buf[copied..])?;
        Ok(n + copied)
    }
}
