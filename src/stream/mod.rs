//! Byte-level stream primitives
//!
//! File handles never talk to `std::fs` directly. They read through
//! [`ByteSource`] (peek + skip, so line scanning never over-consumes),
//! write through [`ByteSink`], and use [`RawStream`] for positioning and
//! descriptor access.

pub mod file;
pub mod transcode;

pub use file::{BufSource, FileStream, StdinSource};
pub use transcode::TranscodeStream;

use std::io::{self, SeekFrom};
use std::os::fd::RawFd;

/// Peekable input
pub trait ByteSource {
    /// Buffered bytes not yet consumed, refilling when empty.
    /// An empty slice means end of data.
    fn peek(&mut self) -> io::Result<&[u8]>;

    /// Consume `count` bytes previously returned by `peek`
    fn skip(&mut self, count: usize);

    /// Copy up to `buf.len()` bytes out of the source
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.peek()?;
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.skip(count);
        Ok(count)
    }

    /// Read until `buf` is full or the source is exhausted
    fn read_full(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.read(&mut buf[filled..])?;
            if count == 0 {
                break;
            }
            filled += count;
        }
        Ok(filled)
    }
}

/// Output
pub trait ByteSink {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;
    fn flush(&mut self) -> io::Result<()>;
}

/// Seekable, sized stream backed by an OS descriptor
pub trait RawStream: ByteSource + ByteSink {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
    fn size(&self) -> io::Result<u64>;
    /// Push written data down to the storage device
    fn sync(&mut self) -> io::Result<()>;
    fn raw_fd(&self) -> RawFd;
}
