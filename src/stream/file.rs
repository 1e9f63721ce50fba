//! Concrete byte streams
//!
//! `FileStream` is the raw stream under every disk handle. `BufSource`
//! adapts any `BufRead` (in-memory cursors, pipes) to [`ByteSource`] and
//! `StdinSource` reads through the process-wide stdin buffer.

use std::fs::File;
use std::io::{self, BufRead, Read, Seek, SeekFrom, Stdin, Write};
use std::os::fd::{AsRawFd, RawFd};

use super::{ByteSink, ByteSource, RawStream};

/// Default read-ahead buffer for disk files
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            result => return result,
        }
    }
}

// ============================================================================
// FileStream
// ============================================================================

/// Read-buffered file with peek support.
///
/// Unread buffered bytes are given back to the OS (by seeking backwards)
/// before any write or seek, so the file offset always matches what the
/// caller has consumed.
#[derive(Debug)]
pub struct FileStream {
    file: File,
    buf: Vec<u8>,
    pos: usize,
    filled: usize,
}

impl FileStream {
    pub fn new(file: File) -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE, file)
    }

    pub fn with_capacity(capacity: usize, file: File) -> Self {
        Self {
            file,
            buf: vec![0; capacity.max(1)],
            pos: 0,
            filled: 0,
        }
    }

    /// Buffer at least `count` bytes (fewer only at end of file) and return
    /// everything buffered.
    pub fn fill_to(&mut self, count: usize) -> io::Result<&[u8]> {
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
            self.filled -= self.pos;
            self.pos = 0;
        }
        if self.buf.len() < count {
            self.buf.resize(count, 0);
        }
        while self.filled < count {
            let n = read_retrying(&mut self.file, &mut self.buf[self.filled..])?;
            if n == 0 {
                break;
            }
            self.filled += n;
        }
        Ok(&self.buf[..self.filled])
    }

    pub fn get_ref(&self) -> &File {
        &self.file
    }

    fn unread(&self) -> usize {
        self.filled - self.pos
    }

    fn discard_buffer(&mut self) -> io::Result<()> {
        let unread = self.unread();
        self.pos = 0;
        self.filled = 0;
        if unread > 0 {
            self.file.seek(SeekFrom::Current(-(unread as i64)))?;
        }
        Ok(())
    }
}

impl ByteSource for FileStream {
    fn peek(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.filled {
            self.pos = 0;
            self.filled = read_retrying(&mut self.file, &mut self.buf)?;
        }
        Ok(&self.buf[self.pos..self.filled])
    }

    fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.filled);
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Large reads bypass the buffer entirely
        if self.unread() == 0 && buf.len() >= self.buf.len() {
            return read_retrying(&mut self.file, buf);
        }
        let available = self.peek()?;
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.skip(count);
        Ok(count)
    }
}

impl ByteSink for FileStream {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.discard_buffer()?;
        self.file.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl RawStream for FileStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let pos = match pos {
            SeekFrom::Current(offset) => SeekFrom::Current(offset - self.unread() as i64),
            other => other,
        };
        self.pos = 0;
        self.filled = 0;
        self.file.seek(pos)
    }

    fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file.sync_all()
    }

    fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

// ============================================================================
// BufSource
// ============================================================================

/// [`ByteSource`] over any buffered reader
#[derive(Debug)]
pub struct BufSource<R> {
    inner: R,
}

impl<R: BufRead> BufSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: BufRead> ByteSource for BufSource<R> {
    fn peek(&mut self) -> io::Result<&[u8]> {
        self.inner.fill_buf()
    }

    fn skip(&mut self, count: usize) {
        self.inner.consume(count);
    }
}

// ============================================================================
// StdinSource
// ============================================================================

/// [`ByteSource`] over the buffer std keeps for standard input.
///
/// Bytes leave the shared buffer only when skipped. Input a handle peeked at
/// but never consumed stays there for the next reader of stdin.
#[derive(Debug)]
pub struct StdinSource {
    stdin: Stdin,
    peeked: Vec<u8>,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            stdin: io::stdin(),
            peeked: Vec::new(),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteSource for StdinSource {
    fn peek(&mut self) -> io::Result<&[u8]> {
        // Copied out so the stdin lock is not held between calls
        let mut stdin = self.stdin.lock();
        let available = stdin.fill_buf()?;
        self.peeked.clear();
        self.peeked.extend_from_slice(available);
        Ok(&self.peeked)
    }

    fn skip(&mut self, count: usize) {
        let count = count.min(self.peeked.len());
        self.stdin.lock().consume(count);
        self.peeked.drain(..count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempfile;

    fn stream_with(content: &[u8]) -> FileStream {
        let mut file = tempfile().unwrap();
        file.write_all(content).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        FileStream::with_capacity(4, file)
    }

    #[test]
    fn test_peek_does_not_consume() {
        let mut stream = stream_with(b"abcdefgh");
        assert_eq!(stream.peek().unwrap(), b"abcd");
        assert_eq!(stream.peek().unwrap(), b"abcd");
        stream.skip(3);
        assert_eq!(stream.peek().unwrap(), b"d");
        stream.skip(1);
        assert_eq!(stream.peek().unwrap(), b"efgh");
        stream.skip(4);
        assert!(stream.peek().unwrap().is_empty());
    }

    #[test]
    fn test_fill_to_grows_buffer() {
        let mut stream = stream_with(b"0123456789");
        stream.peek().unwrap();
        stream.skip(1);
        assert_eq!(stream.fill_to(6).unwrap(), b"123456");
        assert_eq!(stream.fill_to(64).unwrap(), b"123456789");
    }

    #[test]
    fn test_seek_current_accounts_for_buffer() {
        let mut stream = stream_with(b"0123456789");
        stream.peek().unwrap();
        stream.skip(2);
        // Logical position is 2 even though 4 bytes were read from the OS
        assert_eq!(stream.seek(SeekFrom::Current(0)).unwrap(), 2);
        assert_eq!(stream.peek().unwrap(), b"2345");
    }

    #[test]
    fn test_write_after_peek_lands_at_logical_position() {
        let mut stream = stream_with(b"abcdef");
        stream.peek().unwrap();
        stream.skip(1);
        stream.write_all(b"XY").unwrap();
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut all = [0u8; 6];
        assert_eq!(stream.read_full(&mut all).unwrap(), 6);
        assert_eq!(&all, b"aXYdef");
        assert_eq!(stream.size().unwrap(), 6);
    }

    #[test]
    fn test_buf_source() {
        let mut source = BufSource::new(Cursor::new(b"hello".to_vec()));
        assert_eq!(source.peek().unwrap(), b"hello");
        source.skip(2);
        let mut buf = [0u8; 8];
        assert_eq!(source.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"llo");
        assert_eq!(source.read(&mut buf).unwrap(), 0);
    }
}
