//! Line-oriented reading
//!
//! Everything is built on [`pull_line`], which consumes one physical line
//! from a [`ByteSource`] and reports how it ended. Logical lines are joined
//! across continuation markers by looping over it.

use std::io;

use super::handle::{FileHandle, FileKind, StdStream};
use super::mode::ReadMode;
use crate::error::{IoError, IoResult};
use crate::stream::ByteSource;

/// How one physical-line attempt ended; read failures surface as `Err`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Nothing left to read
    Eof,
    /// A full line (or trailing data without newline) was appended
    Complete,
    /// The line ended in the continuation marker, which was stripped
    ContinuedLine,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LineOptions<'a> {
    pub continuation: &'a [u8],
    pub keep_terminator: bool,
    /// Disables CRLF collapsing and continuation
    pub binary: bool,
}

/// Append one physical line from `source` to `out`
pub(crate) fn pull_line(
    source: &mut dyn ByteSource,
    out: &mut Vec<u8>,
    options: &LineOptions<'_>,
) -> io::Result<LineOutcome> {
    let start = out.len();
    let mut terminated = false;

    loop {
        let chunk = source.peek()?;
        if chunk.is_empty() {
            break;
        }
        if let Some(index) = chunk.iter().position(|&b| b == b'\n') {
            out.extend_from_slice(&chunk[..=index]);
            source.skip(index + 1);
            terminated = true;
            break;
        }
        let count = chunk.len();
        out.extend_from_slice(chunk);
        source.skip(count);
    }

    if out.len() == start {
        return Ok(LineOutcome::Eof);
    }
    if !terminated {
        return Ok(LineOutcome::Complete);
    }

    if !options.binary && out.len() - start >= 2 && out[out.len() - 2] == b'\r' {
        let len = out.len();
        out[len - 2] = b'\n';
        out.truncate(len - 1);
    }

    let marker = if options.binary {
        &[][..]
    } else {
        options.continuation
    };
    let line_len = out.len() - start;
    if !marker.is_empty() && line_len > marker.len() {
        let newline = out.len() - 1;
        if &out[newline - marker.len()..newline] == marker {
            out.truncate(newline - marker.len());
            return Ok(LineOutcome::ContinuedLine);
        }
    }

    if !options.keep_terminator {
        out.pop();
    }
    Ok(LineOutcome::Complete)
}

/// Result of the mode-dispatching [`FileHandle::read`]
#[derive(Debug, Clone, PartialEq)]
pub enum ReadValue {
    Bytes(Vec<u8>),
    Number(f64),
}

impl FileHandle {
    /// Source to read from plus the reusable read cache
    fn reader_parts(&mut self) -> IoResult<(&mut dyn ByteSource, &mut Vec<u8>)> {
        let source: &mut dyn ByteSource = match &mut self.kind {
            None => return Err(IoError::AlreadyClosed),
            Some(FileKind::Disk { stream, .. }) => stream.source(),
            Some(FileKind::Std(StdStream::In(source))) => &mut **source,
            Some(FileKind::Std(_)) => {
                return Err(IoError::unsupported(format!(
                    "cannot read from {}",
                    self.name
                )));
            }
        };
        Ok((source, &mut self.read_cache))
    }

    fn is_disk(&self) -> bool {
        matches!(self.kind, Some(FileKind::Disk { .. }))
    }

    fn ensure_readable(&self) -> IoResult<()> {
        self.ensure_open()?;
        if self.is_disk() && !self.mode.is_readable() {
            return Err(IoError::unsupported(format!(
                "{} is not opened for reading",
                self.name
            )));
        }
        Ok(())
    }

    /// Read everything up to end of data.
    ///
    /// Binary disk files are copied in chunks; text is pulled line by line
    /// with terminators kept, joining continued lines. Returns an empty
    /// vector when nothing is left.
    pub fn read_all(&mut self, continuation: &str) -> IoResult<Vec<u8>> {
        self.ensure_readable()?;
        let binary = self.is_disk() && self.encoding.is_binary();
        let chunk_size = self.config.read_chunk_size;
        let (source, cache) = self.reader_parts()?;
        cache.clear();

        if binary {
            loop {
                let len = cache.len();
                cache.resize(len + chunk_size, 0);
                let count = source.read(&mut cache[len..])?;
                cache.truncate(len + count);
                if count == 0 {
                    break;
                }
            }
        } else {
            let options = LineOptions {
                continuation: continuation.as_bytes(),
                keep_terminator: true,
                binary: false,
            };
            while pull_line(source, cache, &options)? != LineOutcome::Eof {}
        }

        Ok(cache.clone())
    }

    /// Read one logical line; `None` at end of data
    pub fn read_line(&mut self, keep_crlf: bool, continuation: &str) -> IoResult<Option<Vec<u8>>> {
        self.ensure_readable()?;
        let options = LineOptions {
            continuation: continuation.as_bytes(),
            keep_terminator: keep_crlf,
            binary: self.encoding.is_binary(),
        };
        let (source, cache) = self.reader_parts()?;
        cache.clear();

        let mut continued = false;
        loop {
            match pull_line(source, cache, &options)? {
                LineOutcome::Eof if continued => return Ok(Some(cache.clone())),
                LineOutcome::Eof => return Ok(None),
                LineOutcome::Complete => return Ok(Some(cache.clone())),
                LineOutcome::ContinuedLine => continued = true,
            }
        }
    }

    /// Read up to `count` bytes.
    ///
    /// `count == 0` only checks for data: an empty vector if data is available,
    /// `None` at end of data. Disk files must be opened in binary mode.
    pub fn read_bytes(&mut self, count: usize, continuation: &str) -> IoResult<Option<Vec<u8>>> {
        self.ensure_readable()?;
        if !continuation.is_empty() {
            return Err(IoError::unsupported(
                "continuation is not supported when reading a byte count",
            ));
        }
        if self.is_disk() && !self.encoding.is_binary() {
            return Err(IoError::unsupported(format!(
                "reading a byte count requires binary mode ({})",
                self.name
            )));
        }

        let (source, cache) = self.reader_parts()?;
        if count == 0 {
            return Ok((!source.peek()?.is_empty()).then(Vec::new));
        }

        cache.clear();
        cache.resize(count, 0);
        let read = source.read_full(cache)?;
        cache.truncate(read);
        Ok((read > 0).then(|| cache.clone()))
    }

    /// Parse the next line of a standard stream as a number
    pub fn read_number(&mut self, continuation: &str) -> IoResult<Option<f64>> {
        self.ensure_open()?;
        if !continuation.is_empty() {
            return Err(IoError::unsupported(
                "continuation is not supported when reading a number",
            ));
        }
        if self.is_disk() {
            return Err(IoError::unsupported(format!(
                "reading a number is only supported on standard streams ({})",
                self.name
            )));
        }

        let options = LineOptions {
            continuation: b"",
            keep_terminator: false,
            binary: false,
        };
        let (source, cache) = self.reader_parts()?;
        cache.clear();
        if pull_line(source, cache, &options)? == LineOutcome::Eof {
            return Ok(None);
        }

        let text = String::from_utf8_lossy(cache);
        let text = text.trim();
        text.parse::<f64>()
            .map(Some)
            .map_err(|_| IoError::invalid(format!("not a number: {text:?}")))
    }

    /// Dispatch on a read mode
    pub fn read(&mut self, mode: ReadMode, continuation: &str) -> IoResult<Option<ReadValue>> {
        match mode {
            ReadMode::All => self.read_all(continuation).map(|bytes| Some(ReadValue::Bytes(bytes))),
            ReadMode::Line => Ok(self.read_line(false, continuation)?.map(ReadValue::Bytes)),
            ReadMode::LineKeep => Ok(self.read_line(true, continuation)?.map(ReadValue::Bytes)),
            ReadMode::Number => Ok(self.read_number(continuation)?.map(ReadValue::Number)),
            ReadMode::Bytes(count) => {
                Ok(self.read_bytes(count, continuation)?.map(ReadValue::Bytes))
            }
        }
    }

    /// Whether a read would return data right now without hitting end of data
    pub fn is_readable(&mut self) -> IoResult<bool> {
        self.ensure_open()?;
        if matches!(
            self.kind,
            Some(FileKind::Std(StdStream::Out(_) | StdStream::Err(_)))
        ) || (self.is_disk() && !self.mode.is_readable())
        {
            return Ok(false);
        }
        let (source, _) = self.reader_parts()?;
        Ok(!source.peek()?.is_empty())
    }
}
