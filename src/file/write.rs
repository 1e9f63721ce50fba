//! Writing with optional CRLF translation

use std::io::Write;

use super::handle::{FileHandle, FileKind, StdStream};
use crate::error::{IoError, IoResult};

/// Rewrite bare `\n` as `\r\n`.
///
/// `pending` holds the unterminated tail of earlier writes; it is prefixed to
/// `data`, and whatever follows the last newline (a dangling `\r` included)
/// is left in it for the next call.
pub(crate) fn translate_crlf(pending: &mut Vec<u8>, data: &[u8], out: &mut Vec<u8>) {
    pending.extend_from_slice(data);

    let mut start = 0;
    while let Some(offset) = pending[start..].iter().position(|&b| b == b'\n') {
        let newline = start + offset;
        let line = &pending[start..newline];
        out.extend_from_slice(line);
        if line.last() == Some(&b'\r') {
            out.push(b'\n');
        } else {
            out.extend_from_slice(b"\r\n");
        }
        start = newline + 1;
    }

    pending.drain(..start);
}

impl FileHandle {
    /// Write `data` to the handle
    pub fn write(&mut self, data: &[u8]) -> IoResult<()> {
        let is_std = match &self.kind {
            None => return Err(IoError::AlreadyClosed),
            Some(FileKind::Std(_)) => true,
            Some(FileKind::Disk { .. }) => false,
        };
        if is_std {
            return self.write_std(data);
        }

        if !self.mode.is_writable() {
            return Err(IoError::unsupported(format!(
                "{} is not opened for writing",
                self.name
            )));
        }
        if self.encoding.is_binary() || !self.config.crlf_translation {
            self.write_file(data)
        } else {
            self.write_file_transcoded(data)
        }
    }

    /// Write each item in order, stopping at the first failure
    pub fn write_values<I, T>(&mut self, values: I) -> IoResult<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        for value in values {
            self.write(value.as_ref())?;
        }
        Ok(())
    }

    fn write_file(&mut self, data: &[u8]) -> IoResult<()> {
        let stream = self.disk_stream_mut("write")?;
        Ok(stream.sink().write_all(data)?)
    }

    fn write_file_transcoded(&mut self, data: &[u8]) -> IoResult<()> {
        let mut out = Vec::with_capacity(data.len() + data.len() / 8);
        translate_crlf(&mut self.write_cache, data, &mut out);
        if out.is_empty() {
            return Ok(());
        }
        self.write_file(&out)
    }

    fn write_std(&mut self, data: &[u8]) -> IoResult<()> {
        match &mut self.kind {
            Some(FileKind::Std(StdStream::Out(out))) => out.write_all(data)?,
            Some(FileKind::Std(StdStream::Err(err))) => err.write_all(data)?,
            // writes to stdin are dropped
            _ => {}
        }
        Ok(())
    }

    /// Write out a deferred partial line, if any
    pub(crate) fn drain_write_cache(&mut self) -> IoResult<()> {
        if self.write_cache.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.write_cache);
        let result = self.write_file(&pending);
        // Kept on failure so a later flush or close can retry
        self.write_cache = pending;
        if result.is_ok() {
            self.write_cache.clear();
        }
        result
    }

    /// Drain the write cache and flush the stream
    pub fn flush(&mut self) -> IoResult<()> {
        self.ensure_open()?;
        self.drain_write_cache()?;
        match &mut self.kind {
            Some(FileKind::Disk { stream, .. }) => stream.sink().flush()?,
            Some(FileKind::Std(StdStream::Out(out))) => out.flush()?,
            Some(FileKind::Std(StdStream::Err(err))) => err.flush()?,
            _ => {}
        }
        Ok(())
    }
}
