//! Charset-converting stream layered over a raw stream
//!
//! Reads decode the foreign charset into UTF-8, writes encode UTF-8 into the
//! foreign charset. As with C stdio, switching between reading and writing
//! requires a seek in between; the handle resets this layer on every seek.

use std::io;

use crate::encoding::{Decoder, Encoder, Encoding};

use super::{ByteSink, ByteSource, RawStream};

#[derive(Debug)]
pub struct TranscodeStream<S> {
    inner: S,
    encoding: Encoding,
    decoder: Decoder,
    encoder: Encoder,
    decoded: Vec<u8>,
    pos: usize,
    scratch: Vec<u8>,
}

impl<S: RawStream> TranscodeStream<S> {
    pub fn new(inner: S, encoding: Encoding) -> Self {
        Self {
            inner,
            encoding,
            decoder: Decoder::new(encoding),
            encoder: Encoder::new(encoding),
            decoded: Vec::new(),
            pos: 0,
            scratch: Vec::new(),
        }
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Raw stream access; call [`TranscodeStream::reset`] after moving it
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Forget decoded-but-unread text and partial sequences
    pub fn reset(&mut self) {
        self.decoded.clear();
        self.pos = 0;
        self.decoder.reset();
    }

    /// Complete the write side; fails if a UTF-8 sequence was left open
    pub fn finish(&mut self) -> io::Result<()> {
        self.encoder.finish()
    }
}

impl<S: RawStream> ByteSource for TranscodeStream<S> {
    fn peek(&mut self) -> io::Result<&[u8]> {
        if self.pos >= self.decoded.len() {
            self.decoded.clear();
            self.pos = 0;
            loop {
                let chunk = self.inner.peek()?;
                if chunk.is_empty() {
                    self.decoder.finish()?;
                    break;
                }
                let consumed = chunk.len();
                let decoded = self.decoder.decode(chunk, &mut self.decoded);
                self.inner.skip(consumed);
                if let Err(e) = decoded {
                    // Text decoded from a rejected chunk goes with it
                    self.decoded.clear();
                    return Err(e);
                }
                // A lone byte of a UTF-16 unit decodes to nothing yet
                if !self.decoded.is_empty() {
                    break;
                }
            }
        }
        Ok(&self.decoded[self.pos..])
    }

    fn skip(&mut self, count: usize) {
        self.pos = (self.pos + count).min(self.decoded.len());
    }
}

impl<S: RawStream> ByteSink for TranscodeStream<S> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.scratch.clear();
        self.encoder.encode(data, &mut self.scratch)?;
        self.inner.write_all(&self.scratch)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Endian;
    use crate::stream::FileStream;
    use std::io::{Read, Seek, SeekFrom, Write};
    use tempfile::tempfile;

    fn utf16le(text: &str) -> Vec<u8> {
        text.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
    }

    #[test]
    fn test_decoding_reads() {
        let mut file = tempfile().unwrap();
        file.write_all(&utf16le("héllo\nwörld\n")).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        // Odd buffer size forces code units to straddle refills
        let raw = FileStream::with_capacity(3, file);
        let mut stream = TranscodeStream::new(raw, Encoding::Utf16(Endian::Little));
        let mut text = Vec::new();
        loop {
            let chunk = stream.peek().unwrap();
            if chunk.is_empty() {
                break;
            }
            let n = chunk.len();
            text.extend_from_slice(chunk);
            stream.skip(n);
        }
        assert_eq!(String::from_utf8(text).unwrap(), "héllo\nwörld\n");
    }

    #[test]
    fn test_decode_error_moves_past_bad_input() {
        let mut file = tempfile().unwrap();
        // Unpaired low surrogate, then "ok"
        file.write_all(&[0x00, 0xDC]).unwrap();
        file.write_all(&utf16le("ok")).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let raw = FileStream::with_capacity(2, file);
        let mut stream = TranscodeStream::new(raw, Encoding::Utf16(Endian::Little));
        assert_eq!(stream.peek().unwrap_err().kind(), io::ErrorKind::InvalidData);

        let mut text = Vec::new();
        loop {
            let chunk = stream.peek().unwrap();
            if chunk.is_empty() {
                break;
            }
            let n = chunk.len();
            text.extend_from_slice(chunk);
            stream.skip(n);
        }
        assert_eq!(text, b"ok");
    }

    #[test]
    fn test_encoding_writes() {
        let file = tempfile().unwrap();
        let mut stream =
            TranscodeStream::new(FileStream::new(file), Encoding::Utf16(Endian::Big));
        stream.write_all("a€".as_bytes()).unwrap();
        stream.finish().unwrap();
        stream.flush().unwrap();

        let mut file = stream.into_inner().get_ref().try_clone().unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).unwrap();
        assert_eq!(bytes, vec![0x00, b'a', 0x20, 0xAC]);
    }

    #[test]
    fn test_reset_after_seek() {
        let mut file = tempfile().unwrap();
        file.write_all(&utf16le("abc")).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut stream =
            TranscodeStream::new(FileStream::new(file), Encoding::Utf16(Endian::Little));
        assert_eq!(stream.peek().unwrap(), b"abc");
        stream.skip(3);

        stream.get_mut().seek(SeekFrom::Start(2)).unwrap();
        stream.reset();
        assert_eq!(stream.peek().unwrap(), b"bc");
    }
}
