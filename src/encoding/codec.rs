//! Incremental charset conversion to and from UTF-8
//!
//! Both directions keep a small carry buffer so a code unit or UTF-8
//! sequence split across two stream reads is converted once complete.

use std::io;

use super::{Encoding, Endian};

/// Windows-1252 mapping for 0x80..=0x9F; the rest of the range is Latin-1.
/// Unassigned slots map to the C1 control with the same value.
const CP1252_HIGH: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

fn invalid_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn cp1252_decode(byte: u8) -> char {
    match byte {
        0x80..=0x9F => CP1252_HIGH[(byte - 0x80) as usize],
        _ => char::from(byte),
    }
}

fn cp1252_encode(c: char) -> Option<u8> {
    let code = c as u32;
    if code < 0x80 || (0xA0..=0xFF).contains(&code) {
        return Some(code as u8);
    }
    CP1252_HIGH
        .iter()
        .position(|&mapped| mapped == c)
        .map(|index| 0x80 + index as u8)
}

// ============================================================================
// Decoder: foreign charset -> UTF-8
// ============================================================================

/// Streaming decoder producing UTF-8
#[derive(Debug)]
pub struct Decoder {
    encoding: Encoding,
    carry: Vec<u8>,
}

impl Decoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            carry: Vec::new(),
        }
    }

    /// Convert `input`, appending UTF-8 to `out`
    pub fn decode(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        match self.encoding {
            Encoding::Utf16(endian) => self.decode_utf16(input, endian, out),
            Encoding::Ansi => {
                for &byte in input {
                    push_char(out, cp1252_decode(byte));
                }
                Ok(())
            }
            _ => {
                out.extend_from_slice(input);
                Ok(())
            }
        }
    }

    /// Signal end of input; leftover partial units are an error
    pub fn finish(&mut self) -> io::Result<()> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            self.carry.clear();
            Err(invalid_data("truncated UTF-16 sequence at end of stream"))
        }
    }

    /// Drop carried bytes, used after the underlying stream is repositioned
    pub fn reset(&mut self) {
        self.carry.clear();
    }

    fn decode_utf16(&mut self, input: &[u8], endian: Endian, out: &mut Vec<u8>) -> io::Result<()> {
        self.carry.extend_from_slice(input);

        let mut units: Vec<u16> = self
            .carry
            .chunks_exact(2)
            .map(|pair| match endian {
                Endian::Little => u16::from_le_bytes([pair[0], pair[1]]),
                Endian::Big => u16::from_be_bytes([pair[0], pair[1]]),
            })
            .collect();

        let mut consumed = units.len() * 2;

        // A trailing high surrogate waits for its partner in the next chunk
        if let Some(&last) = units.last() {
            if (0xD800..0xDC00).contains(&last) {
                units.pop();
                consumed -= 2;
            }
        }

        for decoded in char::decode_utf16(units.iter().copied()) {
            match decoded {
                Ok(c) => push_char(out, c),
                Err(_) => {
                    // Malformed input is dropped, not retried with the next chunk
                    self.carry.clear();
                    return Err(invalid_data("unpaired UTF-16 surrogate"));
                }
            }
        }

        self.carry.drain(..consumed);
        Ok(())
    }
}

// ============================================================================
// Encoder: UTF-8 -> foreign charset
// ============================================================================

/// Streaming encoder consuming UTF-8
#[derive(Debug)]
pub struct Encoder {
    encoding: Encoding,
    carry: Vec<u8>,
}

impl Encoder {
    pub fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            carry: Vec::new(),
        }
    }

    /// Convert UTF-8 `input`, appending encoded bytes to `out`
    pub fn encode(&mut self, input: &[u8], out: &mut Vec<u8>) -> io::Result<()> {
        if !self.encoding.needs_transcode() {
            out.extend_from_slice(input);
            return Ok(());
        }

        self.carry.extend_from_slice(input);
        let valid_up_to = match std::str::from_utf8(&self.carry) {
            Ok(_) => self.carry.len(),
            // error_len() == None means the input ends mid-sequence
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => {
                self.carry.clear();
                return Err(invalid_data("invalid UTF-8 in written data"));
            }
        };

        let text = std::str::from_utf8(&self.carry[..valid_up_to])
            .map_err(|_| invalid_data("invalid UTF-8 in written data"))?;

        match self.encoding {
            Encoding::Utf16(endian) => {
                for unit in text.encode_utf16() {
                    let bytes = match endian {
                        Endian::Little => unit.to_le_bytes(),
                        Endian::Big => unit.to_be_bytes(),
                    };
                    out.extend_from_slice(&bytes);
                }
            }
            Encoding::Ansi => {
                for c in text.chars() {
                    let byte = cp1252_encode(c)
                        .ok_or_else(|| invalid_data("character not representable in code page"))?;
                    out.push(byte);
                }
            }
            _ => out.extend_from_slice(text.as_bytes()),
        }

        self.carry.drain(..valid_up_to);
        Ok(())
    }

    /// Signal end of input; an incomplete UTF-8 tail is an error
    pub fn finish(&mut self) -> io::Result<()> {
        if self.carry.is_empty() {
            Ok(())
        } else {
            self.carry.clear();
            Err(invalid_data("truncated UTF-8 sequence in written data"))
        }
    }
}
