//! Encoding detection over a stream prefix
//!
//! Checks, in order: LuaJIT bytecode signature, byte-order marks, then a
//! statistical scan of at most [`DETECT_SIZE`] bytes scoring ASCII, UTF-8
//! validity and UTF-16 zero-byte parity.

use super::{Encoding, Endian};

/// Upper bound on the number of scanned bytes
pub const DETECT_SIZE: usize = 1024;

/// ESC 'L' 'J', the precompiled LuaJIT chunk header
const LUAJIT_SIGNATURE: [u8; 3] = [0x1B, b'L', b'J'];

const BOM_UTF8: [u8; 3] = [0xEF, 0xBB, 0xBF];
const BOM_UTF16_BE: [u8; 2] = [0xFE, 0xFF];
const BOM_UTF16_LE: [u8; 2] = [0xFF, 0xFE];

/// Outcome of [`detect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub encoding: Encoding,
    /// Bytes the caller must skip before reading text
    pub bom_length: usize,
}

impl Detection {
    fn new(encoding: Encoding, bom_length: usize) -> Self {
        Self {
            encoding,
            bom_length,
        }
    }
}

/// Score accumulated while scanning; `None` marks a disqualified candidate.
#[derive(Debug)]
struct Scores {
    ascii: Option<usize>,
    utf8: Option<usize>,
    utf16_be: usize,
    utf16_le: usize,
    zeros: usize,
}

fn is_continuation(byte: u8) -> bool {
    (0x80..0xC0).contains(&byte)
}

/// Classify `data`, normally the first bytes of a file.
pub fn detect(data: &[u8]) -> Detection {
    if data.starts_with(&LUAJIT_SIGNATURE) {
        return Detection::new(Encoding::Binary, 0);
    }

    if data.starts_with(&BOM_UTF8) {
        return Detection::new(Encoding::Utf8, BOM_UTF8.len());
    }
    if data.starts_with(&BOM_UTF16_BE) {
        return Detection::new(Encoding::Utf16(Endian::Big), BOM_UTF16_BE.len());
    }
    if data.starts_with(&BOM_UTF16_LE) {
        return Detection::new(Encoding::Utf16(Endian::Little), BOM_UTF16_LE.len());
    }

    let scores = scan(data);
    let encoding = decide(&scores);
    Detection::new(encoding, 0)
}

fn scan(data: &[u8]) -> Scores {
    let mut scores = Scores {
        ascii: Some(0),
        utf8: Some(0),
        utf16_be: 0,
        utf16_le: 0,
        zeros: 0,
    };

    // The window stops 4 bytes short so a 4-byte UTF-8 sequence can be
    // inspected without bounds checks going past the buffer.
    let limit = data.len().saturating_sub(4).min(DETECT_SIZE);

    for i in 0..limit {
        let byte = data[i];

        if byte == 0 {
            scores.zeros += 1;
        }

        if byte < 0x80 {
            scores.ascii = scores.ascii.map(|n| n + 1);
        } else {
            scores.ascii = None;
        }

        if !is_continuation(byte) {
            let valid = match byte {
                0x00..=0x7F => true,
                0xC0..=0xDF => is_continuation(data[i + 1]),
                0xE0..=0xEF => data[i + 1..i + 3].iter().all(|&b| is_continuation(b)),
                0xF0..=0xF7 => data[i + 1..i + 4].iter().all(|&b| is_continuation(b)),
                _ => false,
            };
            scores.utf8 = if valid {
                scores.utf8.map(|n| n + 1)
            } else {
                None
            };
        }

        if i % 2 == 0 {
            if byte == 0 {
                scores.utf16_be += 1;
            }
            if data[i + 1] == 0 {
                scores.utf16_le += 1;
            }
        }
    }

    scores
}

fn decide(scores: &Scores) -> Encoding {
    let ascii = scores.ascii.unwrap_or(0);
    let utf8 = scores.utf8.unwrap_or(0);

    if (ascii > 0 || utf8 > 0) && scores.zeros <= 1 {
        Encoding::Utf8
    } else if scores.utf16_be > 0 && scores.utf16_be > scores.utf16_le {
        Encoding::Utf16(Endian::Big)
    } else if scores.utf16_le > 0 && scores.utf16_le >= scores.utf16_be {
        Encoding::Utf16(Endian::Little)
    } else if utf8 > 0 {
        Encoding::Utf8
    } else if cfg!(windows) {
        Encoding::Ansi
    } else {
        Encoding::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16(text: &str, endian: Endian) -> Vec<u8> {
        text.encode_utf16()
            .flat_map(|unit| match endian {
                Endian::Little => unit.to_le_bytes(),
                Endian::Big => unit.to_be_bytes(),
            })
            .collect()
    }

    #[test]
    fn test_boms() {
        let d = detect(&[0xEF, 0xBB, 0xBF, b'h', b'i']);
        assert_eq!(d, Detection::new(Encoding::Utf8, 3));

        let d = detect(&[0xFF, 0xFE, b'h', 0]);
        assert_eq!(d, Detection::new(Encoding::Utf16(Endian::Little), 2));

        let d = detect(&[0xFE, 0xFF, 0, b'h']);
        assert_eq!(d, Detection::new(Encoding::Utf16(Endian::Big), 2));
    }

    #[test]
    fn test_bom_wins_over_content() {
        let mut data = BOM_UTF8.to_vec();
        data.extend_from_slice(&[0u8; 64]);
        assert_eq!(detect(&data).encoding, Encoding::Utf8);
    }

    #[test]
    fn test_luajit_signature_is_binary() {
        let d = detect(b"\x1bLJ\x02plain looking text afterwards");
        assert_eq!(d, Detection::new(Encoding::Binary, 0));
    }

    #[test]
    fn test_plain_ascii_and_utf8() {
        assert_eq!(detect(b"hello world\nsecond line\n").encoding, Encoding::Utf8);
        assert_eq!(
            detect("héllo wörld, ünïcode text".as_bytes()).encoding,
            Encoding::Utf8
        );
    }

    #[test]
    fn test_utf16_without_bom() {
        let le = utf16("target(\"demo\")\n    set_kind(\"binary\")\n", Endian::Little);
        assert_eq!(detect(&le).encoding, Encoding::Utf16(Endian::Little));

        let be = utf16("target(\"demo\")\n    set_kind(\"binary\")\n", Endian::Big);
        assert_eq!(detect(&be).encoding, Encoding::Utf16(Endian::Big));
    }

    #[test]
    fn test_short_input_is_binary() {
        assert_eq!(detect(b"").encoding, Encoding::Binary);
        assert_eq!(detect(b"abc").encoding, Encoding::Binary);
        assert_eq!(detect(b"abcd").encoding, Encoding::Binary);
        assert_eq!(detect(b"abcde").encoding, Encoding::Utf8);
    }

    #[test]
    fn test_invalid_utf8_with_high_bytes() {
        // Lone high bytes with no zero parity pattern
        let data = [0xFFu8, 0xFE, 0x80, 0xC3, 0x41, 0xFA, 0x99, 0x10, 0x81, 0x82];
        let expected = if cfg!(windows) {
            Encoding::Ansi
        } else {
            Encoding::Binary
        };
        assert_eq!(detect(&data[2..]).encoding, expected);
    }

    #[test]
    fn test_scan_is_bounded() {
        let mut data = vec![b'a'; DETECT_SIZE];
        data.extend_from_slice(&[0u8; 512]);
        assert_eq!(detect(&data).encoding, Encoding::Utf8);
    }
}
