//! Text encodings understood by file handles
//!
//! `detect` classifies the first bytes of a stream, `codec` holds the
//! incremental converters used by the transcoding stream.

pub mod codec;
pub mod detect;

pub use codec::{Decoder, Encoder};
pub use detect::{Detection, detect};

use std::fmt;

/// Byte order of a UTF-16 stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    /// Byte order of the running target
    pub const NATIVE: Endian = if cfg!(target_endian = "little") {
        Endian::Little
    } else {
        Endian::Big
    };
}

/// Charset carried by a file handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Raw bytes, no line or charset processing
    Binary,
    /// Not yet determined; never held by an open handle
    Unknown,
    Utf8,
    Utf16(Endian),
    /// Platform code page, handled as Windows-1252
    Ansi,
}

impl Encoding {
    pub fn is_binary(self) -> bool {
        matches!(self, Encoding::Binary | Encoding::Unknown)
    }

    /// Whether reads and writes go through a transcoding stream
    pub fn needs_transcode(self) -> bool {
        matches!(self, Encoding::Utf16(_) | Encoding::Ansi)
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Unknown => "unknown",
            Encoding::Utf8 => "utf8",
            Encoding::Utf16(Endian::Little) => "utf16le",
            Encoding::Utf16(Endian::Big) => "utf16be",
            Encoding::Ansi => "ansi",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transcode_classification() {
        assert!(!Encoding::Utf8.needs_transcode());
        assert!(!Encoding::Binary.needs_transcode());
        assert!(Encoding::Utf16(Endian::Big).needs_transcode());
        assert!(Encoding::Ansi.needs_transcode());
        assert!(Encoding::Unknown.is_binary());
    }

    #[test]
    fn test_names() {
        assert_eq!(Encoding::Utf16(Endian::Little).to_string(), "utf16le");
        assert_eq!(Encoding::Binary.name(), "binary");
    }
}
