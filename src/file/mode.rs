//! Open-mode and read-mode string grammars

use std::fs::OpenOptions;
use std::str::FromStr;

use crate::encoding::{Encoding, Endian};
use crate::error::{IoError, IoResult};

/// Primary access selected by the first mode character
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Append,
}

/// Parsed `open` mode string, e.g. `"r"`, `"wb"`, `"a+utf16le"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub access: Access,
    /// `+` present: the file is opened for both reading and writing
    pub update: bool,
    /// Explicit binary flag or charset; `None` defers to defaults/detection
    pub encoding: Option<Encoding>,
}

impl OpenMode {
    pub fn parse(mode: &str) -> IoResult<Self> {
        let bytes = mode.as_bytes();
        let access = match bytes.first() {
            None | Some(b'r') => Access::Read,
            Some(b'w') => Access::Write,
            Some(b'a') => Access::Append,
            Some(_) => return Err(IoError::invalid(format!("invalid open mode: {mode}"))),
        };
        let update = mode.contains('+');

        let binary = bytes.get(1) == Some(&b'b') || (update && bytes.get(2) == Some(&b'b'));
        let encoding = if binary {
            Some(Encoding::Binary)
        } else {
            charset_from_mode(mode)
        };

        Ok(Self {
            access,
            update,
            encoding,
        })
    }

    pub fn is_readable(&self) -> bool {
        self.access == Access::Read || self.update
    }

    pub fn is_writable(&self) -> bool {
        self.access != Access::Read || self.update
    }

    /// OS-level open flags for this mode
    pub fn open_options(&self) -> OpenOptions {
        let mut options = OpenOptions::new();
        match self.access {
            Access::Read => {
                options.read(true).write(self.update);
            }
            Access::Write => {
                options.read(true).write(true).create(true).truncate(true);
            }
            Access::Append => {
                options.read(true).append(true).create(true);
            }
        }
        options
    }
}

impl FromStr for OpenMode {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn charset_from_mode(mode: &str) -> Option<Encoding> {
    let lower = mode.to_ascii_lowercase();
    // Longer names first: "utf16" is a prefix of "utf16le"
    if lower.contains("utf8") || lower.contains("utf-8") {
        Some(Encoding::Utf8)
    } else if lower.contains("utf16le") || lower.contains("utf-16le") {
        Some(Encoding::Utf16(Endian::Little))
    } else if lower.contains("utf16be") || lower.contains("utf-16be") {
        Some(Encoding::Utf16(Endian::Big))
    } else if lower.contains("utf16") || lower.contains("utf-16") {
        Some(Encoding::Utf16(Endian::NATIVE))
    } else {
        None
    }
}

// ============================================================================
// Read modes
// ============================================================================

/// What a single `read` call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// `"a"`: everything up to end of data
    All,
    /// `"l"`: one line, terminator stripped
    Line,
    /// `"L"`: one line, terminator kept
    LineKeep,
    /// `"n"`: one number (standard streams)
    Number,
    /// Fixed byte count
    Bytes(usize),
}

impl ReadMode {
    pub fn parse(mode: &str) -> IoResult<Self> {
        if let Ok(count) = mode.trim().parse::<i64>() {
            return Self::count(count);
        }
        let mode = mode.strip_prefix('*').unwrap_or(mode);
        match mode.chars().next() {
            None | Some('l') => Ok(ReadMode::Line),
            Some('L') => Ok(ReadMode::LineKeep),
            Some('a') => Ok(ReadMode::All),
            Some('n') => Ok(ReadMode::Number),
            Some(_) => Err(IoError::invalid(format!("unknown read mode: {mode}"))),
        }
    }

    /// Byte-count form; negative counts are rejected
    pub fn count(count: i64) -> IoResult<Self> {
        usize::try_from(count)
            .map(ReadMode::Bytes)
            .map_err(|_| IoError::invalid(format!("invalid read size: {count}")))
    }
}

impl FromStr for ReadMode {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_and_update() {
        let mode = OpenMode::parse("r").unwrap();
        assert_eq!(mode.access, Access::Read);
        assert!(!mode.update);
        assert!(mode.is_readable() && !mode.is_writable());

        let mode = OpenMode::parse("w+").unwrap();
        assert_eq!(mode.access, Access::Write);
        assert!(mode.update);

        let mode = OpenMode::parse("").unwrap();
        assert_eq!(mode.access, Access::Read);
        assert_eq!(mode.encoding, None);

        assert!(matches!(
            OpenMode::parse("x"),
            Err(IoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_binary_flag_position() {
        assert_eq!(OpenMode::parse("rb").unwrap().encoding, Some(Encoding::Binary));
        assert_eq!(OpenMode::parse("r+b").unwrap().encoding, Some(Encoding::Binary));
        assert_eq!(OpenMode::parse("wb+").unwrap().encoding, Some(Encoding::Binary));
        // 'b' in third position only counts with '+'
        assert_eq!(OpenMode::parse("rxb").unwrap().encoding, None);
    }

    #[test]
    fn test_charsets() {
        assert_eq!(
            OpenMode::parse("rUTF-16LE").unwrap().encoding,
            Some(Encoding::Utf16(Endian::Little))
        );
        assert_eq!(
            OpenMode::parse("wutf16be").unwrap().encoding,
            Some(Encoding::Utf16(Endian::Big))
        );
        assert_eq!(
            OpenMode::parse("a+utf16").unwrap().encoding,
            Some(Encoding::Utf16(Endian::NATIVE))
        );
        assert_eq!(OpenMode::parse("rutf8").unwrap().encoding, Some(Encoding::Utf8));
    }

    #[test]
    fn test_read_modes() {
        assert_eq!(ReadMode::parse("a").unwrap(), ReadMode::All);
        assert_eq!(ReadMode::parse("*a").unwrap(), ReadMode::All);
        assert_eq!(ReadMode::parse("L").unwrap(), ReadMode::LineKeep);
        assert_eq!(ReadMode::parse("l").unwrap(), ReadMode::Line);
        assert_eq!(ReadMode::parse("").unwrap(), ReadMode::Line);
        assert_eq!(ReadMode::parse("*n").unwrap(), ReadMode::Number);
        assert_eq!(ReadMode::parse("16").unwrap(), ReadMode::Bytes(16));
        assert!(ReadMode::parse("-1").is_err());
        assert!(ReadMode::parse("q").is_err());
    }
}
