//! File handle lifecycle: open, close, seek, size and descriptor queries

use std::fmt;
use std::io::{self, IsTerminal, SeekFrom, Stderr, Stdout};
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use super::mode::{Access, OpenMode};
use crate::config::IoConfig;
use crate::encoding::{Encoding, detect};
use crate::error::{IoError, IoResult};
use crate::stream::{ByteSink, ByteSource, FileStream, RawStream, StdinSource, TranscodeStream};

/// Display name given to a handle once closed
pub const CLOSED_NAME: &str = "file: closed";

// ============================================================================
// Handle Kinds
// ============================================================================

/// Which standard stream a handle wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StdKind {
    Stdin,
    Stdout,
    Stderr,
}

impl StdKind {
    pub fn name(self) -> &'static str {
        match self {
            StdKind::Stdin => "stdin",
            StdKind::Stdout => "stdout",
            StdKind::Stderr => "stderr",
        }
    }
}

/// Reported kind of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Disk,
    Std(StdKind),
}

/// Disk stream with or without a transcoding layer
#[derive(Debug)]
pub(crate) enum DiskStream {
    Direct(FileStream),
    Transcoded(TranscodeStream<FileStream>),
}

impl DiskStream {
    pub(crate) fn source(&mut self) -> &mut dyn ByteSource {
        match self {
            DiskStream::Direct(raw) => raw,
            DiskStream::Transcoded(stream) => stream,
        }
    }

    pub(crate) fn sink(&mut self) -> &mut dyn ByteSink {
        match self {
            DiskStream::Direct(raw) => raw,
            DiskStream::Transcoded(stream) => stream,
        }
    }

    fn raw(&self) -> &FileStream {
        match self {
            DiskStream::Direct(raw) => raw,
            DiskStream::Transcoded(stream) => stream.get_ref(),
        }
    }

    fn raw_mut(&mut self) -> &mut FileStream {
        match self {
            DiskStream::Direct(raw) => raw,
            DiskStream::Transcoded(stream) => stream.get_mut(),
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            DiskStream::Direct(raw) => raw.seek(pos),
            DiskStream::Transcoded(stream) => {
                let result = stream.get_mut().seek(pos);
                stream.reset();
                result
            }
        }
    }

    fn finish(&mut self) -> io::Result<()> {
        match self {
            DiskStream::Direct(_) => Ok(()),
            DiskStream::Transcoded(stream) => stream.finish(),
        }
    }
}

/// Standard stream storage
pub(crate) enum StdStream {
    In(Box<dyn ByteSource + Send>),
    Out(Stdout),
    Err(Stderr),
}

impl fmt::Debug for StdStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StdStream::In(_) => f.write_str("StdStream::In"),
            StdStream::Out(_) => f.write_str("StdStream::Out"),
            StdStream::Err(_) => f.write_str("StdStream::Err"),
        }
    }
}

/// Storage behind an open handle
#[derive(Debug)]
pub(crate) enum FileKind {
    Disk { path: PathBuf, stream: DiskStream },
    Std(StdStream),
}

// ============================================================================
// File Handle
// ============================================================================

/// An open disk file or standard stream.
///
/// Dropping an open handle closes it leniently.
#[derive(Debug)]
pub struct FileHandle {
    /// `None` once closed
    pub(crate) kind: Option<FileKind>,
    pub(crate) file_type: FileType,
    pub(crate) mode: OpenMode,
    pub(crate) encoding: Encoding,
    pub(crate) name: String,
    pub(crate) tty: bool,
    pub(crate) read_cache: Vec<u8>,
    /// Trailing partial line waiting for its newline (CRLF translation)
    pub(crate) write_cache: Vec<u8>,
    pub(crate) config: IoConfig,
}

/// Truncate to at most `limit` bytes on a character boundary
pub(crate) fn bounded_name(name: &str, limit: usize) -> String {
    if name.len() <= limit {
        return name.to_string();
    }
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

impl FileHandle {
    /// Open `path` with default configuration
    pub fn open(path: impl AsRef<Path>, mode: &str) -> IoResult<Self> {
        Self::open_with_config(path, mode, &IoConfig::default())
    }

    pub fn open_with_config(
        path: impl AsRef<Path>,
        mode: &str,
        config: &IoConfig,
    ) -> IoResult<Self> {
        let path = path.as_ref();
        let mode = OpenMode::parse(mode)?;

        let file = mode
            .open_options()
            .open(path)
            .map_err(|e| IoError::from_open(e, path))?;
        let tty = file.is_terminal();
        let mut raw = FileStream::new(file);

        let encoding = match mode.encoding {
            Some(encoding) => encoding,
            None if mode.access != Access::Read => Encoding::Utf8,
            None => {
                let detection = detect(raw.fill_to(config.detect_size)?);
                if detection.bom_length > 0 {
                    raw.seek(SeekFrom::Start(detection.bom_length as u64))?;
                }
                trace!(
                    "Detected {} for {} (bom {} bytes)",
                    detection.encoding,
                    path.display(),
                    detection.bom_length
                );
                detection.encoding
            }
        };

        let stream = if encoding.needs_transcode() {
            DiskStream::Transcoded(TranscodeStream::new(raw, encoding))
        } else {
            DiskStream::Direct(raw)
        };

        debug!("Opened {} as {} ({:?})", path.display(), encoding, mode.access);

        Ok(Self {
            kind: Some(FileKind::Disk {
                path: path.to_path_buf(),
                stream,
            }),
            file_type: FileType::Disk,
            mode,
            encoding,
            name: bounded_name(&path.to_string_lossy(), config.display_name_limit),
            tty,
            read_cache: Vec::new(),
            write_cache: Vec::new(),
            config: config.clone(),
        })
    }

    /// Handle over one of the process standard streams
    pub fn stdfile(kind: StdKind) -> Self {
        Self::stdfile_with_config(kind, &IoConfig::default())
    }

    pub fn stdfile_with_config(kind: StdKind, config: &IoConfig) -> Self {
        let (stream, tty) = match kind {
            StdKind::Stdin => {
                let tty = io::stdin().is_terminal();
                let source: Box<dyn ByteSource + Send> = Box::new(StdinSource::new());
                (StdStream::In(source), tty)
            }
            StdKind::Stdout => {
                let stdout = io::stdout();
                let tty = stdout.is_terminal();
                (StdStream::Out(stdout), tty)
            }
            StdKind::Stderr => {
                let stderr = io::stderr();
                let tty = stderr.is_terminal();
                (StdStream::Err(stderr), tty)
            }
        };
        Self::from_std(kind, stream, tty, config)
    }

    pub(crate) fn from_std(kind: StdKind, stream: StdStream, tty: bool, config: &IoConfig) -> Self {
        let access = match kind {
            StdKind::Stdin => Access::Read,
            StdKind::Stdout | StdKind::Stderr => Access::Write,
        };
        Self {
            kind: Some(FileKind::Std(stream)),
            file_type: FileType::Std(kind),
            mode: OpenMode {
                access,
                update: false,
                encoding: Some(Encoding::Utf8),
            },
            encoding: Encoding::Utf8,
            name: kind.name().to_string(),
            tty,
            read_cache: Vec::new(),
            write_cache: Vec::new(),
            config: config.clone(),
        }
    }

    /// Stdin-typed handle reading from an arbitrary source
    #[cfg(test)]
    pub(crate) fn stdin_from(source: impl ByteSource + Send + 'static) -> Self {
        Self::from_std(
            StdKind::Stdin,
            StdStream::In(Box::new(source)),
            false,
            &IoConfig::default(),
        )
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn is_open(&self) -> bool {
        self.kind.is_some()
    }

    pub fn file_type(&self) -> FileType {
        self.file_type
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Bounded display name, or the closed marker
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of an open disk file
    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            Some(FileKind::Disk { path, .. }) => Some(path),
            _ => None,
        }
    }

    pub fn is_tty(&self) -> IoResult<bool> {
        self.ensure_open()?;
        Ok(self.tty)
    }

    pub(crate) fn ensure_open(&self) -> IoResult<()> {
        if self.kind.is_some() {
            Ok(())
        } else {
            Err(IoError::AlreadyClosed)
        }
    }

    fn disk_stream(&self, operation: &str) -> IoResult<&DiskStream> {
        match &self.kind {
            None => Err(IoError::AlreadyClosed),
            Some(FileKind::Disk { stream, .. }) => Ok(stream),
            Some(FileKind::Std(_)) => Err(IoError::unsupported(format!(
                "{operation} is not supported on {}",
                self.name
            ))),
        }
    }

    pub(crate) fn disk_stream_mut(&mut self, operation: &str) -> IoResult<&mut DiskStream> {
        match &mut self.kind {
            None => Err(IoError::AlreadyClosed),
            Some(FileKind::Disk { stream, .. }) => Ok(stream),
            Some(FileKind::Std(_)) => Err(IoError::unsupported(format!(
                "{operation} is not supported on {}",
                self.name
            ))),
        }
    }

    /// Size in bytes of the underlying file
    pub fn size(&self) -> IoResult<u64> {
        Ok(self.disk_stream("size")?.raw().size()?)
    }

    /// Descriptor of the raw stream
    pub fn raw_fd(&self) -> IoResult<std::os::fd::RawFd> {
        Ok(self.disk_stream("rawfd")?.raw().raw_fd())
    }

    // ------------------------------------------------------------------------
    // Positioning
    // ------------------------------------------------------------------------

    /// Reposition the raw stream and return the new offset.
    ///
    /// Any deferred partial line is written first. On transcoded handles the
    /// offset is in raw bytes and decoded lookahead is discarded.
    pub fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        self.disk_stream("seek")?;
        if let SeekFrom::End(offset) = pos {
            let size = self.size()?;
            if offset < 0 && offset.unsigned_abs() > size {
                return Err(IoError::invalid(format!(
                    "seek offset {offset} from end is before start of file ({size} bytes)"
                )));
            }
        }
        self.drain_write_cache()?;
        Ok(self.disk_stream_mut("seek")?.seek(pos)?)
    }

    /// Flush pending data and push the file contents to storage
    pub fn sync(&mut self) -> IoResult<()> {
        self.flush()?;
        Ok(self.disk_stream_mut("sync")?.raw_mut().sync()?)
    }

    // ------------------------------------------------------------------------
    // Close
    // ------------------------------------------------------------------------

    /// Release the streams and caches.
    ///
    /// Closing a closed handle fails with `AlreadyClosed` unless
    /// `allow_already_closed` is set.
    pub fn close(&mut self, allow_already_closed: bool) -> IoResult<()> {
        let Some(kind) = self.kind.take() else {
            return if allow_already_closed {
                Ok(())
            } else {
                Err(IoError::AlreadyClosed)
            };
        };

        let pending = std::mem::take(&mut self.write_cache);
        let result = Self::release(kind, &pending);

        self.read_cache = Vec::new();
        debug!("Closed {}", self.name);
        self.name = CLOSED_NAME.to_string();
        result
    }

    fn release(kind: FileKind, pending: &[u8]) -> IoResult<()> {
        match kind {
            FileKind::Disk { mut stream, .. } => {
                if !pending.is_empty() {
                    stream.sink().write_all(pending)?;
                }
                stream.finish()?;
                Ok(stream.sink().flush()?)
            }
            FileKind::Std(StdStream::Out(mut out)) => Ok(io::Write::flush(&mut out)?),
            FileKind::Std(StdStream::Err(mut err)) => Ok(io::Write::flush(&mut err)?),
            FileKind::Std(StdStream::In(_)) => Ok(()),
        }
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            warn!("Error closing {} on drop: {}", self.name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Endian;
    use crate::test_utils::fixtures::{ScratchFile, utf16};
    use std::fs;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = FileHandle::open(dir.path().join("missing.lua"), "r");
        assert!(matches!(result, Err(IoError::NotFound { .. })));
    }

    #[test]
    fn test_open_bad_mode() {
        let dir = TempDir::new().unwrap();
        let result = FileHandle::open(dir.path().join("x"), "z");
        assert!(matches!(result, Err(IoError::InvalidArgument(_))));
    }

    #[test]
    fn test_open_detects_utf8_bom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bom.txt");
        fs::write(&path, b"\xEF\xBB\xBFhello\n").unwrap();

        let mut file = FileHandle::open(&path, "r").unwrap();
        assert_eq!(file.encoding(), Encoding::Utf8);
        assert_eq!(file.read_all("").unwrap(), b"hello\n");
    }

    #[test]
    fn test_open_detects_utf16le_bom() {
        let scratch = ScratchFile::with_contents("wide.txt", &utf16("hi\n", false, true));

        let mut file = FileHandle::open(&scratch.path, "r").unwrap();
        assert_eq!(file.encoding(), Encoding::Utf16(Endian::Little));
        assert_eq!(file.read_line(false, "").unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn test_write_mode_defaults_to_utf8() {
        let dir = TempDir::new().unwrap();
        let file = FileHandle::open(dir.path().join("out.txt"), "w").unwrap();
        assert_eq!(file.encoding(), Encoding::Utf8);
        assert_eq!(file.file_type(), FileType::Disk);
        assert!(!file.is_tty().unwrap());
    }

    #[test]
    fn test_double_close() {
        let dir = TempDir::new().unwrap();
        let mut file = FileHandle::open(dir.path().join("c.txt"), "w").unwrap();
        assert!(file.path().is_some());

        file.close(false).unwrap();
        assert!(!file.is_open());
        assert!(file.path().is_none());
        assert_eq!(file.name(), CLOSED_NAME);

        assert!(matches!(file.close(false), Err(IoError::AlreadyClosed)));
        assert!(file.close(true).is_ok());
        assert!(matches!(file.size(), Err(IoError::AlreadyClosed)));
    }

    #[test]
    fn test_seek_and_size() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("s.bin");
        fs::write(&path, b"0123456789").unwrap();

        let mut file = FileHandle::open(&path, "rb").unwrap();
        assert_eq!(file.size().unwrap(), 10);
        assert_eq!(file.seek(SeekFrom::Start(4)).unwrap(), 4);
        assert_eq!(file.read_bytes(2, "").unwrap(), Some(b"45".to_vec()));
        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 6);
        assert_eq!(file.seek(SeekFrom::End(-3)).unwrap(), 7);
        assert_eq!(file.read_bytes(8, "").unwrap(), Some(b"789".to_vec()));

        assert!(matches!(
            file.seek(SeekFrom::End(-11)),
            Err(IoError::InvalidArgument(_))
        ));
        // Rejected seek leaves the position alone
        assert_eq!(file.seek(SeekFrom::Current(0)).unwrap(), 10);
    }

    #[test]
    fn test_std_handles_reject_disk_operations() {
        let mut out = FileHandle::stdfile(StdKind::Stdout);
        assert_eq!(out.name(), "stdout");
        assert_eq!(out.file_type(), FileType::Std(StdKind::Stdout));
        assert!(matches!(out.size(), Err(IoError::UnsupportedOperation(_))));
        assert!(matches!(
            out.seek(SeekFrom::Start(0)),
            Err(IoError::UnsupportedOperation(_))
        ));
        assert!(matches!(out.raw_fd(), Err(IoError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_stdin_handles_keep_unread_input() {
        let (reader, mut writer) = UnixStream::pair().unwrap();
        writer.write_all(b"first\nsecond\n").unwrap();
        drop(writer);

        // SAFETY: fd 0 is pointed at the socket for the two reads and put back
        // afterwards; nothing else in the test binary reads standard input
        let saved = unsafe { libc::dup(0) };
        assert_ne!(unsafe { libc::dup2(reader.as_raw_fd(), 0) }, -1);

        // Each handle is dropped before the next one is created
        let first = FileHandle::stdfile(StdKind::Stdin).read_line(false, "");
        let second = FileHandle::stdfile(StdKind::Stdin).read_line(false, "");

        if saved >= 0 {
            // SAFETY: `saved` is the descriptor duplicated above
            unsafe {
                libc::dup2(saved, 0);
                libc::close(saved);
            }
        }
        assert_eq!(first.unwrap(), Some(b"first".to_vec()));
        assert_eq!(second.unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn test_bounded_name() {
        assert_eq!(bounded_name("short", 63), "short");
        let long = "é".repeat(40);
        let bounded = bounded_name(&long, 63);
        assert_eq!(bounded.len(), 62);
        assert!(long.starts_with(&bounded));
    }

    #[test]
    fn test_display_name_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("n".repeat(100));
        let file = FileHandle::open(&path, "w").unwrap();
        assert_eq!(file.name().len(), 63);
    }
}
