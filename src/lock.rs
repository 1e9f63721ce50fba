//! Advisory file locks
//!
//! A [`FileLock`] wraps `flock(2)` on a backing file that is created on open.
//! The lock follows the same lifecycle as a file handle: explicit
//! `close`, lenient close on drop.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, trace, warn};

use crate::config::IoConfig;
use crate::error::{IoError, IoResult};
use crate::file::handle::bounded_name;

/// Display name of a closed lock
pub const CLOSED_LOCK_NAME: &str = "filelock: closed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockMode {
    #[default]
    Exclusive,
    Shared,
}

impl LockMode {
    fn operation(self) -> libc::c_int {
        match self {
            LockMode::Exclusive => libc::LOCK_EX,
            LockMode::Shared => libc::LOCK_SH,
        }
    }
}

impl FromStr for LockMode {
    type Err = IoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exclusive" | "ex" => Ok(LockMode::Exclusive),
            "shared" | "sh" => Ok(LockMode::Shared),
            _ => Err(IoError::invalid(format!("invalid lock mode: {s}"))),
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Exclusive => f.write_str("exclusive"),
            LockMode::Shared => f.write_str("shared"),
        }
    }
}

#[derive(Debug)]
struct OpenLock {
    file: File,
    path: PathBuf,
    held: Option<LockMode>,
}

/// Advisory lock over a backing file
#[derive(Debug)]
pub struct FileLock {
    inner: Option<OpenLock>,
    name: String,
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: flock on a descriptor owned by `file`
        if unsafe { libc::flock(file.as_raw_fd(), operation) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

impl FileLock {
    pub fn open(path: impl AsRef<Path>) -> IoResult<Self> {
        Self::open_with_config(path, &IoConfig::default())
    }

    /// Open (creating if needed) the backing file, retrying a failed open
    /// `config.lock_open_retries` times.
    pub fn open_with_config(path: impl AsRef<Path>, config: &IoConfig) -> IoResult<Self> {
        let path = path.as_ref();
        let mut attempt = 0;
        let file = loop {
            match OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
            {
                Ok(file) => break file,
                Err(e) if attempt < config.lock_open_retries => {
                    attempt += 1;
                    trace!("Retrying lock open of {} after: {}", path.display(), e);
                }
                Err(e) => return Err(IoError::from_open(e, path)),
            }
        };

        debug!("Opened lock {}", path.display());
        Ok(Self {
            inner: Some(OpenLock {
                file,
                path: path.to_path_buf(),
                held: None,
            }),
            name: bounded_name(&path.to_string_lossy(), config.display_name_limit),
        })
    }

    fn open_lock(&mut self) -> IoResult<&mut OpenLock> {
        self.inner.as_mut().ok_or(IoError::AlreadyClosed)
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.as_ref().is_some_and(|lock| lock.held.is_some())
    }

    /// Mode currently held, if any
    pub fn held_mode(&self) -> Option<LockMode> {
        self.inner.as_ref().and_then(|lock| lock.held)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.as_ref().map(|lock| lock.path.as_path())
    }

    /// Block until the lock is granted in `mode`
    pub fn lock(&mut self, mode: LockMode) -> IoResult<()> {
        let lock = self.open_lock()?;
        trace!("Waiting for {} lock on {}", mode, lock.path.display());
        flock(&lock.file, mode.operation())?;
        lock.held = Some(mode);
        debug!("Acquired {} lock on {}", mode, lock.path.display());
        Ok(())
    }

    /// Take the lock only if it is free; `false` means another holder has it
    pub fn try_lock(&mut self, mode: LockMode) -> IoResult<bool> {
        let lock = self.open_lock()?;
        match flock(&lock.file, mode.operation() | libc::LOCK_NB) {
            Ok(()) => {
                lock.held = Some(mode);
                debug!("Acquired {} lock on {}", mode, lock.path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("{} lock on {} is busy", mode, lock.path.display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Release the lock, keeping the backing file open
    pub fn unlock(&mut self) -> IoResult<()> {
        let lock = self.open_lock()?;
        if lock.held.is_none() {
            return Ok(());
        }
        flock(&lock.file, libc::LOCK_UN)?;
        lock.held = None;
        debug!("Released lock on {}", lock.path.display());
        Ok(())
    }

    /// Unlock and close; a second close fails unless `allow_already_closed`
    pub fn close(&mut self, allow_already_closed: bool) -> IoResult<()> {
        let Some(lock) = self.inner.take() else {
            return if allow_already_closed {
                Ok(())
            } else {
                Err(IoError::AlreadyClosed)
            };
        };

        let result = match lock.held {
            Some(_) => flock(&lock.file, libc::LOCK_UN).map_err(IoError::from),
            None => Ok(()),
        };
        debug!("Closed lock {}", lock.path.display());
        self.name = CLOSED_LOCK_NAME.to_string();
        result
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            warn!("Failed to release lock {}: {}", self.name, e);
        }
    }
}
