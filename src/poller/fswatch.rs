//! Filesystem watcher pollable by the unified poller
//!
//! Backed by inotify on Linux. Other platforms report the watcher as
//! unsupported through [`FsWatcher::is_supported`] and `new` fails.

use std::collections::HashMap;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// What happened to a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FsChangeKind {
    Create,
    Delete,
    Modify,
}

impl FsChangeKind {
    pub fn name(self) -> &'static str {
        match self {
            FsChangeKind::Create => "create",
            FsChangeKind::Delete => "delete",
            FsChangeKind::Modify => "modify",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsChange {
    pub path: PathBuf,
    pub kind: FsChangeKind,
}

#[derive(Debug)]
struct Watch {
    path: PathBuf,
    recursive: bool,
}

/// Set of watched paths sharing one pollable descriptor
#[derive(Debug)]
pub struct FsWatcher {
    fd: OwnedFd,
    /// Watch descriptor -> watched path
    watches: Mutex<HashMap<i32, Watch>>,
}

impl FsWatcher {
    pub fn is_supported() -> bool {
        cfg!(target_os = "linux")
    }

    pub fn new() -> io::Result<Self> {
        let fd = sys::init()?;
        debug!("Created filesystem watcher {}", fd.as_raw_fd());
        Ok(Self {
            fd,
            watches: Mutex::new(HashMap::new()),
        })
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn lock_watches(&self) -> MutexGuard<'_, HashMap<i32, Watch>> {
        self.watches.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Watch `path`; with `recursive`, every directory below it too,
    /// including directories created later.
    pub fn add(&self, path: &Path, recursive: bool) -> io::Result<()> {
        self.add_one(path, recursive)?;
        if recursive && path.is_dir() {
            for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
                match entry {
                    Ok(entry) if entry.file_type().is_dir() => self.add_one(entry.path(), true)?,
                    Ok(_) => {}
                    Err(e) => trace!("Skipping unreadable entry under {}: {}", path.display(), e),
                }
            }
        }
        Ok(())
    }

    fn add_one(&self, path: &Path, recursive: bool) -> io::Result<()> {
        let wd = sys::add_watch(self.raw_fd(), path)?;
        trace!("Watching {} (wd {})", path.display(), wd);
        self.lock_watches().insert(
            wd,
            Watch {
                path: path.to_path_buf(),
                recursive,
            },
        );
        Ok(())
    }

    /// Stop watching `path` and, for recursive watches, everything below it
    pub fn remove(&self, path: &Path) -> io::Result<()> {
        let mut watches = self.lock_watches();
        let doomed: Vec<i32> = watches
            .iter()
            .filter(|(_, watch)| {
                watch.path == path || (watch.recursive && watch.path.starts_with(path))
            })
            .map(|(wd, _)| *wd)
            .collect();
        if doomed.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not watched", path.display()),
            ));
        }
        for wd in doomed {
            watches.remove(&wd);
            sys::rm_watch(self.raw_fd(), wd)?;
        }
        Ok(())
    }

    /// Drain pending notifications; called by the poller once the descriptor
    /// is readable.
    pub(crate) fn read_changes(&self) -> io::Result<Vec<FsChange>> {
        let events = sys::read_events(self.raw_fd())?;
        let mut changes = Vec::with_capacity(events.len());
        let mut new_dirs = Vec::new();

        {
            let mut watches = self.lock_watches();
            for event in events {
                if event.mask & sys::IGNORED != 0 {
                    watches.remove(&event.wd);
                    continue;
                }
                let Some(watch) = watches.get(&event.wd) else {
                    continue;
                };
                let Some(kind) = sys::classify(event.mask) else {
                    continue;
                };
                let path = match &event.name {
                    Some(name) => watch.path.join(name),
                    None => watch.path.clone(),
                };
                if kind == FsChangeKind::Create
                    && event.mask & sys::IS_DIR != 0
                    && watch.recursive
                {
                    new_dirs.push(path.clone());
                }
                changes.push(FsChange { path, kind });
            }
        }

        for dir in new_dirs {
            if let Err(e) = self.add(&dir, true) {
                warn!("Failed to watch new directory {}: {}", dir.display(), e);
            }
        }
        Ok(changes)
    }
}

/// A decoded notification record
#[derive(Debug)]
struct RawEvent {
    wd: i32,
    mask: u32,
    name: Option<std::ffi::OsString>,
}

#[cfg(target_os = "linux")]
mod sys {
    use super::{FsChangeKind, RawEvent};
    use std::ffi::{CString, OsStr};
    use std::io;
    use std::mem;
    use std::os::fd::{FromRawFd, OwnedFd, RawFd};
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;
    use std::ptr;

    pub(super) const IGNORED: u32 = libc::IN_IGNORED;
    pub(super) const IS_DIR: u32 = libc::IN_ISDIR;

    const WATCH_MASK: u32 = libc::IN_CREATE
        | libc::IN_DELETE
        | libc::IN_DELETE_SELF
        | libc::IN_MODIFY
        | libc::IN_ATTRIB
        | libc::IN_MOVED_FROM
        | libc::IN_MOVED_TO;

    pub(super) fn classify(mask: u32) -> Option<FsChangeKind> {
        if mask & (libc::IN_CREATE | libc::IN_MOVED_TO) != 0 {
            Some(FsChangeKind::Create)
        } else if mask & (libc::IN_DELETE | libc::IN_DELETE_SELF | libc::IN_MOVED_FROM) != 0 {
            Some(FsChangeKind::Delete)
        } else if mask & (libc::IN_MODIFY | libc::IN_ATTRIB) != 0 {
            Some(FsChangeKind::Modify)
        } else {
            None
        }
    }

    pub(super) fn init() -> io::Result<OwnedFd> {
        // SAFETY: plain syscall with constant flags
        let fd = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: inotify_init1 returned a fresh descriptor nobody else owns
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub(super) fn add_watch(fd: RawFd, path: &Path) -> io::Result<i32> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))?;
        // SAFETY: `c_path` is a valid NUL-terminated string for the call
        let wd = unsafe { libc::inotify_add_watch(fd, c_path.as_ptr(), WATCH_MASK) };
        if wd == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(wd)
    }

    pub(super) fn rm_watch(fd: RawFd, wd: i32) -> io::Result<()> {
        // SAFETY: plain syscall on descriptors owned by the watcher
        if unsafe { libc::inotify_rm_watch(fd, wd) } == -1 {
            let err = io::Error::last_os_error();
            // The kernel drops watches of deleted paths on its own
            if err.raw_os_error() != Some(libc::EINVAL) {
                return Err(err);
            }
        }
        Ok(())
    }

    pub(super) fn read_events(fd: RawFd) -> io::Result<Vec<RawEvent>> {
        const HEADER: usize = mem::size_of::<libc::inotify_event>();
        let mut buffer = [0u8; 4096];
        let mut events = Vec::new();

        loop {
            // SAFETY: reading into a local buffer of the stated length
            let n = unsafe { libc::read(fd, buffer.as_mut_ptr().cast(), buffer.len()) };
            if n < 0 {
                let err = io::Error::last_os_error();
                match err.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => return Err(err),
                }
            }
            let n = n as usize;
            if n == 0 {
                break;
            }

            let mut offset = 0;
            while offset + HEADER <= n {
                // SAFETY: a full header lies within the bytes read; the buffer
                // has no alignment guarantee, hence read_unaligned
                let header: libc::inotify_event =
                    unsafe { ptr::read_unaligned(buffer.as_ptr().add(offset).cast()) };
                let name_start = offset + HEADER;
                let name_end = (name_start + header.len as usize).min(n);
                let raw_name = &buffer[name_start..name_end];
                let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
                let name = (name_len > 0)
                    .then(|| OsStr::from_bytes(&raw_name[..name_len]).to_os_string());

                events.push(RawEvent {
                    wd: header.wd,
                    mask: header.mask,
                    name,
                });
                offset = name_end;
            }
        }

        Ok(events)
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::{FsChangeKind, RawEvent};
    use std::io;
    use std::os::fd::{OwnedFd, RawFd};
    use std::path::Path;

    pub(super) const IGNORED: u32 = 0;
    pub(super) const IS_DIR: u32 = 0;

    fn unsupported() -> io::Error {
        io::Error::new(
            io::ErrorKind::Unsupported,
            "filesystem watching is not supported on this platform",
        )
    }

    pub(super) fn classify(_mask: u32) -> Option<FsChangeKind> {
        None
    }

    pub(super) fn init() -> io::Result<OwnedFd> {
        Err(unsupported())
    }

    pub(super) fn add_watch(_fd: RawFd, _path: &Path) -> io::Result<i32> {
        Err(unsupported())
    }

    pub(super) fn rm_watch(_fd: RawFd, _wd: i32) -> io::Result<()> {
        Err(unsupported())
    }

    pub(super) fn read_events(_fd: RawFd) -> io::Result<Vec<RawEvent>> {
        Ok(Vec::new())
    }
}
