//! Readiness backends behind the poller
//!
//! `PollBackend` is the seam between the poller's bookkeeping and the OS.
//! The default backend is `poll(2)` with a self-pipe for wakeups, which works
//! on every Unix the crate targets.
//!
//! Backends are shared between a waiting thread and registering threads, so
//! every method takes `&self` and registration never waits for `wait`.

use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::trace;

use super::PollEvents;

// ============================================================================
// Waker
// ============================================================================

/// Interrupts a blocked [`PollBackend::wait`] from any thread.
///
/// Cloned out of the backend when the poller is initialized, so waking never
/// needs the lock the waiting thread is holding.
#[derive(Clone)]
pub struct Waker {
    wake_fn: Arc<dyn Fn() -> io::Result<()> + Send + Sync>,
}

impl Waker {
    pub fn new<F>(wake_fn: F) -> Self
    where
        F: Fn() -> io::Result<()> + Send + Sync + 'static,
    {
        Self {
            wake_fn: Arc::new(wake_fn),
        }
    }

    /// Waker that does nothing, for backends that never block
    pub fn noop() -> Self {
        Self::new(|| Ok(()))
    }

    pub fn wake(&self) -> io::Result<()> {
        (self.wake_fn)()
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Waker")
    }
}

// ============================================================================
// Backend Trait
// ============================================================================

/// OS readiness primitive
#[cfg_attr(test, mockall::automock)]
pub trait PollBackend: Send + Sync {
    fn insert(&self, fd: RawFd, events: PollEvents) -> io::Result<()>;

    fn modify(&self, fd: RawFd, events: PollEvents) -> io::Result<()>;

    fn remove(&self, fd: RawFd) -> io::Result<()>;

    /// Block until at least one descriptor is ready, `timeout` elapses
    /// (`None` waits forever) or the waker fires. Ready descriptors are
    /// returned in the order the OS reported them.
    ///
    /// The interest set is read once on entry. Changes made while a wait is
    /// blocked take effect on the next call.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(RawFd, PollEvents)>>;

    fn waker(&self) -> Waker;
}

// ============================================================================
// poll(2) Backend
// ============================================================================

fn cvt(result: libc::c_int) -> io::Result<libc::c_int> {
    if result == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(result)
    }
}

fn set_nonblocking_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a descriptor we own, with valid flag arguments
    unsafe {
        let flags = cvt(libc::fcntl(fd, libc::F_GETFL))?;
        cvt(libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK))?;
        let fd_flags = cvt(libc::fcntl(fd, libc::F_GETFD))?;
        cvt(libc::fcntl(fd, libc::F_SETFD, fd_flags | libc::FD_CLOEXEC))?;
    }
    Ok(())
}

/// Anonymous pipe with both ends non-blocking, as (reader, writer)
pub(crate) fn nonblocking_pipe() -> io::Result<(OwnedFd, OwnedFd)> {
    let mut fds: [libc::c_int; 2] = [-1, -1];
    // SAFETY: `fds` has room for the two descriptors pipe(2) writes
    cvt(unsafe { libc::pipe(fds.as_mut_ptr()) })?;
    // SAFETY: pipe(2) succeeded, so both descriptors are open and unowned
    let (reader, writer) =
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
    set_nonblocking_cloexec(reader.as_raw_fd())?;
    set_nonblocking_cloexec(writer.as_raw_fd())?;
    Ok((reader, writer))
}

fn to_poll_flags(events: PollEvents) -> libc::c_short {
    let mut flags = 0;
    if events.contains(PollEvents::RECV) {
        flags |= libc::POLLIN;
    }
    if events.contains(PollEvents::SEND) {
        flags |= libc::POLLOUT;
    }
    flags
}

fn from_poll_flags(revents: libc::c_short) -> PollEvents {
    let mut events = PollEvents::NONE;
    if revents & libc::POLLIN != 0 {
        events |= PollEvents::RECV;
    }
    if revents & libc::POLLOUT != 0 {
        events |= PollEvents::SEND;
    }
    // Readers must still be told to read so they observe end of stream
    if revents & libc::POLLHUP != 0 {
        events |= PollEvents::RECV | PollEvents::EOF;
    }
    if revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
        events |= PollEvents::ERROR;
    }
    events
}

fn poll_timeout(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(duration) => duration.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

/// `poll(2)` backend with a self-pipe waker
#[derive(Debug)]
pub struct UnixPollBackend {
    interests: Mutex<Vec<(RawFd, PollEvents)>>,
    wake_reader: OwnedFd,
    wake_writer: Arc<OwnedFd>,
}

impl UnixPollBackend {
    pub fn new() -> io::Result<Self> {
        let (wake_reader, wake_writer) = nonblocking_pipe()?;
        Ok(Self {
            interests: Mutex::new(Vec::new()),
            wake_reader,
            wake_writer: Arc::new(wake_writer),
        })
    }

    fn drain_waker(&self) {
        let mut buf = [0u8; 64];
        loop {
            // SAFETY: reading into a local buffer of the stated length
            let n = unsafe {
                libc::read(
                    self.wake_reader.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    fn lock_interests(&self) -> MutexGuard<'_, Vec<(RawFd, PollEvents)>> {
        self.interests.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn position(interests: &[(RawFd, PollEvents)], fd: RawFd) -> Option<usize> {
    interests.iter().position(|(registered, _)| *registered == fd)
}

impl PollBackend for UnixPollBackend {
    fn insert(&self, fd: RawFd, events: PollEvents) -> io::Result<()> {
        let mut interests = self.lock_interests();
        if position(&interests, fd).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {fd} already registered"),
            ));
        }
        interests.push((fd, events));
        Ok(())
    }

    fn modify(&self, fd: RawFd, events: PollEvents) -> io::Result<()> {
        let mut interests = self.lock_interests();
        match position(&interests, fd) {
            Some(index) => {
                interests[index].1 = events;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("descriptor {fd} not registered"),
            )),
        }
    }

    fn remove(&self, fd: RawFd) -> io::Result<()> {
        self.lock_interests().retain(|(registered, _)| *registered != fd);
        Ok(())
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<Vec<(RawFd, PollEvents)>> {
        let mut pollfds = vec![libc::pollfd {
            fd: self.wake_reader.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        }];
        pollfds.extend(self.lock_interests().iter().map(|&(fd, events)| libc::pollfd {
            fd,
            events: to_poll_flags(events),
            revents: 0,
        }));

        // SAFETY: `pollfds` is a valid, initialized array of the given length
        let result = unsafe {
            libc::poll(
                pollfds.as_mut_ptr(),
                pollfds.len() as libc::nfds_t,
                poll_timeout(timeout),
            )
        };
        if result == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(Vec::new());
            }
            return Err(err);
        }

        if pollfds[0].revents != 0 {
            trace!("Poller woken");
            self.drain_waker();
        }

        Ok(pollfds[1..]
            .iter()
            .filter(|pollfd| pollfd.revents != 0)
            .map(|pollfd| (pollfd.fd, from_poll_flags(pollfd.revents)))
            .collect())
    }

    fn waker(&self) -> Waker {
        let writer = Arc::clone(&self.wake_writer);
        Waker::new(move || {
            let byte = 1u8;
            // SAFETY: writing one byte from a live local to an owned descriptor
            let n = unsafe { libc::write(writer.as_raw_fd(), (&byte as *const u8).cast(), 1) };
            if n == -1 {
                let err = io::Error::last_os_error();
                // A full pipe already guarantees a pending wakeup
                if err.kind() != io::ErrorKind::WouldBlock {
                    return Err(err);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_flag_translation() {
        assert_eq!(
            to_poll_flags(PollEvents::RECV | PollEvents::SEND),
            libc::POLLIN | libc::POLLOUT
        );
        assert_eq!(from_poll_flags(libc::POLLIN), PollEvents::RECV);
        assert_eq!(
            from_poll_flags(libc::POLLHUP),
            PollEvents::RECV | PollEvents::EOF
        );
        assert_eq!(from_poll_flags(libc::POLLNVAL), PollEvents::ERROR);
    }

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(poll_timeout(None), -1);
        assert_eq!(poll_timeout(Some(Duration::from_millis(250))), 250);
        assert_eq!(poll_timeout(Some(Duration::from_secs(u64::MAX))), libc::c_int::MAX);
    }

    #[test]
    fn test_pipe_readiness() {
        let (reader, writer) = nonblocking_pipe().unwrap();
        let backend = UnixPollBackend::new().unwrap();
        backend.insert(reader.as_raw_fd(), PollEvents::RECV).unwrap();

        assert!(backend.wait(Some(Duration::ZERO)).unwrap().is_empty());

        // SAFETY: writing from a static byte string to an owned pipe
        let n = unsafe { libc::write(writer.as_raw_fd(), b"x".as_ptr().cast(), 1) };
        assert_eq!(n, 1);

        let ready = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready, vec![(reader.as_raw_fd(), PollEvents::RECV)]);
    }

    #[test]
    fn test_duplicate_and_missing_registrations() {
        let backend = UnixPollBackend::new().unwrap();
        backend.insert(42, PollEvents::RECV).unwrap();
        assert_eq!(
            backend.insert(42, PollEvents::SEND).unwrap_err().kind(),
            io::ErrorKind::AlreadyExists
        );
        backend.modify(42, PollEvents::SEND).unwrap();
        backend.remove(42).unwrap();
        assert_eq!(
            backend.modify(42, PollEvents::RECV).unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }

    #[test]
    fn test_insert_while_wait_is_blocked() {
        let (reader, writer) = nonblocking_pipe().unwrap();
        let backend = UnixPollBackend::new().unwrap();
        let waker = backend.waker();

        thread::scope(|s| {
            let waiter = s.spawn(|| backend.wait(None));
            thread::sleep(Duration::from_millis(50));
            backend.insert(reader.as_raw_fd(), PollEvents::RECV).unwrap();
            waker.wake().unwrap();
            assert!(waiter.join().unwrap().unwrap().is_empty());
        });

        // SAFETY: writing from a static byte string to an owned pipe
        let n = unsafe { libc::write(writer.as_raw_fd(), b"x".as_ptr().cast(), 1) };
        assert_eq!(n, 1);
        let ready = backend.wait(Some(Duration::from_secs(5))).unwrap();
        assert_eq!(ready, vec![(reader.as_raw_fd(), PollEvents::RECV)]);
    }

    #[test]
    fn test_waker_interrupts_wait() {
        let backend = UnixPollBackend::new().unwrap();
        let waker = backend.waker();
        waker.wake().unwrap();
        waker.wake().unwrap();
        // Returns immediately and drains both wakeups
        assert!(backend.wait(None).unwrap().is_empty());
        assert!(backend.wait(Some(Duration::ZERO)).unwrap().is_empty());
    }
}
