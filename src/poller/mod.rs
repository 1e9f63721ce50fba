//! Process-wide unified poller
//!
//! Sockets, pipes and filesystem watchers are registered with one poller and
//! reported through one blocking [`Poller::wait`]. The poller never owns the
//! objects it watches: sockets and pipes are plain descriptors and watchers
//! are held through weak references.
//!
//! Registrations live behind a mutex that is only held for bookkeeping. The
//! blocking OS wait runs outside it, so other threads can register or remove
//! objects at any time. A change made while a wait is blocked wakes that wait,
//! which returns early so the caller picks up the new interest set.

pub mod backend;
pub mod fswatch;

pub use backend::{PollBackend, UnixPollBackend, Waker};
pub use fswatch::{FsChange, FsChangeKind, FsWatcher};

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, Weak};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};

// ============================================================================
// Events
// ============================================================================

/// Readiness bit set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct PollEvents(u32);

impl PollEvents {
    pub const NONE: Self = Self(0);
    pub const RECV: Self = Self(0x0001);
    pub const SEND: Self = Self(0x0002);
    /// Peer closed; reported together with `RECV`
    pub const EOF: Self = Self(0x0100);
    pub const ERROR: Self = Self(0x0200);

    const ALL: u32 = 0x0001 | 0x0002 | 0x0100 | 0x0200;

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & Self::ALL)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for PollEvents {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for PollEvents {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for PollEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [
            (Self::RECV, "recv"),
            (Self::SEND, "send"),
            (Self::EOF, "eof"),
            (Self::ERROR, "error"),
        ]
        .into_iter()
        .filter(|(flag, _)| self.contains(*flag))
        .map(|(_, name)| name)
        .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}

/// Kinds of objects the poller understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollObjectKind {
    Socket,
    Pipe,
    FsWatcher,
}

/// Something to watch for readiness
#[derive(Debug, Clone)]
pub enum PollObject {
    Socket(RawFd),
    Pipe(RawFd),
    FsWatcher(Arc<FsWatcher>),
}

impl PollObject {
    pub fn kind(&self) -> PollObjectKind {
        match self {
            PollObject::Socket(_) => PollObjectKind::Socket,
            PollObject::Pipe(_) => PollObjectKind::Pipe,
            PollObject::FsWatcher(_) => PollObjectKind::FsWatcher,
        }
    }

    /// Descriptor identifying the object inside the poller
    pub fn raw_fd(&self) -> RawFd {
        match self {
            PollObject::Socket(fd) | PollObject::Pipe(fd) => *fd,
            PollObject::FsWatcher(watcher) => watcher.raw_fd(),
        }
    }
}

/// One entry of a wait result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "object", rename_all = "lowercase")]
pub enum PollEvent {
    Socket { fd: RawFd, events: PollEvents },
    Pipe { fd: RawFd, events: PollEvents },
    /// One record per change observed by a watcher
    FsWatcher {
        fd: RawFd,
        path: PathBuf,
        kind: FsChangeKind,
    },
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("descriptor {0} is already registered")]
    AlreadyRegistered(RawFd),

    #[error("descriptor {0} is not registered")]
    NotRegistered(RawFd),

    #[error("{0:?} objects are not supported on this platform")]
    Unsupported(PollObjectKind),

    #[error("poller I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type PollerResult<T> = Result<T, PollerError>;

// ============================================================================
// Poller
// ============================================================================

type BackendFactory = Box<dyn Fn() -> io::Result<Box<dyn PollBackend>> + Send + Sync>;

enum Registration {
    Socket,
    Pipe,
    FsWatcher(Weak<FsWatcher>),
}

impl Registration {
    fn of(object: &PollObject) -> Self {
        match object {
            PollObject::Socket(_) => Registration::Socket,
            PollObject::Pipe(_) => Registration::Pipe,
            PollObject::FsWatcher(watcher) => {
                Registration::FsWatcher(Arc::downgrade(watcher))
            }
        }
    }
}

/// Backend readiness resolved against the registry
enum Ready {
    Event(PollEvent),
    Watcher(RawFd, Arc<FsWatcher>),
}

struct PollerState {
    backend: Arc<dyn PollBackend>,
    registry: HashMap<RawFd, Registration>,
}

/// The unified poller; see [`Poller::instance`]
pub struct Poller {
    state: Mutex<Option<PollerState>>,
    waker: Mutex<Option<Waker>>,
    /// Threads currently blocked in the backend wait
    waiting: AtomicUsize,
    factory: BackendFactory,
}

static POLLER: OnceLock<Poller> = OnceLock::new();

fn default_backend() -> io::Result<Box<dyn PollBackend>> {
    Ok(Box::new(UnixPollBackend::new()?))
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("initialized", &self.lock_state().is_some())
            .finish()
    }
}

impl Poller {
    /// The process-wide poller. OS resources are acquired lazily on first
    /// registration or wait.
    pub fn instance() -> &'static Poller {
        POLLER.get_or_init(|| Poller::with_factory(Box::new(default_backend)))
    }

    pub(crate) fn with_factory(factory: BackendFactory) -> Self {
        Self {
            state: Mutex::new(None),
            waker: Mutex::new(None),
            waiting: AtomicUsize::new(0),
            factory,
        }
    }

    /// Whether objects of `kind` can be registered on this platform
    pub fn supports(kind: PollObjectKind) -> bool {
        match kind {
            PollObjectKind::Socket | PollObjectKind::Pipe => true,
            PollObjectKind::FsWatcher => FsWatcher::is_supported(),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, Option<PollerState>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_waker(&self) -> MutexGuard<'_, Option<Waker>> {
        self.waker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_state<'a>(
        &self,
        guard: &'a mut Option<PollerState>,
    ) -> PollerResult<&'a mut PollerState> {
        let state = match guard.take() {
            Some(state) => state,
            None => {
                let backend: Arc<dyn PollBackend> = Arc::from((self.factory)()?);
                *self.lock_waker() = Some(backend.waker());
                info!("Poller initialized");
                PollerState {
                    backend,
                    registry: HashMap::new(),
                }
            }
        };
        Ok(guard.insert(state))
    }

    /// Start watching `object` for `events` (watchers always watch `RECV`)
    pub fn insert(&self, object: &PollObject, events: PollEvents) -> PollerResult<()> {
        let kind = object.kind();
        if !Self::supports(kind) {
            return Err(PollerError::Unsupported(kind));
        }

        {
            let mut guard = self.lock_state();
            let state = self.ensure_state(&mut guard)?;
            let fd = object.raw_fd();
            if state.registry.contains_key(&fd) {
                return Err(PollerError::AlreadyRegistered(fd));
            }

            let events = match object {
                PollObject::FsWatcher(_) => PollEvents::RECV,
                _ => events,
            };
            state.backend.insert(fd, events)?;
            state.registry.insert(fd, Registration::of(object));
            debug!("Poller: registered {:?} {} for {}", kind, fd, events);
        }
        self.wake_waiters()
    }

    /// Change the events watched for an already registered object
    pub fn modify(&self, object: &PollObject, events: PollEvents) -> PollerResult<()> {
        {
            let mut guard = self.lock_state();
            let state = self.ensure_state(&mut guard)?;
            let fd = object.raw_fd();
            if !state.registry.contains_key(&fd) {
                return Err(PollerError::NotRegistered(fd));
            }
            state.backend.modify(fd, events)?;
            debug!("Poller: modified {} to {}", fd, events);
        }
        self.wake_waiters()
    }

    /// Stop watching `object`; unknown objects are ignored
    pub fn remove(&self, object: &PollObject) -> PollerResult<()> {
        {
            let mut guard = self.lock_state();
            let Some(state) = guard.as_mut() else {
                return Ok(());
            };
            let fd = object.raw_fd();
            if state.registry.remove(&fd).is_none() {
                trace!("Poller: remove of unregistered {}", fd);
                return Ok(());
            }
            state.backend.remove(fd)?;
            debug!("Poller: removed {}", fd);
        }
        self.wake_waiters()
    }

    /// Wait for readiness and collect the events.
    ///
    /// An empty vector means the wait timed out or was woken.
    pub fn wait(&self, timeout: Option<Duration>) -> PollerResult<Vec<PollEvent>> {
        let mut events = Vec::new();
        self.wait_with(timeout, |event| events.push(event))?;
        Ok(events)
    }

    /// Wait for readiness, handing each event to `on_event` in the order the
    /// backend reported it. Returns the number of events delivered.
    pub fn wait_with<F>(&self, timeout: Option<Duration>, mut on_event: F) -> PollerResult<usize>
    where
        F: FnMut(PollEvent),
    {
        let backend = {
            let mut guard = self.lock_state();
            Arc::clone(&self.ensure_state(&mut guard)?.backend)
        };

        // Counted before the backend reads its interest set, so a registration
        // racing with this wait either lands in that set or wakes the wait
        self.waiting.fetch_add(1, Ordering::SeqCst);
        let ready = backend.wait(timeout);
        self.waiting.fetch_sub(1, Ordering::SeqCst);
        let ready = ready?;

        let resolved = {
            let mut guard = self.lock_state();
            match guard.as_mut() {
                Some(state) if Arc::ptr_eq(&state.backend, &backend) => {
                    Self::resolve(state, ready)?
                }
                _ => {
                    debug!("Poller: shut down during wait, dropping results");
                    Vec::new()
                }
            }
        };

        let mut delivered = 0;
        for ready in resolved {
            match ready {
                Ready::Event(event) => {
                    on_event(event);
                    delivered += 1;
                }
                Ready::Watcher(fd, watcher) => {
                    for change in watcher.read_changes()? {
                        on_event(PollEvent::FsWatcher {
                            fd,
                            path: change.path,
                            kind: change.kind,
                        });
                        delivered += 1;
                    }
                }
            }
        }

        trace!("Poller: wait returned {} events", delivered);
        Ok(delivered)
    }

    /// Map backend readiness onto current registrations, dropping watchers
    /// that have been released since they were registered
    fn resolve(
        state: &mut PollerState,
        ready: Vec<(RawFd, PollEvents)>,
    ) -> PollerResult<Vec<Ready>> {
        let mut resolved = Vec::with_capacity(ready.len());
        let mut stale = Vec::new();
        for (fd, events) in ready {
            match state.registry.get(&fd) {
                Some(Registration::Socket) => {
                    resolved.push(Ready::Event(PollEvent::Socket { fd, events }));
                }
                Some(Registration::Pipe) => {
                    resolved.push(Ready::Event(PollEvent::Pipe { fd, events }));
                }
                Some(Registration::FsWatcher(watcher)) => match watcher.upgrade() {
                    Some(watcher) => resolved.push(Ready::Watcher(fd, watcher)),
                    None => stale.push(fd),
                },
                None => trace!("Poller: ignoring readiness of unregistered {}", fd),
            }
        }

        for fd in stale {
            warn!("Poller: dropping registration of released watcher {}", fd);
            state.registry.remove(&fd);
            state.backend.remove(fd)?;
        }
        Ok(resolved)
    }

    /// Make a blocked wait return so it sees the changed interest set
    fn wake_waiters(&self) -> PollerResult<()> {
        if self.waiting.load(Ordering::SeqCst) > 0 {
            trace!("Poller: waking blocked wait after registration change");
            self.wake()?;
        }
        Ok(())
    }

    /// Interrupt a wait in progress on another thread
    pub fn wake(&self) -> PollerResult<()> {
        let waker = self.lock_waker().clone();
        if let Some(waker) = waker {
            waker.wake()?;
        }
        Ok(())
    }

    /// Release the backend and every registration. A wait blocked on another
    /// thread is woken and returns no events.
    pub fn shutdown(&self) {
        let mut guard = self.lock_state();
        if guard.take().is_none() {
            return;
        }
        let waker = self.lock_waker().take();
        if let Some(Err(e)) = waker.map(|waker| waker.wake()) {
            warn!("Poller: failed to wake waiter on shutdown: {}", e);
        }
        info!("Poller shut down");
    }
}
