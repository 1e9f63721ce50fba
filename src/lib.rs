//! File, standard stream and event-poll I/O for build-tool scripting hosts.
//!
//! - [`file::FileHandle`]: encoding-aware file and standard stream handles
//!   with line-oriented reads and CRLF-normalizing writes
//! - [`poller::Poller`]: one process-wide wait over sockets, pipes and
//!   filesystem watchers
//! - [`lock::FileLock`]: advisory locks over a backing file
//! - [`script`]: conversion of results into the value-or-message pairs that
//!   script hosts expect

pub mod config;
pub mod encoding;
pub mod error;
pub mod file;
pub mod lock;
pub mod logging;
pub mod poller;
pub mod script;
pub mod stream;

#[cfg(test)]
mod test_utils;

pub use config::IoConfig;
pub use encoding::{Encoding, Endian};
pub use error::{ConfigError, IoError, IoResult};
pub use file::{FileHandle, ReadMode, ReadValue, StdKind};
pub use lock::{FileLock, LockMode};
pub use poller::{PollEvent, PollEvents, PollObject, Poller, PollerError};
