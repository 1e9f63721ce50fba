//! File handles over disk files and the standard streams
//!
//! A [`FileHandle`] owns a raw stream, an optional transcoding layer and two
//! caches. It goes through `open -> active -> closed`; the lifecycle lives in
//! `handle`, the line reader in `read` and the CRLF-aware writer in `write`.

pub mod handle;
pub mod mode;
pub mod read;
pub mod write;

pub use handle::{FileHandle, FileType, StdKind};
pub use mode::{Access, OpenMode, ReadMode};
pub use read::{LineOutcome, ReadValue};
