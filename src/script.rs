//! Scripting caller boundary
//!
//! Script hosts never see `Result`: every call yields a value or an error
//! message. These helpers perform that conversion for handles, locks and the
//! poller.

use std::time::Duration;

use crate::error::{IoError, IoResult};
use crate::file::{FileHandle, ReadMode, ReadValue};
use crate::poller::{PollEvent, Poller};

/// Either a value or a printable error, never both
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptReturn<T> {
    pub value: Option<T>,
    pub error: Option<String>,
}

impl<T> ScriptReturn<T> {
    pub fn ok(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(message.into()),
        }
    }

    /// Convert a result, naming the handle `name` in the message
    pub fn from_result(result: IoResult<T>, name: &str) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(e) => Self::failed(error_message(&e, name)),
        }
    }

    pub fn into_pair(self) -> (Option<T>, Option<String>) {
        (self.value, self.error)
    }
}

impl<T> ScriptReturn<Option<T>> {
    /// Flatten an optional success (e.g. end of data) into a missing value
    pub fn flatten(self) -> ScriptReturn<T> {
        ScriptReturn {
            value: self.value.flatten(),
            error: self.error,
        }
    }
}

/// `error: <reason> (<name>)`; closed handles only report the closure
pub fn error_message(error: &IoError, name: &str) -> String {
    match error {
        IoError::AlreadyClosed => format!("error: {error}"),
        _ => format!("error: {error} ({name})"),
    }
}

/// Read from `handle` with a read-mode string such as `"l"` or `"*a"`
pub fn file_read(
    handle: &mut FileHandle,
    mode: &str,
    continuation: &str,
) -> ScriptReturn<ReadValue> {
    let result = ReadMode::parse(mode).and_then(|mode| handle.read(mode, continuation));
    ScriptReturn::from_result(result, handle.name()).flatten()
}

/// Write every value to `handle`; the value is `true` on success
pub fn file_write<I, T>(handle: &mut FileHandle, values: I) -> ScriptReturn<bool>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let result = handle.write_values(values).map(|()| true);
    ScriptReturn::from_result(result, handle.name())
}

/// Wait on `poller`; negative timeouts wait forever.
///
/// Returns the event count (0 on timeout or wake, -1 on failure) and the
/// events themselves.
pub fn poller_wait(poller: &Poller, timeout_ms: i64) -> (i64, Vec<PollEvent>) {
    let timeout = u64::try_from(timeout_ms).ok().map(Duration::from_millis);
    match poller.wait(timeout) {
        Ok(events) => (events.len() as i64, events),
        Err(e) => {
            tracing::error!("Poller wait failed: {}", e);
            (-1, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poller::backend::MockPollBackend;
    use crate::poller::{PollBackend, PollEvents, PollObject, Waker};
    use std::fs;
    use std::io;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_error_message_format() {
        let err = IoError::invalid("unknown read mode: x");
        assert_eq!(
            error_message(&err, "xmake.lua"),
            "error: invalid argument: unknown read mode: x (xmake.lua)"
        );
        assert_eq!(
            error_message(&IoError::AlreadyClosed, "file: closed"),
            "error: file has been closed"
        );
    }

    #[test]
    fn test_file_read_modes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lines.txt");
        fs::write(&path, b"alpha\nbeta\n").unwrap();

        let mut file = FileHandle::open(&path, "r").unwrap();
        let first = file_read(&mut file, "*l", "");
        assert_eq!(first.value, Some(ReadValue::Bytes(b"alpha".to_vec())));
        assert_eq!(first.error, None);

        let rest = file_read(&mut file, "a", "");
        assert_eq!(rest.value, Some(ReadValue::Bytes(b"beta\n".to_vec())));

        let eof = file_read(&mut file, "l", "");
        assert_eq!(eof, ScriptReturn { value: None, error: None });

        let bad = file_read(&mut file, "-3", "");
        assert!(bad.value.is_none());
        assert!(bad.error.unwrap().ends_with(&format!("({})", file.name())));

        file.close(false).unwrap();
        let (value, error) = file_read(&mut file, "l", "").into_pair();
        assert!(value.is_none());
        assert_eq!(error.as_deref(), Some("error: file has been closed"));
    }

    #[test]
    fn test_file_write_reports_success() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.txt");
        let mut file = FileHandle::open(&path, "wb").unwrap();
        assert_eq!(file_write(&mut file, ["a", "b"]).value, Some(true));
        file.close(false).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"ab");

        let failed = file_write(&mut file, ["c"]);
        assert_eq!(failed.value, None);
        assert!(failed.error.is_some());
    }

    fn mock_poller(mock: MockPollBackend) -> Poller {
        let slot = Mutex::new(Some(mock));
        Poller::with_factory(Box::new(move || {
            let mock = slot
                .lock()
                .unwrap()
                .take()
                .ok_or_else(|| io::Error::other("mock already used"))?;
            Ok(Box::new(mock) as Box<dyn PollBackend>)
        }))
    }

    #[test]
    fn test_poller_wait_counts() {
        let mut mock = MockPollBackend::new();
        mock.expect_waker().returning(Waker::noop);
        mock.expect_insert().returning(|_, _| Ok(()));
        let mut calls = 0;
        mock.expect_wait().returning(move |timeout| {
            calls += 1;
            match calls {
                1 => {
                    assert_eq!(timeout, None);
                    Ok(vec![(5, PollEvents::RECV)])
                }
                2 => {
                    assert_eq!(timeout, Some(Duration::from_millis(20)));
                    Ok(Vec::new())
                }
                _ => Err(io::Error::from_raw_os_error(libc::EBADF)),
            }
        });

        let poller = mock_poller(mock);
        poller.insert(&PollObject::Pipe(5), PollEvents::RECV).unwrap();

        let (count, events) = poller_wait(&poller, -1);
        assert_eq!(count, 1);
        assert_eq!(
            events,
            vec![PollEvent::Pipe {
                fd: 5,
                events: PollEvents::RECV
            }]
        );
        assert_eq!(poller_wait(&poller, 20), (0, Vec::new()));
        assert_eq!(poller_wait(&poller, 0).0, -1);
    }
}
