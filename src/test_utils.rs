//! Test utilities and global setup
//!
//! Provides centralized test logging configuration and scratch-file helpers.

/// Test logging utilities
#[cfg(all(test, feature = "test-logging"))]
pub mod logging {
    use std::sync::Once;
    use tracing_subscriber::{EnvFilter, fmt};

    static INIT: Once = Once::new();

    /// Initialize test logging globally - safe to call multiple times
    ///
    /// Respects `RUST_LOG` (default: "debug") and writes through the test
    /// writer so output is captured per test.
    ///
    /// ```bash
    /// RUST_LOG=scriptio::poller=trace cargo test --features test-logging
    /// ```
    pub fn init() {
        INIT.call_once(|| {
            let env_filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

            fmt()
                .with_env_filter(env_filter)
                .with_test_writer()
                .with_target(true)
                .with_thread_ids(true)
                .compact()
                .try_init()
                .ok(); // Ignore errors if already initialized by another test
        });
    }

    #[ctor::ctor]
    fn init_test_logging() {
        init();
    }
}

/// Scratch files for handle tests
#[cfg(test)]
pub mod fixtures {
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// Temporary directory holding one file; removed on drop
    pub struct ScratchFile {
        _dir: TempDir, // Underscore prefix keeps it alive until drop
        pub path: PathBuf,
    }

    impl ScratchFile {
        /// Create `name` with `contents`
        pub fn with_contents(name: &str, contents: &[u8]) -> Self {
            let dir = TempDir::new().expect("create temp dir");
            let path = dir.path().join(name);
            fs::write(&path, contents).expect("write scratch file");
            Self { _dir: dir, path }
        }
    }

    /// Encode `text` as UTF-16 with the given byte order, optionally with a BOM
    pub fn utf16(text: &str, big_endian: bool, bom: bool) -> Vec<u8> {
        let mut units: Vec<u16> = Vec::new();
        if bom {
            units.push(0xFEFF);
        }
        units.extend(text.encode_utf16());
        units
            .into_iter()
            .flat_map(|unit| {
                if big_endian {
                    unit.to_be_bytes()
                } else {
                    unit.to_le_bytes()
                }
            })
            .collect()
    }
}
