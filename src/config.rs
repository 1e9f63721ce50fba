//! Configuration for file handles and locks
//!
//! Provides IoConfig with a builder, range validation and environment
//! overrides. Handles capture a copy of the configuration at open time.

use crate::error::ConfigError;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Number of leading bytes inspected by encoding detection
pub const DEFAULT_DETECT_SIZE: usize = 1024;

/// Chunk size used when slurping binary files (64 KiB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Smallest accepted read chunk
pub const MIN_READ_CHUNK_SIZE: usize = 512;

/// Extra attempts made by lock open after the first failure
pub const DEFAULT_LOCK_OPEN_RETRIES: u32 = 1;

/// Display names are truncated to this many bytes
pub const DEFAULT_DISPLAY_NAME_LIMIT: usize = 63;

/// Environment variable toggling CRLF translation (`1`/`0`, `true`/`false`)
pub const ENV_CRLF: &str = "SCRIPTIO_CRLF";

/// Environment variable overriding the binary read chunk size
pub const ENV_READ_CHUNK: &str = "SCRIPTIO_READ_CHUNK";

// ============================================================================
// Core Configuration Type
// ============================================================================

/// Settings shared by file handles and file locks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoConfig {
    /// Rewrite `\n` as `\r\n` when writing text files
    pub crlf_translation: bool,

    /// Prefix length handed to the encoding detector
    pub detect_size: usize,

    /// Chunk size for whole-file binary reads
    pub read_chunk_size: usize,

    /// Retries for lock file creation
    pub lock_open_retries: u32,

    /// Maximum display name length in bytes
    pub display_name_limit: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            crlf_translation: cfg!(windows),
            detect_size: DEFAULT_DETECT_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            lock_open_retries: DEFAULT_LOCK_OPEN_RETRIES,
            display_name_limit: DEFAULT_DISPLAY_NAME_LIMIT,
        }
    }
}

impl IoConfig {
    /// Start a builder seeded with defaults
    pub fn builder() -> IoConfigBuilder {
        IoConfigBuilder::default()
    }

    /// Defaults overridden by `SCRIPTIO_CRLF` and `SCRIPTIO_READ_CHUNK`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`IoConfig::from_env`] with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(value) = lookup(ENV_CRLF) {
            let enabled = match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        name: ENV_CRLF.to_string(),
                        value,
                    });
                }
            };
            builder = builder.crlf_translation(enabled);
        }

        if let Some(value) = lookup(ENV_READ_CHUNK) {
            let size = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv {
                    name: ENV_READ_CHUNK.to_string(),
                    value: value.clone(),
                })?;
            builder = builder.read_chunk_size(size);
        }

        builder.build()
    }
}

// ============================================================================
// Configuration Builder
// ============================================================================

/// Builder for IoConfig with validation and defaults
#[derive(Debug, Default)]
pub struct IoConfigBuilder {
    crlf_translation: Option<bool>,
    detect_size: Option<usize>,
    read_chunk_size: Option<usize>,
    lock_open_retries: Option<u32>,
    display_name_limit: Option<usize>,
}

impl IoConfigBuilder {
    pub fn crlf_translation(mut self, enabled: bool) -> Self {
        self.crlf_translation = Some(enabled);
        self
    }

    pub fn detect_size(mut self, size: usize) -> Self {
        self.detect_size = Some(size);
        self
    }

    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = Some(size);
        self
    }

    pub fn lock_open_retries(mut self, retries: u32) -> Self {
        self.lock_open_retries = Some(retries);
        self
    }

    pub fn display_name_limit(mut self, limit: usize) -> Self {
        self.display_name_limit = Some(limit);
        self
    }

    /// Build the configuration with validation
    pub fn build(self) -> Result<IoConfig, ConfigError> {
        let default = IoConfig::default();
        let config = IoConfig {
            crlf_translation: self.crlf_translation.unwrap_or(default.crlf_translation),
            detect_size: self.detect_size.unwrap_or(default.detect_size),
            read_chunk_size: self.read_chunk_size.unwrap_or(default.read_chunk_size),
            lock_open_retries: self.lock_open_retries.unwrap_or(default.lock_open_retries),
            display_name_limit: self
                .display_name_limit
                .unwrap_or(default.display_name_limit),
        };

        // Detection needs at least a BOM plus one scan window
        if config.detect_size < 4 {
            return Err(ConfigError::InvalidValue {
                field: "detect_size".to_string(),
                reason: "must be at least 4 bytes".to_string(),
            });
        }

        if config.read_chunk_size < MIN_READ_CHUNK_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "read_chunk_size".to_string(),
                reason: format!("must be at least {MIN_READ_CHUNK_SIZE} bytes"),
            });
        }

        if config.display_name_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "display_name_limit".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = IoConfig::default();
        assert_eq!(config.detect_size, 1024);
        assert_eq!(config.read_chunk_size, 64 * 1024);
        assert_eq!(config.lock_open_retries, 1);
        assert_eq!(config.display_name_limit, 63);
        assert_eq!(config.crlf_translation, cfg!(windows));
    }

    #[test]
    fn test_builder_validation() {
        let config = IoConfig::builder()
            .crlf_translation(true)
            .read_chunk_size(4096)
            .build()
            .unwrap();
        assert!(config.crlf_translation);
        assert_eq!(config.read_chunk_size, 4096);

        assert!(matches!(
            IoConfig::builder().read_chunk_size(16).build(),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(IoConfig::builder().detect_size(2).build().is_err());
        assert!(IoConfig::builder().display_name_limit(0).build().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            [(ENV_CRLF, "true"), (ENV_READ_CHUNK, "8192")].into_iter().collect();
        let config = IoConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert!(config.crlf_translation);
        assert_eq!(config.read_chunk_size, 8192);

        let config = IoConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, IoConfig::default());
    }

    #[test]
    fn test_env_rejects_garbage() {
        let result = IoConfig::from_lookup(|name| {
            (name == ENV_CRLF).then(|| "maybe".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));

        let result = IoConfig::from_lookup(|name| {
            (name == ENV_READ_CHUNK).then(|| "lots".to_string())
        });
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }
}
