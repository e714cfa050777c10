//! Configuration types mapping to the TOML schema.
//!
//! A config file is a flat table; the shared [`BackendConfig`] keys sit
//! alongside the SQLite-specific ones:
//! ```toml
//! database = "memory.db"   # or ":memory:"
//! enable_fts = true
//! timeout = 30.0           # seconds
//! max_retries = 3
//! retry_delay = 1.0        # seconds
//! busy_timeout = 5000      # milliseconds
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Database target that selects a private in-memory engine.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

// ─────────────────────────────────────────────────────────────────────────────
// Shared Backend Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Settings every storage backend honours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Operation timeout in seconds.
    pub timeout: f64,
    /// Extra attempts for a failed retryable operation.
    pub max_retries: u32,
    /// Delay between attempts in seconds.
    pub retry_delay: f64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            timeout: 30.0,
            max_retries: 3,
            retry_delay: 1.0,
        }
    }
}

impl BackendConfig {
    /// Operation timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Delay between retries as a [`Duration`].
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay).unwrap_or(Duration::ZERO)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(self.timeout.is_finite() && self.timeout > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "timeout",
                reason: format!("must be a positive number of seconds, got {}", self.timeout),
            });
        }
        if !(self.retry_delay.is_finite() && self.retry_delay >= 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "retry_delay",
                reason: format!("must be zero or more seconds, got {}", self.retry_delay),
            });
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Pragmas
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite `journal_mode` pragma value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }
}

impl FromStr for JournalMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "DELETE" => Ok(Self::Delete),
            "TRUNCATE" => Ok(Self::Truncate),
            "PERSIST" => Ok(Self::Persist),
            "MEMORY" => Ok(Self::Memory),
            "WAL" => Ok(Self::Wal),
            "OFF" => Ok(Self::Off),
            _ => Err(ConfigError::InvalidValue {
                field: "journal_mode",
                reason: format!(
                    "'{s}' is not one of DELETE, TRUNCATE, PERSIST, MEMORY, WAL, OFF"
                ),
            }),
        }
    }
}

impl TryFrom<String> for JournalMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<JournalMode> for String {
    fn from(mode: JournalMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SQLite `synchronous` pragma value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SynchronousMode {
    Off,
    #[default]
    Normal,
    Full,
    Extra,
}

impl SynchronousMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
            Self::Extra => "EXTRA",
        }
    }
}

impl FromStr for SynchronousMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "NORMAL" => Ok(Self::Normal),
            "FULL" => Ok(Self::Full),
            "EXTRA" => Ok(Self::Extra),
            _ => Err(ConfigError::InvalidValue {
                field: "synchronous",
                reason: format!("'{s}' is not one of OFF, NORMAL, FULL, EXTRA"),
            }),
        }
    }
}

impl TryFrom<String> for SynchronousMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<SynchronousMode> for String {
    fn from(mode: SynchronousMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for SynchronousMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Backend Config
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the SQLite memory backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Shared timeout/retry settings.
    #[serde(flatten)]
    pub backend: BackendConfig,
    /// Database file path, or `:memory:`.
    pub database: PathBuf,
    /// Build full-text search tables and use them for text queries.
    pub enable_fts: bool,
    pub journal_mode: JournalMode,
    pub synchronous: SynchronousMode,
    /// Page cache size; negative values are KiB.
    pub cache_size: i64,
    /// Lock wait in milliseconds. Zero falls back to `timeout`.
    pub busy_timeout: u64,
    /// Memory-mapped I/O size in bytes.
    pub mmap_size: u64,
    /// Cap on messages returned when assembling conversation context.
    pub context_message_limit: Option<usize>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            database: PathBuf::from("bruno_memory.db"),
            enable_fts: true,
            journal_mode: JournalMode::default(),
            synchronous: SynchronousMode::default(),
            cache_size: -2000,
            busy_timeout: 5000,
            mmap_size: 256 * 1024 * 1024,
            context_message_limit: None,
        }
    }
}

impl SqliteConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for a private in-memory database.
    pub fn in_memory() -> Self {
        Self::default().with_database(IN_MEMORY_DATABASE)
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn with_database(mut self, database: impl Into<PathBuf>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_fts(mut self, enabled: bool) -> Self {
        self.enable_fts = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.backend.timeout = timeout.as_secs_f64();
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.backend.max_retries = max_retries;
        self.backend.retry_delay = retry_delay.as_secs_f64();
        self
    }

    pub fn with_journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn with_context_message_limit(mut self, limit: usize) -> Self {
        self.context_message_limit = Some(limit);
        self
    }

    /// Whether full-text search structures should be used.
    pub fn fts_enabled(&self) -> bool {
        self.enable_fts
    }

    /// The database target.
    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Whether the target is a private in-memory database.
    pub fn is_in_memory(&self) -> bool {
        self.database.as_os_str() == IN_MEMORY_DATABASE
    }

    /// How long to wait on a locked database.
    pub fn busy_timeout(&self) -> Duration {
        if self.busy_timeout == 0 {
            self.backend.timeout()
        } else {
            Duration::from_millis(self.busy_timeout)
        }
    }

    /// Pragmas to apply on every new connection, in order.
    ///
    /// `foreign_keys` comes first so the schema's cascade rules hold for
    /// everything that follows.
    pub fn pragmas(&self) -> Vec<(&'static str, String)> {
        vec![
            ("foreign_keys", "ON".to_string()),
            ("journal_mode", self.journal_mode.to_string()),
            ("synchronous", self.synchronous.to_string()),
            ("cache_size", self.cache_size.to_string()),
            ("temp_store", "MEMORY".to_string()),
            ("mmap_size", self.mmap_size.to_string()),
        ]
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        self.backend.validate()?;
        if self.database.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "database",
                reason: "must not be empty".to_string(),
            });
        }
        if self.context_message_limit == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "context_message_limit",
                reason: "must be greater than zero when set".to_string(),
            });
        }
        Ok(())
    }
}
