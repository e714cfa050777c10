//! Configuration for bruno-memory storage backends.
//!
//! Provides TOML-based configuration with:
//! - Shared backend settings (timeout, retry policy)
//! - SQLite engine settings (database target, full-text search, pragmas)
//! - Config file layering (user file, project file, database override)
//!
//! ```toml
//! database = "~/.local/share/bruno/memory.db"
//! enable_fts = true
//! timeout = 10.0
//! journal_mode = "wal"
//! ```

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, DiscoveryOptions, Layer, LoadedConfig, load_config, load_config_file,
    load_config_with_options, save_config, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
