//! Shared helpers for backend integration tests.

#![allow(dead_code)]

use std::path::PathBuf;

use bruno_config::SqliteConfig;
use bruno_memory::{MemoryBackend, SqliteMemoryBackend};
use tempfile::TempDir;

/// Route backend logs to the test harness once per binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A file-backed database in a temporary directory.
pub struct TestDb {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        init_tracing();
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("nested").join("memory.db");
        Self { dir, path }
    }

    pub fn config(&self) -> SqliteConfig {
        SqliteConfig::new().with_database(&self.path)
    }

    /// A connected backend on this database.
    pub fn connect(&self, fts: bool) -> SqliteMemoryBackend {
        let backend = SqliteMemoryBackend::new(self.config().with_fts(fts));
        backend.connect().expect("connect");
        backend
    }
}

/// A connected private in-memory backend.
pub fn in_memory(fts: bool) -> SqliteMemoryBackend {
    init_tracing();
    let backend = SqliteMemoryBackend::new(SqliteConfig::in_memory().with_fts(fts));
    backend.connect().expect("connect");
    backend
}
