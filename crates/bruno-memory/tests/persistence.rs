//! File-backed databases across reopen.

mod common;

use bruno_memory::{LATEST_VERSION, MemoryBackend, Result};
use bruno_types::{MemoryEntry, MemoryQuery, MemoryType, Message};
use common::TestDb;
use rusqlite::Connection;

fn schema_info_rows(db: &TestDb) -> i64 {
    let conn = Connection::open(&db.path).expect("open raw connection");
    conn.query_row("SELECT COUNT(*) FROM schema_info", [], |row| row.get(0))
        .expect("count schema_info")
}

#[test]
fn test_reopen_does_not_migrate_again() -> Result<()> {
    let db = TestDb::new();

    let backend = db.connect(true);
    assert_eq!(backend.schema_version()?.as_deref(), Some(LATEST_VERSION));
    backend.disconnect();
    assert_eq!(schema_info_rows(&db), 1);

    let backend = db.connect(true);
    assert_eq!(backend.schema_version()?.as_deref(), Some(LATEST_VERSION));
    assert!(backend.validate_schema()?.valid);
    backend.disconnect();
    assert_eq!(schema_info_rows(&db), 1);
    Ok(())
}

#[test]
fn test_data_survives_reopen() -> Result<()> {
    let db = TestDb::new();
    assert!(!db.path.exists());

    let backend = db.connect(true);
    backend.store_message(&Message::user("c1", "remember the milk").with_id("m1"))?;
    backend.store_memory(
        &MemoryEntry::new("u1", MemoryType::Fact, "milk is in the fridge").with_id("e1"),
    )?;
    backend.disconnect();
    assert!(db.path.exists());

    let backend = db.connect(true);
    let messages = backend.retrieve_messages("c1", None)?;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].content, "remember the milk");

    let found = backend.search_messages("milk", None, 10)?;
    assert_eq!(found.len(), 1);

    let memories = backend.retrieve_memories(&MemoryQuery::for_user("u1").with_text("fridge"))?;
    assert_eq!(memories.len(), 1);
    assert_eq!(memories[0].id, "e1");
    Ok(())
}

#[test]
fn test_fts_requested_on_database_built_without_it() -> Result<()> {
    let db = TestDb::new();

    let backend = db.connect(false);
    backend.store_message(&Message::user("c1", "plain search only").with_id("m1"))?;
    backend.disconnect();

    // The schema is already current, so no full-text tables get created.
    let backend = db.connect(true);
    assert!(!backend.fts_active());
    assert_eq!(backend.text_search(), Some("substring"));
    assert_eq!(backend.search_messages("search", None, 10)?.len(), 1);
    Ok(())
}
