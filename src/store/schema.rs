//! Schema bootstrap and version check.
//!
//! Cascades and the tag closure are maintained by explicit statements in
//! the store (see `albums`, `items` and `crate::closure`), not triggers.

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Value of the `DBVersion` setting written on creation
pub const SCHEMA_VERSION: &str = "1";

const TABLES: [&str; 9] = [
    "AlbumRoots",
    "Albums",
    "Tags",
    "TagClosure",
    "Items",
    "ItemTags",
    "ItemProperties",
    "Searches",
    "Settings",
];

const SCHEMA: &str = "
    CREATE TABLE AlbumRoots (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        label           TEXT NOT NULL,
        path            TEXT NOT NULL UNIQUE
    );

    CREATE TABLE Albums (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        rootId          INTEGER NOT NULL,
        url             TEXT NOT NULL,
        date            DATE NOT NULL,
        caption         TEXT,
        collection      TEXT,
        iconItemId      INTEGER,
        UNIQUE (rootId, url)
    );

    CREATE TABLE Tags (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        parentId        INTEGER NOT NULL DEFAULT 0,
        name            TEXT NOT NULL,
        iconItemId      INTEGER,
        iconName        TEXT,
        UNIQUE (name, parentId)
    );

    CREATE TABLE TagClosure (
        tagId           INTEGER NOT NULL,
        ancestorId      INTEGER NOT NULL,
        UNIQUE (tagId, ancestorId)
    );

    CREATE TABLE Items (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL,
        albumId         INTEGER NOT NULL,
        caption         TEXT,
        datetime        DATETIME,
        UNIQUE (name, albumId)
    );

    CREATE TABLE ItemTags (
        itemId          INTEGER NOT NULL,
        tagId           INTEGER NOT NULL,
        UNIQUE (itemId, tagId)
    );

    CREATE TABLE ItemProperties (
        itemId          INTEGER NOT NULL,
        key             TEXT NOT NULL,
        value           TEXT NOT NULL,
        UNIQUE (itemId, key)
    );

    CREATE TABLE Searches (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        name            TEXT NOT NULL UNIQUE,
        query           TEXT NOT NULL
    );

    CREATE TABLE Settings (
        key             TEXT NOT NULL UNIQUE,
        value           TEXT
    );

    CREATE INDEX idx_items_album ON Items (albumId);
    CREATE INDEX idx_itemtags_tag ON ItemTags (tagId);
    CREATE INDEX idx_tagclosure_ancestor ON TagClosure (ancestorId);
    CREATE INDEX idx_tags_parent ON Tags (parentId);
";

/// Create every table on an empty database, or verify an existing one.
pub(super) fn initialize(conn: &mut Connection) -> Result<()> {
    let existing: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )?;
        let names = stmt.query_map([], |row| row.get(0))?;
        names.collect::<rusqlite::Result<_>>()?
    };

    if existing.is_empty() {
        let tx = conn.transaction()?;
        tx.execute_batch(SCHEMA)?;
        tx.execute(
            "INSERT INTO Settings (key, value) VALUES ('DBVersion', ?1)",
            [SCHEMA_VERSION],
        )?;
        tx.commit()?;
        info!(version = SCHEMA_VERSION, "catalog schema created");
        return Ok(());
    }

    let version = if existing.iter().any(|t| t == "Settings") {
        conn.query_row("SELECT value FROM Settings WHERE key = 'DBVersion'", [], |row| {
            row.get::<_, Option<String>>(0)
        })
        .optional()?
        .flatten()
    } else {
        None
    };

    if version.as_deref() != Some(SCHEMA_VERSION) {
        return Err(Error::UnrecognizedSchema(version));
    }
    let missing = TABLES.iter().any(|t| !existing.iter().any(|e| e == t));
    let foreign = existing.iter().any(|e| !TABLES.contains(&e.as_str()));
    if missing || foreign {
        return Err(Error::UnrecognizedSchema(version));
    }

    debug!(version = SCHEMA_VERSION, "catalog schema present");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |r| r.get(0)).unwrap().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn test_creates_all_tables_and_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();

        let mut expected: Vec<String> = TABLES.iter().map(|t| t.to_string()).collect();
        expected.sort();
        assert_eq!(tables(&conn), expected);

        let version: String = conn
            .query_row("SELECT value FROM Settings WHERE key = 'DBVersion'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        conn.execute("INSERT INTO Settings (key, value) VALUES ('marker', 'kept')", []).unwrap();
        initialize(&mut conn).unwrap();

        let marker: String = conn
            .query_row("SELECT value FROM Settings WHERE key = 'marker'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(marker, "kept");
    }

    #[test]
    fn test_rejects_other_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        conn.execute("UPDATE Settings SET value = '7' WHERE key = 'DBVersion'", []).unwrap();

        let err = initialize(&mut conn).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSchema(Some(ref v)) if v == "7"));
    }

    #[test]
    fn test_rejects_foreign_database() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE images (id INTEGER PRIMARY KEY, path TEXT)").unwrap();

        let err = initialize(&mut conn).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSchema(None)));
    }

    #[test]
    fn test_rejects_foreign_table_next_to_catalog() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        conn.execute_batch("CREATE TABLE Thumbnails (id INTEGER PRIMARY KEY, data BLOB)").unwrap();

        let err = initialize(&mut conn).unwrap_err();
        assert!(matches!(err, Error::UnrecognizedSchema(Some(ref v)) if v == SCHEMA_VERSION));
    }

    #[test]
    fn test_rejects_missing_table() {
        let mut conn = Connection::open_in_memory().unwrap();
        initialize(&mut conn).unwrap();
        conn.execute_batch("DROP TABLE TagClosure").unwrap();

        assert!(initialize(&mut conn).is_err());
    }
}
