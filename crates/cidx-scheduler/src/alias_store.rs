//! Durable `aliasName -> absolutePath` mapping (spec.md §4.1).
//!
//! The teacher persists this kind of small mapping as an LMDB table
//! (`index-scheduler`'s `index_mapping` database, `crates/index-scheduler/
//! src/index_mapper/mod.rs`); here it is a single SQLite table instead, to
//! stay consistent with the rest of this crate's relational persistence
//! (`registry.rs`, `job_tracker.rs`). The atomicity guarantee is the same
//! either way: `Swap` is one transaction, so every subsequent `Read` either
//! observes the old path or the new one, never a torn value.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

pub struct AliasStore {
    conn: Mutex<Connection>,
}

impl AliasStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS aliases (
                alias TEXT PRIMARY KEY,
                path TEXT NOT NULL
            );",
        )?;
        Ok(AliasStore { conn: Mutex::new(conn) })
    }

    pub fn read(&self, alias: &str) -> Result<String> {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT path FROM aliases WHERE alias = ?1", params![alias], |row| {
            row.get(0)
        })
        .optional()?
        .ok_or_else(|| Error::AliasUnknown(alias.to_string()))
    }

    pub fn try_read(&self, alias: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        Ok(conn
            .query_row("SELECT path FROM aliases WHERE alias = ?1", params![alias], |row| {
                row.get(0)
            })
            .optional()?)
    }

    /// Inserts the alias if absent. Returns `Error::AliasExists` if the
    /// alias was already created (`AddGolden` uses this path for brand-new
    /// aliases; re-registration goes through `swap` or the registry's own
    /// upsert, never through `create` again).
    pub fn create(&self, alias: &str, path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO aliases (alias, path) VALUES (?1, ?2)",
            params![alias, path],
        )?;
        if changed == 0 {
            return Err(Error::AliasExists(alias.to_string()));
        }
        Ok(())
    }

    /// Atomic swap: after this returns, every subsequent `read` observes
    /// `new_path`. A failed swap (sqlite error) leaves the prior mapping
    /// intact because the `UPDATE` is a single statement — there is no
    /// intermediate state to fail into (spec.md §4.1).
    pub fn swap(&self, alias: &str, new_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE aliases SET path = ?2 WHERE alias = ?1",
            params![alias, new_path],
        )?;
        if changed == 0 {
            return Err(Error::AliasUnknown(alias.to_string()));
        }
        Ok(())
    }

    pub fn delete(&self, alias: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM aliases WHERE alias = ?1", params![alias])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn read_after_swap_observes_new_path() {
        let store = AliasStore::in_memory().unwrap();
        store.create("A-global", "/gr/A").unwrap();
        assert_eq!(store.read("A-global").unwrap(), "/gr/A");
        store.swap("A-global", "/gr/A/.versioned/v_100").unwrap();
        assert_eq!(store.read("A-global").unwrap(), "/gr/A/.versioned/v_100");
    }

    #[test]
    fn read_unknown_alias_errors() {
        let store = AliasStore::in_memory().unwrap();
        assert!(matches!(store.read("nope"), Err(Error::AliasUnknown(_))));
    }

    #[test]
    fn concurrent_readers_never_observe_an_error_during_swap() {
        let store = Arc::new(AliasStore::in_memory().unwrap());
        store.create("A-global", "/gr/A").unwrap();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let path = store.read("A-global").unwrap();
                        assert!(path == "/gr/A" || path == "/gr/A/.versioned/v_200");
                    }
                })
            })
            .collect();
        store.swap("A-global", "/gr/A/.versioned/v_200").unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
