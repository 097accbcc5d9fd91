//! Authoritative `GoldenRepo` metadata (spec.md §4.2), backed by the
//! `golden_repos_metadata` table of `server.db`. Schema setup uses
//! `CREATE TABLE IF NOT EXISTS` plus a `PRAGMA table_info` introspection
//! pass so additive columns can be rolled out without a separate migration
//! runner — the same spirit as the teacher's own startup reconciliation in
//! `index-scheduler`, adapted to a relational store per SPEC_FULL.md §4.2.A.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use cidx_types::golden_repo::{Backend, RepoConfig};
use cidx_types::GoldenRepo;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::error::Result;

const TABLE: &str = "golden_repos_metadata";

pub struct Registry {
    conn: Mutex<Connection>,
}

impl Registry {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                alias TEXT PRIMARY KEY,
                source_url TEXT NOT NULL,
                index_path TEXT NOT NULL,
                last_refresh_at TEXT,
                next_refresh_at TEXT,
                enabled_backends TEXT NOT NULL,
                config_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            );"
        ))?;
        let registry = Registry { conn: Mutex::new(conn) };
        registry.migrate_additive_columns()?;
        Ok(registry)
    }

    /// Adds any column present in `GoldenRepo` but absent from the table,
    /// via `PRAGMA table_info` introspection (SPEC_FULL.md §4.2.A). All
    /// current columns already exist in the `CREATE TABLE IF NOT EXISTS`
    /// above; this pass exists so a future field can be added to the
    /// struct without hand-writing a numbered migration.
    fn migrate_additive_columns(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
        let existing: BTreeSet<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<_, _>>()?;
        drop(stmt);
        let wanted: &[(&str, &str)] = &[];
        for (name, decl_type) in wanted {
            if !existing.contains(*name) {
                info!(column = name, "adding missing column to {TABLE}");
                conn.execute(&format!("ALTER TABLE {TABLE} ADD COLUMN {name} {decl_type}"), [])?;
            }
        }
        Ok(())
    }

    /// `INSERT ... ON CONFLICT(alias) DO UPDATE` that touches only mutable
    /// fields. Never resets `created_at`; never wipes `next_refresh_at`
    /// (spec.md §4.2, testable property #6). `next_refresh_at` is left
    /// `NULL` on first insert so the scheduler performs the initial spread
    /// (spec.md §4.8 step 1).
    pub fn register(
        &self,
        alias: &str,
        source_url: &str,
        index_path: &str,
        enabled_backends: &BTreeSet<Backend>,
        config: &RepoConfig,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let backends_json = serde_json::to_string(enabled_backends).unwrap();
        let config_json = serde_json::to_string(config).unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {TABLE}
                    (alias, source_url, index_path, last_refresh_at, next_refresh_at,
                     enabled_backends, config_json, created_at)
                 VALUES (?1, ?2, ?3, NULL, NULL, ?4, ?5, ?6)
                 ON CONFLICT(alias) DO UPDATE SET
                    source_url = excluded.source_url,
                    index_path = excluded.index_path,
                    enabled_backends = excluded.enabled_backends,
                    config_json = excluded.config_json"
            ),
            params![
                alias,
                source_url,
                index_path,
                backends_json,
                config_json,
                now.format(&time::format_description::well_known::Rfc3339).unwrap()
            ],
        )?;
        Ok(())
    }

    pub fn set_last_and_next_refresh(
        &self,
        alias: &str,
        last_refresh_at: OffsetDateTime,
        next_refresh_at: OffsetDateTime,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("UPDATE {TABLE} SET last_refresh_at = ?2, next_refresh_at = ?3 WHERE alias = ?1"),
            params![
                alias,
                last_refresh_at.format(&time::format_description::well_known::Rfc3339).unwrap(),
                next_refresh_at.format(&time::format_description::well_known::Rfc3339).unwrap(),
            ],
        )?;
        Ok(())
    }

    pub fn set_next_refresh(&self, alias: &str, next_refresh_at: OffsetDateTime) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("UPDATE {TABLE} SET next_refresh_at = ?2 WHERE alias = ?1"),
            params![
                alias,
                next_refresh_at.format(&time::format_description::well_known::Rfc3339).unwrap()
            ],
        )?;
        Ok(())
    }

    pub fn set_index_path(&self, alias: &str, index_path: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("UPDATE {TABLE} SET index_path = ?2 WHERE alias = ?1"),
            params![alias, index_path],
        )?;
        Ok(())
    }

    pub fn get(&self, alias: &str) -> Result<Option<GoldenRepo>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                &format!(
                    "SELECT alias, source_url, index_path, last_refresh_at, next_refresh_at,
                            enabled_backends, config_json, created_at
                     FROM {TABLE} WHERE alias = ?1"
                ),
                params![alias],
                row_to_golden_repo,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list(&self) -> Result<Vec<GoldenRepo>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT alias, source_url, index_path, last_refresh_at, next_refresh_at,
                    enabled_backends, config_json, created_at
             FROM {TABLE} ORDER BY alias"
        ))?;
        let rows = stmt.query_map([], row_to_golden_repo)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Rows whose `source_url` is a remote git URL (not `local://...`) and
    /// whose `next_refresh_at` is still `NULL` — candidates for the
    /// scheduler's initial spread (spec.md §4.8 step 1).
    pub fn repos_pending_initial_spread(&self) -> Result<Vec<GoldenRepo>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| !r.is_local() && r.next_refresh_at.is_none())
            .collect())
    }

    /// Rows due for refresh: `next_refresh_at <= now`, excluding local
    /// repos (spec.md §4.8 step 2). Excluding in-flight aliases is the
    /// scheduler's job, not the registry's, since in-flight state is
    /// in-memory only.
    pub fn repos_due_for_refresh(&self, now: OffsetDateTime) -> Result<Vec<GoldenRepo>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|r| !r.is_local() && r.next_refresh_at.is_some_and(|t| t <= now))
            .collect())
    }

    /// Startup reconciliation (spec.md §4.2): verify every row's
    /// `index_path` still exists on disk; for filesystem entries with no
    /// matching row, simply note them (`orphans` return value) — reconcile
    /// never deletes anything.
    pub fn reconcile(&self, golden_repos_root: &Path) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for repo in self.list()? {
            if Path::new(&repo.index_path).exists() {
                report.verified.push(repo.alias.clone());
            } else {
                warn!(alias = %repo.alias, path = %repo.index_path, "registry row points at a missing index path");
                report.missing.push(repo.alias.clone());
            }
        }
        if golden_repos_root.is_dir() {
            let known: BTreeSet<String> =
                self.list()?.into_iter().map(|r| r.alias).collect();
            if let Ok(entries) = std::fs::read_dir(golden_repos_root) {
                for entry in entries.flatten() {
                    if let Some(name) = entry.file_name().to_str() {
                        if !known.contains(name) {
                            report.orphans.push(name.to_string());
                        }
                    }
                }
            }
        }
        Ok(report)
    }
}

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub verified: Vec<String>,
    pub missing: Vec<String>,
    pub orphans: Vec<String>,
}

fn row_to_golden_repo(row: &rusqlite::Row) -> rusqlite::Result<GoldenRepo> {
    let last_refresh_at: Option<String> = row.get(3)?;
    let next_refresh_at: Option<String> = row.get(4)?;
    let backends_json: String = row.get(5)?;
    let config_json: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    Ok(GoldenRepo {
        alias: row.get(0)?,
        source_url: row.get(1)?,
        index_path: row.get(2)?,
        last_refresh_at: last_refresh_at.map(|s| parse_rfc3339(&s)),
        next_refresh_at: next_refresh_at.map(|s| parse_rfc3339(&s)),
        enabled_backends: serde_json::from_str(&backends_json).unwrap_or_default(),
        config: serde_json::from_str(&config_json).unwrap_or_default(),
        created_at: parse_rfc3339(&created_at),
    })
}

fn parse_rfc3339(s: &str) -> OffsetDateTime {
    OffsetDateTime::parse(s, &time::format_description::well_known::Rfc3339)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration as StdDuration;

    fn backends() -> BTreeSet<Backend> {
        BTreeSet::from([Backend::Vector, Backend::Fts])
    }

    #[test]
    fn register_sets_next_refresh_at_to_null() {
        let registry = Registry::in_memory().unwrap();
        registry.register("A", "https://example.invalid/a.git", "/gr/A", &backends(), &RepoConfig::default()).unwrap();
        let repo = registry.get("A").unwrap().unwrap();
        assert!(repo.next_refresh_at.is_none());
    }

    #[test]
    fn reregistering_preserves_created_at_and_next_refresh_at() {
        let registry = Registry::in_memory().unwrap();
        registry.register("B", "https://example.invalid/b.git", "/gr/B", &backends(), &RepoConfig::default()).unwrap();
        let scheduled = OffsetDateTime::now_utc() + time::Duration::seconds(3600);
        registry.set_next_refresh("B", scheduled).unwrap();
        let before = registry.get("B").unwrap().unwrap();

        thread::sleep(StdDuration::from_millis(5));
        registry
            .register("B", "https://example.invalid/b-new.git", "/gr/B2", &backends(), &RepoConfig::default())
            .unwrap();
        let after = registry.get("B").unwrap().unwrap();

        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.next_refresh_at, before.next_refresh_at);
        assert_eq!(after.source_url, "https://example.invalid/b-new.git");
        assert_eq!(after.index_path, "/gr/B2");
    }

    #[test]
    fn local_repos_are_excluded_from_scheduling() {
        let registry = Registry::in_memory().unwrap();
        registry.register("L", "local://some/path", "/gr/L", &backends(), &RepoConfig::default()).unwrap();
        assert!(registry.repos_pending_initial_spread().unwrap().is_empty());
        assert!(registry.repos_due_for_refresh(OffsetDateTime::now_utc()).unwrap().is_empty());
    }

    #[test]
    fn reconcile_never_deletes_and_reports_missing() {
        let registry = Registry::in_memory().unwrap();
        registry.register("M", "https://example.invalid/m.git", "/nonexistent/path", &backends(), &RepoConfig::default()).unwrap();
        let report = registry.reconcile(Path::new("/nonexistent/root")).unwrap();
        assert_eq!(report.missing, vec!["M".to_string()]);
        assert!(registry.get("M").unwrap().is_some());
    }
}
