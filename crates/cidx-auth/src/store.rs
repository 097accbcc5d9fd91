use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Mutex;

use cidx_types::Role;
use rusqlite::{params, Connection};
use tracing::warn;

use crate::error::{Error, Result};

const DEFAULT_GROUP: &str = "default";

/// Role storage, backed by the `users` table of `server.db` (spec.md §6).
/// Deliberately a separate connection from `GroupStore`'s `groups.db` —
/// the two are never allowed to share a connection (bug #187 guard,
/// spec.md §6/§9): the type system enforces this by giving each its own
/// `rusqlite::Connection` rather than a shared handle with two schemas.
pub struct UserStore {
    conn: Mutex<Connection>,
}

impl UserStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                role TEXT NOT NULL
            );",
        )?;
        Ok(UserStore { conn: Mutex::new(conn) })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                role TEXT NOT NULL
            );",
        )?;
        Ok(UserStore { conn: Mutex::new(conn) })
    }

    /// Role is always re-read from this store at request time, never
    /// cached by callers (spec.md §4.10, bug #67 guard). Unknown users
    /// default to `Member`, matching "deny by default" rather than
    /// erroring a request for an as-yet-unprovisioned account.
    pub fn role_of(&self, username: &str) -> Result<Role> {
        let conn = self.conn.lock().unwrap();
        let role: Option<String> = conn
            .query_row("SELECT role FROM users WHERE username = ?1", params![username], |row| {
                row.get(0)
            })
            .ok();
        Ok(match role.as_deref() {
            Some("admin") => Role::Admin,
            _ => Role::Member,
        })
    }

    pub fn set_role(&self, username: &str, role: Role) -> Result<()> {
        let role_str = match role {
            Role::Admin => "admin",
            Role::Member => "member",
        };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (username, role) VALUES (?1, ?2)
             ON CONFLICT(username) DO UPDATE SET role = excluded.role",
            params![username, role_str],
        )?;
        Ok(())
    }
}

/// Group membership and per-group repo access, backed by `groups.db`
/// (spec.md §6). A fresh install with no groups at all would otherwise
/// leave every non-admin with zero access forever with no indication why;
/// `ensure_default_group` seeds an empty `default` group and logs a
/// warning on first open instead, which is the remediation this workspace
/// chose for that configuration state (spec.md §7, "missing default group
/// on fresh install").
pub struct GroupStore {
    conn: Mutex<Connection>,
}

impl GroupStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS groups (name TEXT PRIMARY KEY);
             CREATE TABLE IF NOT EXISTS repo_group_access (
                 group_name TEXT NOT NULL,
                 alias TEXT NOT NULL,
                 PRIMARY KEY (group_name, alias)
             );
             CREATE TABLE IF NOT EXISTS user_groups (
                 username TEXT NOT NULL,
                 group_name TEXT NOT NULL,
                 PRIMARY KEY (username, group_name)
             );",
        )?;
        let store = GroupStore { conn: Mutex::new(conn) };
        store.ensure_default_group()?;
        Ok(store)
    }

    fn ensure_default_group(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM groups", [], |row| row.get(0))?;
        if count == 0 {
            warn!("groups.db has no groups configured; seeding an empty '{DEFAULT_GROUP}' group");
            conn.execute("INSERT INTO groups (name) VALUES (?1)", params![DEFAULT_GROUP])?;
        }
        Ok(())
    }

    pub fn groups_of(&self, username: &str) -> Result<BTreeSet<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt =
            conn.prepare("SELECT group_name FROM user_groups WHERE username = ?1")?;
        let groups = stmt
            .query_map(params![username], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        if groups.is_empty() {
            Ok(BTreeSet::from([DEFAULT_GROUP.to_string()]))
        } else {
            Ok(groups)
        }
    }

    pub fn allowed_aliases_for_groups(&self, groups: &BTreeSet<String>) -> Result<BTreeSet<String>> {
        if groups.is_empty() {
            return Ok(BTreeSet::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = groups.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT DISTINCT alias FROM repo_group_access WHERE group_name IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn rusqlite::ToSql> =
            groups.iter().map(|g| g as &dyn rusqlite::ToSql).collect();
        let aliases = stmt
            .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        Ok(aliases)
    }

    pub fn grant(&self, group_name: &str, alias: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT OR IGNORE INTO groups (name) VALUES (?1)", params![group_name])?;
        conn.execute(
            "INSERT OR IGNORE INTO repo_group_access (group_name, alias) VALUES (?1, ?2)",
            params![group_name, alias],
        )?;
        Ok(())
    }

    pub fn add_user_to_group(&self, username: &str, group_name: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("INSERT OR IGNORE INTO groups (name) VALUES (?1)", params![group_name])?;
        conn.execute(
            "INSERT OR IGNORE INTO user_groups (username, group_name) VALUES (?1, ?2)",
            params![username, group_name],
        )?;
        Ok(())
    }
}
