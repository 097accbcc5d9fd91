//! Access resolution and the two small SQLite-backed stores it reads from
//! (spec.md §4.10, §6). Kept separate from `cidx-scheduler` because
//! `groups.db` must never share a connection with `server.db` (bug #187
//! guard) — giving it its own crate and its own `Connection` makes that
//! structurally true rather than a convention callers must remember.

pub mod error;
pub mod resolver;
pub mod store;

pub use error::{Error, Result};
pub use resolver::AccessResolver;
pub use store::{GroupStore, UserStore};
