use serde::{Deserialize, Serialize};

/// The identity the transport layer hands the core after authentication.
/// Everything about permissions beyond `username` is re-resolved from the
/// authoritative user store at request time (spec.md §4.10, bug #67 guard)
/// — `Role` is deliberately not carried on this struct so nothing upstream
/// can cache it across requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        User { username: username.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Member,
}
