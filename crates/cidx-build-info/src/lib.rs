//! Compile-time build metadata, surfaced by `HealthCheck`.
//!
//! Deliberately much smaller than the teacher's own `build-info` crate: we
//! don't shell out to `git` from `build.rs` (this workspace is never built
//! by the toolchain in this exercise), so only the information `cargo`
//! itself hands us via `CARGO_PKG_*` env vars is captured.

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy)]
pub struct BuildInfo {
    pub pkg_version: &'static str,
    pub pkg_name: &'static str,
}

impl BuildInfo {
    pub const fn from_build() -> Self {
        BuildInfo { pkg_version: env!("CARGO_PKG_VERSION"), pkg_name: env!("CARGO_PKG_NAME") }
    }
}

/// Wall-clock instant at which the calling process observed `BuildInfo`.
/// Not part of the build info itself (that would defeat reproducible
/// builds) but convenient for `HealthCheck` responses.
pub fn queried_at() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}
