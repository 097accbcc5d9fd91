//! Minimal process entrypoint. This crate exposes no HTTP or RPC surface
//! (spec.md §1 scopes the transport out), so this binary only wires up the
//! persistence layer, runs startup reconciliation, and reports build info
//! and health — enough for an embedder to confirm the data directory is
//! sane before mounting `Coordinator` behind whatever transport they
//! choose.

use std::path::PathBuf;

use cidx_scheduler::{AliasStore, Config, JobTracker, Registry};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let build_info = cidx_build_info::BuildInfo::from_build();
    tracing::info!(
        version = build_info.pkg_version,
        name = build_info.pkg_name,
        "starting cidxd"
    );

    let config = Config::from_env();
    tracing::info!(?config, "loaded configuration");

    let data_dir = std::env::var("CIDX_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./data"));
    if let Err(err) = std::fs::create_dir_all(&data_dir) {
        tracing::error!(error = %err, path = %data_dir.display(), "failed to create data directory");
        std::process::exit(1);
    }

    let registry = match Registry::open(data_dir.join("server.db")) {
        Ok(r) => r,
        Err(err) => {
            tracing::error!(error = %err, "failed to open registry");
            std::process::exit(1);
        }
    };
    let alias_store = match AliasStore::open(data_dir.join("server.db")) {
        Ok(s) => s,
        Err(err) => {
            tracing::error!(error = %err, "failed to open alias store");
            std::process::exit(1);
        }
    };
    let job_tracker = match JobTracker::open(data_dir.join("server.db")) {
        Ok(t) => t,
        Err(err) => {
            tracing::error!(error = %err, "failed to open job tracker");
            std::process::exit(1);
        }
    };

    let report = match registry.reconcile(&data_dir.join("golden-repos")) {
        Ok(report) => report,
        Err(err) => {
            tracing::error!(error = %err, "startup reconciliation failed");
            std::process::exit(1);
        }
    };
    tracing::info!(
        verified = report.verified.len(),
        missing = report.missing.len(),
        orphans = report.orphans.len(),
        "startup reconciliation complete"
    );

    let _ = (alias_store, job_tracker);
    tracing::info!(
        "cidxd persistence layer is ready; mount Coordinator behind a transport to serve requests"
    );
}
