//! Out-of-scope observability collaborator (spec.md §1: "audit logging,
//! metrics export" are named but not designed here). `Coordinator` reports
//! through this trait so a concrete sink — Langfuse, an audit log table,
//! whatever the deployment wants — can be wired in without this crate
//! depending on it.

pub trait EventSink: Send + Sync + 'static {
    fn record(&self, event: &str, detail: serde_json::Value);
}

/// Default no-op sink, used when the embedder doesn't wire one in.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn record(&self, _event: &str, _detail: serde_json::Value) {}
}
