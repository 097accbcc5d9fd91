//! `cidx`: the golden repository lifecycle and query-serving engine.
//! Binds `cidx-types`, `cidx-auth`, and `cidx-scheduler` together behind
//! the `Coordinator` orchestration layer (spec.md §4.11). Transport
//! (HTTP/MCP/whatever an embedder picks), the vector/FTS/SCIP/temporal
//! backends, the git clone/pull pipeline, and the LLM-CLI analyzer are all
//! out of scope and expressed as traits an embedder implements — see
//! `analyzer`, `event_sink`, and `cidx_scheduler::{backend,
//! refresh_pipeline}`.

pub mod analyzer;
pub mod coordinator;
pub mod error;
pub mod event_sink;

pub use analyzer::{Analyzer, AnalyzerError};
pub use coordinator::{Coordinator, GoldenHealth, GoldenStatus, SearchDispatch};
pub use error::{Error, Result};
pub use event_sink::{EventSink, NullEventSink};
