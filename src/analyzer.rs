//! External LLM-CLI collaborator (spec.md §1: description generation,
//! dependency-map analysis, and the research-assistant chat operation are
//! all named scope-exclusions for this crate). Kept as a trait so none of
//! those features need an actual subprocess/API client to compile against.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AnalyzerError(pub String);

impl std::fmt::Display for AnalyzerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "analyzer failed: {}", self.0)
    }
}

impl std::error::Error for AnalyzerError {}

pub trait Analyzer: Send + Sync + 'static {
    fn run(&self, prompt: &str, timeout: Duration) -> Result<String, AnalyzerError>;
}
