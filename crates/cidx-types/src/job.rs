use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The kind of background operation a `TrackedJob` records (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    AddGolden,
    RefreshGolden,
    IndexCleanup,
    DescriptionRefresh,
    DepMapAnalysis,
    ScipResolution,
    StartupReconcile,
    LangfuseSync,
    ResearchAssistantChat,
    MultiSearch,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationType::AddGolden => "add_golden",
            OperationType::RefreshGolden => "refresh_golden",
            OperationType::IndexCleanup => "index_cleanup",
            OperationType::DescriptionRefresh => "description_refresh",
            OperationType::DepMapAnalysis => "dep_map_analysis",
            OperationType::ScipResolution => "scip_resolution",
            OperationType::StartupReconcile => "startup_reconcile",
            OperationType::LangfuseSync => "langfuse_sync",
            OperationType::ResearchAssistantChat => "research_assistant_chat",
            OperationType::MultiSearch => "multi_search",
        }
    }

    pub fn parse(s: &str) -> Option<OperationType> {
        Some(match s {
            "add_golden" => OperationType::AddGolden,
            "refresh_golden" => OperationType::RefreshGolden,
            "index_cleanup" => OperationType::IndexCleanup,
            "description_refresh" => OperationType::DescriptionRefresh,
            "dep_map_analysis" => OperationType::DepMapAnalysis,
            "scip_resolution" => OperationType::ScipResolution,
            "startup_reconcile" => OperationType::StartupReconcile,
            "langfuse_sync" => OperationType::LangfuseSync,
            "research_assistant_chat" => OperationType::ResearchAssistantChat,
            "multi_search" => OperationType::MultiSearch,
            _ => return None,
        })
    }
}

/// `status` transitions are a subset of
/// `{pending->running, running->completed, running->failed, pending->failed}`
/// (spec.md §8, testable property #5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<JobStatus> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "running" => JobStatus::Running,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            _ => return None,
        })
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether transitioning from `self` to `next` is one of the allowed
    /// edges of the state machine.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Pending, JobStatus::Failed)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedJob {
    pub job_id: Uuid,
    pub operation_type: OperationType,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub progress: u8,
    pub progress_info: Option<String>,
    pub error: Option<String>,
    pub username: Option<String>,
    pub repo_alias: Option<String>,
    pub metadata: serde_json::Value,
}

impl TrackedJob {
    pub fn new(
        job_id: Uuid,
        operation_type: OperationType,
        username: Option<String>,
        repo_alias: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        TrackedJob {
            job_id,
            operation_type,
            status: JobStatus::Pending,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
            progress: 0,
            progress_info: None,
            error: None,
            username,
            repo_alias,
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        }
    }
}
