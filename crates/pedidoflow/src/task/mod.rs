//! Processing tasks: the unit of work that turns one chat message into
//! structured orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::task_repo::TaskRow;
use crate::db::DatabaseError;
use crate::pipeline::GroupedOrder;

pub mod service;
pub mod sync;

pub use service::TaskService;
pub use sync::{MirrorError, SyncScheduler, TaskMirror};

/// Pipeline stage a task is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStage {
    NotStarted,
    Parsing,
    Analyzing,
    Validating,
    AiProcessing,
    Grouping,
    Completed,
    Failed,
}

impl TaskStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStage::NotStarted => "not_started",
            TaskStage::Parsing => "parsing",
            TaskStage::Analyzing => "analyzing",
            TaskStage::Validating => "validating",
            TaskStage::AiProcessing => "ai_processing",
            TaskStage::Grouping => "grouping",
            TaskStage::Completed => "completed",
            TaskStage::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(TaskStage::NotStarted),
            "parsing" => Some(TaskStage::Parsing),
            "analyzing" => Some(TaskStage::Analyzing),
            "validating" => Some(TaskStage::Validating),
            "ai_processing" => Some(TaskStage::AiProcessing),
            "grouping" => Some(TaskStage::Grouping),
            "completed" => Some(TaskStage::Completed),
            "failed" => Some(TaskStage::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task. Stays `pending` through every working
/// stage; the stage field carries the fine-grained progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Success,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "success" => Some(TaskStatus::Success),
            "error" => Some(TaskStatus::Error),
            _ => None,
        }
    }

    /// Terminal tasks never change again and are eligible for purging.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Full snapshot of one processing task. This is both the broadcast
/// payload and the in-memory cache entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingTask {
    pub id: String,
    /// Original chat message, trimmed.
    pub message: String,
    pub stage: TaskStage,
    pub status: TaskStatus,
    /// Coarse progress, 0 to 100.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Grouped orders, present once the task completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<GroupedOrder>>,
    /// Unparsed model output from the refinement stage, kept for review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_model_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Whether this snapshot has been mirrored to the remote store.
    #[serde(default)]
    pub synced: bool,
}

impl ProcessingTask {
    /// Creates a freshly submitted task.
    pub fn new(id: String, message: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            message,
            stage: TaskStage::NotStarted,
            status: TaskStatus::Pending,
            progress: 0,
            error: None,
            result: None,
            raw_model_output: None,
            created_at: now,
            updated_at: now,
            synced: false,
        }
    }

    /// Converts to a database row. Timestamps become RFC 3339.
    pub fn to_row(&self) -> Result<TaskRow, DatabaseError> {
        let result = match &self.result {
            Some(orders) => Some(serde_json::to_string(orders).map_err(|e| {
                DatabaseError::CorruptRow {
                    id: self.id.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => None,
        };
        Ok(TaskRow {
            id: self.id.clone(),
            message: self.message.clone(),
            stage: self.stage.as_str().to_string(),
            status: self.status.as_str().to_string(),
            progress: self.progress,
            error: self.error.clone(),
            result,
            raw_response: self.raw_model_output.clone(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
            synced: self.synced,
        })
    }

    /// Rebuilds a task from its database row.
    pub fn from_row(row: &TaskRow) -> Result<Self, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: row.id.clone(),
            reason,
        };

        let stage = TaskStage::parse(&row.stage)
            .ok_or_else(|| corrupt(format!("unknown stage '{}'", row.stage)))?;
        let status = TaskStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", row.status)))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| corrupt(format!("bad created_at: {e}")))?
            .with_timezone(&Utc);
        let updated_at = DateTime::parse_from_rfc3339(&row.updated_at)
            .map_err(|e| corrupt(format!("bad updated_at: {e}")))?
            .with_timezone(&Utc);
        let result = match &row.result {
            Some(json) => Some(
                serde_json::from_str(json).map_err(|e| corrupt(format!("bad result: {e}")))?,
            ),
            None => None,
        };

        Ok(Self {
            id: row.id.clone(),
            message: row.message.clone(),
            stage,
            status,
            progress: row.progress,
            error: row.error.clone(),
            result,
            raw_model_output: row.raw_response.clone(),
            created_at,
            updated_at,
            synced: row.synced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_string_round_trip() {
        for stage in [
            TaskStage::NotStarted,
            TaskStage::Parsing,
            TaskStage::Analyzing,
            TaskStage::Validating,
            TaskStage::AiProcessing,
            TaskStage::Grouping,
            TaskStage::Completed,
            TaskStage::Failed,
        ] {
            assert_eq!(TaskStage::parse(stage.as_str()), Some(stage));
        }
        assert_eq!(TaskStage::parse("bogus"), None);
    }

    #[test]
    fn test_status_string_round_trip() {
        for status in [TaskStatus::Pending, TaskStatus::Success, TaskStatus::Error] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
        assert_eq!(TaskStatus::parse("processing"), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_row_round_trip() {
        let mut task = ProcessingTask::new("t1".to_string(), "Daniel M 3".to_string());
        task.stage = TaskStage::Completed;
        task.status = TaskStatus::Success;
        task.progress = 100;
        task.result = Some(vec![]);
        task.raw_model_output = Some("{\"pedidos\": []}".to_string());

        let row = task.to_row().unwrap();
        assert_eq!(row.stage, "completed");
        assert_eq!(row.result.as_deref(), Some("[]"));

        let restored = ProcessingTask::from_row(&row).unwrap();
        assert_eq!(restored.id, task.id);
        assert_eq!(restored.stage, TaskStage::Completed);
        assert_eq!(restored.status, TaskStatus::Success);
        assert!(restored.result.as_ref().unwrap().is_empty());
        assert_eq!(restored.created_at, task.created_at);
    }

    #[test]
    fn test_corrupt_row_is_rejected() {
        let task = ProcessingTask::new("t1".to_string(), "hola".to_string());
        let mut row = task.to_row().unwrap();
        row.stage = "warp".to_string();
        assert!(ProcessingTask::from_row(&row).is_err());
    }
}
