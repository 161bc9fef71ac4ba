use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::stats::StatsConstraint;

/// The kind of work a task carries; each kind has exactly one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Clone,
    Pull,
    Switch,
    Reset,
    Stats,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Clone => "clone",
            TaskType::Pull => "pull",
            TaskType::Switch => "switch",
            TaskType::Reset => "reset",
            TaskType::Stats => "stats",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clone" => Ok(TaskType::Clone),
            "pull" => Ok(TaskType::Pull),
            "switch" => Ok(TaskType::Switch),
            "reset" => Ok(TaskType::Reset),
            "stats" => Ok(TaskType::Stats),
            other => Err(format!("unknown task type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses never transition again and are invisible to the
    /// enqueue dedup probe.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

/// A persistent record of one asynchronous unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Task {
    pub id: i64,
    pub task_type: TaskType,
    pub repo_id: i64,
    pub status: TaskStatus,
    pub priority: i32,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub parameters: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Derived from `started_at`/`completed_at`, filled in on load.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub duration_ms: Option<i64>,
}

impl Task {
    pub fn new(task_type: TaskType, repo_id: i64, parameters: String, priority: i32) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            task_type,
            repo_id,
            status: TaskStatus::Pending,
            priority,
            parameters,
            result: None,
            error_message: None,
            retry_count: 0,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            duration_ms: None,
        }
    }

    pub fn refresh_duration(&mut self) {
        self.duration_ms = match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds())
            }
            _ => None,
        };
    }
}

/// Parameter blob stored on a task, JSON-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TaskParameters {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub constraint: Option<StatsConstraint>,
}

/// Result blob written by a handler on success, JSON-encoded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct TaskResult {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cache_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn duration_needs_both_timestamps() {
        let mut task = Task::new(TaskType::Clone, 1, String::new(), 0);
        task.refresh_duration();
        assert_eq!(task.duration_ms, None);

        let started = Utc::now();
        task.started_at = Some(started);
        task.completed_at = Some(started + Duration::milliseconds(1500));
        task.refresh_duration();
        assert_eq!(task.duration_ms, Some(1500));
    }

    #[test]
    fn parameters_round_trip() {
        let params = TaskParameters {
            branch: Some("main".into()),
            constraint: Some(StatsConstraint::CommitLimit { limit: 10 }),
        };
        let encoded = serde_json::to_string(&params).unwrap();
        let decoded: TaskParameters = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.branch.as_deref(), Some("main"));
        assert_eq!(
            decoded.constraint,
            Some(StatsConstraint::CommitLimit { limit: 10 })
        );
    }
}
