// Task and execution log data model.
//
// A `Task` is a tagged variant over its `type` field; the discipline-specific
// slots (`interval`, `fixed_time`, `daily_time`) are only meaningful for the
// matching kind. Scheduling behavior dispatches on the tag in the engine.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};
use crate::schedule;

// ============================================================================
// Task kind and status
// ============================================================================

/// Scheduling discipline selector. The tag is part of the persisted document;
/// a tag this build does not recognize deserializes as `Unknown` so one stale
/// record cannot poison the whole store load. Unknown tasks are paused at the
/// next scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Interval,
    FixedTime,
    Daily,
    SystemReport,
    Unknown,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Interval => "interval",
            TaskKind::FixedTime => "fixed_time",
            TaskKind::Daily => "daily",
            TaskKind::SystemReport => "system_report",
            TaskKind::Unknown => "unknown",
        }
    }
}

impl<'de> Deserialize<'de> for TaskKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let tag = String::deserialize(deserializer)?;
        Ok(match tag.as_str() {
            "interval" => TaskKind::Interval,
            "fixed_time" => TaskKind::FixedTime,
            "daily" => TaskKind::Daily,
            "system_report" => TaskKind::SystemReport,
            _ => TaskKind::Unknown,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Scheduled and executed by the engine.
    Active,
    /// Skipped by the engine until reactivated.
    Paused,
    /// Terminal; a fixed-time task that has fired (or whose time has passed).
    Finished,
}

// ============================================================================
// Task
// ============================================================================

/// A persistent, user-defined job: a scheduling discipline plus the AI
/// invocation to run when due.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Duration string such as `"30m"`, `"1h"`, `"1d"`; interval kind only.
    #[serde(default)]
    pub interval: String,
    /// One-shot instant; fixed_time kind only.
    #[serde(default)]
    pub fixed_time: Option<DateTime<Utc>>,
    /// Comma-separated `"HH:MM"` clock points; daily and system_report kinds.
    #[serde(default)]
    pub daily_time: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub webhook_url: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    /// Sole source of truth for "when to fire"; null means not yet scheduled.
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_count: u32,
}

impl Task {
    pub fn new(id: String, name: String, kind: TaskKind) -> Self {
        Self {
            id,
            name,
            kind,
            interval: String::new(),
            fixed_time: None,
            daily_time: String::new(),
            prompt: String::new(),
            model: String::new(),
            webhook_url: String::new(),
            status: TaskStatus::Active,
            created_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
            failure_count: 0,
        }
    }

    /// Check the discipline-specific slot for this task's kind. The
    /// management layer calls this before accepting a task; the engine does
    /// not rely on it and still pauses misconfigured records found on disk.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::InvalidTask(
                "task id must not be empty".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(SchedulerError::InvalidTask(
                "task name must not be empty".to_string(),
            ));
        }
        match self.kind {
            TaskKind::Interval => {
                if schedule::parse_interval(&self.interval).is_none() {
                    return Err(SchedulerError::InvalidTask(format!(
                        "unparseable interval `{}`",
                        self.interval
                    )));
                }
            }
            TaskKind::FixedTime => {
                if self.fixed_time.is_none() {
                    return Err(SchedulerError::InvalidTask(
                        "fixed_time task has no fixed_time".to_string(),
                    ));
                }
            }
            TaskKind::Daily | TaskKind::SystemReport => {
                if schedule::parse_daily_points(&self.daily_time).is_empty() {
                    return Err(SchedulerError::InvalidTask(format!(
                        "no valid time point in daily_time `{}`",
                        self.daily_time
                    )));
                }
            }
            TaskKind::Unknown => {
                return Err(SchedulerError::InvalidTask(
                    "unknown task type".to_string(),
                ));
            }
        }
        Ok(())
    }

    pub fn into_shared(self) -> SharedTask {
        Arc::new(RwLock::new(self))
    }
}

/// The per-record lock of the data model: the store's map owns the `Arc`,
/// the engine holds clones during scheduling and execution, and the
/// serializer reads each record under its read lock. No code path may call a
/// store mutator while holding a task write guard.
pub type SharedTask = Arc<RwLock<Task>>;

// ============================================================================
// Execution log
// ============================================================================

/// Immutable record of one completed execution attempt. `task_name` is
/// denormalized so history stays meaningful after the task is deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    /// Instant the execution started.
    pub executed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    /// Model text on success, `"Error: <msg>"` on failure.
    pub output: String,
    #[serde(default)]
    pub webhook_status: u16,
}

impl ExecutionLog {
    pub fn record(
        task: &Task,
        executed_at: DateTime<Utc>,
        duration_ms: u64,
        success: bool,
        output: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            executed_at,
            duration_ms,
            success,
            output: output.to_string(),
            webhook_status: 0,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_tags_roundtrip() {
        for (kind, tag) in [
            (TaskKind::Interval, "\"interval\""),
            (TaskKind::FixedTime, "\"fixed_time\""),
            (TaskKind::Daily, "\"daily\""),
            (TaskKind::SystemReport, "\"system_report\""),
        ] {
            assert_eq!(serde_json::to_string(&kind).unwrap(), tag);
            let parsed: TaskKind = serde_json::from_str(tag).unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unrecognized_kind_tag_maps_to_unknown() {
        let parsed: TaskKind = serde_json::from_str("\"lunar_cycle\"").unwrap();
        assert_eq!(parsed, TaskKind::Unknown);
    }

    #[test]
    fn task_document_uses_snake_case_field_names() {
        let mut task = Task::new("t1".to_string(), "morning digest".to_string(), TaskKind::Daily);
        task.daily_time = "09:00".to_string();
        task.model = "gpt-4o-mini".to_string();

        let doc = serde_json::to_value(&task).unwrap();
        assert_eq!(doc["type"], "daily");
        assert_eq!(doc["daily_time"], "09:00");
        assert_eq!(doc["status"], "active");
        assert_eq!(doc["failure_count"], 0);
        assert!(doc["next_run_at"].is_null());
    }

    #[test]
    fn task_document_ignores_unknown_fields_and_defaults_optionals() {
        let raw = r#"{
            "id": "t1",
            "name": "n",
            "type": "interval",
            "interval": "30m",
            "status": "active",
            "created_at": "2025-01-01T00:00:00Z",
            "legacy_field": true
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert_eq!(task.kind, TaskKind::Interval);
        assert!(task.fixed_time.is_none());
        assert!(task.last_run_at.is_none());
        assert_eq!(task.failure_count, 0);
        assert_eq!(task.prompt, "");
    }

    #[test]
    fn validate_checks_the_slot_for_the_kind() {
        let mut task = Task::new("t1".to_string(), "n".to_string(), TaskKind::Interval);
        assert!(task.validate().is_err());
        task.interval = "15m".to_string();
        assert!(task.validate().is_ok());

        let mut fixed = Task::new("t2".to_string(), "n".to_string(), TaskKind::FixedTime);
        assert!(fixed.validate().is_err());
        fixed.fixed_time = Some(Utc::now());
        assert!(fixed.validate().is_ok());

        let mut daily = Task::new("t3".to_string(), "n".to_string(), TaskKind::Daily);
        daily.daily_time = "not a time".to_string();
        assert!(daily.validate().is_err());
        daily.daily_time = "09:00,18:00".to_string();
        assert!(daily.validate().is_ok());

        let unknown = Task::new("t4".to_string(), "n".to_string(), TaskKind::Unknown);
        assert!(unknown.validate().is_err());

        let unnamed = Task::new("t5".to_string(), "  ".to_string(), TaskKind::SystemReport);
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn log_record_denormalizes_task_name() {
        let task = Task::new("t1".to_string(), "digest".to_string(), TaskKind::Interval);
        let entry = ExecutionLog::record(&task, Utc::now(), 1200, true, "ok");
        assert_eq!(entry.task_id, "t1");
        assert_eq!(entry.task_name, "digest");
        assert_eq!(entry.webhook_status, 0);
        assert!(!entry.id.is_empty());
    }
}
