use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use super::cost::NewCost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionKind {
    Agent,
    Workflow,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionKind::Agent => f.write_str("agent"),
            ExecutionKind::Workflow => f.write_str("workflow"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Execution {
    pub id: i64,
    pub execution_type: ExecutionKind,
    pub target_id: i64,
    pub status: ExecutionStatus,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub progress: f64,
    pub duration_seconds: Option<f64>,
    pub created_by: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
        }
    }
}

pub const STEP_LLM_CALL: &str = "llm_call";
pub const STEP_TOOL_CALL: &str = "tool_call";

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct ExecutionStep {
    pub id: i64,
    pub execution_id: i64,
    pub step_order: i64,
    pub step_type: String,
    pub step_name: String,
    pub status: String,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

/// A step produced by a runner, before it has an id or an order.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step_type: String,
    pub step_name: String,
    pub status: StepStatus,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub completed_at: OffsetDateTime,
}

impl StepRecord {
    pub fn completed(
        step_type: impl Into<String>,
        step_name: impl Into<String>,
        input_data: serde_json::Value,
        output_data: serde_json::Value,
        started_at: OffsetDateTime,
        duration_seconds: f64,
    ) -> Self {
        StepRecord {
            step_type: step_type.into(),
            step_name: step_name.into(),
            status: StepStatus::Completed,
            input_data,
            output_data: Some(output_data),
            error_message: None,
            duration_seconds,
            started_at,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn failed(
        step_type: impl Into<String>,
        step_name: impl Into<String>,
        input_data: serde_json::Value,
        error: impl Into<String>,
        started_at: OffsetDateTime,
        duration_seconds: f64,
    ) -> Self {
        StepRecord {
            step_type: step_type.into(),
            step_name: step_name.into(),
            status: StepStatus::Failed,
            input_data,
            output_data: None,
            error_message: Some(error.into()),
            duration_seconds,
            started_at,
            completed_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Everything written when a running execution reaches its outcome.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub output_data: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_seconds: f64,
    pub steps: Vec<StepRecord>,
    pub cost: Option<NewCost>,
}
