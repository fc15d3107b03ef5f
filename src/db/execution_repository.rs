use async_trait::async_trait;
use serde_json::Value;

use crate::models::{
    cost::{CostByType, NewCost},
    execution::{Execution, ExecutionKind, ExecutionOutcome, ExecutionStep},
};

/// Execution lifecycle storage. Every status change is conditional on the
/// current status, so a terminal row is never rewritten.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create_execution(
        &self,
        kind: ExecutionKind,
        target_id: i64,
        input_data: Value,
        created_by: i64,
    ) -> Result<Execution, sqlx::Error>;

    async fn find_execution(&self, id: i64) -> Result<Option<Execution>, sqlx::Error>;

    /// Steps ordered by `step_order`.
    async fn list_steps(&self, execution_id: i64) -> Result<Vec<ExecutionStep>, sqlx::Error>;

    /// pending -> running. Returns false when the row was not pending.
    async fn mark_running(&self, id: i64) -> Result<bool, sqlx::Error>;

    /// No-op unless the execution is running.
    async fn update_progress(&self, id: i64, progress: f64) -> Result<(), sqlx::Error>;

    /// running -> completed|failed with progress 1.0, together with the step
    /// trace and cost row, in one transaction. Returns false and writes nothing when the row was
    /// no longer running.
    async fn complete_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
    ) -> Result<bool, sqlx::Error>;

    /// Ledger row for work done by a run whose result was discarded because
    /// the execution had already reached a terminal status. Zero amounts are
    /// not recorded.
    async fn record_cost(&self, execution_id: i64, cost: NewCost) -> Result<(), sqlx::Error>;

    /// pending|running -> failed.
    async fn fail_execution(&self, id: i64, error_message: String) -> Result<bool, sqlx::Error>;

    /// pending|running -> cancelled.
    async fn cancel_execution(&self, id: i64) -> Result<bool, sqlx::Error>;

    async fn total_cost_for_user(&self, user_id: i64) -> Result<f64, sqlx::Error>;

    async fn cost_breakdown_for_user(&self, user_id: i64)
        -> Result<Vec<CostByType>, sqlx::Error>;
}
