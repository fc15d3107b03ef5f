use async_trait::async_trait;
use serde_json::Value;
use sqlx::{SqliteConnection, SqlitePool};
use time::OffsetDateTime;

use crate::{
    db::execution_repository::ExecutionRepository,
    models::{
        cost::{CostByType, NewCost, DEFAULT_CURRENCY},
        execution::{Execution, ExecutionKind, ExecutionOutcome, ExecutionStep},
    },
};

const EXECUTION_COLUMNS: &str = "id, execution_type, target_id, status, input_data, output_data, error_message, progress, duration_seconds, created_by, created_at, started_at, completed_at";

pub struct SqliteExecutionRepository {
    pub pool: SqlitePool,
}

#[async_trait]
impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(
        &self,
        kind: ExecutionKind,
        target_id: i64,
        input_data: Value,
        created_by: i64,
    ) -> Result<Execution, sqlx::Error> {
        sqlx::query_as::<_, Execution>(&format!(
            r#"
            INSERT INTO executions (execution_type, target_id, status, input_data, progress, created_by, created_at)
            VALUES (?, ?, 'pending', ?, 0.0, ?, ?)
            RETURNING {EXECUTION_COLUMNS}
            "#
        ))
        .bind(kind)
        .bind(target_id)
        .bind(input_data)
        .bind(created_by)
        .bind(OffsetDateTime::now_utc())
        .fetch_one(&self.pool)
        .await
    }

    async fn find_execution(&self, id: i64) -> Result<Option<Execution>, sqlx::Error> {
        sqlx::query_as::<_, Execution>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn list_steps(&self, execution_id: i64) -> Result<Vec<ExecutionStep>, sqlx::Error> {
        sqlx::query_as::<_, ExecutionStep>(
            r#"
            SELECT id, execution_id, step_order, step_type, step_name, status, input_data,
                   output_data, error_message, duration_seconds, started_at, completed_at
            FROM execution_steps
            WHERE execution_id = ?
            ORDER BY step_order
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await
    }

    async fn mark_running(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE executions SET status = 'running', started_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_progress(&self, id: i64, progress: f64) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE executions SET progress = ? WHERE id = ? AND status = 'running'")
            .bind(progress.clamp(0.0, 1.0))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
    ) -> Result<bool, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE executions
            SET status = ?,
                output_data = ?,
                error_message = ?,
                duration_seconds = ?,
                progress = 1.0,
                completed_at = ?
            WHERE id = ? AND status = 'running'
            "#,
        )
        .bind(outcome.status)
        .bind(outcome.output_data)
        .bind(outcome.error_message)
        .bind(outcome.duration_seconds)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        for (index, step) in outcome.steps.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO execution_steps (
                    execution_id, step_order, step_type, step_name, status, input_data,
                    output_data, error_message, duration_seconds, started_at, completed_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(index as i64 + 1)
            .bind(&step.step_type)
            .bind(&step.step_name)
            .bind(step.status.as_str())
            .bind(&step.input_data)
            .bind(&step.output_data)
            .bind(&step.error_message)
            .bind(step.duration_seconds)
            .bind(step.started_at)
            .bind(step.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(cost) = outcome.cost {
            insert_cost(&mut *tx, id, cost, now).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn record_cost(&self, execution_id: i64, cost: NewCost) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        insert_cost(&mut *conn, execution_id, cost, OffsetDateTime::now_utc()).await
    }

    async fn fail_execution(&self, id: i64, error_message: String) -> Result<bool, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn cancel_execution(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE executions
            SET status = 'cancelled', completed_at = ?
            WHERE id = ? AND status IN ('pending', 'running')
            "#,
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn total_cost_for_user(&self, user_id: i64) -> Result<f64, sqlx::Error> {
        // TOTAL() is always REAL and yields 0.0 for no rows.
        sqlx::query_scalar::<_, f64>("SELECT TOTAL(amount) FROM costs WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
    }

    async fn cost_breakdown_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<CostByType>, sqlx::Error> {
        sqlx::query_as::<_, CostByType>(
            r#"
            SELECT cost_type, TOTAL(amount) AS total
            FROM costs
            WHERE user_id = ?
            GROUP BY cost_type
            ORDER BY cost_type
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
    }
}

async fn insert_cost(
    conn: &mut SqliteConnection,
    execution_id: i64,
    cost: NewCost,
    now: OffsetDateTime,
) -> Result<(), sqlx::Error> {
    if cost.amount <= 0.0 {
        return Ok(());
    }
    sqlx::query(
        r#"
        INSERT INTO costs (user_id, execution_id, cost_type, amount, currency, description, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(cost.user_id)
    .bind(execution_id)
    .bind(cost.cost_type)
    .bind(cost.amount)
    .bind(DEFAULT_CURRENCY)
    .bind(cost.description)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}
