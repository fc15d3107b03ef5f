use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

pub const COST_TYPE_LLM_CALL: &str = "llm_call";
pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Cost {
    pub id: i64,
    pub user_id: i64,
    pub execution_id: Option<i64>,
    pub cost_type: String,
    pub amount: f64,
    pub currency: String,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Ledger row written alongside a completed execution.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCost {
    pub user_id: i64,
    pub cost_type: String,
    pub amount: f64,
    pub description: String,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone, PartialEq)]
pub struct CostByType {
    pub cost_type: String,
    pub total: f64,
}
