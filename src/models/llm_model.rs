use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct LlmModel {
    pub id: i64,
    pub name: String,
    pub provider: String,
    pub model_name: String,
    pub endpoint: Option<String>,
    /// Default sampling parameters; agent overrides win.
    pub parameters: serde_json::Value,
    pub cost_per_token: f64,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateLlmModel {
    pub name: String,
    pub provider: String,
    pub model_name: String,
    pub endpoint: Option<String>,
    pub parameters: serde_json::Value,
    pub cost_per_token: f64,
}
