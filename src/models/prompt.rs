use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Prompt {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub template: String,
    // Descriptive only. Never enforced at runtime.
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub version: i64,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreatePrompt {
    pub name: String,
    pub description: Option<String>,
    pub template: String,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
}
