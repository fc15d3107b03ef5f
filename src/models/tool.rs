use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const TOOL_TYPE_BUILTIN: &str = "builtin";
pub const TOOL_TYPE_CUSTOM: &str = "custom";

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Tool {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub tool_type: String,
    /// Script body for custom tools.
    pub implementation: Option<String>,
    pub parameters_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub is_active: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateTool {
    pub name: String,
    pub description: Option<String>,
    pub tool_type: String,
    pub implementation: Option<String>,
    pub parameters_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
}
