use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::tool::Tool;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub model_id: i64,
    pub prompt_id: i64,
    /// Provider overrides plus `max_iterations`.
    pub parameters: serde_json::Value,
    pub memory_config: Option<serde_json::Value>,
    pub is_active: bool,
    #[sqlx(skip)]
    #[serde(default)]
    pub tools: Vec<Tool>,
}

impl Agent {
    pub fn max_iterations(&self) -> u32 {
        self.parameters
            .get("max_iterations")
            .and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
            })
            .map(|n| n.clamp(1, u32::MAX as u64) as u32)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateAgent {
    pub name: String,
    pub description: Option<String>,
    pub model_id: i64,
    pub prompt_id: i64,
    pub parameters: serde_json::Value,
    pub memory_config: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_ids: Vec<i64>,
}
