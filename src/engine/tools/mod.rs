mod builtin;
pub mod calculator;
mod custom;

use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::engine::round_to;
use crate::models::tool::{Tool, TOOL_TYPE_BUILTIN, TOOL_TYPE_CUSTOM};

pub use builtin::sanitize_filename;
pub use calculator::CalcError;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown builtin tool: {0}")]
    UnknownBuiltin(String),
    #[error("Unsupported tool type: {0}")]
    UnsupportedType(String),
    #[error("No implementation provided for custom tool")]
    MissingImplementation,
    #[error("{0} is required")]
    MissingParameter(&'static str),
    #[error("Invalid filename: {0}")]
    InvalidFilename(String),
    #[error("Failed to read file: File not found: {0}")]
    FileNotFound(String),
    #[error("Failed to {action} file: {source}")]
    Io {
        action: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("Calculation failed: {0}")]
    Calculation(#[from] CalcError),
    #[error("Custom tool execution failed: {0}")]
    Script(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_seconds: f64,
}

/// Runs builtin and custom tools. Builtin file tools are confined to `sandbox_dir`.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    sandbox_dir: PathBuf,
}

impl ToolExecutor {
    pub fn new(sandbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox_dir: sandbox_dir.into(),
        }
    }

    pub fn sandbox_dir(&self) -> &PathBuf {
        &self.sandbox_dir
    }

    /// Never fails: every error becomes a `success = false` result for this call only.
    pub async fn execute(&self, tool: &Tool, parameters: &Value) -> ToolResult {
        let started = Instant::now();
        let empty = Map::new();
        let params = parameters.as_object().unwrap_or(&empty);

        let outcome = self.dispatch(tool, params).await;
        let duration_seconds = round_to(started.elapsed().as_secs_f64(), 3);

        match outcome {
            Ok(output) => {
                debug!(tool = %tool.name, duration_seconds, "tool call succeeded");
                ToolResult {
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_seconds,
                }
            }
            Err(err) => {
                warn!(tool = %tool.name, error = %err, "tool call failed");
                ToolResult {
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                    duration_seconds,
                }
            }
        }
    }

    async fn dispatch(&self, tool: &Tool, params: &Map<String, Value>) -> Result<Value, ToolError> {
        match tool.tool_type.as_str() {
            TOOL_TYPE_BUILTIN => match tool.name.as_str() {
                "web_search" => Ok(builtin::web_search(params)),
                "file_write" => builtin::file_write(&self.sandbox_dir, params).await,
                "file_read" => builtin::file_read(&self.sandbox_dir, params).await,
                "calculator" => builtin::calculator(params),
                other => Err(ToolError::UnknownBuiltin(other.to_string())),
            },
            TOOL_TYPE_CUSTOM => {
                let script = tool
                    .implementation
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(ToolError::MissingImplementation)?;
                custom::run_script(script.to_string(), params.clone()).await
            }
            other => Err(ToolError::UnsupportedType(other.to_string())),
        }
    }
}

/// Reads a parameter as text. Numbers and booleans are accepted and stringified.
pub(crate) fn param_str(params: &Map<String, Value>, key: &str) -> Option<String> {
    match params.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) fn test_tool(name: &str, tool_type: &str, implementation: Option<&str>) -> Tool {
    Tool {
        id: 1,
        name: name.to_string(),
        description: Some(format!("{name} tool")),
        tool_type: tool_type.to_string(),
        implementation: implementation.map(str::to_string),
        parameters_schema: None,
        output_schema: None,
        is_active: true,
    }
}
