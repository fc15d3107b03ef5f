use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const NODE_START: &str = "start";
pub const NODE_INPUT: &str = "input";
pub const NODE_AGENT: &str = "agent";
pub const NODE_TOOL: &str = "tool";
pub const NODE_END: &str = "end";

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    /// Opaque editor payload kept for clients.
    pub definition: serde_json::Value,
    pub is_active: bool,
    #[sqlx(skip)]
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[sqlx(skip)]
    #[serde(default)]
    pub connections: Vec<WorkflowConnection>,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WorkflowNode {
    pub node_id: String,
    pub node_type: String,
    pub position_x: f64,
    pub position_y: f64,
    pub configuration: serde_json::Value,
}

#[derive(Debug, FromRow, Serialize, Deserialize, Clone)]
pub struct WorkflowConnection {
    pub source_node_id: String,
    pub target_node_id: String,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CreateWorkflow {
    pub name: String,
    pub description: Option<String>,
    pub definition: serde_json::Value,
    pub nodes: Vec<WorkflowNode>,
    pub connections: Vec<WorkflowConnection>,
}

impl WorkflowNode {
    pub fn new(node_id: &str, node_type: &str, configuration: serde_json::Value) -> Self {
        WorkflowNode {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            position_x: 0.0,
            position_y: 0.0,
            configuration,
        }
    }
}

impl WorkflowConnection {
    pub fn new(source: &str, target: &str) -> Self {
        WorkflowConnection {
            source_node_id: source.to_string(),
            target_node_id: target.to_string(),
            source_handle: None,
            target_handle: None,
        }
    }
}
