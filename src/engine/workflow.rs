use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::db::catalog_repository::CatalogRepository;
use crate::engine::agent::AgentInvoker;
use crate::engine::context::RunContext;
use crate::engine::graph::Graph;
use crate::engine::round_to;
use crate::engine::tools::ToolExecutor;
use crate::models::execution::StepRecord;
use crate::models::workflow::{
    Workflow, WorkflowNode, NODE_AGENT, NODE_END, NODE_INPUT, NODE_START, NODE_TOOL,
};

#[derive(Debug, Error)]
pub enum WorkflowRunError {
    #[error("No start node found in workflow")]
    NoStartNode,
    #[error("No agent specified for node {0}")]
    MissingAgentReference(String),
    #[error("Agent {0} not found")]
    AgentNotFound(String),
    #[error("Agent execution failed: {0}")]
    AgentFailed(String),
    #[error("No tool specified for node {0}")]
    MissingToolReference(String),
    #[error("Tool {0} not found")]
    ToolNotFound(String),
    #[error("Tool execution failed: {0}")]
    ToolFailed(String),
    #[error("Execution cancelled")]
    Cancelled,
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub steps: Vec<StepRecord>,
    pub total_cost: f64,
    pub nodes_executed: usize,
}

#[derive(Default)]
struct Walk {
    outputs: HashMap<String, Value>,
    last_output: Option<Value>,
    steps: Vec<StepRecord>,
    total_cost: f64,
}

/// Walks a workflow depth-first from each start node, running every node at
/// most once. A node runs when it is first reached and sees only the
/// predecessor outputs produced so far.
pub struct WorkflowRunner {
    catalog: Arc<dyn CatalogRepository>,
    agents: Arc<dyn AgentInvoker>,
    tools: ToolExecutor,
}

impl WorkflowRunner {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        agents: Arc<dyn AgentInvoker>,
        tools: ToolExecutor,
    ) -> Self {
        Self {
            catalog,
            agents,
            tools,
        }
    }

    pub async fn run(
        &self,
        workflow: &Workflow,
        input_data: &Value,
        ctx: &RunContext,
    ) -> WorkflowRunResult {
        let started = Instant::now();
        let graph = Graph::from_workflow(workflow);
        let mut walk = Walk::default();
        let mut visited: HashSet<&str> = HashSet::new();

        let outcome = self
            .traverse(&graph, input_data, ctx, &mut walk, &mut visited)
            .await;
        let duration_seconds = round_to(started.elapsed().as_secs_f64(), 3);
        let nodes_executed = walk.outputs.len();

        match outcome {
            Ok(()) => {
                let output = final_output(&graph, &mut walk);
                info!(
                    workflow = %workflow.name,
                    nodes_executed,
                    total_cost = walk.total_cost,
                    "workflow run completed"
                );
                WorkflowRunResult {
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_seconds,
                    steps: walk.steps,
                    total_cost: walk.total_cost,
                    nodes_executed,
                }
            }
            Err(err) => {
                warn!(workflow = %workflow.name, error = %err, "workflow run failed");
                WorkflowRunResult {
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                    duration_seconds,
                    steps: walk.steps,
                    total_cost: walk.total_cost,
                    nodes_executed,
                }
            }
        }
    }

    async fn traverse<'a>(
        &self,
        graph: &Graph<'a>,
        input_data: &Value,
        ctx: &RunContext,
        walk: &mut Walk,
        visited: &mut HashSet<&'a str>,
    ) -> Result<(), WorkflowRunError> {
        let starts: Vec<&str> = graph
            .nodes_of_type(NODE_START)
            .map(|n| n.node_id.as_str())
            .collect();
        if starts.is_empty() {
            return Err(WorkflowRunError::NoStartNode);
        }

        let total = graph.len().max(1) as f64;
        for start in starts {
            let mut stack = vec![start];
            while let Some(node_id) = stack.pop() {
                if visited.contains(node_id) {
                    continue;
                }
                if ctx.is_cancelled() {
                    return Err(WorkflowRunError::Cancelled);
                }
                let Some(node) = graph.node(node_id) else {
                    continue;
                };

                visited.insert(node_id);
                self.execute_node(graph, node, input_data, ctx, walk).await?;
                ctx.report_progress(visited.len() as f64 / total).await;

                for next in graph.outgoing(node_id).iter().rev() {
                    if !visited.contains(next) {
                        stack.push(next);
                    }
                }
            }
        }
        Ok(())
    }

    async fn execute_node(
        &self,
        graph: &Graph<'_>,
        node: &WorkflowNode,
        input_data: &Value,
        ctx: &RunContext,
        walk: &mut Walk,
    ) -> Result<(), WorkflowRunError> {
        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();
        let merged = merge_inputs(graph.incoming(&node.node_id), &walk.outputs);

        let (step_input, result) = match node.node_type.as_str() {
            NODE_START => (input_data.clone(), Ok(input_data.clone())),
            NODE_INPUT => (
                json!({}),
                Ok(node
                    .configuration
                    .get("default_value")
                    .cloned()
                    .unwrap_or_else(|| json!({}))),
            ),
            NODE_AGENT => {
                let result = self.run_agent_node(node, &merged, ctx, walk).await;
                (merged, result)
            }
            NODE_TOOL => {
                let result = self.run_tool_node(node, &merged).await;
                (merged, result)
            }
            NODE_END => (merged.clone(), Ok(merged)),
            other => {
                debug!(node_id = %node.node_id, node_type = other, "pass-through node");
                (merged.clone(), Ok(merged))
            }
        };

        let duration_seconds = round_to(started.elapsed().as_secs_f64(), 3);
        match result {
            Ok(output) => {
                walk.steps.push(StepRecord::completed(
                    &node.node_type,
                    &node.node_id,
                    step_input,
                    output.clone(),
                    started_at,
                    duration_seconds,
                ));
                walk.outputs.insert(node.node_id.clone(), output.clone());
                walk.last_output = Some(output);
                Ok(())
            }
            Err(err) => {
                walk.steps.push(StepRecord::failed(
                    &node.node_type,
                    &node.node_id,
                    step_input,
                    err.to_string(),
                    started_at,
                    duration_seconds,
                ));
                Err(err)
            }
        }
    }

    async fn run_agent_node(
        &self,
        node: &WorkflowNode,
        input: &Value,
        ctx: &RunContext,
        walk: &mut Walk,
    ) -> Result<Value, WorkflowRunError> {
        let reference = config_value(node, &["agent_id", "agentId"])
            .ok_or_else(|| WorkflowRunError::MissingAgentReference(node.node_id.clone()))?;
        let agent_id = reference_id(reference)
            .ok_or_else(|| WorkflowRunError::AgentNotFound(reference_label(reference)))?;
        let agent = self
            .catalog
            .find_agent(agent_id)
            .await?
            .ok_or_else(|| WorkflowRunError::AgentNotFound(agent_id.to_string()))?;

        let result = self.agents.invoke(&agent, input, &ctx.nested()).await;
        // Spend is counted even when the agent fails part-way.
        walk.total_cost = round_to(walk.total_cost + result.total_cost, 5);

        match (result.success, result.output) {
            (true, Some(output)) => Ok(output),
            _ => Err(WorkflowRunError::AgentFailed(
                result.error.unwrap_or_else(|| "unknown error".into()),
            )),
        }
    }

    async fn run_tool_node(
        &self,
        node: &WorkflowNode,
        input: &Value,
    ) -> Result<Value, WorkflowRunError> {
        let tool = match config_value(node, &["tool_id", "toolId"]) {
            Some(reference) => {
                let tool_id = reference_id(reference)
                    .ok_or_else(|| WorkflowRunError::ToolNotFound(reference_label(reference)))?;
                self.catalog
                    .find_tool(tool_id)
                    .await?
                    .ok_or_else(|| WorkflowRunError::ToolNotFound(tool_id.to_string()))?
            }
            None => {
                let name = config_value(node, &["tool_name", "toolName"])
                    .and_then(Value::as_str)
                    .ok_or_else(|| WorkflowRunError::MissingToolReference(node.node_id.clone()))?;
                self.catalog
                    .find_tool_by_name(name)
                    .await?
                    .ok_or_else(|| WorkflowRunError::ToolNotFound(name.to_string()))?
            }
        };

        let mut parameters = match input {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        if let Some(Value::Object(overrides)) = node.configuration.get("parameters") {
            for (key, value) in overrides {
                parameters.insert(key.clone(), value.clone());
            }
        }

        let result = self.tools.execute(&tool, &Value::Object(parameters)).await;
        match (result.success, result.output) {
            (true, Some(output)) => Ok(output),
            _ => Err(WorkflowRunError::ToolFailed(
                result.error.unwrap_or_else(|| "unknown error".into()),
            )),
        }
    }
}

fn config_value<'n>(node: &'n WorkflowNode, keys: &[&str]) -> Option<&'n Value> {
    keys.iter()
        .filter_map(|k| node.configuration.get(*k))
        .find(|v| !v.is_null())
}

fn reference_id(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn reference_label(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Object outputs merge key-wise in incoming-edge order; any other output is
/// stored under `<predecessor>_output`. Predecessors that have not run yet
/// contribute nothing.
fn merge_inputs(predecessors: &[&str], outputs: &HashMap<String, Value>) -> Value {
    let mut merged = Map::new();
    for source in predecessors {
        match outputs.get(*source) {
            Some(Value::Object(map)) => {
                for (key, value) in map {
                    merged.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                merged.insert(format!("{source}_output"), other.clone());
            }
            None => {}
        }
    }
    Value::Object(merged)
}

fn final_output(graph: &Graph<'_>, walk: &mut Walk) -> Value {
    let mut ends = Map::new();
    for node in graph.nodes_of_type(NODE_END) {
        if let Some(output) = walk.outputs.get(&node.node_id) {
            ends.insert(node.node_id.clone(), output.clone());
        }
    }
    if !ends.is_empty() {
        return Value::Object(ends);
    }
    walk.last_output.take().unwrap_or_else(|| json!({}))
}
