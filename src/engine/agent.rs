use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::db::catalog_repository::CatalogRepository;
use crate::engine::context::RunContext;
use crate::engine::directive::{self, Directive, FINAL_ANSWER_MARKER, TOOL_CALL_MARKER};
use crate::engine::llm::{LlmCallResult, LlmGateway};
use crate::engine::round_to;
use crate::engine::templating::{self, TemplateError};
use crate::engine::tools::ToolExecutor;
use crate::models::agent::Agent;
use crate::models::execution::{StepRecord, STEP_LLM_CALL, STEP_TOOL_CALL};
use crate::models::llm_model::LlmModel;

#[derive(Debug, Error)]
pub enum AgentRunError {
    #[error("Agent model or prompt not found")]
    ModelOrPromptNotFound,
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("Agent exceeded maximum iterations ({0})")]
    IterationLimitExceeded(u32),
    #[error("{0}")]
    Llm(String),
    #[error("Execution cancelled")]
    Cancelled,
    #[error("catalog lookup failed: {0}")]
    Catalog(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentRunResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub steps: Vec<StepRecord>,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub iterations: u32,
}

/// Seam between the workflow walker and agent execution.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, agent: &Agent, input_data: &Value, ctx: &RunContext) -> AgentRunResult;
}

#[derive(Default)]
struct RunTrace {
    steps: Vec<StepRecord>,
    total_tokens: u64,
    total_cost: f64,
    iterations: u32,
}

impl RunTrace {
    fn record_llm_call(
        &mut self,
        model: &LlmModel,
        step_name: String,
        result: &LlmCallResult,
        started_at: OffsetDateTime,
    ) {
        self.total_tokens += result.total_tokens as u64;
        self.total_cost = round_to(self.total_cost + result.cost, 5);

        let input = json!({ "model": model.name, "iteration": self.iterations });
        let step = match &result.response_text {
            Some(text) if result.success => StepRecord::completed(
                STEP_LLM_CALL,
                step_name,
                input,
                json!({
                    "response": text,
                    "tokens": result.total_tokens,
                    "cost": result.cost,
                }),
                started_at,
                result.duration_seconds,
            ),
            _ => StepRecord::failed(
                STEP_LLM_CALL,
                step_name,
                input,
                result.error.clone().unwrap_or_else(|| "LLM call failed".into()),
                started_at,
                result.duration_seconds,
            ),
        };
        self.steps.push(step);
    }
}

/// Runs one agent: a single LLM call when it has no tools, otherwise a
/// bounded ReAct loop over its own tools.
pub struct AgentRunner {
    catalog: Arc<dyn CatalogRepository>,
    llm: Arc<LlmGateway>,
    tools: ToolExecutor,
}

impl AgentRunner {
    pub fn new(catalog: Arc<dyn CatalogRepository>, llm: Arc<LlmGateway>, tools: ToolExecutor) -> Self {
        Self { catalog, llm, tools }
    }

    pub fn tools(&self) -> &ToolExecutor {
        &self.tools
    }

    pub async fn run(&self, agent: &Agent, input_data: &Value, ctx: &RunContext) -> AgentRunResult {
        let started = Instant::now();
        let mut trace = RunTrace::default();

        let outcome = self.run_inner(agent, input_data, ctx, &mut trace).await;
        let duration_seconds = round_to(started.elapsed().as_secs_f64(), 3);

        match outcome {
            Ok(output) => {
                info!(
                    agent = %agent.name,
                    iterations = trace.iterations,
                    total_tokens = trace.total_tokens,
                    total_cost = trace.total_cost,
                    "agent run completed"
                );
                AgentRunResult {
                    success: true,
                    output: Some(output),
                    error: None,
                    duration_seconds,
                    steps: trace.steps,
                    total_tokens: trace.total_tokens,
                    total_cost: trace.total_cost,
                    iterations: trace.iterations,
                }
            }
            Err(err) => {
                warn!(agent = %agent.name, error = %err, "agent run failed");
                AgentRunResult {
                    success: false,
                    output: None,
                    error: Some(err.to_string()),
                    duration_seconds,
                    steps: trace.steps,
                    total_tokens: trace.total_tokens,
                    total_cost: trace.total_cost,
                    iterations: trace.iterations,
                }
            }
        }
    }

    async fn run_inner(
        &self,
        agent: &Agent,
        input_data: &Value,
        ctx: &RunContext,
        trace: &mut RunTrace,
    ) -> Result<Value, AgentRunError> {
        let model = self.catalog.find_model(agent.model_id).await?;
        let prompt = self.catalog.find_prompt(agent.prompt_id).await?;
        let (Some(model), Some(prompt)) = (model, prompt) else {
            return Err(AgentRunError::ModelOrPromptNotFound);
        };

        let filled = templating::render(&prompt.template, input_data)?;

        if agent.tools.is_empty() {
            self.run_single(agent, &model, &filled, ctx, trace).await
        } else {
            self.run_react(agent, &model, &filled, ctx, trace).await
        }
    }

    async fn run_single(
        &self,
        agent: &Agent,
        model: &LlmModel,
        prompt: &str,
        ctx: &RunContext,
        trace: &mut RunTrace,
    ) -> Result<Value, AgentRunError> {
        if ctx.is_cancelled() {
            return Err(AgentRunError::Cancelled);
        }

        trace.iterations = 1;
        let started_at = OffsetDateTime::now_utc();
        let result = self.llm.call(model, prompt, &agent.parameters).await;
        trace.record_llm_call(model, format!("LLM call: {}", model.name), &result, started_at);
        ctx.report_progress(1.0).await;

        match result.response_text {
            Some(text) if result.success => Ok(Value::String(text)),
            _ => Err(AgentRunError::Llm(
                result.error.unwrap_or_else(|| "LLM call failed".into()),
            )),
        }
    }

    async fn run_react(
        &self,
        agent: &Agent,
        model: &LlmModel,
        prompt: &str,
        ctx: &RunContext,
        trace: &mut RunTrace,
    ) -> Result<Value, AgentRunError> {
        let max_iterations = agent.max_iterations();
        let mut transcript = vec![format!("User: {}", tool_prompt(prompt, agent))];

        for iteration in 1..=max_iterations {
            if ctx.is_cancelled() {
                return Err(AgentRunError::Cancelled);
            }

            trace.iterations = iteration;
            let started_at = OffsetDateTime::now_utc();
            let conversation = transcript.join("\n");
            let result = self.llm.call(model, &conversation, &agent.parameters).await;
            trace.record_llm_call(
                model,
                format!("LLM call (iteration {iteration})"),
                &result,
                started_at,
            );

            let response = match result.response_text {
                Some(text) if result.success => text,
                _ => {
                    return Err(AgentRunError::Llm(
                        result.error.unwrap_or_else(|| "LLM call failed".into()),
                    ))
                }
            };
            transcript.push(format!("Assistant: {response}"));

            match directive::parse_response(&response) {
                Directive::FinalAnswer(answer) => {
                    ctx.report_progress(1.0).await;
                    return Ok(Value::String(answer));
                }
                Directive::ToolCall(raw) => {
                    let line = self.call_tool(agent, &raw, trace).await;
                    transcript.push(line);
                }
                Directive::Plain => {
                    debug!(agent = %agent.name, iteration, "no directive in response");
                }
            }

            ctx.report_progress(iteration as f64 / max_iterations as f64)
                .await;
        }

        Err(AgentRunError::IterationLimitExceeded(max_iterations))
    }

    /// Executes one tool directive and returns the transcript line describing the outcome.
    async fn call_tool(&self, agent: &Agent, raw: &str, trace: &mut RunTrace) -> String {
        let started_at = OffsetDateTime::now_utc();
        let started = Instant::now();

        let call = match directive::parse_tool_call(raw) {
            Ok(call) => call,
            Err(err) => {
                trace.steps.push(StepRecord::failed(
                    STEP_TOOL_CALL,
                    raw,
                    json!({ "tool_call": raw }),
                    err.to_string(),
                    started_at,
                    0.0,
                ));
                return format!("Tool Error: {err}");
            }
        };

        let input = json!({ "tool_call": raw, "parameters": call.params });
        let Some(tool) = agent.tools.iter().find(|t| t.name == call.name) else {
            let error = format!("Tool '{}' not found", call.name);
            trace.steps.push(StepRecord::failed(
                STEP_TOOL_CALL,
                call.name,
                input,
                error.clone(),
                started_at,
                round_to(started.elapsed().as_secs_f64(), 3),
            ));
            return format!("Tool Error: {error}");
        };

        let parameters = Value::Object(call.params);
        let result = self.tools.execute(tool, &parameters).await;

        match (result.success, result.output) {
            (true, Some(output)) => {
                let rendered =
                    serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string());
                trace.steps.push(StepRecord::completed(
                    STEP_TOOL_CALL,
                    &tool.name,
                    input,
                    output,
                    started_at,
                    result.duration_seconds,
                ));
                format!("Tool Result: {rendered}")
            }
            _ => {
                let error = result.error.unwrap_or_else(|| "Tool call failed".into());
                trace.steps.push(StepRecord::failed(
                    STEP_TOOL_CALL,
                    &tool.name,
                    input,
                    error.clone(),
                    started_at,
                    result.duration_seconds,
                ));
                format!("Tool Error: {error}")
            }
        }
    }
}

#[async_trait]
impl AgentInvoker for AgentRunner {
    async fn invoke(&self, agent: &Agent, input_data: &Value, ctx: &RunContext) -> AgentRunResult {
        self.run(agent, input_data, ctx).await
    }
}

fn tool_prompt(prompt: &str, agent: &Agent) -> String {
    let descriptions: Vec<String> = agent
        .tools
        .iter()
        .map(|t| format!("- {}: {}", t.name, t.description.as_deref().unwrap_or("")))
        .collect();

    format!(
        "{prompt}\n\nYou have access to the following tools:\n{tools}\n\n\
         To use a tool, respond with: {TOOL_CALL_MARKER} tool_name(parameter1=value1, parameter2=value2)\n\
         After using a tool, you'll receive the result. Continue reasoning based on the result.\n\
         When you have the final answer, respond with: {FINAL_ANSWER_MARKER} your answer here\n",
        tools = descriptions.join("\n"),
    )
}
