use async_trait::async_trait;

use crate::models::{
    agent::{Agent, CreateAgent},
    llm_model::{CreateLlmModel, LlmModel},
    prompt::{CreatePrompt, Prompt},
    tool::{CreateTool, Tool},
    workflow::{CreateWorkflow, Workflow},
};

/// Reference data the engine reads while running agents and workflows.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn create_model(&self, new_model: CreateLlmModel) -> Result<LlmModel, sqlx::Error>;

    async fn find_model(&self, id: i64) -> Result<Option<LlmModel>, sqlx::Error>;

    async fn create_prompt(&self, new_prompt: CreatePrompt) -> Result<Prompt, sqlx::Error>;

    async fn find_prompt(&self, id: i64) -> Result<Option<Prompt>, sqlx::Error>;

    async fn create_tool(&self, new_tool: CreateTool) -> Result<Tool, sqlx::Error>;

    async fn find_tool(&self, id: i64) -> Result<Option<Tool>, sqlx::Error>;

    async fn find_tool_by_name(&self, name: &str) -> Result<Option<Tool>, sqlx::Error>;

    /// Tools are attached in `tool_ids` order.
    async fn create_agent(&self, new_agent: CreateAgent) -> Result<Agent, sqlx::Error>;

    /// Returns the agent with its tools loaded.
    async fn find_agent(&self, id: i64) -> Result<Option<Agent>, sqlx::Error>;

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, sqlx::Error>;

    async fn create_workflow(&self, new_workflow: CreateWorkflow)
        -> Result<Workflow, sqlx::Error>;

    /// Returns the workflow with nodes and connections in insertion order.
    async fn find_workflow(&self, id: i64) -> Result<Option<Workflow>, sqlx::Error>;

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, sqlx::Error>;
}
