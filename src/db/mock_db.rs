use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use time::OffsetDateTime;

use super::{catalog_repository::CatalogRepository, execution_repository::ExecutionRepository};
use crate::models::{
    agent::{Agent, CreateAgent},
    cost::{Cost, CostByType, NewCost, DEFAULT_CURRENCY},
    execution::{Execution, ExecutionKind, ExecutionOutcome, ExecutionStatus, ExecutionStep},
    llm_model::{CreateLlmModel, LlmModel},
    prompt::{CreatePrompt, Prompt},
    tool::{CreateTool, Tool},
    workflow::{CreateWorkflow, Workflow},
};

#[derive(Default)]
pub struct MockCatalog {
    pub models: Mutex<HashMap<i64, LlmModel>>,
    pub prompts: Mutex<HashMap<i64, Prompt>>,
    pub tools: Mutex<HashMap<i64, Tool>>,
    pub agents: Mutex<HashMap<i64, Agent>>,
    pub workflows: Mutex<HashMap<i64, Workflow>>,
    next_id: Mutex<i64>,
}

impl MockCatalog {
    fn next_id(&self) -> i64 {
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        *id
    }

    pub fn insert_model(&self, model: LlmModel) {
        self.models.lock().unwrap().insert(model.id, model);
    }

    pub fn insert_prompt(&self, prompt: Prompt) {
        self.prompts.lock().unwrap().insert(prompt.id, prompt);
    }

    pub fn insert_tool(&self, tool: Tool) {
        self.tools.lock().unwrap().insert(tool.id, tool);
    }

    pub fn insert_agent(&self, agent: Agent) {
        self.agents.lock().unwrap().insert(agent.id, agent);
    }

    pub fn insert_workflow(&self, workflow: Workflow) {
        self.workflows.lock().unwrap().insert(workflow.id, workflow);
    }
}

#[async_trait]
impl CatalogRepository for MockCatalog {
    async fn create_model(&self, new_model: CreateLlmModel) -> Result<LlmModel, sqlx::Error> {
        let model = LlmModel {
            id: self.next_id(),
            name: new_model.name,
            provider: new_model.provider,
            model_name: new_model.model_name,
            endpoint: new_model.endpoint,
            parameters: new_model.parameters,
            cost_per_token: new_model.cost_per_token,
            is_active: true,
        };
        self.insert_model(model.clone());
        Ok(model)
    }

    async fn find_model(&self, id: i64) -> Result<Option<LlmModel>, sqlx::Error> {
        Ok(self.models.lock().unwrap().get(&id).cloned())
    }

    async fn create_prompt(&self, new_prompt: CreatePrompt) -> Result<Prompt, sqlx::Error> {
        let prompt = Prompt {
            id: self.next_id(),
            name: new_prompt.name,
            description: new_prompt.description,
            template: new_prompt.template,
            input_schema: new_prompt.input_schema,
            output_schema: new_prompt.output_schema,
            version: 1,
            is_active: true,
        };
        self.insert_prompt(prompt.clone());
        Ok(prompt)
    }

    async fn find_prompt(&self, id: i64) -> Result<Option<Prompt>, sqlx::Error> {
        Ok(self.prompts.lock().unwrap().get(&id).cloned())
    }

    async fn create_tool(&self, new_tool: CreateTool) -> Result<Tool, sqlx::Error> {
        let tool = Tool {
            id: self.next_id(),
            name: new_tool.name,
            description: new_tool.description,
            tool_type: new_tool.tool_type,
            implementation: new_tool.implementation,
            parameters_schema: new_tool.parameters_schema,
            output_schema: new_tool.output_schema,
            is_active: true,
        };
        self.insert_tool(tool.clone());
        Ok(tool)
    }

    async fn find_tool(&self, id: i64) -> Result<Option<Tool>, sqlx::Error> {
        Ok(self.tools.lock().unwrap().get(&id).cloned())
    }

    async fn find_tool_by_name(&self, name: &str) -> Result<Option<Tool>, sqlx::Error> {
        Ok(self
            .tools
            .lock()
            .unwrap()
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn create_agent(&self, new_agent: CreateAgent) -> Result<Agent, sqlx::Error> {
        let tools = {
            let tools = self.tools.lock().unwrap();
            new_agent
                .tool_ids
                .iter()
                .filter_map(|id| tools.get(id).cloned())
                .collect()
        };
        let agent = Agent {
            id: self.next_id(),
            name: new_agent.name,
            description: new_agent.description,
            model_id: new_agent.model_id,
            prompt_id: new_agent.prompt_id,
            parameters: new_agent.parameters,
            memory_config: new_agent.memory_config,
            is_active: true,
            tools,
        };
        self.insert_agent(agent.clone());
        Ok(agent)
    }

    async fn find_agent(&self, id: i64) -> Result<Option<Agent>, sqlx::Error> {
        Ok(self.agents.lock().unwrap().get(&id).cloned())
    }

    async fn find_agent_by_name(&self, name: &str) -> Result<Option<Agent>, sqlx::Error> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .values()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn create_workflow(
        &self,
        new_workflow: CreateWorkflow,
    ) -> Result<Workflow, sqlx::Error> {
        let workflow = Workflow {
            id: self.next_id(),
            name: new_workflow.name,
            description: new_workflow.description,
            definition: new_workflow.definition,
            is_active: true,
            nodes: new_workflow.nodes,
            connections: new_workflow.connections,
        };
        self.insert_workflow(workflow.clone());
        Ok(workflow)
    }

    async fn find_workflow(&self, id: i64) -> Result<Option<Workflow>, sqlx::Error> {
        Ok(self.workflows.lock().unwrap().get(&id).cloned())
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>, sqlx::Error> {
        Ok(self
            .workflows
            .lock()
            .unwrap()
            .values()
            .find(|w| w.name == name)
            .cloned())
    }
}

/// In-memory execution store applying the same conditional transitions as SQLite.
#[derive(Default)]
pub struct MockExecutions {
    pub executions: Mutex<Vec<Execution>>,
    pub steps: Mutex<Vec<ExecutionStep>>,
    pub costs: Mutex<Vec<Cost>>,
    pub progress_updates: Mutex<Vec<(i64, f64)>>,
}

impl MockExecutions {
    fn push_cost(&self, execution_id: i64, cost: NewCost, now: OffsetDateTime) {
        if cost.amount <= 0.0 {
            return;
        }
        let mut costs = self.costs.lock().unwrap();
        let next_id = costs.len() as i64 + 1;
        costs.push(Cost {
            id: next_id,
            user_id: cost.user_id,
            execution_id: Some(execution_id),
            cost_type: cost.cost_type,
            amount: cost.amount,
            currency: DEFAULT_CURRENCY.to_string(),
            description: Some(cost.description),
            created_at: now,
        });
    }

    fn transition(
        &self,
        id: i64,
        from: &[ExecutionStatus],
        apply: impl FnOnce(&mut Execution),
    ) -> bool {
        let mut executions = self.executions.lock().unwrap();
        match executions
            .iter_mut()
            .find(|e| e.id == id && from.contains(&e.status))
        {
            Some(execution) => {
                apply(execution);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl ExecutionRepository for MockExecutions {
    async fn create_execution(
        &self,
        kind: ExecutionKind,
        target_id: i64,
        input_data: Value,
        created_by: i64,
    ) -> Result<Execution, sqlx::Error> {
        let mut executions = self.executions.lock().unwrap();
        let execution = Execution {
            id: executions.len() as i64 + 1,
            execution_type: kind,
            target_id,
            status: ExecutionStatus::Pending,
            input_data,
            output_data: None,
            error_message: None,
            progress: 0.0,
            duration_seconds: None,
            created_by,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        };
        executions.push(execution.clone());
        Ok(execution)
    }

    async fn find_execution(&self, id: i64) -> Result<Option<Execution>, sqlx::Error> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn list_steps(&self, execution_id: i64) -> Result<Vec<ExecutionStep>, sqlx::Error> {
        let mut steps: Vec<_> = self
            .steps
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_order);
        Ok(steps)
    }

    async fn mark_running(&self, id: i64) -> Result<bool, sqlx::Error> {
        Ok(self.transition(id, &[ExecutionStatus::Pending], |e| {
            e.status = ExecutionStatus::Running;
            e.started_at = Some(OffsetDateTime::now_utc());
        }))
    }

    async fn update_progress(&self, id: i64, progress: f64) -> Result<(), sqlx::Error> {
        if self.transition(id, &[ExecutionStatus::Running], |e| e.progress = progress) {
            self.progress_updates.lock().unwrap().push((id, progress));
        }
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: i64,
        outcome: ExecutionOutcome,
    ) -> Result<bool, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let status = outcome.status;
        let applied = self.transition(id, &[ExecutionStatus::Running], |e| {
            e.status = status;
            e.output_data = outcome.output_data.clone();
            e.error_message = outcome.error_message.clone();
            e.duration_seconds = Some(outcome.duration_seconds);
            e.progress = 1.0;
            e.completed_at = Some(now);
        });
        if !applied {
            return Ok(false);
        }

        let mut steps = self.steps.lock().unwrap();
        for (index, step) in outcome.steps.into_iter().enumerate() {
            let next_id = steps.len() as i64 + 1;
            steps.push(ExecutionStep {
                id: next_id,
                execution_id: id,
                step_order: index as i64 + 1,
                step_type: step.step_type,
                step_name: step.step_name,
                status: step.status.as_str().to_string(),
                input_data: Some(step.input_data),
                output_data: step.output_data,
                error_message: step.error_message,
                duration_seconds: step.duration_seconds,
                started_at: step.started_at,
                completed_at: Some(step.completed_at),
            });
        }

        if let Some(cost) = outcome.cost {
            self.push_cost(id, cost, now);
        }
        Ok(true)
    }

    async fn record_cost(&self, execution_id: i64, cost: NewCost) -> Result<(), sqlx::Error> {
        self.push_cost(execution_id, cost, OffsetDateTime::now_utc());
        Ok(())
    }

    async fn fail_execution(&self, id: i64, error_message: String) -> Result<bool, sqlx::Error> {
        Ok(self.transition(
            id,
            &[ExecutionStatus::Pending, ExecutionStatus::Running],
            |e| {
                e.status = ExecutionStatus::Failed;
                e.error_message = Some(error_message);
                e.completed_at = Some(OffsetDateTime::now_utc());
            },
        ))
    }

    async fn cancel_execution(&self, id: i64) -> Result<bool, sqlx::Error> {
        Ok(self.transition(
            id,
            &[ExecutionStatus::Pending, ExecutionStatus::Running],
            |e| {
                e.status = ExecutionStatus::Cancelled;
                e.completed_at = Some(OffsetDateTime::now_utc());
            },
        ))
    }

    async fn total_cost_for_user(&self, user_id: i64) -> Result<f64, sqlx::Error> {
        Ok(self
            .costs
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.amount)
            .sum())
    }

    async fn cost_breakdown_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<CostByType>, sqlx::Error> {
        let mut totals: Vec<CostByType> = Vec::new();
        for cost in self.costs.lock().unwrap().iter().filter(|c| c.user_id == user_id) {
            match totals.iter_mut().find(|t| t.cost_type == cost.cost_type) {
                Some(entry) => entry.total += cost.amount,
                None => totals.push(CostByType {
                    cost_type: cost.cost_type.clone(),
                    total: cost.amount,
                }),
            }
        }
        totals.sort_by(|a, b| a.cost_type.cmp(&b.cost_type));
        Ok(totals)
    }
}
