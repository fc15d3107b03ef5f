pub mod registry;
mod scope;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::db::catalog_repository::CatalogRepository;
use crate::db::execution_repository::ExecutionRepository;
use crate::engine::agent::{AgentRunResult, AgentRunner};
use crate::engine::llm::LlmGateway;
use crate::engine::round_to;
use crate::engine::tools::ToolExecutor;
use crate::engine::workflow::{WorkflowRunResult, WorkflowRunner};
use crate::models::agent::Agent;
use crate::models::cost::{NewCost, COST_TYPE_LLM_CALL};
use crate::models::execution::{ExecutionKind, ExecutionOutcome, ExecutionStatus, StepRecord};
use crate::models::workflow::Workflow;

pub use registry::{InFlightExecution, Registry};
pub use scope::ExecutionScope;

const PERSISTENCE_MAX_ATTEMPTS: usize = 3;
#[cfg(test)]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
#[cfg(not(test))]
const PERSISTENCE_INITIAL_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(
        "coordinator persistence operation `{operation}` failed for execution {execution_id} after {attempts} attempts: {source}"
    )]
    Persistence {
        execution_id: i64,
        operation: &'static str,
        attempts: usize,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to store execution: {0}")]
    Storage(#[from] sqlx::Error),
}

impl CoordinatorError {
    pub fn operation(&self) -> Option<&'static str> {
        match self {
            CoordinatorError::Persistence { operation, .. } => Some(operation),
            CoordinatorError::Storage(_) => None,
        }
    }

    pub fn attempts(&self) -> usize {
        match self {
            CoordinatorError::Persistence { attempts, .. } => *attempts,
            CoordinatorError::Storage(_) => 1,
        }
    }
}

enum Target {
    Agent(Agent),
    Workflow(Workflow),
}

impl Target {
    fn cost_description(&self) -> String {
        match self {
            Target::Agent(agent) => format!("Agent execution: {}", agent.name),
            Target::Workflow(workflow) => format!("Workflow execution: {}", workflow.name),
        }
    }
}

/// What a runner hands back, flattened across agent and workflow runs.
struct RunReport {
    success: bool,
    output: Option<Value>,
    error: Option<String>,
    duration_seconds: f64,
    steps: Vec<StepRecord>,
    total_cost: f64,
}

impl From<AgentRunResult> for RunReport {
    fn from(result: AgentRunResult) -> Self {
        RunReport {
            success: result.success,
            output: result.output,
            error: result.error,
            duration_seconds: result.duration_seconds,
            steps: result.steps,
            total_cost: result.total_cost,
        }
    }
}

impl From<WorkflowRunResult> for RunReport {
    fn from(result: WorkflowRunResult) -> Self {
        RunReport {
            success: result.success,
            output: result.output,
            error: result.error,
            duration_seconds: result.duration_seconds,
            steps: result.steps,
            total_cost: result.total_cost,
        }
    }
}

impl RunReport {
    fn crashed(message: String, duration_seconds: f64) -> Self {
        RunReport {
            success: false,
            output: None,
            error: Some(message),
            duration_seconds,
            steps: Vec::new(),
            total_cost: 0.0,
        }
    }

    fn into_outcome(self, user_id: i64, cost_description: String) -> ExecutionOutcome {
        let total_cost = round_to(self.total_cost, 5);
        ExecutionOutcome {
            status: if self.success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            },
            output_data: self.output,
            error_message: self.error,
            duration_seconds: self.duration_seconds,
            steps: self.steps,
            cost: (total_cost > 0.0).then(|| NewCost {
                user_id,
                cost_type: COST_TYPE_LLM_CALL.to_string(),
                amount: total_cost,
                description: cost_description,
            }),
        }
    }
}

/// Accepts executions, persists them as pending and runs them on a bounded
/// pool of background tasks. Submissions beyond the pool size wait for a
/// permit; nothing is rejected.
#[derive(Clone)]
pub struct ExecutionCoordinator {
    catalog: Arc<dyn CatalogRepository>,
    executions: Arc<dyn ExecutionRepository>,
    llm: Arc<LlmGateway>,
    tools: ToolExecutor,
    permits: Arc<Semaphore>,
    registry: Registry,
}

impl ExecutionCoordinator {
    pub fn new(
        catalog: Arc<dyn CatalogRepository>,
        executions: Arc<dyn ExecutionRepository>,
        llm: Arc<LlmGateway>,
        tools: ToolExecutor,
        max_concurrent: usize,
    ) -> Self {
        Self {
            catalog,
            executions,
            llm,
            tools,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            registry: Registry::default(),
        }
    }

    /// Stores a pending execution and hands it to the pool. Returns as soon as
    /// the row exists; the run itself happens in the background.
    pub async fn submit(
        &self,
        kind: ExecutionKind,
        target_id: i64,
        input_data: Value,
        user_id: i64,
    ) -> Result<i64, CoordinatorError> {
        let execution = self
            .executions
            .create_execution(kind, target_id, input_data, user_id)
            .await?;
        let execution_id = execution.id;
        let cancel = self.registry.insert(execution_id, kind, target_id, user_id);
        info!(execution_id, %kind, target_id, user_id, "execution submitted");

        let coordinator = self.clone();
        tokio::spawn(async move {
            match coordinator.permits.clone().acquire_owned().await {
                Ok(_permit) => coordinator.run_in_background(execution_id, cancel).await,
                Err(err) => error!(execution_id, ?err, "worker pool closed; execution not started"),
            }
            coordinator.registry.remove(execution_id);
        });

        Ok(execution_id)
    }

    /// Marks the execution cancelled and signals its runner. A runner that
    /// finishes afterwards cannot overwrite the cancelled status.
    pub async fn cancel(&self, execution_id: i64) -> Result<bool, CoordinatorError> {
        let repo = self.executions.clone();
        let cancelled = retry_with_backoff(execution_id, "cancel_execution", || {
            let repo = repo.clone();
            async move { repo.cancel_execution(execution_id).await }
        })
        .await?;

        if cancelled {
            let signalled = self.registry.signal_cancel(execution_id);
            info!(execution_id, signalled, "execution cancelled");
        }
        Ok(cancelled)
    }

    pub fn in_flight(&self) -> Vec<InFlightExecution> {
        self.registry.snapshot()
    }

    async fn run_in_background(&self, execution_id: i64, cancel: Arc<AtomicBool>) {
        let scope = ExecutionScope::new(
            execution_id,
            self.catalog.clone(),
            self.executions.clone(),
            cancel,
        );

        if let Err(err) = self.drive(&scope).await {
            error!(
                execution_id,
                operation = err.operation(),
                attempts = err.attempts(),
                error = %err,
                "execution aborted by persistence failure"
            );
            if let Err(fail_err) = scope
                .executions()
                .fail_execution(execution_id, err.to_string())
                .await
            {
                error!(execution_id, ?fail_err, "could not mark execution failed");
            }
        }
    }

    async fn drive(&self, scope: &ExecutionScope) -> Result<(), CoordinatorError> {
        let execution_id = scope.execution_id;
        let repo = scope.executions();

        let execution = retry_with_backoff(execution_id, "find_execution", || {
            let repo = repo.clone();
            async move { repo.find_execution(execution_id).await }
        })
        .await?;
        let Some(execution) = execution else {
            warn!(execution_id, "execution row missing; nothing to run");
            return Ok(());
        };

        let started = retry_with_backoff(execution_id, "mark_running", || {
            let repo = repo.clone();
            async move { repo.mark_running(execution_id).await }
        })
        .await?;
        if !started {
            info!(
                execution_id,
                status = execution.status.as_str(),
                "execution no longer pending; skipping"
            );
            return Ok(());
        }
        self.registry.mark_started(execution_id);

        let Some(target) = load_target(scope, execution.execution_type, execution.target_id).await?
        else {
            let message = match execution.execution_type {
                ExecutionKind::Agent => "Agent not found",
                ExecutionKind::Workflow => "Workflow not found",
            };
            warn!(
                execution_id,
                target_id = execution.target_id,
                error = message,
                "execution target missing"
            );
            retry_with_backoff(execution_id, "fail_execution", || {
                let repo = repo.clone();
                async move { repo.fail_execution(execution_id, message.to_string()).await }
            })
            .await?;
            return Ok(());
        };

        let cost_description = target.cost_description();
        let report = self.invoke(scope, target, execution.input_data).await;
        let outcome = report.into_outcome(execution.created_by, cost_description);
        let status = outcome.status;

        let applied = retry_with_backoff(execution_id, "complete_execution", || {
            let repo = repo.clone();
            let outcome = outcome.clone();
            async move { repo.complete_execution(execution_id, outcome).await }
        })
        .await?;

        if applied {
            info!(
                execution_id,
                status = status.as_str(),
                steps = outcome.steps.len(),
                cost = outcome.cost.as_ref().map(|c| c.amount).unwrap_or(0.0),
                "execution finished"
            );
        } else {
            warn!(
                execution_id,
                status = status.as_str(),
                "execution already terminal; discarding runner result"
            );
            // The model calls were still made, so the ledger keeps their cost.
            if let Some(cost) = outcome.cost.filter(|c| c.amount > 0.0) {
                let amount = cost.amount;
                retry_with_backoff(execution_id, "record_cost", || {
                    let repo = repo.clone();
                    let cost = cost.clone();
                    async move { repo.record_cost(execution_id, cost).await }
                })
                .await?;
                info!(execution_id, cost = amount, "cost of discarded run recorded");
            }
        }
        Ok(())
    }

    /// Runs the target on its own task so a panic surfaces as a failed run
    /// instead of tearing down the worker.
    async fn invoke(&self, scope: &ExecutionScope, target: Target, input_data: Value) -> RunReport {
        let started = Instant::now();
        let ctx = scope.run_context();
        let agents = Arc::new(AgentRunner::new(
            scope.catalog(),
            self.llm.clone(),
            self.tools.clone(),
        ));
        let workflows = WorkflowRunner::new(scope.catalog(), agents.clone(), self.tools.clone());

        let handle = tokio::spawn(async move {
            match target {
                Target::Agent(agent) => RunReport::from(agents.run(&agent, &input_data, &ctx).await),
                Target::Workflow(workflow) => {
                    RunReport::from(workflows.run(&workflow, &input_data, &ctx).await)
                }
            }
        });

        match handle.await {
            Ok(report) => report,
            Err(err) => {
                let message = panic_message(err);
                error!(execution_id = scope.execution_id, error = %message, "runner crashed");
                RunReport::crashed(message, round_to(started.elapsed().as_secs_f64(), 3))
            }
        }
    }
}

async fn load_target(
    scope: &ExecutionScope,
    kind: ExecutionKind,
    target_id: i64,
) -> Result<Option<Target>, CoordinatorError> {
    let catalog = scope.catalog();
    match kind {
        ExecutionKind::Agent => {
            let agent = retry_with_backoff(scope.execution_id, "find_agent", || {
                let catalog = catalog.clone();
                async move { catalog.find_agent(target_id).await }
            })
            .await?;
            Ok(agent.map(Target::Agent))
        }
        ExecutionKind::Workflow => {
            let workflow = retry_with_backoff(scope.execution_id, "find_workflow", || {
                let catalog = catalog.clone();
                async move { catalog.find_workflow(target_id).await }
            })
            .await?;
            Ok(workflow.map(Target::Workflow))
        }
    }
}

fn panic_message(err: JoinError) -> String {
    if err.is_cancelled() {
        return "Execution task was cancelled".to_string();
    }
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Execution panicked".to_string()),
        Err(err) => err.to_string(),
    }
}

async fn retry_with_backoff<T, Fut, F>(
    execution_id: i64,
    operation: &'static str,
    mut op: F,
) -> Result<T, CoordinatorError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0usize;
    let mut backoff = PERSISTENCE_INITIAL_BACKOFF;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < PERSISTENCE_MAX_ATTEMPTS => {
                warn!(
                    execution_id,
                    operation,
                    attempt,
                    ?err,
                    "coordinator persistence operation failed; retrying"
                );
                sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
            }
            Err(err) => {
                error!(
                    execution_id,
                    operation,
                    attempt,
                    ?err,
                    "coordinator persistence operation exhausted retries"
                );
                return Err(CoordinatorError::Persistence {
                    execution_id,
                    operation,
                    attempts: attempt,
                    source: err,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::execution_repository::MockExecutionRepository;
    use crate::db::mock_db::{MockCatalog, MockExecutions};
    use crate::engine::llm::testing::test_model;
    use crate::models::execution::Execution;
    use crate::models::prompt::Prompt;
    use crate::models::workflow::{
        WorkflowConnection, WorkflowNode, NODE_AGENT, NODE_END, NODE_START,
    };
    use serde_json::json;
    use time::OffsetDateTime;

    const USER: i64 = 42;
    // 75 mock tokens at 0.0002 per token.
    const COST_PER_RUN: f64 = 0.015;

    fn seeded_catalog() -> Arc<MockCatalog> {
        let catalog = MockCatalog::default();
        let mut model = test_model("azure_openai", 0.0002);
        model.id = 10;
        catalog.insert_model(model);
        catalog.insert_prompt(Prompt {
            id: 20,
            name: "qa".into(),
            description: None,
            template: "Answer: {question}".into(),
            input_schema: None,
            output_schema: None,
            version: 1,
            is_active: true,
        });
        catalog.insert_agent(Agent {
            id: 1,
            name: "helper".into(),
            description: None,
            model_id: 10,
            prompt_id: 20,
            parameters: json!({}),
            memory_config: None,
            is_active: true,
            tools: vec![],
        });
        catalog.insert_workflow(Workflow {
            id: 5,
            name: "pipeline".into(),
            description: None,
            definition: json!({}),
            is_active: true,
            nodes: vec![
                WorkflowNode::new("start", NODE_START, json!({})),
                WorkflowNode::new("ask", NODE_AGENT, json!({"agent_id": 1})),
                WorkflowNode::new("end", NODE_END, json!({})),
            ],
            connections: vec![
                WorkflowConnection::new("start", "ask"),
                WorkflowConnection::new("ask", "end"),
            ],
        });
        Arc::new(catalog)
    }

    fn coordinator(
        catalog: Arc<dyn CatalogRepository>,
        executions: Arc<dyn ExecutionRepository>,
        max_concurrent: usize,
    ) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            catalog,
            executions,
            Arc::new(LlmGateway::mock()),
            ToolExecutor::new(std::env::temp_dir().join("agentflow-worker-tests")),
            max_concurrent,
        )
    }

    async fn wait_until_idle(coordinator: &ExecutionCoordinator) {
        for _ in 0..500 {
            if coordinator.registry.is_empty() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("executions did not finish: {:?}", coordinator.in_flight());
    }

    async fn stored(executions: &MockExecutions, id: i64) -> Execution {
        executions.find_execution(id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn agent_execution_persists_outcome_steps_and_cost() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 2);

        let id = coordinator
            .submit(ExecutionKind::Agent, 1, json!({"question": "why?"}), USER)
            .await
            .unwrap();
        wait_until_idle(&coordinator).await;

        let execution = stored(&executions, id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.progress, 1.0);
        assert!(execution.started_at.is_some());
        assert!(execution.completed_at.is_some());

        let steps = executions.list_steps(id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].step_type, "llm_call");
        assert_eq!(steps[0].step_order, 1);

        let costs = executions.costs.lock().unwrap();
        assert_eq!(costs.len(), 1);
        assert_eq!(costs[0].amount, COST_PER_RUN);
        assert_eq!(costs[0].execution_id, Some(id));
        assert_eq!(costs[0].description.as_deref(), Some("Agent execution: helper"));
    }

    #[tokio::test]
    async fn ledger_sum_matches_number_of_runs() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 3);

        for i in 0..8 {
            coordinator
                .submit(ExecutionKind::Agent, 1, json!({"question": i}), USER)
                .await
                .unwrap();
        }
        wait_until_idle(&coordinator).await;

        let total = executions.total_cost_for_user(USER).await.unwrap();
        assert!((round_to(total, 5) - 8.0 * COST_PER_RUN).abs() < 1e-9, "total = {total}");
        let breakdown = executions.cost_breakdown_for_user(USER).await.unwrap();
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].cost_type, COST_TYPE_LLM_CALL);
    }

    #[tokio::test]
    async fn workflow_execution_records_node_trace() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 1);

        let id = coordinator
            .submit(ExecutionKind::Workflow, 5, json!({"question": "route"}), USER)
            .await
            .unwrap();
        wait_until_idle(&coordinator).await;

        let execution = stored(&executions, id).await;
        assert_eq!(execution.status, ExecutionStatus::Completed, "{:?}", execution.error_message);
        let names: Vec<_> = executions
            .list_steps(id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.step_name)
            .collect();
        assert_eq!(names, vec!["start", "ask", "end"]);
        assert!(execution.output_data.unwrap().get("end").is_some());
        let costs = executions.costs.lock().unwrap();
        assert_eq!(costs[0].description.as_deref(), Some("Workflow execution: pipeline"));
    }

    #[tokio::test]
    async fn missing_target_fails_without_running() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 1);

        let agent_id = coordinator
            .submit(ExecutionKind::Agent, 999, json!({}), USER)
            .await
            .unwrap();
        let workflow_id = coordinator
            .submit(ExecutionKind::Workflow, 999, json!({}), USER)
            .await
            .unwrap();
        wait_until_idle(&coordinator).await;

        let agent_run = stored(&executions, agent_id).await;
        assert_eq!(agent_run.status, ExecutionStatus::Failed);
        assert_eq!(agent_run.error_message.as_deref(), Some("Agent not found"));
        let workflow_run = stored(&executions, workflow_id).await;
        assert_eq!(workflow_run.error_message.as_deref(), Some("Workflow not found"));
        assert!(executions.steps.lock().unwrap().is_empty());
        assert!(executions.costs.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_runs_still_finish_and_release_the_slot() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 1);

        // The template needs `question`; both runs fail and the second still gets a slot.
        let first = coordinator
            .submit(ExecutionKind::Agent, 1, json!({}), USER)
            .await
            .unwrap();
        let second = coordinator
            .submit(ExecutionKind::Agent, 1, json!({}), USER)
            .await
            .unwrap();
        wait_until_idle(&coordinator).await;

        for id in [first, second] {
            let execution = stored(&executions, id).await;
            assert_eq!(execution.status, ExecutionStatus::Failed);
            assert_eq!(
                execution.error_message.as_deref(),
                Some("Missing required input parameter: question")
            );
            assert_eq!(execution.progress, 1.0);
        }
    }

    #[tokio::test]
    async fn terminal_status_is_written_once_under_concurrent_load() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 2);

        let mut submitted = Vec::new();
        for i in 0..20 {
            let id = coordinator
                .submit(ExecutionKind::Agent, 1, json!({"question": i}), USER)
                .await
                .unwrap();
            let cancelled = if i % 2 == 0 {
                coordinator.cancel(id).await.unwrap()
            } else {
                false
            };
            submitted.push((id, cancelled));
        }
        wait_until_idle(&coordinator).await;

        let first_pass: Vec<Execution> = {
            let mut rows = Vec::new();
            for (id, _) in &submitted {
                rows.push(stored(&executions, *id).await);
            }
            rows
        };
        sleep(Duration::from_millis(50)).await;

        for ((id, cancelled), before) in submitted.iter().zip(first_pass) {
            let after = stored(&executions, *id).await;
            assert!(after.status.is_terminal());
            assert_eq!(after.status, before.status);
            assert_eq!(after.completed_at, before.completed_at);
            if *cancelled {
                assert_eq!(after.status, ExecutionStatus::Cancelled);
                assert!(executions.list_steps(*id).await.unwrap().is_empty());
            } else {
                assert_eq!(after.status, ExecutionStatus::Completed);
            }
        }

        // Runs cancelled mid-flight keep their cost; none is billed twice.
        let costs = executions.costs.lock().unwrap();
        for (id, cancelled) in &submitted {
            let rows = costs.iter().filter(|c| c.execution_id == Some(*id)).count();
            if *cancelled {
                assert!(rows <= 1, "execution {id} billed {rows} times");
            } else {
                assert_eq!(rows, 1, "execution {id} billed {rows} times");
            }
        }
    }

    #[tokio::test]
    async fn cancel_of_finished_execution_is_refused() {
        let executions = Arc::new(MockExecutions::default());
        let coordinator = coordinator(seeded_catalog(), executions.clone(), 1);

        let id = coordinator
            .submit(ExecutionKind::Agent, 1, json!({"question": "q"}), USER)
            .await
            .unwrap();
        wait_until_idle(&coordinator).await;

        assert!(!coordinator.cancel(id).await.unwrap());
        assert_eq!(stored(&executions, id).await.status, ExecutionStatus::Completed);
        assert!(coordinator.in_flight().is_empty());
    }

    fn running_execution(id: i64) -> Execution {
        Execution {
            id,
            execution_type: ExecutionKind::Agent,
            target_id: 1,
            status: ExecutionStatus::Pending,
            input_data: json!({"question": "q"}),
            output_data: None,
            error_message: None,
            progress: 0.0,
            duration_seconds: None,
            created_by: USER,
            created_at: OffsetDateTime::now_utc(),
            started_at: None,
            completed_at: None,
        }
    }

    fn scope_for(
        coordinator: &ExecutionCoordinator,
        execution_id: i64,
    ) -> ExecutionScope {
        ExecutionScope::new(
            execution_id,
            coordinator.catalog.clone(),
            coordinator.executions.clone(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn find_execution_failure_bubbles_after_retries() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_find_execution()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_| Err(sqlx::Error::RowNotFound));

        let coordinator = coordinator(seeded_catalog(), Arc::new(repo), 1);
        let err = coordinator
            .drive(&scope_for(&coordinator, 9))
            .await
            .expect_err("should bubble error");

        assert_eq!(err.operation(), Some("find_execution"));
        assert_eq!(err.attempts(), PERSISTENCE_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn complete_execution_failure_bubbles_after_retries() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_find_execution()
            .returning(|id| Ok(Some(running_execution(id))));
        repo.expect_mark_running().returning(|_| Ok(true));
        repo.expect_update_progress().returning(|_, _| Ok(()));
        repo.expect_complete_execution()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_, _| Err(sqlx::Error::PoolTimedOut));

        let coordinator = coordinator(seeded_catalog(), Arc::new(repo), 1);
        let err = coordinator
            .drive(&scope_for(&coordinator, 3))
            .await
            .expect_err("should bubble error");

        assert_eq!(err.operation(), Some("complete_execution"));
        assert_eq!(err.attempts(), PERSISTENCE_MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn cancelled_mid_run_still_records_cost() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_find_execution()
            .returning(|id| Ok(Some(running_execution(id))));
        repo.expect_mark_running().returning(|_| Ok(true));
        repo.expect_update_progress().returning(|_, _| Ok(()));
        // Cancelled while the model call was in flight.
        repo.expect_complete_execution()
            .times(1)
            .returning(|_, _| Ok(false));
        repo.expect_record_cost()
            .times(1)
            .withf(|id, cost| {
                *id == 6
                    && cost.user_id == USER
                    && cost.amount == COST_PER_RUN
                    && cost.description == "Agent execution: helper"
            })
            .returning(|_, _| Ok(()));

        let coordinator = coordinator(seeded_catalog(), Arc::new(repo), 1);
        coordinator
            .drive(&scope_for(&coordinator, 6))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn discarded_free_run_records_nothing() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_find_execution().returning(|id| {
            let mut execution = running_execution(id);
            execution.input_data = json!({});
            Ok(Some(execution))
        });
        repo.expect_mark_running().returning(|_| Ok(true));
        repo.expect_update_progress().returning(|_, _| Ok(()));
        repo.expect_complete_execution().returning(|_, _| Ok(false));
        repo.expect_record_cost().never();

        let coordinator = coordinator(seeded_catalog(), Arc::new(repo), 1);
        coordinator
            .drive(&scope_for(&coordinator, 7))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn exhausted_persistence_marks_execution_failed() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_find_execution()
            .times(PERSISTENCE_MAX_ATTEMPTS)
            .returning(|_| Err(sqlx::Error::PoolTimedOut));
        repo.expect_fail_execution()
            .times(1)
            .withf(|id, message| *id == 4 && message.contains("`find_execution`"))
            .returning(|_, _| Ok(true));

        let coordinator = coordinator(seeded_catalog(), Arc::new(repo), 1);
        coordinator
            .run_in_background(4, Arc::new(AtomicBool::new(false)))
            .await;
    }

    #[test]
    fn outcome_skips_cost_row_for_free_runs() {
        let report = RunReport::crashed("boom".into(), 0.1);
        let outcome = report.into_outcome(USER, "Agent execution: x".into());
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.cost.is_none());
        assert_eq!(outcome.error_message.as_deref(), Some("boom"));
    }
}
