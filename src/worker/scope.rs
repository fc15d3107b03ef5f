use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::db::catalog_repository::CatalogRepository;
use crate::db::execution_repository::ExecutionRepository;
use crate::engine::context::{ProgressSink, RunContext};
use crate::engine::round_to;

/// Data-access handles and signals owned by one background execution.
/// Built once per task and passed down; runners never reach for shared state.
pub struct ExecutionScope {
    pub execution_id: i64,
    catalog: Arc<dyn CatalogRepository>,
    executions: Arc<dyn ExecutionRepository>,
    cancel: Arc<AtomicBool>,
}

impl ExecutionScope {
    pub fn new(
        execution_id: i64,
        catalog: Arc<dyn CatalogRepository>,
        executions: Arc<dyn ExecutionRepository>,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            execution_id,
            catalog,
            executions,
            cancel,
        }
    }

    pub fn catalog(&self) -> Arc<dyn CatalogRepository> {
        self.catalog.clone()
    }

    pub fn executions(&self) -> Arc<dyn ExecutionRepository> {
        self.executions.clone()
    }

    pub fn run_context(&self) -> RunContext {
        RunContext::new(
            self.cancel.clone(),
            Some(Arc::new(StoredProgress {
                execution_id: self.execution_id,
                executions: self.executions.clone(),
            })),
        )
    }
}

/// Writes progress onto the execution row. Failures are logged and dropped.
struct StoredProgress {
    execution_id: i64,
    executions: Arc<dyn ExecutionRepository>,
}

#[async_trait]
impl ProgressSink for StoredProgress {
    async fn report(&self, progress: f64) {
        let progress = round_to(progress, 3);
        if let Err(err) = self
            .executions
            .update_progress(self.execution_id, progress)
            .await
        {
            warn!(execution_id = self.execution_id, progress, ?err, "failed to store progress");
        }
    }
}
