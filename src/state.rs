use std::sync::Arc;

use crate::config::Config;
use crate::db::execution_repository::ExecutionRepository;
use crate::sql_gateway::SqlGateway;
use crate::worker::ExecutionCoordinator;

#[derive(Clone)]
pub struct AppState {
    pub executions: Arc<dyn ExecutionRepository>,
    pub coordinator: ExecutionCoordinator,
    pub sql_gateway: SqlGateway,
    pub config: Arc<Config>,
}
