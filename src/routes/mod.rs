pub mod admin_sql;
pub mod executions;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let execution_routes = Router::new()
        .route("/agent/{agent_id}", post(executions::submit_agent_execution))
        .route(
            "/workflow/{workflow_id}",
            post(executions::submit_workflow_execution),
        )
        .route("/running", get(executions::list_running_executions))
        .route("/{execution_id}/status", get(executions::get_execution_status))
        .route("/{execution_id}/cancel", post(executions::cancel_execution));

    let admin_sql_routes = Router::new()
        .route("/", post(admin_sql::execute_sql))
        .route("/analyze", post(admin_sql::analyze_sql))
        .route("/validate", post(admin_sql::validate_sql))
        .route("/export", post(admin_sql::export_sql))
        .route("/schema", get(admin_sql::database_schema));

    Router::new()
        .nest("/api/executions", execution_routes)
        .route("/api/costs/user", get(executions::get_user_costs))
        .nest("/api/admin/sql", admin_sql_routes)
        .with_state(state)
}
