use std::sync::Arc;

use agentflow_backend::config::Config;
use agentflow_backend::db::{
    establish_connection, schema, sqlite_catalog_repository::SqliteCatalogRepository,
    sqlite_execution_repository::SqliteExecutionRepository,
};
use agentflow_backend::db::{
    catalog_repository::CatalogRepository, execution_repository::ExecutionRepository,
};
use agentflow_backend::engine::llm::LlmGateway;
use agentflow_backend::engine::tools::ToolExecutor;
use agentflow_backend::routes::router;
use agentflow_backend::sql_gateway::SqlGateway;
use agentflow_backend::worker::ExecutionCoordinator;
use agentflow_backend::AppState;
use anyhow::Context;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter);
    if config.log_json {
        tracing::subscriber::set_global_default(subscriber.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(subscriber.finish())?;
    }

    let worker_id = uuid::Uuid::new_v4();
    let max_connections = u32::try_from(config.max_concurrent_executions)
        .unwrap_or(u32::MAX)
        .saturating_mul(2)
        .max(5);

    let pool = establish_connection(&config.database_url, max_connections)
        .await
        .with_context(|| format!("failed to connect to {}", config.database_url))?;
    schema::bootstrap(&pool)
        .await
        .context("failed to bootstrap schema")?;

    let catalog = Arc::new(SqliteCatalogRepository { pool: pool.clone() }) as Arc<dyn CatalogRepository>;
    let executions =
        Arc::new(SqliteExecutionRepository { pool: pool.clone() }) as Arc<dyn ExecutionRepository>;

    let llm = Arc::new(LlmGateway::from_config(&config).context("failed to build LLM gateway")?);
    tokio::fs::create_dir_all(&config.tool_sandbox_dir)
        .await
        .with_context(|| format!("failed to create {}", config.tool_sandbox_dir.display()))?;
    let tools = ToolExecutor::new(config.tool_sandbox_dir.clone());

    let coordinator = ExecutionCoordinator::new(
        catalog,
        executions.clone(),
        llm,
        tools,
        config.max_concurrent_executions,
    );

    if config.admin_api_token.is_none() {
        warn!("ADMIN_API_TOKEN not set; admin SQL routes are open");
    }

    let server_addr = config.server_addr;
    let state = AppState {
        executions,
        coordinator,
        sql_gateway: SqlGateway::new(pool),
        config: Arc::new(config),
    };

    let app = router(state).layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("failed to bind {server_addr}"))?;
    info!(%worker_id, %server_addr, "agentflow backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(%worker_id, "server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(?err, "failed to listen for shutdown signal");
    }
}
