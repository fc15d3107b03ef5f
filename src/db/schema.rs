use sqlx::SqlitePool;
use tracing::info;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS llm_models (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        provider TEXT NOT NULL,
        model_name TEXT NOT NULL,
        endpoint TEXT,
        parameters TEXT NOT NULL DEFAULT '{}',
        cost_per_token REAL NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS prompts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        description TEXT,
        template TEXT NOT NULL,
        input_schema TEXT,
        output_schema TEXT,
        version INTEGER NOT NULL DEFAULT 1,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tools (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        tool_type TEXT NOT NULL,
        implementation TEXT,
        parameters_schema TEXT,
        output_schema TEXT,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        model_id INTEGER NOT NULL REFERENCES llm_models(id),
        prompt_id INTEGER NOT NULL REFERENCES prompts(id),
        parameters TEXT NOT NULL DEFAULT '{}',
        memory_config TEXT,
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_tools (
        agent_id INTEGER NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
        tool_id INTEGER NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
        position INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (agent_id, tool_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflows (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        definition TEXT NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_nodes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        node_id TEXT NOT NULL,
        node_type TEXT NOT NULL,
        position_x REAL NOT NULL DEFAULT 0,
        position_y REAL NOT NULL DEFAULT 0,
        configuration TEXT NOT NULL DEFAULT '{}',
        UNIQUE (workflow_id, node_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS workflow_connections (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        workflow_id INTEGER NOT NULL REFERENCES workflows(id) ON DELETE CASCADE,
        source_node_id TEXT NOT NULL,
        target_node_id TEXT NOT NULL,
        source_handle TEXT,
        target_handle TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS executions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_type TEXT NOT NULL CHECK (execution_type IN ('agent', 'workflow')),
        target_id INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'running', 'completed', 'failed', 'cancelled')),
        input_data TEXT NOT NULL DEFAULT '{}',
        output_data TEXT,
        error_message TEXT,
        progress REAL NOT NULL DEFAULT 0,
        duration_seconds REAL,
        created_by INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        started_at TEXT,
        completed_at TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_steps (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        execution_id INTEGER NOT NULL REFERENCES executions(id) ON DELETE CASCADE,
        step_order INTEGER NOT NULL,
        step_type TEXT NOT NULL,
        step_name TEXT NOT NULL,
        status TEXT NOT NULL,
        input_data TEXT,
        output_data TEXT,
        error_message TEXT,
        duration_seconds REAL NOT NULL DEFAULT 0,
        started_at TEXT NOT NULL,
        completed_at TEXT,
        UNIQUE (execution_id, step_order)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS costs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        execution_id INTEGER REFERENCES executions(id),
        cost_type TEXT NOT NULL,
        amount REAL NOT NULL CHECK (amount >= 0),
        currency TEXT NOT NULL DEFAULT 'USD',
        description TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_costs_user_id ON costs (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_execution_steps_execution_id ON execution_steps (execution_id)",
];

/// `(name, description, parameters_schema)` for the tools the executor implements natively.
const BUILTIN_TOOLS: &[(&str, &str, &str)] = &[
    (
        "web_search",
        "Search the web for information",
        r#"{"type":"object","properties":{"query":{"type":"string"},"max_results":{"type":"integer","default":10}},"required":["query"]}"#,
    ),
    (
        "file_write",
        "Write content to a file in the tool sandbox",
        r#"{"type":"object","properties":{"filename":{"type":"string"},"content":{"type":"string"}},"required":["filename","content"]}"#,
    ),
    (
        "file_read",
        "Read content from a file in the tool sandbox",
        r#"{"type":"object","properties":{"filename":{"type":"string"}},"required":["filename"]}"#,
    ),
    (
        "calculator",
        "Evaluate an arithmetic expression",
        r#"{"type":"object","properties":{"expression":{"type":"string"}},"required":["expression"]}"#,
    ),
];

/// Creates missing tables and seeds the builtin tool rows. Safe to run on every start.
pub async fn bootstrap(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for &statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    for &(name, description, schema) in BUILTIN_TOOLS {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO tools (name, description, tool_type, parameters_schema)
            VALUES (?, ?, 'builtin', ?)
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(schema)
        .execute(pool)
        .await?;
    }

    info!(statements = SCHEMA.len(), "database schema ready");
    Ok(())
}
