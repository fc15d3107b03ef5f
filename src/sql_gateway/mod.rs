pub mod analysis;

use std::time::Instant;

use serde::Serialize;
use serde_json::{json, Map, Value};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Executor, Row, Sqlite, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::engine::round_to;
use analysis::{analyze, scan, QueryAnalysis, RiskLevel};

pub const DEFAULT_PER_PAGE: u32 = 100;
pub const MAX_PER_PAGE: u32 = 10_000;

#[derive(Debug, Error)]
pub enum SqlGatewayError {
    /// Refused before touching the database. A caller holding the right
    /// privilege may retry with `allow_dangerous` when the risk is not critical.
    #[error("{message}")]
    Security {
        message: String,
        warnings: Vec<String>,
        analysis: Box<QueryAnalysis>,
    },
    #[error("{message}")]
    Invalid { message: String },
    #[error("Table \"{0}\" not found")]
    TableNotFound(String),
    #[error("{message}")]
    Database { message: String },
    #[error("{message}")]
    Connection { message: String },
}

impl From<sqlx::Error> for SqlGatewayError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => SqlGatewayError::Database {
                message: format!("Database error: {db}"),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                SqlGatewayError::Connection {
                    message: format!("Database connection failed: {err}"),
                }
            }
            other => SqlGatewayError::Database {
                message: format!("Execution error: {other}"),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    pub page: u32,
    pub per_page: u32,
    pub execution_time: f64,
    pub query_type: &'static str,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_pages: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WriteResult {
    pub rows_affected: u64,
    pub execution_time: f64,
    pub query_type: &'static str,
    pub command: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SqlOutcome {
    Read(ReadResult),
    Write(WriteResult),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Validation {
    pub valid: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaObject {
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub sql: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TableInfo {
    Overview {
        tables: Vec<SchemaObject>,
        views: Vec<SchemaObject>,
        total_tables: usize,
        total_views: usize,
    },
    Detail {
        table_name: String,
        create_sql: Option<String>,
        columns: Vec<Map<String, Value>>,
        indexes: Vec<Map<String, Value>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    pub fn parse(format: &str) -> Result<Self, SqlGatewayError> {
        match format.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            _ => Err(SqlGatewayError::Invalid {
                message: "Unsupported export format. Use csv or json.".into(),
            }),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

/// A rendered export. `truncated` is set when the query matched more rows
/// than a single export carries.
#[derive(Debug, Clone)]
pub struct Export {
    pub format: ExportFormat,
    pub content: String,
    pub row_count: usize,
    pub truncated: bool,
}

/// Guarded ad-hoc SQL for operators. Every call checks out its own pooled
/// connection, which returns to the pool on every exit path.
#[derive(Clone)]
pub struct SqlGateway {
    pool: SqlitePool,
}

impl SqlGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn analyze(&self, query: &str) -> QueryAnalysis {
        analyze(query)
    }

    pub async fn execute(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        allow_dangerous: bool,
    ) -> Result<SqlOutcome, SqlGatewayError> {
        let started = Instant::now();
        if query.trim().is_empty() {
            return Err(SqlGatewayError::Invalid {
                message: "Empty query provided".into(),
            });
        }

        let analysis = analyze(query);
        check_policy(&analysis, allow_dangerous)?;

        let page = page.max(1);
        let per_page = per_page.clamp(1, MAX_PER_PAGE);

        let outcome = if analysis.is_read_only {
            self.execute_read(query, page, per_page, &analysis, started)
                .await
                .map(SqlOutcome::Read)
        } else if analysis.is_write || analysis.is_ddl {
            self.execute_write(query, &analysis, started)
                .await
                .map(SqlOutcome::Write)
        } else {
            Err(SqlGatewayError::Invalid {
                message: format!("Unsupported command: {}", analysis.command),
            })
        };

        match &outcome {
            Ok(_) => info!(
                command = %analysis.command,
                risk = ?analysis.estimated_risk,
                allow_dangerous,
                execution_time = round_to(started.elapsed().as_secs_f64(), 3),
                "admin sql executed"
            ),
            Err(err) => warn!(command = %analysis.command, error = %err, "admin sql failed"),
        }
        outcome
    }

    async fn execute_read(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
        analysis: &QueryAnalysis,
        started: Instant,
    ) -> Result<ReadResult, SqlGatewayError> {
        let mut conn = self.pool.acquire().await?;
        let scanned = scan(query);

        let (sql, total_count) = if analysis.command == "SELECT" {
            let base = scanned.without_trailing_limit(query);
            let total_count = count_rows(&mut conn, base).await;
            let offset = (page as u64 - 1) * per_page as u64;
            (format!("{base} LIMIT {per_page} OFFSET {offset}"), total_count)
        } else {
            (scanned.statement_body(query).to_string(), None)
        };

        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        let columns: Vec<String> = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => describe_columns(&mut conn, &sql).await,
        };
        let rows: Vec<Map<String, Value>> = rows.iter().map(row_to_map).collect();

        let (total_pages, has_more) = match total_count {
            Some(total) => {
                let per_page = per_page as i64;
                (
                    Some((total + per_page - 1) / per_page),
                    Some((page as i64) * per_page < total),
                )
            }
            None => (None, None),
        };

        Ok(ReadResult {
            columns,
            row_count: rows.len(),
            rows,
            page,
            per_page,
            execution_time: round_to(started.elapsed().as_secs_f64(), 3),
            query_type: "READ",
            command: analysis.command.clone(),
            total_count,
            total_pages,
            has_more,
            warnings: analysis.warnings.clone(),
        })
    }

    async fn execute_write(
        &self,
        query: &str,
        analysis: &QueryAnalysis,
        started: Instant,
    ) -> Result<WriteResult, SqlGatewayError> {
        let sql = scan(query).statement_body(query).to_string();
        let mut tx = self.pool.begin().await?;

        let rows_affected = match sqlx::query(&sql).execute(&mut *tx).await {
            Ok(result) => result.rows_affected(),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(?rollback_err, "rollback after failed admin sql failed");
                }
                return Err(err.into());
            }
        };
        tx.commit().await?;

        Ok(WriteResult {
            rows_affected,
            execution_time: round_to(started.elapsed().as_secs_f64(), 3),
            query_type: if analysis.is_write { "WRITE" } else { "DDL" },
            command: analysis.command.clone(),
            message: format!("Query executed successfully. {rows_affected} rows affected."),
            warnings: analysis.warnings.clone(),
        })
    }

    /// Runs a read query under the same policy as [`SqlGateway::execute`]
    /// without approval for dangerous statements, and renders up to
    /// [`MAX_PER_PAGE`] rows.
    pub async fn export(&self, query: &str, format: ExportFormat) -> Result<Export, SqlGatewayError> {
        if query.trim().is_empty() {
            return Err(SqlGatewayError::Invalid {
                message: "Empty query provided".into(),
            });
        }
        let analysis = analyze(query);
        check_policy(&analysis, false)?;
        let not_exportable = || SqlGatewayError::Invalid {
            message: "Only read queries can be exported".into(),
        };
        if !analysis.is_read_only {
            return Err(not_exportable());
        }

        let result = match self.execute(query, 1, MAX_PER_PAGE, false).await? {
            SqlOutcome::Read(result) => result,
            SqlOutcome::Write(_) => return Err(not_exportable()),
        };
        let truncated = result.has_more == Some(true);
        if truncated {
            warn!(
                total_count = ?result.total_count,
                exported = result.row_count,
                "admin sql export truncated"
            );
        }

        let content = match format {
            ExportFormat::Csv => to_csv(&result.columns, &result.rows),
            ExportFormat::Json => {
                let document = json!({
                    "query": query,
                    "exported_at": OffsetDateTime::now_utc().format(&Rfc3339).ok(),
                    "columns": result.columns,
                    "rows": result.rows,
                    "row_count": result.row_count,
                });
                serde_json::to_string_pretty(&document).map_err(|err| {
                    SqlGatewayError::Invalid {
                        message: format!("Export failed: {err}"),
                    }
                })?
            }
        };

        Ok(Export {
            format,
            content,
            row_count: result.row_count,
            truncated,
        })
    }

    /// Compiles the query with `EXPLAIN` without running it.
    pub async fn validate(&self, query: &str) -> Result<Validation, SqlGatewayError> {
        if query.trim().is_empty() {
            return Err(SqlGatewayError::Invalid {
                message: "Empty query provided".into(),
            });
        }
        let scanned = scan(query);
        if scanned.has_multiple_statements {
            let analysis = analyze(query);
            return Err(SqlGatewayError::Security {
                message: "Multiple statements not allowed for security".into(),
                warnings: analysis.warnings.clone(),
                analysis: Box::new(analysis),
            });
        }

        let mut conn = self.pool.acquire().await?;
        let explain = format!("EXPLAIN {}", scanned.statement_body(query));
        match sqlx::query(&explain).fetch_all(&mut *conn).await {
            Ok(_) => Ok(Validation {
                valid: true,
                message: "Query syntax is valid",
                error: None,
            }),
            Err(sqlx::Error::Database(db)) => Ok(Validation {
                valid: false,
                message: "Query syntax is invalid",
                error: Some(db.to_string()),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists tables and views, or describes one table.
    pub async fn table_info(&self, table: Option<&str>) -> Result<TableInfo, SqlGatewayError> {
        let mut conn = self.pool.acquire().await?;

        let Some(table) = table else {
            let objects: Vec<(String, String, Option<String>)> = sqlx::query_as(
                "SELECT name, type, sql FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY type, name",
            )
            .fetch_all(&mut *conn)
            .await?;

            let mut tables = Vec::new();
            let mut views = Vec::new();
            for (name, object_type, sql) in objects {
                if object_type == "table" {
                    let count_sql = format!("SELECT COUNT(*) FROM {}", quote_ident(&name));
                    let row_count = sqlx::query_scalar::<_, i64>(&count_sql)
                        .fetch_one(&mut *conn)
                        .await
                        .unwrap_or(0);
                    tables.push(SchemaObject {
                        name,
                        object_type,
                        sql,
                        row_count: Some(row_count),
                    });
                } else {
                    views.push(SchemaObject {
                        name,
                        object_type,
                        sql,
                        row_count: None,
                    });
                }
            }
            return Ok(TableInfo::Overview {
                total_tables: tables.len(),
                total_views: views.len(),
                tables,
                views,
            });
        };

        if !is_plain_identifier(table) {
            return Err(SqlGatewayError::Invalid {
                message: format!("Invalid table name: {table}"),
            });
        }

        let create_sql: Option<(Option<String>,)> =
            sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(table)
                .fetch_optional(&mut *conn)
                .await?;
        let Some((create_sql,)) = create_sql else {
            return Err(SqlGatewayError::TableNotFound(table.to_string()));
        };

        let columns = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
            .fetch_all(&mut *conn)
            .await?;
        let indexes = sqlx::query(&format!("PRAGMA index_list({})", quote_ident(table)))
            .fetch_all(&mut *conn)
            .await?;

        Ok(TableInfo::Detail {
            table_name: table.to_string(),
            create_sql,
            columns: columns.iter().map(row_to_map).collect(),
            indexes: indexes.iter().map(row_to_map).collect(),
        })
    }
}

/// Refusal rules in precedence order: stacked statements, critical patterns,
/// then dangerous commands without approval.
fn check_policy(analysis: &QueryAnalysis, allow_dangerous: bool) -> Result<(), SqlGatewayError> {
    let message = if analysis.is_multi_statement {
        "Multiple statements not allowed for security"
    } else if analysis.estimated_risk == RiskLevel::Critical {
        "Query blocked due to security concerns"
    } else if analysis.is_dangerous && !allow_dangerous {
        "Dangerous query blocked. Admin approval required."
    } else {
        return Ok(());
    };

    warn!(
        command = %analysis.command,
        risk = ?analysis.estimated_risk,
        warnings = ?analysis.warnings,
        "admin sql refused"
    );
    Err(SqlGatewayError::Security {
        message: message.to_string(),
        warnings: analysis.warnings.clone(),
        analysis: Box::new(analysis.clone()),
    })
}

/// Total rows the unpaginated query would return. A count that cannot be
/// computed leaves the page without totals instead of failing it.
async fn count_rows(conn: &mut PoolConnection<Sqlite>, base: &str) -> Option<i64> {
    let count_sql = format!("SELECT COUNT(*) FROM ({base}) AS count_subquery");
    match sqlx::query_scalar::<_, i64>(&count_sql)
        .fetch_one(&mut **conn)
        .await
    {
        Ok(count) => Some(count),
        Err(err) => {
            debug!(?err, "row count unavailable; returning page without totals");
            None
        }
    }
}

/// Result column names from the prepared statement, for pages with no rows.
async fn describe_columns(conn: &mut PoolConnection<Sqlite>, sql: &str) -> Vec<String> {
    match (&mut **conn).describe(sql).await {
        Ok(described) => described
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect(),
        Err(err) => {
            debug!(?err, "column names unavailable for empty page");
            Vec::new()
        }
    }
}

fn to_csv(columns: &[String], rows: &[Map<String, Value>]) -> String {
    let mut out = String::new();
    push_csv_record(&mut out, columns.iter().map(String::as_str));
    for row in rows {
        let cells: Vec<String> = columns
            .iter()
            .map(|column| match row.get(column) {
                None | Some(Value::Null) => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        push_csv_record(&mut out, cells.iter().map(String::as_str));
    }
    out
}

fn push_csv_record<'a>(out: &mut String, fields: impl Iterator<Item = &'a str>) {
    for (index, field) in fields.enumerate() {
        if index > 0 {
            out.push(',');
        }
        if field.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

fn row_to_map(row: &SqliteRow) -> Map<String, Value> {
    let mut map = Map::new();
    for (index, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), cell_value(row, index));
    }
    map
}

fn cell_value(row: &SqliteRow, index: usize) -> Value {
    let Ok(raw) = row.try_get_raw(index) else {
        return Value::Null;
    };
    if raw.is_null() {
        return Value::Null;
    }
    let type_name = raw.type_info().name().to_string();
    match type_name.as_str() {
        "INTEGER" => row
            .try_get_unchecked::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get_unchecked::<f64, _>(index)
            .map(|f| json!(f))
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get_unchecked::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(format!("<binary data: {} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get_unchecked::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
