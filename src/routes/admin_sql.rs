use axum::{
    extract::{rejection::JsonRejection, Json, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, warn};

use crate::extract::AdminAccess;
use crate::responses::JsonResponse;
use crate::sql_gateway::analysis::RiskLevel;
use crate::sql_gateway::{ExportFormat, SqlGatewayError, DEFAULT_PER_PAGE};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SqlBody {
    pub query: Option<String>,
    pub page: Option<u32>,
    #[serde(alias = "perPage")]
    pub per_page: Option<u32>,
    #[serde(default, alias = "allowDangerous")]
    pub allow_dangerous: bool,
    pub format: Option<String>,
}

#[derive(Deserialize)]
pub struct SchemaQuery {
    pub table: Option<String>,
}

#[derive(Serialize)]
struct Success<T: Serialize> {
    success: bool,
    #[serde(flatten)]
    body: T,
}

fn success<T: Serialize>(body: T) -> Response {
    Json(Success {
        success: true,
        body,
    })
    .into_response()
}

/// Pulls the query text out of the body, or answers 400.
fn require_query(body: Result<Json<SqlBody>, JsonRejection>) -> Result<SqlBody, Response> {
    match body {
        Ok(Json(body)) if body.query.as_deref().is_some_and(|q| !q.trim().is_empty()) => Ok(body),
        Ok(_) => Err(JsonResponse::bad_request("SQL query required").into_response()),
        Err(rejection) => Err(JsonResponse::bad_request(&rejection.body_text()).into_response()),
    }
}

fn gateway_error(err: SqlGatewayError) -> Response {
    match err {
        SqlGatewayError::Security {
            message,
            warnings,
            analysis,
        } => {
            let retryable = analysis.is_dangerous
                && !analysis.is_multi_statement
                && analysis.estimated_risk < RiskLevel::Critical;
            let mut body = json!({
                "status": "error",
                "success": false,
                "message": message,
                "code": "SQL_BLOCKED",
                "warnings": warnings,
                "analysis": analysis,
            });
            if retryable {
                body["suggestion"] = json!("Retry with allow_dangerous=true to run this statement");
            }
            (StatusCode::FORBIDDEN, Json(body)).into_response()
        }
        err @ SqlGatewayError::TableNotFound(_) => {
            JsonResponse::not_found(&err.to_string()).into_response()
        }
        SqlGatewayError::Connection { message } => {
            error!(error = %message, "admin sql connection failure");
            JsonResponse::service_unavailable(&message).into_response()
        }
        SqlGatewayError::Invalid { message } | SqlGatewayError::Database { message } => {
            JsonResponse::bad_request(&message).into_response()
        }
    }
}

pub async fn execute_sql(
    State(app_state): State<AppState>,
    _admin: AdminAccess,
    body: Result<Json<SqlBody>, JsonRejection>,
) -> Response {
    let body = match require_query(body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let query = body.query.unwrap_or_default();

    match app_state
        .sql_gateway
        .execute(
            query.trim(),
            body.page.unwrap_or(1),
            body.per_page.unwrap_or(DEFAULT_PER_PAGE),
            body.allow_dangerous,
        )
        .await
    {
        Ok(outcome) => success(outcome),
        Err(err) => {
            warn!(error = %err, "admin sql request refused or failed");
            gateway_error(err)
        }
    }
}

/// Streams the full result of a read query back as a `csv` (default) or
/// `json` attachment.
pub async fn export_sql(
    State(app_state): State<AppState>,
    _admin: AdminAccess,
    body: Result<Json<SqlBody>, JsonRejection>,
) -> Response {
    let body = match require_query(body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let format = match ExportFormat::parse(body.format.as_deref().unwrap_or("csv")) {
        Ok(format) => format,
        Err(err) => return gateway_error(err),
    };
    let query = body.query.unwrap_or_default();

    match app_state.sql_gateway.export(query.trim(), format).await {
        Ok(export) => {
            let file_name = format!(
                "query_export_{}.{}",
                time::OffsetDateTime::now_utc().unix_timestamp(),
                export.format.extension()
            );
            (
                [
                    (header::CONTENT_TYPE, export.format.content_type().to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                export.content,
            )
                .into_response()
        }
        Err(err) => {
            warn!(error = %err, "admin sql export refused or failed");
            gateway_error(err)
        }
    }
}

pub async fn analyze_sql(
    State(app_state): State<AppState>,
    _admin: AdminAccess,
    body: Result<Json<SqlBody>, JsonRejection>,
) -> Response {
    let body = match require_query(body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    let analysis = app_state
        .sql_gateway
        .analyze(body.query.as_deref().unwrap_or_default());
    success(json!({ "analysis": analysis }))
}

pub async fn validate_sql(
    State(app_state): State<AppState>,
    _admin: AdminAccess,
    body: Result<Json<SqlBody>, JsonRejection>,
) -> Response {
    let body = match require_query(body) {
        Ok(body) => body,
        Err(resp) => return resp,
    };
    match app_state
        .sql_gateway
        .validate(body.query.as_deref().unwrap_or_default())
        .await
    {
        Ok(validation) => success(validation),
        Err(err) => gateway_error(err),
    }
}

pub async fn database_schema(
    State(app_state): State<AppState>,
    _admin: AdminAccess,
    Query(params): Query<SchemaQuery>,
) -> Response {
    let table = params.table.as_deref().filter(|t| !t.trim().is_empty());
    match app_state.sql_gateway.table_info(table).await {
        Ok(info) => success(info),
        Err(err) => gateway_error(err),
    }
}
