use axum::{
    extract::{rejection::JsonRejection, Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::error;

use crate::engine::round_to;
use crate::extract::UserId;
use crate::models::execution::{Execution, ExecutionKind, ExecutionStep};
use crate::responses::JsonResponse;
use crate::state::AppState;

#[derive(Serialize)]
struct ExecutionStatusBody {
    #[serde(flatten)]
    execution: Execution,
    steps: Vec<ExecutionStep>,
}

pub async fn submit_agent_execution(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
    Path(agent_id): Path<i64>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    submit(&app_state, ExecutionKind::Agent, agent_id, user_id, body).await
}

pub async fn submit_workflow_execution(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
    Path(workflow_id): Path<i64>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    submit(&app_state, ExecutionKind::Workflow, workflow_id, user_id, body).await
}

async fn submit(
    app_state: &AppState,
    kind: ExecutionKind,
    target_id: i64,
    user_id: i64,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Some(input_data) = body.ok().and_then(|Json(body)| take_input_data(body)) else {
        return JsonResponse::bad_request("Input data required").into_response();
    };

    let label = match kind {
        ExecutionKind::Agent => "Agent",
        ExecutionKind::Workflow => "Workflow",
    };

    match app_state
        .coordinator
        .submit(kind, target_id, input_data, user_id)
        .await
    {
        Ok(execution_id) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "execution_id": execution_id,
                "message": format!("{label} execution started"),
            })),
        )
            .into_response(),
        Err(err) => {
            error!(%kind, target_id, user_id, ?err, "failed to submit execution");
            JsonResponse::server_error(&format!("Failed to execute {kind}")).into_response()
        }
    }
}

/// `input_data` may be any JSON value, including null; `inputData` is accepted too.
fn take_input_data(body: Value) -> Option<Value> {
    let Value::Object(mut body) = body else {
        return None;
    };
    body.remove("input_data").or_else(|| body.remove("inputData"))
}

/// Loads an execution the caller owns. Someone else's execution reads as missing.
async fn owned_execution(
    app_state: &AppState,
    execution_id: i64,
    user_id: i64,
) -> Result<Execution, Response> {
    match app_state.executions.find_execution(execution_id).await {
        Ok(Some(execution)) if execution.created_by == user_id => Ok(execution),
        Ok(_) => Err(JsonResponse::not_found("Execution not found").into_response()),
        Err(err) => {
            error!(execution_id, ?err, "failed to load execution");
            Err(JsonResponse::server_error("Failed to fetch execution status").into_response())
        }
    }
}

pub async fn get_execution_status(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
    Path(execution_id): Path<i64>,
) -> Response {
    let execution = match owned_execution(&app_state, execution_id, user_id).await {
        Ok(execution) => execution,
        Err(resp) => return resp,
    };

    match app_state.executions.list_steps(execution_id).await {
        Ok(steps) => Json(ExecutionStatusBody { execution, steps }).into_response(),
        Err(err) => {
            error!(execution_id, ?err, "failed to load execution steps");
            JsonResponse::server_error("Failed to fetch execution status").into_response()
        }
    }
}

pub async fn cancel_execution(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
    Path(execution_id): Path<i64>,
) -> Response {
    if let Err(resp) = owned_execution(&app_state, execution_id, user_id).await {
        return resp;
    }

    match app_state.coordinator.cancel(execution_id).await {
        Ok(cancelled) => Json(json!({ "cancelled": cancelled })).into_response(),
        Err(err) => {
            error!(execution_id, ?err, "failed to cancel execution");
            JsonResponse::server_error("Failed to cancel execution").into_response()
        }
    }
}

/// Executions of the caller currently owned by this process.
pub async fn list_running_executions(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
) -> Response {
    let executions: Vec<_> = app_state
        .coordinator
        .in_flight()
        .into_iter()
        .filter(|entry| entry.user_id == user_id)
        .collect();
    Json(json!({ "count": executions.len(), "executions": executions })).into_response()
}

pub async fn get_user_costs(
    State(app_state): State<AppState>,
    UserId(user_id): UserId,
) -> Response {
    let total = app_state.executions.total_cost_for_user(user_id).await;
    let breakdown = app_state.executions.cost_breakdown_for_user(user_id).await;

    match (total, breakdown) {
        (Ok(total), Ok(breakdown)) => {
            let cost_by_type: Map<String, Value> = breakdown
                .into_iter()
                .map(|entry| (entry.cost_type, json!(round_to(entry.total, 5))))
                .collect();
            Json(json!({
                "total_cost": round_to(total, 5),
                "cost_by_type": cost_by_type,
            }))
            .into_response()
        }
        (Err(err), _) | (_, Err(err)) => {
            error!(user_id, ?err, "failed to load user costs");
            JsonResponse::server_error("Failed to fetch user costs").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode},
        response::Response,
        Router,
    };
    use serde_json::{json, Value};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    use crate::db::execution_repository::{ExecutionRepository, MockExecutionRepository};
    use crate::db::mock_db::MockExecutions;
    use crate::extract::USER_ID_HEADER;
    use crate::models::cost::Cost;
    use crate::models::execution::{ExecutionKind, ExecutionStatus};
    use crate::routes::{router, testing::test_state};

    const USER: i64 = 42;

    async fn app(executions: Arc<dyn ExecutionRepository>) -> Router {
        router(test_state(executions, None).await)
    }

    fn request(method: Method, uri: &str, user: Option<i64>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn body_json(resp: Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn submit_returns_accepted_with_execution_id() {
        let executions = Arc::new(MockExecutions::default());
        let resp = app(executions.clone())
            .await
            .oneshot(request(
                Method::POST,
                "/api/executions/agent/7",
                Some(USER),
                Some(json!({"input_data": {"question": "hi"}})),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "Agent execution started");

        let id = json["execution_id"].as_i64().unwrap();
        let stored = executions.find_execution(id).await.unwrap().unwrap();
        assert_eq!(stored.execution_type, ExecutionKind::Agent);
        assert_eq!(stored.target_id, 7);
        assert_eq!(stored.created_by, USER);
        assert_eq!(stored.input_data, json!({"question": "hi"}));
    }

    #[tokio::test]
    async fn workflow_submit_accepts_camel_case_input() {
        let executions = Arc::new(MockExecutions::default());
        let resp = app(executions.clone())
            .await
            .oneshot(request(
                Method::POST,
                "/api/executions/workflow/3",
                Some(USER),
                Some(json!({"inputData": null})),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let json = body_json(resp).await;
        assert_eq!(json["message"], "Workflow execution started");
        let stored = executions
            .find_execution(json["execution_id"].as_i64().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.execution_type, ExecutionKind::Workflow);
        assert_eq!(stored.input_data, Value::Null);
    }

    #[tokio::test]
    async fn submit_without_input_data_is_bad_request() {
        for body in [Some(json!({"other": 1})), None] {
            let executions = Arc::new(MockExecutions::default());
            let resp = app(executions.clone())
                .await
                .oneshot(request(
                    Method::POST,
                    "/api/executions/agent/1",
                    Some(USER),
                    body,
                ))
                .await
                .unwrap();

            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
            assert_eq!(body_json(resp).await["message"], "Input data required");
            assert!(executions.executions.lock().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn submit_without_identity_is_unauthorized() {
        let resp = app(Arc::new(MockExecutions::default()))
            .await
            .oneshot(request(
                Method::POST,
                "/api/executions/agent/1",
                None,
                Some(json!({"input_data": {}})),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn storage_failure_on_submit_is_server_error() {
        let mut repo = MockExecutionRepository::new();
        repo.expect_create_execution()
            .returning(|_, _, _, _| Err(sqlx::Error::PoolTimedOut));

        let resp = app(Arc::new(repo))
            .await
            .oneshot(request(
                Method::POST,
                "/api/executions/workflow/1",
                Some(USER),
                Some(json!({"input_data": {}})),
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(resp).await["message"], "Failed to execute workflow");
    }

    #[tokio::test]
    async fn status_includes_execution_and_steps() {
        let executions = Arc::new(MockExecutions::default());
        let execution = executions
            .create_execution(ExecutionKind::Agent, 1, json!({"question": "q"}), USER)
            .await
            .unwrap();

        let resp = app(executions.clone())
            .await
            .oneshot(request(
                Method::GET,
                &format!("/api/executions/{}/status", execution.id),
                Some(USER),
                None,
            ))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["id"], execution.id);
        assert_eq!(json["status"], "pending");
        assert_eq!(json["execution_type"], "agent");
        assert_eq!(json["steps"], json!([]));
    }

    #[tokio::test]
    async fn status_of_missing_or_foreign_execution_is_not_found() {
        let executions = Arc::new(MockExecutions::default());
        let execution = executions
            .create_execution(ExecutionKind::Agent, 1, json!({}), USER)
            .await
            .unwrap();

        for (id, user) in [(999, USER), (execution.id, USER + 1)] {
            let resp = app(executions.clone())
                .await
                .oneshot(request(
                    Method::GET,
                    &format!("/api/executions/{id}/status"),
                    Some(user),
                    None,
                ))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_json(resp).await["message"], "Execution not found");
        }
    }

    #[tokio::test]
    async fn cancel_reports_whether_the_status_changed() {
        let executions = Arc::new(MockExecutions::default());
        let execution = executions
            .create_execution(ExecutionKind::Workflow, 1, json!({}), USER)
            .await
            .unwrap();
        let uri = format!("/api/executions/{}/cancel", execution.id);

        let resp = app(executions.clone())
            .await
            .oneshot(request(Method::POST, &uri, Some(USER), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"cancelled": true}));
        let stored = executions.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);

        let resp = app(executions.clone())
            .await
            .oneshot(request(Method::POST, &uri, Some(USER), None))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({"cancelled": false}));
    }

    #[tokio::test]
    async fn running_lists_only_the_callers_executions() {
        let resp = app(Arc::new(MockExecutions::default()))
            .await
            .oneshot(request(Method::GET, "/api/executions/running", Some(USER), None))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"count": 0, "executions": []}));
    }

    #[tokio::test]
    async fn user_costs_sum_the_ledger() {
        let executions = Arc::new(MockExecutions::default());
        {
            let mut costs = executions.costs.lock().unwrap();
            for (id, user, amount) in [(1, USER, 0.015), (2, USER, 0.02), (3, USER + 1, 1.0)] {
                costs.push(Cost {
                    id,
                    user_id: user,
                    execution_id: Some(id),
                    cost_type: "llm_call".into(),
                    amount,
                    currency: "USD".into(),
                    description: None,
                    created_at: OffsetDateTime::now_utc(),
                });
            }
        }

        let resp = app(executions)
            .await
            .oneshot(request(Method::GET, "/api/costs/user", Some(USER), None))
            .await
            .unwrap();

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({"total_cost": 0.035, "cost_by_type": {"llm_call": 0.035}})
        );
    }
}
