use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

use crate::responses::JsonResponse;
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

/// Caller identity, taken from the `x-user-id` header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserId(pub i64);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<i64>().ok())
            .map(UserId)
            .ok_or_else(|| JsonResponse::unauthorized("Missing or invalid user identity").into_response())
    }
}

/// Gate for operator routes. Open when no admin token is configured.
#[derive(Debug)]
pub struct AdminAccess;

impl FromRequestParts<AppState> for AdminAccess {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.admin_api_token.as_deref() else {
            return Ok(AdminAccess);
        };

        let provided = parts
            .headers
            .get(ADMIN_TOKEN_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();

        if bool::from(provided.ct_eq(expected.as_bytes())) {
            Ok(AdminAccess)
        } else {
            Err(
                JsonResponse::forbidden_with_code("Admin access required", "ADMIN_TOKEN_INVALID")
                    .into_response(),
            )
        }
    }
}
