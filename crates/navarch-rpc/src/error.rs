//! Maps `NavarchError` onto HTTP status codes for every handler in
//! `navarch-rpc`, per SPEC_FULL.md §4.5: NotFound->404, InvalidArgument->400,
//! TransientProvider/StoreFailure->503, PermanentProvider->409, Fatal->500
//! (Fatal is a startup-only condition and should never actually reach a
//! handler, but the arm exists so the match stays exhaustive).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use navarch_error::NavarchError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    message: String,
}

pub struct NavarchApiError(pub NavarchError);

impl From<NavarchError> for NavarchApiError {
    fn from(err: NavarchError) -> Self {
        Self(err)
    }
}

impl IntoResponse for NavarchApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            NavarchError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            NavarchError::InvalidArgument { .. } => (StatusCode::BAD_REQUEST, "invalid_argument"),
            NavarchError::TransientProvider { .. } => (StatusCode::SERVICE_UNAVAILABLE, "transient_provider"),
            NavarchError::StoreFailure { .. } => (StatusCode::SERVICE_UNAVAILABLE, "store_failure"),
            NavarchError::PermanentProvider { .. } => (StatusCode::CONFLICT, "permanent_provider"),
            NavarchError::Fatal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "fatal"),
        };
        let body = ErrorBody { error: kind.to_string(), message: self.0.to_string() };
        (status, Json(body)).into_response()
    }
}
