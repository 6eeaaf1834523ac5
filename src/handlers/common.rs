use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::ServiceError;

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(data)).into_response()
}

/// Turns an axum body rejection into the common error body.
pub fn map_json_rejection(rejection: JsonRejection) -> ServiceError {
    ServiceError::BadRequest(rejection.body_text())
}

pub fn map_path_rejection(rejection: PathRejection) -> ServiceError {
    ServiceError::BadRequest(rejection.body_text())
}
