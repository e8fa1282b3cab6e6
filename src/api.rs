use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::SyncError;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

pub fn error(status: StatusCode, msg: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn unauthorized() -> Response {
    error(StatusCode::UNAUTHORIZED, "not signed in")
}

pub fn status_for(err: &SyncError) -> StatusCode {
    match err {
        SyncError::Unauthenticated => StatusCode::UNAUTHORIZED,
        SyncError::Validation(_) => StatusCode::BAD_REQUEST,
        SyncError::QueryFailed(_) | SyncError::InsertFailed(_) | SyncError::DeleteFailed(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn sync_error(err: &SyncError) -> Response {
    error(status_for(err), &err.notice())
}
