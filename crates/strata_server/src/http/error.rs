//! REST error envelope.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use strata_protocol::http_types::ErrorBody;
use strata_protocol::StorageError;

use crate::metrics::METRICS;

/// Wrapper giving `StorageError` an HTTP rendering.
#[derive(Debug)]
pub struct ApiError(pub StorageError);

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        METRICS.inc(&METRICS.http_errors);
        let status = StatusCode::from_u16(self.0.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody {
            error: self.0.kind,
            message: self.0.message,
            details: self.0.details,
            request_id: None,
        };
        (status, Json(body)).into_response()
    }
}
