//! Request middleware: deadlines and idempotent replay.

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use strata_protocol::{request_key, CachedResponse, StorageError};
use tracing::debug;

use crate::metrics::METRICS;

use super::{ApiError, AppState};

/// Largest request/response body the idempotency cache will buffer.
const MAX_BUFFERED_BODY: usize = 8 * 1024 * 1024;

/// Every request runs under the configured deadline; on expiry the staged
/// work is rolled back by the owning task's guards and the client gets
/// `deadline-exceeded`.
pub async fn deadline(State(app): State<AppState>, request: Request, next: Next) -> Response {
    METRICS.inc(&METRICS.http_requests);
    let timeout = app.service.config().request_timeout;
    match tokio::time::timeout(timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError(StorageError::deadline_exceeded(format!(
            "request exceeded the {}s deadline",
            timeout.as_secs()
        )))
        .into_response(),
    }
}

/// Replay cache for requests carrying `X-Idempotency-Key`.
///
/// The key is (idempotency key, method, path, body hash); a hit within the
/// TTL returns the remembered response byte-for-byte, regardless of
/// intervening state changes.
pub async fn idempotency(State(app): State<AppState>, request: Request, next: Next) -> Response {
    let Some(key_header) = request
        .headers()
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
    else {
        return next.run(request).await;
    };
    if !matches!(*request.method(), Method::POST | Method::PUT) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let body_bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError(StorageError::invalid_argument(
                "request body too large for idempotent replay",
            ))
            .into_response()
        }
    };

    let cache_key = request_key(
        &key_header,
        parts.method.as_str(),
        parts.uri.path(),
        &body_bytes,
    );

    if let Some(cached) = app.service.idempotency().get(&cache_key) {
        debug!("Idempotency replay for key {}", key_header);
        return replay(cached);
    }

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    // Remember the response verbatim.
    let (parts, body) = response.into_parts();
    let response_bytes = match to_bytes(body, MAX_BUFFERED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => return StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    };
    app.service.idempotency().put(
        cache_key,
        CachedResponse {
            status: parts.status.as_u16(),
            body: response_bytes.to_vec(),
        },
    );
    Response::from_parts(parts, Body::from(response_bytes))
}

fn replay(cached: CachedResponse) -> Response {
    let mut response = Response::new(Body::from(cached.body));
    *response.status_mut() =
        StatusCode::from_u16(cached.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
        .headers_mut()
        .insert("x-idempotent-replay", HeaderValue::from_static("true"));
    response
}
