//! Bucket handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use strata_protocol::http_types::{CreateBucketRequest, ShareBucketRequest};
use strata_protocol::StorageError;

use super::{parse_branch, parse_project, ApiError, AppState};

pub async fn create(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch)): Path<(String, String)>,
    Json(req): Json<CreateBucketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    let info = app
        .service
        .create_bucket(&ctx, &principal, &project, &branch, &req)?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    Ok(Json(app.service.list_buckets(&principal, &project, &branch)?))
}

pub async fn show(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    Ok(Json(app.service.get_bucket(
        &principal, &project, &branch, &bucket,
    )?))
}

pub async fn destroy(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    app.service
        .delete_bucket(&ctx, &principal, &project, &branch, &bucket)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket)): Path<(String, String, String)>,
    Json(req): Json<ShareBucketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    if !branch.is_default() {
        return Err(ApiError(StorageError::invalid_argument(
            "buckets are shared from the default branch",
        )));
    }
    let info = app
        .service
        .share_bucket(&ctx, &principal, &project, &bucket, &req.project_ids)?;
    Ok(Json(info))
}
