//! File handlers: staged-upload lifecycle.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use strata_protocol::http_types::PrepareFileRequest;

use super::{parse_project, ApiError, AppState};

pub async fn prepare(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(req): Json<PrepareFileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let response = app.service.prepare_file(&ctx, &principal, &project, &req)?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn register(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let info = app
        .service
        .run_blocking(move |svc| svc.register_file(&ctx, &principal, &project, &file))
        .await?;
    Ok(Json(info))
}

pub async fn list(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.list_files(&principal, &project)?))
}

pub async fn show(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.get_file(&principal, &project, &file)?))
}

pub async fn destroy(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    app.service.delete_file(&ctx, &principal, &project, &file)?;
    Ok(StatusCode::NO_CONTENT)
}
