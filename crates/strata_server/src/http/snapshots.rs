//! Snapshot and settings handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use strata_catalog::SettingsScope;
use strata_protocol::http_types::{
    CreateSnapshotRequest, RestoreSnapshotRequest, SettingsUpdateRequest,
};

use super::{parse_project, ApiError, AppState};

pub async fn create(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(req): Json<CreateSnapshotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let info = app
        .service
        .create_snapshot(
            &ctx,
            &principal,
            &project,
            &req.bucket,
            &req.table,
            req.description.as_deref(),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.list_snapshots(&principal, &project)?))
}

pub async fn show(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, snapshot)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.get_snapshot(&principal, &project, &snapshot)?))
}

pub async fn destroy(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, snapshot)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    app.service
        .delete_snapshot(&ctx, &principal, &project, &snapshot)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn restore(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, snapshot)): Path<(String, String)>,
    Json(req): Json<RestoreSnapshotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let info = app
        .service
        .restore_snapshot(&ctx, &principal, &project, &snapshot, &req)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

// ============================================================================
// Settings (project / bucket / table scopes)
// ============================================================================

pub async fn get_project_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Project(parse_project(&project)?);
    Ok(Json(app.service.get_settings(&principal, &scope)?))
}

pub async fn put_project_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(partial): Json<SettingsUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Project(parse_project(&project)?);
    Ok(Json(app.service.put_settings(&ctx, &principal, &scope, &partial)?))
}

pub async fn delete_project_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Project(parse_project(&project)?);
    Ok(Json(app.service.delete_settings(&ctx, &principal, &scope)?))
}

pub async fn get_bucket_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Bucket(parse_project(&project)?, bucket);
    Ok(Json(app.service.get_settings(&principal, &scope)?))
}

pub async fn put_bucket_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket)): Path<(String, String)>,
    Json(partial): Json<SettingsUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Bucket(parse_project(&project)?, bucket);
    Ok(Json(app.service.put_settings(&ctx, &principal, &scope, &partial)?))
}

pub async fn delete_bucket_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Bucket(parse_project(&project)?, bucket);
    Ok(Json(app.service.delete_settings(&ctx, &principal, &scope)?))
}

pub async fn get_table_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket, table)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Table(parse_project(&project)?, bucket, table);
    Ok(Json(app.service.get_settings(&principal, &scope)?))
}

pub async fn put_table_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket, table)): Path<(String, String, String)>,
    Json(partial): Json<SettingsUpdateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Table(parse_project(&project)?, bucket, table);
    Ok(Json(app.service.put_settings(&ctx, &principal, &scope, &partial)?))
}

pub async fn delete_table_settings(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, bucket, table)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let scope = SettingsScope::Table(parse_project(&project)?, bucket, table);
    Ok(Json(app.service.delete_settings(&ctx, &principal, &scope)?))
}
