//! Table handlers: schema, preview, import/export, reconcile.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use strata_protocol::http_types::{
    AddColumnRequest, CreateTableRequest, DeleteRowsRequest, ExportRequest, ImportRequest,
};
use strata_protocol::TableRef;

use super::{parse_branch, parse_project, ApiError, AppState};

fn table_ref(
    project: &str,
    branch: &str,
    bucket: String,
    table: String,
) -> Result<TableRef, ApiError> {
    Ok(TableRef::new(
        parse_project(project)?,
        parse_branch(branch)?,
        bucket,
        table,
    ))
}

pub async fn create(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket)): Path<(String, String, String)>,
    Json(req): Json<CreateTableRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    let info = app
        .service
        .create_table(&ctx, &principal, &project, &branch, &bucket, &req)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket)): Path<(String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    Ok(Json(app.service.list_tables(
        &principal, &project, &branch, &bucket,
    )?))
}

pub async fn show(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    Ok(Json(app.service.get_table(&principal, &table)?))
}

pub async fn destroy(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    app.service.drop_table(&ctx, &principal, &table).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct PreviewParams {
    #[serde(default = "default_preview_limit")]
    limit: u64,
}

fn default_preview_limit() -> u64 {
    100
}

pub async fn preview(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
    Query(params): Query<PreviewParams>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let preview = app
        .service
        .run_blocking(move |svc| svc.preview_table(&principal, &table, params.limit))
        .await?;
    Ok(Json(preview))
}

pub async fn add_column(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
    Json(req): Json<AddColumnRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let info = app
        .service
        .add_column(&ctx, &principal, &table, &req)
        .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn drop_column(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table, column)): Path<(String, String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let info = app
        .service
        .drop_column(&ctx, &principal, &table, &column)
        .await?;
    Ok(Json(info))
}

pub async fn truncate(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let info = app.service.truncate_table(&ctx, &principal, &table).await?;
    Ok(Json(info))
}

pub async fn delete_rows(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
    Json(req): Json<DeleteRowsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let response = app
        .service
        .delete_rows(&ctx, &principal, &table, req.filter.as_deref())
        .await?;
    Ok(Json(response))
}

pub async fn import(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
    Json(req): Json<ImportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let response = app
        .service
        .import_table(&ctx, &principal, &table, &req)
        .await?;
    Ok(Json(response))
}

pub async fn export(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
    Json(req): Json<ExportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let response = app
        .service
        .export_table(&ctx, &principal, &table, &req)
        .await?;
    Ok(Json(response))
}

pub async fn reconcile(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch, bucket, table)): Path<(String, String, String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let table = table_ref(&project, &branch, bucket, table)?;
    let response = app
        .service
        .reconcile_table(&ctx, &principal, &table)
        .await?;
    Ok(Json(response))
}
