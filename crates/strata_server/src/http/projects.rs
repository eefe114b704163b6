//! Project and branch handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use strata_protocol::http_types::{CreateBranchRequest, CreateProjectRequest};

use super::{parse_branch, parse_project, ApiError, AppState};

pub async fn create(
    State(app): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<CreateProjectRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let info = app
        .service
        .create_project(&ctx, &principal, &req.id, req.name.as_deref())?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    Ok(Json(app.service.list_projects(&principal)?))
}

pub async fn show(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.get_project(&principal, &project)?))
}

pub async fn destroy(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    app.service.delete_project(&ctx, &principal, &project)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn stats(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let stats = app
        .service
        .run_blocking(move |svc| svc.project_stats(&principal, &project))
        .await?;
    Ok(Json(stats))
}

pub async fn create_branch(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Json(req): Json<CreateBranchRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let info = app
        .service
        .create_branch(&ctx, &principal, &project, &req.id)?;
    Ok((StatusCode::CREATED, Json(info)))
}

pub async fn list_branches(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    Ok(Json(app.service.list_branches(&principal, &project)?))
}

pub async fn show_branch(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, _ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    Ok(Json(app.service.get_branch(&principal, &project, &branch)?))
}

pub async fn destroy_branch(
    State(app): State<AppState>,
    headers: HeaderMap,
    Path((project, branch)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (principal, ctx) = app.authenticate(&headers)?;
    let project = parse_project(&project)?;
    let branch = parse_branch(&branch)?;
    let response = app
        .service
        .delete_branch(&ctx, &principal, &project, &branch)
        .await?;
    Ok(Json(response))
}
