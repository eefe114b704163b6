//! REST transport.
//!
//! Thin axum handlers over the storage service; every operation exists
//! identically on the control RPC socket.

mod buckets;
mod error;
mod files;
mod middleware;
mod projects;
mod snapshots;
mod tables;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use strata_protocol::{BranchId, ProjectId, StorageError};

use crate::audit::RequestContext;
use crate::auth::Principal;
use crate::metrics::METRICS;
use crate::service::StorageService;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub service: StorageService,
}

impl AppState {
    /// Authenticate the request and build its context.
    pub fn authenticate(
        &self,
        headers: &HeaderMap,
    ) -> Result<(Principal, RequestContext), ApiError> {
        let token = bearer_token(headers)?;
        let principal = self.service.authenticate(token)?;
        let ctx = match headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
        {
            Some(request_id) => {
                RequestContext::with_request_id(principal.actor_name(), request_id)
            }
            None => RequestContext::new(principal.actor_name()),
        };
        Ok((principal, ctx))
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, StorageError> {
    let value = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| StorageError::unauthenticated("missing Authorization header"))?;
    value
        .strip_prefix("Bearer ")
        .ok_or_else(|| StorageError::unauthenticated("Authorization header is not a bearer token"))
}

pub(crate) fn parse_project(raw: &str) -> Result<ProjectId, ApiError> {
    ProjectId::new(raw)
        .map_err(|e| ApiError::from(StorageError::invalid_argument(e.to_string())))
}

pub(crate) fn parse_branch(raw: &str) -> Result<BranchId, ApiError> {
    BranchId::new(raw)
        .map_err(|e| ApiError::from(StorageError::invalid_argument(e.to_string())))
}

/// Build the REST router.
pub fn router(service: StorageService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/projects", post(projects::create).get(projects::list))
        .route(
            "/projects/:project",
            get(projects::show).delete(projects::destroy),
        )
        .route("/projects/:project/stats", get(projects::stats))
        .route(
            "/projects/:project/branches",
            post(projects::create_branch).get(projects::list_branches),
        )
        .route(
            "/projects/:project/branches/:branch",
            get(projects::show_branch).delete(projects::destroy_branch),
        )
        .route(
            "/projects/:project/branches/:branch/buckets",
            post(buckets::create).get(buckets::list),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket",
            get(buckets::show).delete(buckets::destroy),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/share",
            post(buckets::share),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables",
            post(tables::create).get(tables::list),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table",
            get(tables::show).delete(tables::destroy),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/preview",
            get(tables::preview),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/columns",
            post(tables::add_column),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/columns/:column",
            delete(tables::drop_column),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/truncate",
            post(tables::truncate),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/rows/delete",
            post(tables::delete_rows),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/import/file",
            post(tables::import),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/export",
            post(tables::export),
        )
        .route(
            "/projects/:project/branches/:branch/buckets/:bucket/tables/:table/reconcile",
            post(tables::reconcile),
        )
        .route("/projects/:project/files/prepare", post(files::prepare))
        .route("/projects/:project/files", get(files::list))
        .route(
            "/projects/:project/files/:file",
            get(files::show).delete(files::destroy),
        )
        .route(
            "/projects/:project/files/:file/register",
            post(files::register),
        )
        .route(
            "/projects/:project/snapshots",
            post(snapshots::create).get(snapshots::list),
        )
        .route(
            "/projects/:project/snapshots/:snapshot",
            get(snapshots::show).delete(snapshots::destroy),
        )
        .route(
            "/projects/:project/snapshots/:snapshot/restore",
            post(snapshots::restore),
        )
        .route(
            "/projects/:project/settings/snapshots",
            get(snapshots::get_project_settings)
                .put(snapshots::put_project_settings)
                .delete(snapshots::delete_project_settings),
        )
        .route(
            "/projects/:project/buckets/:bucket/settings/snapshots",
            get(snapshots::get_bucket_settings)
                .put(snapshots::put_bucket_settings)
                .delete(snapshots::delete_bucket_settings),
        )
        .route(
            "/projects/:project/buckets/:bucket/tables/:table/settings/snapshots",
            get(snapshots::get_table_settings)
                .put(snapshots::put_table_settings)
                .delete(snapshots::delete_table_settings),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::idempotency,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::deadline,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn metrics(State(_app): State<AppState>) -> String {
    METRICS.prometheus_format()
}

/// Serve the router until shutdown.
pub async fn serve(service: StorageService, addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("REST API listening on {}", addr);
    axum::serve(listener, router(service)).await?;
    Ok(())
}
