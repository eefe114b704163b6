//! Control RPC socket.
//!
//! ZMQ REP socket with a JSON request/response protocol; carries the same
//! operations as the REST surface so automation can drive the service
//! without HTTP plumbing.
//!
//! # Protocol
//!
//! - Request: JSON-encoded [`ControlEnvelope`] (bearer token + operation)
//! - Response: JSON-encoded [`ControlResponse`]

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use strata_catalog::SettingsScope;
use strata_protocol::http_types::{
    AddColumnRequest, BranchInfo, BucketInfo, CreateBucketRequest, CreateSnapshotRequest,
    CreateTableRequest, DeleteBranchResponse, DeleteRowsResponse, ExportRequest, ExportResponse,
    FileInfo, ImportRequest, ImportResponse, PrepareFileRequest, PrepareFileResponse,
    PreviewResponse, ProjectInfo, ProjectStats, ReconcileResponse, RestoreSnapshotRequest,
    SettingsResponse, SnapshotInfo, TableInfo,
};
use strata_protocol::{ErrorKind, ProjectId, StorageError, TableRef};

use crate::audit::RequestContext;
use crate::http::{parse_branch, parse_project};
use crate::metrics::METRICS;
use crate::service::StorageService;

/// Request envelope: credentials plus one operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEnvelope {
    pub token: String,
    #[serde(default)]
    pub request_id: Option<String>,
    pub request: ControlRequest,
}

/// Control API operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlRequest {
    Ping,
    CreateProject { id: String, name: Option<String> },
    GetProject { project: String },
    ListProjects,
    DeleteProject { project: String },
    ProjectStats { project: String },
    CreateBranch { project: String, id: String },
    ListBranches { project: String },
    DeleteBranch { project: String, branch: String },
    CreateBucket { project: String, branch: String, bucket: CreateBucketRequest },
    ListBuckets { project: String, branch: String },
    DeleteBucket { project: String, branch: String, bucket: String },
    ShareBucket { project: String, bucket: String, with_projects: Vec<String> },
    CreateTable { project: String, branch: String, bucket: String, table: CreateTableRequest },
    ListTables { project: String, branch: String, bucket: String },
    GetTable { project: String, branch: String, bucket: String, table: String },
    DropTable { project: String, branch: String, bucket: String, table: String },
    PreviewTable { project: String, branch: String, bucket: String, table: String, limit: Option<u64> },
    AddColumn { project: String, branch: String, bucket: String, table: String, column: AddColumnRequest },
    DropColumn { project: String, branch: String, bucket: String, table: String, column: String },
    TruncateTable { project: String, branch: String, bucket: String, table: String },
    DeleteRows { project: String, branch: String, bucket: String, table: String, filter: Option<String> },
    ImportTable { project: String, branch: String, bucket: String, table: String, import: ImportRequest },
    ExportTable { project: String, branch: String, bucket: String, table: String, export: ExportRequest },
    ReconcileTable { project: String, branch: String, bucket: String, table: String },
    PrepareFile { project: String, file: PrepareFileRequest },
    RegisterFile { project: String, file_id: String },
    ListFiles { project: String },
    DeleteFile { project: String, file_id: String },
    CreateSnapshot { project: String, snapshot: CreateSnapshotRequest },
    ListSnapshots { project: String },
    DeleteSnapshot { project: String, snapshot_id: String },
    RestoreSnapshot { project: String, snapshot_id: String, restore: RestoreSnapshotRequest },
    GetSettings { project: String, bucket: Option<String>, table: Option<String> },
    PutSettings { project: String, bucket: Option<String>, table: Option<String>, partial: Value },
    DeleteSettings { project: String, bucket: Option<String>, table: Option<String> },
}

/// Control API responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ControlResponse {
    Pong,
    Project(ProjectInfo),
    Projects(Vec<ProjectInfo>),
    Stats(ProjectStats),
    Branch(BranchInfo),
    Branches(Vec<BranchInfo>),
    BranchDeleted(DeleteBranchResponse),
    Bucket(BucketInfo),
    Buckets(Vec<BucketInfo>),
    Table(TableInfo),
    Tables(Vec<TableInfo>),
    Preview(PreviewResponse),
    Rows(DeleteRowsResponse),
    Imported(ImportResponse),
    Exported(ExportResponse),
    Reconciled(ReconcileResponse),
    FilePrepared(PrepareFileResponse),
    File(FileInfo),
    Files(Vec<FileInfo>),
    Snapshot(SnapshotInfo),
    Snapshots(Vec<SnapshotInfo>),
    Settings(SettingsResponse),
    Ok,
    Error { code: ErrorKind, message: String },
}

impl ControlResponse {
    fn error(err: &StorageError) -> Self {
        Self::Error {
            code: err.kind,
            message: err.message.clone(),
        }
    }
}

/// Serve the control socket forever on a dedicated thread.
///
/// The socket thread owns the REP socket; async service calls run on the
/// runtime via the provided handle.
pub fn run(
    service: StorageService,
    handle: tokio::runtime::Handle,
    addr: &str,
) -> anyhow::Result<()> {
    let context = zmq::Context::new();
    let socket = context.socket(zmq::REP)?;
    socket.bind(addr)?;
    info!("Control RPC listening on {}", addr);

    loop {
        let raw = match socket.recv_string(0) {
            Ok(Ok(raw)) => raw,
            Ok(Err(_)) => {
                warn!("Control request was not valid UTF-8");
                send(&socket, &ControlResponse::error(&StorageError::invalid_argument("request must be UTF-8 JSON")));
                continue;
            }
            Err(e) => {
                error!("Control socket receive failed: {}", e);
                continue;
            }
        };
        METRICS.inc(&METRICS.rpc_requests);

        let response = match serde_json::from_str::<ControlEnvelope>(&raw) {
            Ok(envelope) => dispatch(&service, &handle, envelope),
            Err(e) => ControlResponse::error(
                &StorageError::invalid_argument(format!("malformed control request: {e}")),
            ),
        };
        if matches!(response, ControlResponse::Error { .. }) {
            METRICS.inc(&METRICS.rpc_errors);
        }
        send(&socket, &response);
    }
}

fn send(socket: &zmq::Socket, response: &ControlResponse) {
    let payload = serde_json::to_string(response)
        .unwrap_or_else(|_| r#"{"type":"Error","payload":{"code":"internal","message":"serialization failed"}}"#.to_string());
    if let Err(e) = socket.send(payload.as_bytes(), 0) {
        error!("Control socket send failed: {}", e);
    }
}

fn dispatch(
    service: &StorageService,
    handle: &tokio::runtime::Handle,
    envelope: ControlEnvelope,
) -> ControlResponse {
    let principal = match service.authenticate(&envelope.token) {
        Ok(principal) => principal,
        Err(e) => return ControlResponse::error(&e),
    };
    let ctx = match &envelope.request_id {
        Some(id) => RequestContext::with_request_id(principal.actor_name(), id),
        None => RequestContext::new(principal.actor_name()),
    };

    let result = execute(service, handle, &ctx, &principal, envelope.request);
    match result {
        Ok(response) => response,
        Err(e) => ControlResponse::error(&e),
    }
}

fn table_ref(
    project: &str,
    branch: &str,
    bucket: String,
    table: String,
) -> Result<TableRef, StorageError> {
    Ok(TableRef::new(
        parse_project(project).map_err(|e| e.0)?,
        parse_branch(branch).map_err(|e| e.0)?,
        bucket,
        table,
    ))
}

fn settings_scope(
    project: &str,
    bucket: Option<String>,
    table: Option<String>,
) -> Result<SettingsScope, StorageError> {
    let project: ProjectId = parse_project(project).map_err(|e| e.0)?;
    Ok(match (bucket, table) {
        (Some(b), Some(t)) => SettingsScope::Table(project, b, t),
        (Some(b), None) => SettingsScope::Bucket(project, b),
        (None, None) => SettingsScope::Project(project),
        (None, Some(_)) => {
            return Err(StorageError::invalid_argument(
                "table settings need a bucket",
            ))
        }
    })
}

fn execute(
    service: &StorageService,
    handle: &tokio::runtime::Handle,
    ctx: &RequestContext,
    principal: &crate::auth::Principal,
    request: ControlRequest,
) -> Result<ControlResponse, StorageError> {
    use ControlRequest as Req;
    use ControlResponse as Resp;

    Ok(match request {
        Req::Ping => Resp::Pong,
        Req::CreateProject { id, name } => Resp::Project(service.create_project(
            ctx,
            principal,
            &id,
            name.as_deref(),
        )?),
        Req::GetProject { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Project(service.get_project(principal, &project)?)
        }
        Req::ListProjects => Resp::Projects(service.list_projects(principal)?),
        Req::DeleteProject { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            service.delete_project(ctx, principal, &project)?;
            Resp::Ok
        }
        Req::ProjectStats { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Stats(service.project_stats(principal, &project)?)
        }
        Req::CreateBranch { project, id } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Branch(service.create_branch(ctx, principal, &project, &id)?)
        }
        Req::ListBranches { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Branches(service.list_branches(principal, &project)?)
        }
        Req::DeleteBranch { project, branch } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            Resp::BranchDeleted(
                handle.block_on(service.delete_branch(ctx, principal, &project, &branch))?,
            )
        }
        Req::CreateBucket { project, branch, bucket } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            Resp::Bucket(service.create_bucket(ctx, principal, &project, &branch, &bucket)?)
        }
        Req::ListBuckets { project, branch } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            Resp::Buckets(service.list_buckets(principal, &project, &branch)?)
        }
        Req::DeleteBucket { project, branch, bucket } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            service.delete_bucket(ctx, principal, &project, &branch, &bucket)?;
            Resp::Ok
        }
        Req::ShareBucket { project, bucket, with_projects } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Bucket(service.share_bucket(ctx, principal, &project, &bucket, &with_projects)?)
        }
        Req::CreateTable { project, branch, bucket, table } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            Resp::Table(handle.block_on(service.create_table(
                ctx, principal, &project, &branch, &bucket, &table,
            ))?)
        }
        Req::ListTables { project, branch, bucket } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            let branch = parse_branch(&branch).map_err(|e| e.0)?;
            Resp::Tables(service.list_tables(principal, &project, &branch, &bucket)?)
        }
        Req::GetTable { project, branch, bucket, table } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Table(service.get_table(principal, &table)?)
        }
        Req::DropTable { project, branch, bucket, table } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            handle.block_on(service.drop_table(ctx, principal, &table))?;
            Resp::Ok
        }
        Req::PreviewTable { project, branch, bucket, table, limit } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Preview(service.preview_table(principal, &table, limit.unwrap_or(100))?)
        }
        Req::AddColumn { project, branch, bucket, table, column } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Table(handle.block_on(service.add_column(ctx, principal, &table, &column))?)
        }
        Req::DropColumn { project, branch, bucket, table, column } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Table(handle.block_on(service.drop_column(ctx, principal, &table, &column))?)
        }
        Req::TruncateTable { project, branch, bucket, table } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Table(handle.block_on(service.truncate_table(ctx, principal, &table))?)
        }
        Req::DeleteRows { project, branch, bucket, table, filter } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Rows(handle.block_on(service.delete_rows(
                ctx,
                principal,
                &table,
                filter.as_deref(),
            ))?)
        }
        Req::ImportTable { project, branch, bucket, table, import } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Imported(handle.block_on(service.import_table(ctx, principal, &table, &import))?)
        }
        Req::ExportTable { project, branch, bucket, table, export } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Exported(handle.block_on(service.export_table(ctx, principal, &table, &export))?)
        }
        Req::ReconcileTable { project, branch, bucket, table } => {
            let table = table_ref(&project, &branch, bucket, table)?;
            Resp::Reconciled(handle.block_on(service.reconcile_table(ctx, principal, &table))?)
        }
        Req::PrepareFile { project, file } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::FilePrepared(service.prepare_file(ctx, principal, &project, &file)?)
        }
        Req::RegisterFile { project, file_id } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::File(service.register_file(ctx, principal, &project, &file_id)?)
        }
        Req::ListFiles { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Files(service.list_files(principal, &project)?)
        }
        Req::DeleteFile { project, file_id } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            service.delete_file(ctx, principal, &project, &file_id)?;
            Resp::Ok
        }
        Req::CreateSnapshot { project, snapshot } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Snapshot(handle.block_on(service.create_snapshot(
                ctx,
                principal,
                &project,
                &snapshot.bucket,
                &snapshot.table,
                snapshot.description.as_deref(),
            ))?)
        }
        Req::ListSnapshots { project } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Snapshots(service.list_snapshots(principal, &project)?)
        }
        Req::DeleteSnapshot { project, snapshot_id } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            service.delete_snapshot(ctx, principal, &project, &snapshot_id)?;
            Resp::Ok
        }
        Req::RestoreSnapshot { project, snapshot_id, restore } => {
            let project = parse_project(&project).map_err(|e| e.0)?;
            Resp::Table(handle.block_on(service.restore_snapshot(
                ctx,
                principal,
                &project,
                &snapshot_id,
                &restore,
            ))?)
        }
        Req::GetSettings { project, bucket, table } => {
            let scope = settings_scope(&project, bucket, table)?;
            Resp::Settings(service.get_settings(principal, &scope)?)
        }
        Req::PutSettings { project, bucket, table, partial } => {
            let scope = settings_scope(&project, bucket, table)?;
            Resp::Settings(service.put_settings(ctx, principal, &scope, &partial)?)
        }
        Req::DeleteSettings { project, bucket, table } => {
            let scope = settings_scope(&project, bucket, table)?;
            Resp::Settings(service.delete_settings(ctx, principal, &scope)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serialization_roundtrip() {
        let envelope = ControlEnvelope {
            token: "admin_test".into(),
            request_id: Some("req-1".into()),
            request: ControlRequest::CreateProject {
                id: "p1".into(),
                name: None,
            },
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("CreateProject"));
        assert!(json.contains("p1"));

        let parsed: ControlEnvelope = serde_json::from_str(&json).unwrap();
        match parsed.request {
            ControlRequest::CreateProject { id, .. } => assert_eq!(id, "p1"),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn error_response_carries_kind() {
        let resp = ControlResponse::error(&StorageError::not_found("table 'orders'"));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("not-found"));
        assert!(json.contains("orders"));

        let parsed: ControlResponse = serde_json::from_str(&json).unwrap();
        match parsed {
            ControlResponse::Error { code, .. } => assert_eq!(code, ErrorKind::NotFound),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn request_variants_parse_from_wire_shape() {
        let raw = r#"{
            "token": "proj_p1_admin_abc",
            "request": {
                "type": "ImportTable",
                "payload": {
                    "project": "p1",
                    "branch": "default",
                    "bucket": "in_c",
                    "table": "orders",
                    "import": {
                        "file_id": "f-1",
                        "format": "delimited",
                        "options": {"incremental": true}
                    }
                }
            }
        }"#;
        let envelope: ControlEnvelope = serde_json::from_str(raw).unwrap();
        match envelope.request {
            ControlRequest::ImportTable { import, .. } => {
                assert!(import.options.incremental);
            }
            _ => panic!("Wrong variant"),
        }
    }
}
