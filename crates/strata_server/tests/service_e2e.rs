//! End-to-end service tests over a temp data root.

use std::io::Write;
use std::path::Path;

use strata_protocol::http_types::{
    CreateBucketRequest, CreateTableRequest, ExportRequest, ImportRequest, RestoreSnapshotRequest,
};
use strata_protocol::options::{DedupMode, ExportOptions, ImportFormat, ImportOptions};
use strata_protocol::types::{BucketStage, ColumnSpec, SnapshotKind};
use strata_protocol::{BranchId, ErrorKind, ProjectId, TableRef};
use strata_server::audit::RequestContext;
use strata_server::auth::Principal;
use strata_server::{ServerConfig, StorageService};

struct Fixture {
    dir: tempfile::TempDir,
    service: StorageService,
    ctx: RequestContext,
    admin: Principal,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::new(dir.path(), "admin_test_key");
    let service = StorageService::open_for_tests(config).unwrap();
    Fixture {
        dir,
        service,
        ctx: RequestContext::new("admin"),
        admin: Principal::System,
    }
}

fn orders_columns() -> Vec<ColumnSpec> {
    vec![
        ColumnSpec {
            name: "id".into(),
            data_type: "BIGINT".into(),
            nullable: false,
            default: None,
        },
        ColumnSpec {
            name: "amount".into(),
            data_type: "DECIMAL(10,2)".into(),
            nullable: true,
            default: None,
        },
    ]
}

fn table_request(name: &str, primary_key: &[&str]) -> CreateTableRequest {
    CreateTableRequest {
        name: name.into(),
        columns: orders_columns(),
        primary_key: primary_key.iter().map(|s| s.to_string()).collect(),
    }
}

fn write_csv(dir: &Path, name: &str, content: &str) -> String {
    let path = dir.join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path.display().to_string()
}

fn import_request(path: String, incremental: bool, dedup: DedupMode) -> ImportRequest {
    ImportRequest {
        file_id: None,
        path: Some(path),
        format: ImportFormat::Delimited,
        delimited: None,
        options: ImportOptions {
            incremental,
            dedup_mode: dedup,
            column_mapping: None,
        },
    }
}

fn setup_project(f: &Fixture) -> (ProjectId, BranchId) {
    let project = ProjectId::new("p1").unwrap();
    f.service
        .create_project(&f.ctx, &f.admin, "p1", None)
        .unwrap();
    let branch = BranchId::default_branch();
    f.service
        .create_bucket(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            &CreateBucketRequest {
                name: "in_c_sales".into(),
                stage: BucketStage::In,
                linked_from: None,
            },
        )
        .unwrap();
    (project, branch)
}

fn orders_ref(project: &ProjectId, branch: &BranchId) -> TableRef {
    TableRef::new(
        project.clone(),
        branch.clone(),
        "in_c_sales".into(),
        "orders".into(),
    )
}

// Scenario: create and preview an empty table.
#[tokio::test(flavor = "multi_thread")]
async fn create_and_preview_empty_table() {
    let f = fixture();
    let (project, branch) = setup_project(&f);

    let info = f
        .service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    assert_eq!(info.primary_key, vec!["id"]);

    let preview = f
        .service
        .preview_table(&f.admin, &orders_ref(&project, &branch), 100)
        .unwrap();
    assert_eq!(preview.columns, vec!["id", "amount"]);
    assert!(preview.rows.is_empty());
}

// Scenario: project creation returns a usable project admin key.
#[tokio::test(flavor = "multi_thread")]
async fn project_key_authorizes_only_its_project() {
    let f = fixture();
    let info = f
        .service
        .create_project(&f.ctx, &f.admin, "p1", None)
        .unwrap();
    let key = info.api_key.unwrap();
    assert!(key.starts_with("proj_p1_admin_"));

    let principal = f.service.authenticate(&key).unwrap();
    let p1 = ProjectId::new("p1").unwrap();
    assert!(principal.authorize_project(&p1).is_ok());

    f.service
        .create_project(&f.ctx, &f.admin, "p2", None)
        .unwrap();
    let p2 = ProjectId::new("p2").unwrap();
    let err = f.service.get_project(&principal, &p2).unwrap_err();
    assert_eq!(err.kind, ErrorKind::PermissionDenied);
}

// Scenario: import twice with update-duplicates dedup.
#[tokio::test(flavor = "multi_thread")]
async fn incremental_import_updates_duplicates() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    let first = write_csv(
        f.dir.path(),
        "first.csv",
        "id,amount\n1,10.00\n2,20.00\n",
    );
    let response = f
        .service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(first, true, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();
    assert_eq!(response.rows_imported, 2);
    assert_eq!(response.rows_after, 2);

    let second = write_csv(
        f.dir.path(),
        "second.csv",
        "id,amount\n2,25.00\n3,30.00\n",
    );
    let response = f
        .service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(second, true, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();
    assert_eq!(response.rows_imported, 2);
    assert_eq!(response.rows_after, 3);

    let preview = f.service.preview_table(&f.admin, &table, 100).unwrap();
    let mut rows: Vec<(i64, f64)> = preview
        .rows
        .iter()
        .map(|r| (r[0].as_i64().unwrap(), r[1].as_f64().unwrap()))
        .collect();
    rows.sort_by_key(|(id, _)| *id);
    assert_eq!(rows, vec![(1, 10.0), (2, 25.0), (3, 30.0)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_on_duplicates_leaves_target_untouched() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    let seed = write_csv(f.dir.path(), "seed.csv", "id,amount\n1,10.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(seed, true, DedupMode::FailOnDuplicates),
        )
        .await
        .unwrap();

    let clash = write_csv(f.dir.path(), "clash.csv", "id,amount\n1,99.00\n2,20.00\n");
    let err = f
        .service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(clash, true, DedupMode::FailOnDuplicates),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Conflict);

    // Target untouched, staging cleaned.
    let preview = f.service.preview_table(&f.admin, &table, 100).unwrap();
    assert_eq!(preview.rows.len(), 1);
    assert_eq!(preview.rows[0][1].as_f64().unwrap(), 10.0);
    assert_staging_empty(&f);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_import_rolls_back_and_cleans_staging() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    let seed = write_csv(f.dir.path(), "seed.csv", "id,amount\n1,10.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(seed, false, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();

    // Source with a column the target does not have: schema mismatch.
    let bad = write_csv(f.dir.path(), "bad.csv", "id,amount,extra\n2,1.00,x\n");
    let err = f
        .service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(bad, true, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidArgument);

    let preview = f.service.preview_table(&f.admin, &table, 100).unwrap();
    assert_eq!(preview.rows.len(), 1);
    assert_staging_empty(&f);
}

fn assert_staging_empty(f: &Fixture) {
    let staging = f.service.layout().staging_dir();
    if staging.exists() {
        let leftovers: Vec<_> = std::fs::read_dir(&staging)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .collect();
        assert!(leftovers.is_empty(), "staging residue: {leftovers:?}");
    }
}

// Scenario: copy-on-write branching with live read-through.
#[tokio::test(flavor = "multi_thread")]
async fn branch_copy_on_write_isolates_writes() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let default_table = orders_ref(&project, &branch);

    let seed = write_csv(f.dir.path(), "seed.csv", "id,amount\n1,10.00\n2,20.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &default_table,
            &import_request(seed, false, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();

    f.service
        .create_branch(&f.ctx, &f.admin, &project, "dev1")
        .unwrap();
    let dev = BranchId::new("dev1").unwrap();
    let dev_table = orders_ref(&project, &dev);

    // Live view: the branch sees default's current data.
    let preview = f.service.preview_table(&f.admin, &dev_table, 100).unwrap();
    assert_eq!(preview.rows.len(), 2);

    // Appending to default stays visible through the branch.
    let more = write_csv(f.dir.path(), "more.csv", "id,amount\n3,30.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &default_table,
            &import_request(more, true, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();
    let preview = f.service.preview_table(&f.admin, &dev_table, 100).unwrap();
    assert_eq!(preview.rows.len(), 3);

    // First branch write triggers the copy; branch and default diverge.
    let branch_rows = write_csv(f.dir.path(), "branch.csv", "id,amount\n2,99.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &dev_table,
            &import_request(branch_rows, true, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();

    let dev_preview = f.service.preview_table(&f.admin, &dev_table, 100).unwrap();
    let amounts: Vec<f64> = dev_preview
        .rows
        .iter()
        .filter(|r| r[0].as_i64() == Some(2))
        .map(|r| r[1].as_f64().unwrap())
        .collect();
    assert_eq!(amounts, vec![99.0]);

    let default_preview = f
        .service
        .preview_table(&f.admin, &default_table, 100)
        .unwrap();
    let amounts: Vec<f64> = default_preview
        .rows
        .iter()
        .filter(|r| r[0].as_i64() == Some(2))
        .map(|r| r[1].as_f64().unwrap())
        .collect();
    assert_eq!(amounts, vec![20.0]);

    // Branch delete discards the copy; default is unchanged.
    let response = f
        .service
        .delete_branch(&f.ctx, &f.admin, &project, &dev)
        .await
        .unwrap();
    assert_eq!(response.discarded_tables.len(), 1);
    let default_preview = f
        .service
        .preview_table(&f.admin, &default_table, 100)
        .unwrap();
    assert_eq!(default_preview.rows.len(), 3);
}

// Scenario: auto-snapshot on drop, then restore.
#[tokio::test(flavor = "multi_thread")]
async fn drop_auto_snapshots_and_restores() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    let seed = write_csv(f.dir.path(), "seed.csv", "id,amount\n1,10.00\n2,20.00\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(seed, false, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();

    // Default settings: drop_table trigger is on.
    f.service
        .drop_table(&f.ctx, &f.admin, &table)
        .await
        .unwrap();

    let snapshots = f.service.list_snapshots(&f.admin, &project).unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].kind, SnapshotKind::AutoPredrop);
    assert_eq!(snapshots[0].row_count, 2);

    let restored = f
        .service
        .restore_snapshot(
            &f.ctx,
            &f.admin,
            &project,
            &snapshots[0].id,
            &RestoreSnapshotRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(restored.name, "orders");

    let preview = f.service.preview_table(&f.admin, &table, 100).unwrap();
    assert_eq!(preview.rows.len(), 2);
}

// Scenario: settings inheritance with source map.
#[tokio::test(flavor = "multi_thread")]
async fn settings_inheritance_resolves_with_sources() {
    let f = fixture();
    let (project, _branch) = setup_project(&f);

    f.service
        .put_settings(
            &f.ctx,
            &f.admin,
            &strata_catalog::SettingsScope::Project(project.clone()),
            &serde_json::json!({"auto_snapshot_triggers": {"truncate_table": true}}),
        )
        .unwrap();
    f.service
        .put_settings(
            &f.ctx,
            &f.admin,
            &strata_catalog::SettingsScope::Bucket(project.clone(), "in_c_logs".into()),
            &serde_json::json!({"enabled": false}),
        )
        .unwrap();

    let response = f
        .service
        .get_settings(
            &f.admin,
            &strata_catalog::SettingsScope::Table(project.clone(), "in_c_logs".into(), "x".into()),
        )
        .unwrap();
    let resolved = response.resolved;
    assert!(!resolved.effective.enabled);
    assert!(resolved.effective.auto_snapshot_triggers.truncate_table);
    assert!(resolved.effective.auto_snapshot_triggers.drop_table);
    assert_eq!(resolved.sources["enabled"], "bucket");
    assert_eq!(
        resolved.sources["auto_snapshot_triggers"]["truncate_table"],
        "project"
    );
    assert_eq!(
        resolved.sources["auto_snapshot_triggers"]["drop_table"],
        "system"
    );
}

// Round trip: import (full replace) then export equals the input.
#[tokio::test(flavor = "multi_thread")]
async fn import_export_round_trip() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    let seed = write_csv(f.dir.path(), "seed.csv", "id,amount\n1,10.00\n2,20.50\n");
    f.service
        .import_table(
            &f.ctx,
            &f.admin,
            &table,
            &import_request(seed, false, DedupMode::UpdateDuplicates),
        )
        .await
        .unwrap();

    let response = f
        .service
        .export_table(
            &f.ctx,
            &f.admin,
            &table,
            &ExportRequest {
                options: ExportOptions::default(),
            },
        )
        .await
        .unwrap();
    assert_eq!(response.rows_exported, 2);

    let exported = std::fs::read_to_string(f.service.layout().root().join(&response.path)).unwrap();
    let mut lines: Vec<&str> = exported.lines().collect();
    let header = lines.remove(0);
    assert_eq!(header, "id,amount");
    lines.sort();
    assert_eq!(lines, vec!["1,10.00", "2,20.50"]);
}

// Boundary: table names that need SQL quoting round-trip through
// create/import/preview.
#[tokio::test(flavor = "multi_thread")]
async fn quoted_table_names_round_trip() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    let name = "Orders 2026";

    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &CreateTableRequest {
                name: name.into(),
                columns: orders_columns(),
                primary_key: vec!["id".into()],
            },
        )
        .await
        .unwrap();

    let table = TableRef::new(
        project.clone(),
        branch.clone(),
        "in_c_sales".into(),
        name.into(),
    );
    let preview = f.service.preview_table(&f.admin, &table, 10).unwrap();
    assert_eq!(preview.columns, vec!["id", "amount"]);

    let tables = f
        .service
        .list_tables(&f.admin, &project, &branch, "in_c_sales")
        .unwrap();
    assert!(tables.iter().any(|t| t.name == name));
}

// Recovery: an orphaned row reads as not-found and reconcile removes it.
#[tokio::test(flavor = "multi_thread")]
async fn orphaned_table_reconciles_to_removal() {
    let f = fixture();
    let (project, branch) = setup_project(&f);
    f.service
        .create_table(
            &f.ctx,
            &f.admin,
            &project,
            &branch,
            "in_c_sales",
            &table_request("orders", &["id"]),
        )
        .await
        .unwrap();
    let table = orders_ref(&project, &branch);

    // Lose the file behind the catalog's back, then reconcile at startup.
    let path = f
        .service
        .layout()
        .table_path(&project, &branch, "in_c_sales", "orders");
    std::fs::remove_file(&path).unwrap();
    f.service.reconcile_on_open().unwrap();

    let err = f.service.get_table(&f.admin, &table).unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotFound);

    let response = f
        .service
        .reconcile_table(&f.ctx, &f.admin, &table)
        .await
        .unwrap();
    assert_eq!(
        response.outcome,
        strata_protocol::http_types::ReconcileOutcome::Removed
    );
    let tables = f
        .service
        .list_tables(&f.admin, &project, &branch, "in_c_sales")
        .unwrap();
    assert!(tables.is_empty());
}
