//! Snapshot-settings operations: stored partials + effective resolution.

use serde_json::Value;
use strata_catalog::SettingsScope;
use strata_protocol::http_types::SettingsResponse;
use strata_protocol::settings::{prune_nulls, resolve_effective, validate_partial, EffectiveSettings};
use strata_protocol::{ProjectId, StorageError};

use crate::audit::{AuditScope, RequestContext};
use crate::auth::Principal;
use crate::errors::map_catalog_err;

use super::StorageService;

impl StorageService {
    /// Effective settings for a project / bucket / table entity.
    pub(crate) fn effective_settings_for(
        &self,
        project: &ProjectId,
        bucket: Option<&str>,
        table: Option<&str>,
    ) -> Result<EffectiveSettings, StorageError> {
        let project_partial = self
            .catalog
            .get_settings(&SettingsScope::Project(project.clone()))
            .map_err(map_catalog_err)?;
        let bucket_partial = match bucket {
            Some(b) => self
                .catalog
                .get_settings(&SettingsScope::Bucket(project.clone(), b.to_string()))
                .map_err(map_catalog_err)?,
            None => None,
        };
        let table_partial = match (bucket, table) {
            (Some(b), Some(t)) => self
                .catalog
                .get_settings(&SettingsScope::Table(
                    project.clone(),
                    b.to_string(),
                    t.to_string(),
                ))
                .map_err(map_catalog_err)?,
            _ => None,
        };
        resolve_effective(
            project_partial.as_ref(),
            bucket_partial.as_ref(),
            table_partial.as_ref(),
        )
        .map_err(StorageError::internal)
    }

    pub fn get_settings(
        &self,
        principal: &Principal,
        scope: &SettingsScope,
    ) -> Result<SettingsResponse, StorageError> {
        principal.authorize_project(scope.project())?;
        self.catalog
            .require_project(scope.project())
            .map_err(map_catalog_err)?;
        let (bucket, table) = scope_entity(scope);
        let resolved = self.effective_settings_for(scope.project(), bucket, table)?;
        Ok(SettingsResponse { resolved })
    }

    /// Store a partial override for a scope. `null` leaves restore
    /// inheritance and are pruned before storage.
    pub fn put_settings(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        scope: &SettingsScope,
        partial: &Value,
    ) -> Result<SettingsResponse, StorageError> {
        principal.authorize_project(scope.project())?;
        let audit = AuditScope::begin(
            &self.catalog,
            ctx,
            "settings.put",
            "settings",
            scope_resource_id(scope),
            Some(scope.project().clone()),
        );
        let result = (|| {
            self.catalog
                .require_project(scope.project())
                .map_err(map_catalog_err)?;
            validate_partial(partial).map_err(StorageError::invalid_argument)?;
            let pruned = prune_nulls(partial);
            if pruned.as_object().map(|m| m.is_empty()).unwrap_or(false) {
                self.catalog.delete_settings(scope).map_err(map_catalog_err)?;
            } else {
                self.catalog
                    .put_settings(scope, &pruned)
                    .map_err(map_catalog_err)?;
            }
            let (bucket, table) = scope_entity(scope);
            let resolved = self.effective_settings_for(scope.project(), bucket, table)?;
            Ok(SettingsResponse { resolved })
        })();
        audit.finish(&result);
        result
    }

    pub fn delete_settings(
        &self,
        ctx: &RequestContext,
        principal: &Principal,
        scope: &SettingsScope,
    ) -> Result<SettingsResponse, StorageError> {
        principal.authorize_project(scope.project())?;
        let audit = AuditScope::begin(
            &self.catalog,
            ctx,
            "settings.delete",
            "settings",
            scope_resource_id(scope),
            Some(scope.project().clone()),
        );
        let result = (|| {
            self.catalog
                .require_project(scope.project())
                .map_err(map_catalog_err)?;
            self.catalog.delete_settings(scope).map_err(map_catalog_err)?;
            let (bucket, table) = scope_entity(scope);
            let resolved = self.effective_settings_for(scope.project(), bucket, table)?;
            Ok(SettingsResponse { resolved })
        })();
        audit.finish(&result);
        result
    }
}

fn scope_entity(scope: &SettingsScope) -> (Option<&str>, Option<&str>) {
    match scope {
        SettingsScope::Project(_) => (None, None),
        SettingsScope::Bucket(_, b) => (Some(b.as_str()), None),
        SettingsScope::Table(_, b, t) => (Some(b.as_str()), Some(t.as_str())),
    }
}

fn scope_resource_id(scope: &SettingsScope) -> String {
    match scope {
        SettingsScope::Project(p) => p.to_string(),
        SettingsScope::Bucket(p, b) => format!("{p}/{b}"),
        SettingsScope::Table(p, b, t) => format!("{p}/{b}/{t}"),
    }
}
