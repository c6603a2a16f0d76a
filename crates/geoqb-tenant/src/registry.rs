//! Workspace Registry
//!
//! Tenant-scoped workspace CRUD. Any ownership mismatch reads as
//! `NotFound`, identical to an absent id.

use crate::store::TenantStore;
use chrono::Utc;
use geoqb_common::error::{CoreError, CoreResult};
use geoqb_common::model::{Tenant, TenantId, Workspace};
use std::sync::Arc;
use uuid::Uuid;

/// Workspace registry
pub struct WorkspaceRegistry {
    store: Arc<TenantStore>,
}

impl WorkspaceRegistry {
    pub fn new(store: Arc<TenantStore>) -> Self {
        Self { store }
    }

    /// Create a workspace with a fresh graph-store namespace
    pub fn create(
        &self,
        tenant: &Tenant,
        name: &str,
        description: Option<String>,
    ) -> CoreResult<Workspace> {
        if name.trim().is_empty() {
            return Err(CoreError::Validation(
                "workspace name must not be empty".into(),
            ));
        }
        let now = Utc::now();
        let workspace = Workspace {
            workspace_id: Uuid::new_v4(),
            tenant_id: tenant.tenant_id,
            name: name.to_string(),
            description,
            graph_namespace: graph_namespace(&tenant.tenant_id),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_workspace(workspace.clone());
        Ok(workspace)
    }

    pub fn get(&self, tenant_id: &TenantId, workspace_id: &Uuid) -> CoreResult<Workspace> {
        self.store
            .workspace_owned(workspace_id, tenant_id)
            .ok_or(CoreError::NotFound)
    }

    pub fn list(&self, tenant_id: &TenantId) -> Vec<Workspace> {
        self.store.workspaces_for(tenant_id)
    }

    pub fn update(
        &self,
        tenant_id: &TenantId,
        workspace_id: &Uuid,
        update: WorkspaceUpdate,
    ) -> CoreResult<Workspace> {
        self.get(tenant_id, workspace_id)?;
        self.store
            .with_workspace_mut(workspace_id, |workspace| {
                if let Some(name) = update.name {
                    workspace.name = name;
                }
                if let Some(description) = update.description {
                    workspace.description = Some(description);
                }
                workspace.clone()
            })
            .ok_or(CoreError::NotFound)
    }

    /// Delete a workspace and all its layers. Returns the removed layer
    /// ids so the caller can cancel any in-flight ingestion.
    pub fn delete(&self, tenant_id: &TenantId, workspace_id: &Uuid) -> CoreResult<Vec<Uuid>> {
        self.get(tenant_id, workspace_id)?;
        self.store
            .remove_workspace_cascade(workspace_id)
            .ok_or(CoreError::NotFound)
    }

    /// Layers currently held by a workspace
    pub fn layer_count(&self, workspace_id: &Uuid) -> u64 {
        self.store.layer_count_for_workspace(workspace_id)
    }
}

/// Namespace format carried over from the hosted graph store:
/// `geoqb_<tenant-prefix>_<random>`
fn graph_namespace(tenant_id: &TenantId) -> String {
    let tenant = tenant_id.simple().to_string();
    let suffix = Uuid::new_v4().simple().to_string();
    format!("geoqb_{}_{}", &tenant[..8], &suffix[..8])
}

/// Workspace update request
#[derive(Debug, Clone, Default)]
pub struct WorkspaceUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}
