//! Layer Service
//!
//! The surface consumed by the (excluded) HTTP layer. Every operation is
//! scoped by `(tenant, workspace_id, layer_id)` and reads as `NotFound`
//! for any ownership mismatch. Handlers only ever `schedule` ingestion;
//! the orchestrator's worker pool owns execution, so request lifetime is
//! decoupled from ingestion duration.

use crate::adapter::IngestionAdapter;
use crate::lifecycle::LayerLifecycleManager;
use crate::orchestrator::{IngestionOrchestrator, OrchestratorConfig};
use geoqb_common::error::{CoreError, CoreResult};
use geoqb_common::model::{
    BoundingBox, Layer, LayerSpec, PlanTable, Tenant, UsageEvent, UsageKind, Workspace,
};
use geoqb_tenant::{QuotaDecision, QuotaEnforcer, TenantStore, UsageStats, WorkspaceRegistry,
    WorkspaceUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Service configuration
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub plans: PlanTable,
    pub orchestrator: OrchestratorConfig,
}

/// Layer service facade
pub struct LayerService {
    store: Arc<TenantStore>,
    quota: QuotaEnforcer,
    registry: WorkspaceRegistry,
    lifecycle: Arc<LayerLifecycleManager>,
    orchestrator: Arc<IngestionOrchestrator>,
}

impl LayerService {
    /// Wire the subsystems and spawn the ingestion worker pool
    pub fn start(
        config: ServiceConfig,
        store: Arc<TenantStore>,
        adapter: Arc<dyn IngestionAdapter>,
    ) -> Arc<Self> {
        let quota = QuotaEnforcer::new(store.clone(), config.plans);
        let registry = WorkspaceRegistry::new(store.clone());
        let lifecycle = Arc::new(LayerLifecycleManager::new(store.clone()));
        let orchestrator = IngestionOrchestrator::start(
            config.orchestrator,
            store.clone(),
            lifecycle.clone(),
            adapter,
        );
        Arc::new(Self {
            store,
            quota,
            registry,
            lifecycle,
            orchestrator,
        })
    }

    /// Create a layer and schedule its ingestion. Quota evaluation and
    /// the layer insert are serialized per tenant so two concurrent
    /// creates at the limit boundary can never both succeed.
    pub async fn create_layer(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        spec: LayerSpec,
    ) -> CoreResult<Layer> {
        let workspace = self.registry.get(&tenant.tenant_id, workspace_id)?;
        spec.validate()?;

        let layer = {
            let guard = self.store.admission_guard(&tenant.tenant_id);
            let _admission = guard.lock().await;
            match self.quota.check_layer_quota(tenant) {
                QuotaDecision::Denied(message) => return Err(CoreError::QuotaExceeded(message)),
                QuotaDecision::Allowed => {}
            }
            self.lifecycle.create(&workspace, spec)?
        };

        self.orchestrator.schedule(layer.layer_id);
        Ok(layer)
    }

    pub fn get_layer(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        layer_id: &Uuid,
    ) -> CoreResult<Layer> {
        self.registry.get(&tenant.tenant_id, workspace_id)?;
        self.store
            .layer(layer_id)
            .filter(|l| l.workspace_id == *workspace_id)
            .ok_or(CoreError::NotFound)
    }

    pub fn list_layers(&self, tenant: &Tenant, workspace_id: &Uuid) -> CoreResult<Vec<Layer>> {
        self.registry.get(&tenant.tenant_id, workspace_id)?;
        Ok(self.store.layers_for_workspace(workspace_id))
    }

    /// Update layer attributes. Does not re-trigger ingestion; use
    /// [`Self::reingest_layer`] to refresh data under new parameters.
    pub fn update_layer(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        layer_id: &Uuid,
        update: LayerUpdate,
    ) -> CoreResult<Layer> {
        let current = self.get_layer(tenant, workspace_id, layer_id)?;
        update.validate(&current)?;
        self.store
            .with_layer_mut(layer_id, |layer| {
                if let Some(name) = update.name {
                    layer.name = name;
                }
                if let Some(tags) = update.tags {
                    layer.tags = tags;
                }
                if let Some(bbox) = update.bbox {
                    layer.bbox = bbox;
                }
                if let Some(resolution) = update.resolution {
                    layer.resolution = resolution;
                }
                layer.clone()
            })
            .ok_or(CoreError::NotFound)
    }

    /// Delete a layer. Cancellation of in-flight work is best-effort and
    /// never blocks deletion; late callbacks are discarded.
    pub fn delete_layer(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        layer_id: &Uuid,
    ) -> CoreResult<()> {
        self.get_layer(tenant, workspace_id, layer_id)?;
        self.orchestrator.cancel(*layer_id);
        self.lifecycle.delete(layer_id)
    }

    /// Reset the layer to `Pending` and schedule a fresh run. Permitted
    /// from any state; idempotent in effect.
    pub fn reingest_layer(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        layer_id: &Uuid,
    ) -> CoreResult<Layer> {
        self.get_layer(tenant, workspace_id, layer_id)?;
        let layer = self.lifecycle.reingest(layer_id)?;
        self.orchestrator.schedule(*layer_id);
        Ok(layer)
    }

    pub fn create_workspace(
        &self,
        tenant: &Tenant,
        name: &str,
        description: Option<String>,
    ) -> CoreResult<Workspace> {
        self.registry.create(tenant, name, description)
    }

    pub fn get_workspace(&self, tenant: &Tenant, workspace_id: &Uuid) -> CoreResult<Workspace> {
        self.registry.get(&tenant.tenant_id, workspace_id)
    }

    pub fn list_workspaces(&self, tenant: &Tenant) -> Vec<Workspace> {
        self.registry.list(&tenant.tenant_id)
    }

    pub fn update_workspace(
        &self,
        tenant: &Tenant,
        workspace_id: &Uuid,
        update: WorkspaceUpdate,
    ) -> CoreResult<Workspace> {
        self.registry.update(&tenant.tenant_id, workspace_id, update)
    }

    /// Delete a workspace, cascading to its layers and canceling any of
    /// their in-flight ingestion.
    pub fn delete_workspace(&self, tenant: &Tenant, workspace_id: &Uuid) -> CoreResult<()> {
        let removed = self.registry.delete(&tenant.tenant_id, workspace_id)?;
        for layer_id in removed {
            self.orchestrator.cancel(layer_id);
        }
        Ok(())
    }

    pub fn usage_stats(&self, tenant: &Tenant) -> UsageStats {
        self.quota.usage_stats(tenant)
    }

    /// Gate for the query path: admit under the monthly quota and record
    /// the usage fact.
    pub fn admit_query(&self, tenant: &Tenant, resource_id: Option<Uuid>) -> CoreResult<()> {
        match self.quota.check_query_quota(tenant) {
            QuotaDecision::Denied(message) => Err(CoreError::QuotaExceeded(message)),
            QuotaDecision::Allowed => {
                self.store.append_usage(UsageEvent::new(
                    tenant.tenant_id,
                    UsageKind::QueryExecuted,
                    resource_id,
                ));
                Ok(())
            }
        }
    }
}

/// Layer update request
#[derive(Debug, Clone, Default)]
pub struct LayerUpdate {
    pub name: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub bbox: Option<BoundingBox>,
    pub resolution: Option<u8>,
}

impl LayerUpdate {
    /// Re-validate the layer as it would look after the update
    fn validate(&self, current: &Layer) -> CoreResult<()> {
        let candidate = LayerSpec {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            tags: self.tags.clone().unwrap_or_else(|| current.tags.clone()),
            bbox: self.bbox.unwrap_or(current.bbox),
            resolution: self.resolution.unwrap_or(current.resolution),
        };
        candidate.validate()
    }
}
