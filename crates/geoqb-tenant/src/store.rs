//! Tenant Record Store
//!
//! Owns durability and consistent reads for tenants, workspaces, layers
//! and usage events. Layer status is never written here directly; all
//! status mutation goes through the lifecycle manager via
//! [`TenantStore::with_layer_mut`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use geoqb_common::model::{Layer, Plan, Tenant, TenantId, UsageEvent, UsageKind, Workspace};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-process record store
pub struct TenantStore {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
    workspaces: Arc<RwLock<HashMap<Uuid, Workspace>>>,
    layers: Arc<RwLock<HashMap<Uuid, Layer>>>,
    /// Append-only
    usage_events: Arc<RwLock<Vec<UsageEvent>>>,
    /// Per-tenant admission locks serializing quota check-then-insert
    admission: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl TenantStore {
    pub fn new() -> Self {
        Self {
            tenants: Arc::new(RwLock::new(HashMap::new())),
            workspaces: Arc::new(RwLock::new(HashMap::new())),
            layers: Arc::new(RwLock::new(HashMap::new())),
            usage_events: Arc::new(RwLock::new(Vec::new())),
            admission: DashMap::new(),
        }
    }

    /// Register tenant
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.write().insert(tenant.tenant_id, tenant);
    }

    /// Get tenant
    pub fn tenant(&self, tenant_id: &TenantId) -> Option<Tenant> {
        self.tenants.read().get(tenant_id).cloned()
    }

    /// Change subscription plan
    pub fn set_plan(&self, tenant_id: &TenantId, plan: Plan) -> bool {
        let mut tenants = self.tenants.write();
        match tenants.get_mut(tenant_id) {
            Some(t) => {
                t.plan = plan;
                t.updated_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Serialization scope for a tenant's create-time check-then-insert.
    /// Callers hold the lock across the quota read and the layer insert.
    pub fn admission_guard(&self, tenant_id: &TenantId) -> Arc<Mutex<()>> {
        self.admission
            .entry(*tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.workspaces
            .write()
            .insert(workspace.workspace_id, workspace);
    }

    /// Workspace only if owned by the given tenant. Cross-tenant lookups
    /// come back `None`, same as absent ids.
    pub fn workspace_owned(&self, workspace_id: &Uuid, tenant_id: &TenantId) -> Option<Workspace> {
        self.workspaces
            .read()
            .get(workspace_id)
            .filter(|w| w.tenant_id == *tenant_id)
            .cloned()
    }

    pub fn workspaces_for(&self, tenant_id: &TenantId) -> Vec<Workspace> {
        self.workspaces
            .read()
            .values()
            .filter(|w| w.tenant_id == *tenant_id)
            .cloned()
            .collect()
    }

    /// Mutate a workspace in place, touching `updated_at`
    pub fn with_workspace_mut<R>(
        &self,
        workspace_id: &Uuid,
        f: impl FnOnce(&mut Workspace) -> R,
    ) -> Option<R> {
        let mut workspaces = self.workspaces.write();
        let workspace = workspaces.get_mut(workspace_id)?;
        let out = f(workspace);
        workspace.updated_at = Utc::now();
        Some(out)
    }

    /// Remove a workspace and all its layers. Returns the removed child
    /// layer ids so the caller can cancel in-flight ingestion.
    pub fn remove_workspace_cascade(&self, workspace_id: &Uuid) -> Option<Vec<Uuid>> {
        let mut workspaces = self.workspaces.write();
        let mut layers = self.layers.write();
        workspaces.remove(workspace_id)?;
        let removed: Vec<Uuid> = layers
            .values()
            .filter(|l| l.workspace_id == *workspace_id)
            .map(|l| l.layer_id)
            .collect();
        for id in &removed {
            layers.remove(id);
        }
        Some(removed)
    }

    /// Persist a new layer and its `layer_created` usage event as a unit
    pub fn insert_layer_with_usage(&self, layer: Layer, event: UsageEvent) {
        let mut layers = self.layers.write();
        let mut events = self.usage_events.write();
        layers.insert(layer.layer_id, layer);
        events.push(event);
    }

    pub fn layer(&self, layer_id: &Uuid) -> Option<Layer> {
        self.layers.read().get(layer_id).cloned()
    }

    pub fn layers_for_workspace(&self, workspace_id: &Uuid) -> Vec<Layer> {
        self.layers
            .read()
            .values()
            .filter(|l| l.workspace_id == *workspace_id)
            .cloned()
            .collect()
    }

    /// All layers under the tenant's workspaces, any status. Pending and
    /// failed layers count too.
    pub fn layer_count_for_tenant(&self, tenant_id: &TenantId) -> u64 {
        let owned: HashSet<Uuid> = self
            .workspaces
            .read()
            .values()
            .filter(|w| w.tenant_id == *tenant_id)
            .map(|w| w.workspace_id)
            .collect();
        self.layers
            .read()
            .values()
            .filter(|l| owned.contains(&l.workspace_id))
            .count() as u64
    }

    pub fn layer_count_for_workspace(&self, workspace_id: &Uuid) -> u64 {
        self.layers
            .read()
            .values()
            .filter(|l| l.workspace_id == *workspace_id)
            .count() as u64
    }

    /// Mutate a layer in place, touching `updated_at`
    pub fn with_layer_mut<R>(&self, layer_id: &Uuid, f: impl FnOnce(&mut Layer) -> R) -> Option<R> {
        let mut layers = self.layers.write();
        let layer = layers.get_mut(layer_id)?;
        let out = f(layer);
        layer.updated_at = Utc::now();
        Some(out)
    }

    pub fn remove_layer(&self, layer_id: &Uuid) -> Option<Layer> {
        self.layers.write().remove(layer_id)
    }

    /// Append a usage fact
    pub fn append_usage(&self, event: UsageEvent) {
        self.usage_events.write().push(event);
    }

    /// Sum of event quantities for a tenant and kind within [start, end)
    pub fn usage_count_in(
        &self,
        tenant_id: &TenantId,
        kind: UsageKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> u64 {
        self.usage_events
            .read()
            .iter()
            .filter(|e| {
                e.tenant_id == *tenant_id
                    && e.kind == kind
                    && e.recorded_at >= start
                    && e.recorded_at < end
            })
            .map(|e| u64::from(e.quantity))
            .sum()
    }
}

impl Default for TenantStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geoqb_common::model::{BoundingBox, LayerSpec};

    fn layer_spec() -> LayerSpec {
        LayerSpec {
            name: "cafes".into(),
            tags: HashMap::from([("amenity".to_string(), "cafe".to_string())]),
            bbox: BoundingBox::new(48.0, 11.0, 48.5, 11.8),
            resolution: 9,
        }
    }

    fn seed(store: &TenantStore) -> (Tenant, Workspace) {
        let tenant = Tenant::new("a@example.com", "A", Plan::Free);
        store.insert_tenant(tenant.clone());
        let now = Utc::now();
        let workspace = Workspace {
            workspace_id: Uuid::new_v4(),
            tenant_id: tenant.tenant_id,
            name: "munich".into(),
            description: None,
            graph_namespace: "geoqb_test".into(),
            created_at: now,
            updated_at: now,
        };
        store.insert_workspace(workspace.clone());
        (tenant, workspace)
    }

    #[test]
    fn test_layer_count_joins_through_workspaces() {
        let store = TenantStore::new();
        let (tenant, workspace) = seed(&store);
        let (other, other_ws) = seed(&store);

        for ws in [&workspace, &other_ws] {
            let layer = Layer::new(ws.workspace_id, layer_spec());
            let event = UsageEvent::new(ws.tenant_id, UsageKind::LayerCreated, Some(layer.layer_id));
            store.insert_layer_with_usage(layer, event);
        }

        assert_eq!(store.layer_count_for_tenant(&tenant.tenant_id), 1);
        assert_eq!(store.layer_count_for_tenant(&other.tenant_id), 1);
    }

    #[test]
    fn test_workspace_ownership_filter() {
        let store = TenantStore::new();
        let (_, workspace) = seed(&store);
        let stranger = Uuid::new_v4();

        assert!(store
            .workspace_owned(&workspace.workspace_id, &workspace.tenant_id)
            .is_some());
        assert!(store
            .workspace_owned(&workspace.workspace_id, &stranger)
            .is_none());
        assert!(store
            .workspace_owned(&Uuid::new_v4(), &workspace.tenant_id)
            .is_none());
    }

    #[test]
    fn test_cascade_removes_layers() {
        let store = TenantStore::new();
        let (tenant, workspace) = seed(&store);

        let layer = Layer::new(workspace.workspace_id, layer_spec());
        let layer_id = layer.layer_id;
        let event = UsageEvent::new(tenant.tenant_id, UsageKind::LayerCreated, Some(layer_id));
        store.insert_layer_with_usage(layer, event);

        let removed = store
            .remove_workspace_cascade(&workspace.workspace_id)
            .unwrap();
        assert_eq!(removed, vec![layer_id]);
        assert!(store.layer(&layer_id).is_none());
        assert_eq!(store.layer_count_for_tenant(&tenant.tenant_id), 0);
    }

    #[test]
    fn test_usage_window_excludes_out_of_range() {
        let store = TenantStore::new();
        let (tenant, _) = seed(&store);

        let mut old = UsageEvent::new(tenant.tenant_id, UsageKind::QueryExecuted, None);
        old.recorded_at = Utc::now() - chrono::Duration::days(90);
        store.append_usage(old);
        store.append_usage(UsageEvent::new(
            tenant.tenant_id,
            UsageKind::QueryExecuted,
            None,
        ));

        let start = Utc::now() - chrono::Duration::days(1);
        let end = Utc::now() + chrono::Duration::days(1);
        assert_eq!(
            store.usage_count_in(&tenant.tenant_id, UsageKind::QueryExecuted, start, end),
            1
        );
    }

    #[test]
    fn test_admission_guard_is_per_tenant() {
        let store = TenantStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert!(Arc::ptr_eq(
            &store.admission_guard(&a),
            &store.admission_guard(&a)
        ));
        assert!(!Arc::ptr_eq(
            &store.admission_guard(&a),
            &store.admission_guard(&b)
        ));

        // Holding one tenant's guard never blocks another tenant's
        let guard_a = store.admission_guard(&a);
        let _held = tokio_test::block_on(guard_a.lock());
        let guard_b = store.admission_guard(&b);
        assert!(guard_b.try_lock().is_ok());
        assert!(store.admission_guard(&a).try_lock().is_err());
    }
}
