//! GeoQB Data Model

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Tenant ID
pub type TenantId = Uuid;

/// Tenant account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Unique tenant ID
    pub tenant_id: TenantId,
    /// Contact email
    pub email: String,
    /// Display name
    pub name: String,
    /// Subscription plan
    pub plan: Plan,
    /// Account status (tenants are never hard-deleted)
    pub status: TenantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Create new active tenant
    pub fn new(email: &str, name: &str, plan: Plan) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            plan,
            status: TenantStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }
}

/// Subscription plan
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Plan {
    Free,
    Professional,
    Business,
    Enterprise,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Professional => "professional",
            Self::Business => "business",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Tenant account status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TenantStatus {
    Active,
    Inactive,
    Suspended,
}

/// Per-plan quota caps
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Total layers across all of a tenant's workspaces, any status
    pub max_layers: u64,
    /// Queries per UTC calendar month
    pub max_queries_per_month: u64,
}

/// Configurable plan limit table. Enterprise has no entry: unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTable {
    pub free: PlanLimits,
    pub professional: PlanLimits,
    pub business: PlanLimits,
}

impl PlanTable {
    /// Limits for a plan, `None` meaning unlimited
    pub fn limits_for(&self, plan: Plan) -> Option<PlanLimits> {
        match plan {
            Plan::Free => Some(self.free),
            Plan::Professional => Some(self.professional),
            Plan::Business => Some(self.business),
            Plan::Enterprise => None,
        }
    }
}

impl Default for PlanTable {
    fn default() -> Self {
        Self {
            free: PlanLimits {
                max_layers: 5,
                max_queries_per_month: 100,
            },
            professional: PlanLimits {
                max_layers: 50,
                max_queries_per_month: 10_000,
            },
            business: PlanLimits {
                max_layers: 200,
                max_queries_per_month: 100_000,
            },
        }
    }
}

/// Workspace - tenant-owned container for layers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub workspace_id: Uuid,
    /// Owning tenant; ownership is exclusive, no sharing
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    /// Backing graph-store namespace
    pub graph_namespace: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Maximum spatial index resolution
pub const MAX_RESOLUTION: u8 = 15;

/// Geographic bounding box, ordered `[lat_min, lon_min, lat_max, lon_max]`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BoundingBox {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl BoundingBox {
    pub fn new(lat_min: f64, lon_min: f64, lat_max: f64, lon_max: f64) -> Self {
        Self {
            lat_min,
            lon_min,
            lat_max,
            lon_max,
        }
    }

    /// Check ordering and coordinate ranges
    pub fn validate(&self) -> CoreResult<()> {
        if !(-90.0..=90.0).contains(&self.lat_min) || !(-90.0..=90.0).contains(&self.lat_max) {
            return Err(CoreError::Validation(
                "latitude must be within [-90, 90]".into(),
            ));
        }
        if !(-180.0..=180.0).contains(&self.lon_min) || !(-180.0..=180.0).contains(&self.lon_max) {
            return Err(CoreError::Validation(
                "longitude must be within [-180, 180]".into(),
            ));
        }
        if self.lat_min >= self.lat_max {
            return Err(CoreError::Validation(
                "bbox lat_min must be less than lat_max".into(),
            ));
        }
        if self.lon_min >= self.lon_max {
            return Err(CoreError::Validation(
                "bbox lon_min must be less than lon_max".into(),
            ));
        }
        Ok(())
    }
}

/// Requested layer definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerSpec {
    pub name: String,
    /// Tag filter, e.g. {"amenity": "hospital"}
    pub tags: HashMap<String, String>,
    pub bbox: BoundingBox,
    /// Spatial index resolution, 0..=15
    pub resolution: u8,
}

impl LayerSpec {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("layer name must not be empty".into()));
        }
        if self.tags.is_empty() {
            return Err(CoreError::Validation(
                "at least one tag filter is required".into(),
            ));
        }
        self.bbox.validate()?;
        if self.resolution > MAX_RESOLUTION {
            return Err(CoreError::Validation(format!(
                "resolution must be within [0, {MAX_RESOLUTION}]"
            )));
        }
        Ok(())
    }
}

/// Layer processing status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LayerStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl LayerStatus {
    /// Terminal states only leave via reingest
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LayerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Layer - a filtered geospatial extract plus its ingestion outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub layer_id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub tags: HashMap<String, String>,
    pub bbox: BoundingBox,
    pub resolution: u8,
    pub status: LayerStatus,
    pub error_message: Option<String>,
    pub feature_count: u64,
    pub ingestion_started_at: Option<DateTime<Utc>>,
    pub ingestion_completed_at: Option<DateTime<Utc>>,
    /// Opaque metadata, populated only on successful ingestion
    pub metadata: Option<serde_json::Value>,
    /// Monotonic counter bumped by reingest; stale async completions
    /// carrying an older generation are discarded
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Layer {
    /// New layer in `Pending`, generation 0
    pub fn new(workspace_id: Uuid, spec: LayerSpec) -> Self {
        let now = Utc::now();
        Self {
            layer_id: Uuid::new_v4(),
            workspace_id,
            name: spec.name,
            tags: spec.tags,
            bbox: spec.bbox,
            resolution: spec.resolution,
            status: LayerStatus::Pending,
            error_message: None,
            feature_count: 0,
            ingestion_started_at: None,
            ingestion_completed_at: None,
            metadata: None,
            generation: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Usage event kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum UsageKind {
    LayerCreated,
    QueryExecuted,
}

impl UsageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LayerCreated => "layer_created",
            Self::QueryExecuted => "query_executed",
        }
    }
}

/// Append-only usage fact for quota accounting. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub tenant_id: TenantId,
    pub kind: UsageKind,
    pub resource_id: Option<Uuid>,
    pub quantity: u32,
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(tenant_id: TenantId, kind: UsageKind, resource_id: Option<Uuid>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            tenant_id,
            kind,
            resource_id,
            quantity: 1,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> LayerSpec {
        LayerSpec {
            name: "hospitals".into(),
            tags: HashMap::from([("amenity".to_string(), "hospital".to_string())]),
            bbox: BoundingBox::new(45.0, 8.0, 50.0, 9.0),
            resolution: 9,
        }
    }

    #[test]
    fn test_valid_spec() {
        assert!(spec().validate().is_ok());
    }

    #[test]
    fn test_bbox_ordering_rejected() {
        // lat_min > lat_max
        let bbox = BoundingBox::new(50.0, 8.0, 45.0, 9.0);
        assert!(matches!(bbox.validate(), Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_bbox_out_of_range_rejected() {
        let bbox = BoundingBox::new(-91.0, 8.0, 45.0, 9.0);
        assert!(bbox.validate().is_err());

        let bbox = BoundingBox::new(45.0, 8.0, 50.0, 181.0);
        assert!(bbox.validate().is_err());
    }

    #[test]
    fn test_empty_tags_rejected() {
        let mut s = spec();
        s.tags.clear();
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_resolution_bounds() {
        let mut s = spec();
        s.resolution = 15;
        assert!(s.validate().is_ok());
        s.resolution = 16;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_plan_table_defaults() {
        let table = PlanTable::default();
        assert_eq!(table.limits_for(Plan::Free).unwrap().max_layers, 5);
        assert_eq!(
            table.limits_for(Plan::Business).unwrap().max_queries_per_month,
            100_000
        );
        assert!(table.limits_for(Plan::Enterprise).is_none());
    }

    #[test]
    fn test_new_layer_pending() {
        let layer = Layer::new(Uuid::new_v4(), spec());
        assert_eq!(layer.status, LayerStatus::Pending);
        assert_eq!(layer.generation, 0);
        assert_eq!(layer.feature_count, 0);
        assert!(layer.metadata.is_none());
    }
}
