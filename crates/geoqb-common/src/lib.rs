//! GeoQB shared core
//!
//! Data model, error taxonomy and plan configuration shared by the
//! tenant store and the ingestion pipeline.

pub mod error;
pub mod model;

pub use error::{CoreError, CoreResult};
pub use model::{
    BoundingBox, Layer, LayerSpec, LayerStatus, Plan, PlanLimits, PlanTable, Tenant, TenantId,
    TenantStatus, UsageEvent, UsageKind, Workspace,
};
