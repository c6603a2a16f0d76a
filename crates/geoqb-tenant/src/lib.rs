//! GeoQB Tenant Subsystem
//!
//! Durable records for tenants, workspaces, layers and usage events,
//! plan-based quota enforcement, and tenant-scoped workspace management.
//!
//! Layer-create admission is a serialized check-then-insert: callers take
//! the per-tenant admission lock, evaluate the quota, and persist the
//! layer row plus its usage event before releasing, so two concurrent
//! creates at the limit boundary can never both succeed.

pub mod quota;
pub mod registry;
pub mod store;

pub use quota::{QuotaDecision, QuotaEnforcer, UsageStats};
pub use registry::{WorkspaceRegistry, WorkspaceUpdate};
pub use store::TenantStore;
