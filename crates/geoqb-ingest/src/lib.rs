//! GeoQB Ingestion
//!
//! Layer lifecycle, ingestion orchestration, and the layer service
//! facade. A layer moves through `Pending -> Processing -> Completed`
//! or `Failed`; a bounded worker pool pulls scheduled work off a queue
//! and drives each run against an [`adapter::IngestionAdapter`]. Every
//! run carries the layer's generation at schedule time, so results of
//! superseded runs are discarded instead of clobbering newer state.

pub mod adapter;
pub mod lifecycle;
pub mod orchestrator;
pub mod service;

pub use adapter::{AdapterError, Feature, FeatureSet, IngestionAdapter};
pub use lifecycle::LayerLifecycleManager;
pub use orchestrator::{IngestionOrchestrator, OrchestratorConfig};
pub use service::{LayerService, LayerUpdate, ServiceConfig};
