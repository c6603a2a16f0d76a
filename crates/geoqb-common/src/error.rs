//! Error types for GeoQB core

use crate::model::LayerStatus;
use thiserror::Error;
use uuid::Uuid;

/// Core error taxonomy
#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed bbox/resolution/tags, rejected before persistence
    #[error("validation error: {0}")]
    Validation(String),

    /// Plan limit reached, user-actionable
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Ownership or existence failure. Deliberately carries no detail:
    /// "exists but not yours" must be indistinguishable from "absent".
    #[error("not found")]
    NotFound,

    /// Concurrency guard tripped (duplicate start, stale callback)
    #[error("invalid transition: layer {layer_id} is {current}, expected {expected}")]
    InvalidTransition {
        layer_id: Uuid,
        current: LayerStatus,
        expected: LayerStatus,
    },

    /// Ingestion adapter failed
    #[error("adapter error: {0}")]
    Adapter(String),

    /// Adapter call exceeded its deadline
    #[error("ingestion timed out after {0}s")]
    Timeout(u64),

    /// Adapter succeeded with zero features
    #[error("no data matched the requested tags and bounding box")]
    EmptyResult,
}

/// Result type for GeoQB core
pub type CoreResult<T> = Result<T, CoreError>;
