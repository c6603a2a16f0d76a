//! Ingestion Adapter Contract
//!
//! The real system's adapter talks to an Overpass-style OSM source and a
//! graph-database staging API. The core only depends on this signature:
//! an opaque, possibly slow, possibly failing fetch.

use async_trait::async_trait;
use geoqb_common::model::BoundingBox;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// One fetched geographic feature
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    /// Source element id, e.g. an OSM node/way id
    pub element_id: String,
    pub lat: f64,
    pub lon: f64,
    /// Spatial index cell the feature was bucketed into
    pub cell: Option<String>,
    pub tags: HashMap<String, String>,
}

/// Result of a successful fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureSet {
    pub features: Vec<Feature>,
}

impl FeatureSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Adapter failures. The orchestrator records these on the layer; it
/// never retries them.
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("staging failed: {0}")]
    Staging(String),
}

/// External collaborator performing the actual data fetch/transform/stage
#[async_trait]
pub trait IngestionAdapter: Send + Sync {
    /// Fetch features matching the tag filter within the bbox, enriched
    /// with spatial index cells at the given resolution. No internal
    /// retry; failures surface to the caller.
    async fn fetch(
        &self,
        tags: &HashMap<String, String>,
        bbox: BoundingBox,
        resolution: u8,
    ) -> Result<FeatureSet, AdapterError>;
}
