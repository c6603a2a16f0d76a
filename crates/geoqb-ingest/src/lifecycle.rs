//! Layer Lifecycle Manager
//!
//! The single authority allowed to transition a layer's status:
//! `Pending → Processing → {Completed | Failed}`, with `reingest` as the
//! only externally triggerable backward transition. Every reingest bumps
//! the layer's generation; terminal callbacks carrying an older
//! generation are discarded, so a stale slow run can never clobber the
//! outcome of a newer one.

use chrono::Utc;
use geoqb_common::error::{CoreError, CoreResult};
use geoqb_common::model::{Layer, LayerSpec, LayerStatus, UsageEvent, UsageKind, Workspace};
use geoqb_tenant::TenantStore;
use std::sync::Arc;
use uuid::Uuid;

/// Layer lifecycle manager
pub struct LayerLifecycleManager {
    store: Arc<TenantStore>,
}

impl LayerLifecycleManager {
    pub fn new(store: Arc<TenantStore>) -> Self {
        Self { store }
    }

    /// Validate and persist a new `Pending` layer together with its
    /// `layer_created` usage event, as a unit.
    pub fn create(&self, workspace: &Workspace, spec: LayerSpec) -> CoreResult<Layer> {
        spec.validate()?;
        let layer = Layer::new(workspace.workspace_id, spec);
        let event = UsageEvent::new(
            workspace.tenant_id,
            UsageKind::LayerCreated,
            Some(layer.layer_id),
        );
        self.store.insert_layer_with_usage(layer.clone(), event);
        Ok(layer)
    }

    /// `Pending → Processing`. Returns the layer snapshot whose
    /// `generation` the runner now owns. `InvalidTransition` means
    /// another runner already started, or the layer was re-queued.
    pub fn mark_processing(&self, layer_id: &Uuid) -> CoreResult<Layer> {
        match self.store.with_layer_mut(layer_id, |layer| {
            if layer.status != LayerStatus::Pending {
                return Err(CoreError::InvalidTransition {
                    layer_id: *layer_id,
                    current: layer.status,
                    expected: LayerStatus::Pending,
                });
            }
            layer.status = LayerStatus::Processing;
            layer.ingestion_started_at = Some(Utc::now());
            layer.error_message = None;
            Ok(layer.clone())
        }) {
            Some(result) => result,
            None => Err(CoreError::NotFound),
        }
    }

    /// `Processing → Completed` for the given generation. A stale
    /// generation or a deleted layer makes this a silent no-op; returns
    /// whether the transition applied.
    pub fn mark_completed(
        &self,
        layer_id: &Uuid,
        generation: u64,
        feature_count: u64,
        metadata: serde_json::Value,
    ) -> bool {
        let applied = self.store.with_layer_mut(layer_id, |layer| {
            if layer.generation != generation || layer.status != LayerStatus::Processing {
                return false;
            }
            layer.status = LayerStatus::Completed;
            layer.feature_count = feature_count;
            layer.metadata = Some(metadata);
            layer.error_message = None;
            layer.ingestion_completed_at = Some(Utc::now());
            true
        });
        match applied {
            Some(true) => true,
            Some(false) => {
                tracing::debug!(%layer_id, generation, "stale completion discarded");
                false
            }
            None => {
                tracing::debug!(%layer_id, generation, "completion for deleted layer discarded");
                false
            }
        }
    }

    /// `Processing → Failed` for the given generation, recording the
    /// error. Same staleness rules as [`Self::mark_completed`].
    pub fn mark_failed(&self, layer_id: &Uuid, generation: u64, error: &str) -> bool {
        let applied = self.store.with_layer_mut(layer_id, |layer| {
            if layer.generation != generation || layer.status != LayerStatus::Processing {
                return false;
            }
            layer.status = LayerStatus::Failed;
            layer.error_message = Some(error.to_string());
            layer.ingestion_completed_at = Some(Utc::now());
            true
        });
        match applied {
            Some(true) => true,
            Some(false) | None => {
                tracing::debug!(%layer_id, generation, "stale failure discarded");
                false
            }
        }
    }

    /// Reset to a clean `Pending` from any state, clearing prior
    /// results, and bump the generation so any in-flight run for the
    /// previous generation becomes a no-op on completion.
    pub fn reingest(&self, layer_id: &Uuid) -> CoreResult<Layer> {
        self.store
            .with_layer_mut(layer_id, |layer| {
                layer.status = LayerStatus::Pending;
                layer.error_message = None;
                layer.feature_count = 0;
                layer.ingestion_started_at = None;
                layer.ingestion_completed_at = None;
                layer.metadata = None;
                layer.generation += 1;
                layer.clone()
            })
            .ok_or(CoreError::NotFound)
    }

    /// Remove the layer row. In-flight callbacks for it are discarded by
    /// the existence check in the mark operations.
    pub fn delete(&self, layer_id: &Uuid) -> CoreResult<()> {
        self.store
            .remove_layer(layer_id)
            .map(|_| ())
            .ok_or(CoreError::NotFound)
    }
}
