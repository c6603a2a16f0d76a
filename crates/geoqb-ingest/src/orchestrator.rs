//! Ingestion Orchestrator
//!
//! A bounded pool of workers consumes a per-process queue of
//! `(layer_id, generation)` work items. `schedule` enqueues and never
//! blocks the caller; at most one worker holds `Processing` ownership of
//! a layer at a time, enforced by the `mark_processing` guard. The
//! orchestrator never auto-retries a failed ingestion; retry is a
//! user-initiated reingest.

use crate::adapter::IngestionAdapter;
use crate::lifecycle::LayerLifecycleManager;
use dashmap::DashMap;
use geoqb_common::error::CoreError;
use geoqb_tenant::TenantStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Worker routines consuming the queue
    pub workers: usize,
    /// Queue capacity; a full queue drops the item with a warning
    pub queue_capacity: usize,
    /// Deadline for a single adapter call
    pub adapter_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            adapter_timeout_secs: 300,
        }
    }
}

/// Unit of ingestion work
#[derive(Debug, Clone, Copy)]
struct WorkItem {
    layer_id: Uuid,
    generation: u64,
}

/// Ingestion orchestrator
pub struct IngestionOrchestrator {
    store: Arc<TenantStore>,
    lifecycle: Arc<LayerLifecycleManager>,
    adapter: Arc<dyn IngestionAdapter>,
    config: OrchestratorConfig,
    queue: mpsc::Sender<WorkItem>,
    /// layer id -> highest generation requested for cancellation
    canceled: DashMap<Uuid, u64>,
}

impl IngestionOrchestrator {
    /// Spawn the worker pool and return the handle used to schedule and
    /// cancel work.
    pub fn start(
        config: OrchestratorConfig,
        store: Arc<TenantStore>,
        lifecycle: Arc<LayerLifecycleManager>,
        adapter: Arc<dyn IngestionAdapter>,
    ) -> Arc<Self> {
        let (queue, rx) = mpsc::channel(config.queue_capacity);
        let workers = config.workers.max(1);
        let orchestrator = Arc::new(Self {
            store,
            lifecycle,
            adapter,
            config,
            queue,
            canceled: DashMap::new(),
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..workers {
            let orchestrator = orchestrator.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    match item {
                        Some(item) => orchestrator.run_one(item).await,
                        None => {
                            tracing::debug!(worker, "ingestion queue closed, worker exiting");
                            break;
                        }
                    }
                }
            });
        }
        orchestrator
    }

    /// Enqueue ingestion for the layer's current generation. Never
    /// blocks; with the queue full the item is dropped and the layer
    /// stays `Pending`, recoverable via reingest.
    pub fn schedule(&self, layer_id: Uuid) {
        let Some(layer) = self.store.layer(&layer_id) else {
            tracing::debug!(%layer_id, "schedule for missing layer ignored");
            return;
        };
        let item = WorkItem {
            layer_id,
            generation: layer.generation,
        };
        if self.queue.try_send(item).is_err() {
            tracing::warn!(%layer_id, "ingestion queue full, dropping work item");
        }
    }

    /// Best-effort cancellation. Queued items at or below the layer's
    /// current generation are dropped at dequeue; an in-flight adapter
    /// call is not preempted, but its terminal callback is discarded by
    /// the generation/existence check.
    pub fn cancel(&self, layer_id: Uuid) {
        let generation = self
            .store
            .layer(&layer_id)
            .map_or(u64::MAX, |l| l.generation);
        self.canceled.insert(layer_id, generation);
    }

    fn is_canceled(&self, item: &WorkItem) -> bool {
        self.canceled
            .get(&item.layer_id)
            .is_some_and(|g| item.generation <= *g)
    }

    async fn run_one(&self, item: WorkItem) {
        if self.is_canceled(&item) {
            tracing::debug!(layer_id = %item.layer_id, "dropping canceled work item");
            return;
        }

        // Step 1: claim the layer. InvalidTransition/NotFound mean
        // another runner already started or the layer went away; both
        // are expected outcomes of concurrent scheduling.
        let layer = match self.lifecycle.mark_processing(&item.layer_id) {
            Ok(layer) => layer,
            Err(err) => {
                tracing::debug!(layer_id = %item.layer_id, %err, "skipping work item");
                return;
            }
        };
        let generation = layer.generation;
        tracing::info!(
            layer_id = %layer.layer_id,
            generation,
            resolution = layer.resolution,
            "ingestion started"
        );

        // Step 2: the only long suspension point, bounded by a deadline.
        let deadline = Duration::from_secs(self.config.adapter_timeout_secs);
        let outcome = tokio::time::timeout(
            deadline,
            self.adapter.fetch(&layer.tags, layer.bbox, layer.resolution),
        )
        .await;

        match outcome {
            Err(_) => {
                let message = CoreError::Timeout(self.config.adapter_timeout_secs).to_string();
                self.lifecycle.mark_failed(&layer.layer_id, generation, &message);
            }
            Ok(Err(err)) => {
                let message = CoreError::Adapter(err.to_string()).to_string();
                self.lifecycle.mark_failed(&layer.layer_id, generation, &message);
            }
            // Zero results is a failure, not an empty success
            Ok(Ok(features)) if features.is_empty() => {
                let message = CoreError::EmptyResult.to_string();
                self.lifecycle.mark_failed(&layer.layer_id, generation, &message);
            }
            Ok(Ok(features)) => {
                let metadata = serde_json::json!({
                    "osm_features": features.len(),
                    "h3_resolution": layer.resolution,
                    "bbox": layer.bbox,
                });
                let applied = self.lifecycle.mark_completed(
                    &layer.layer_id,
                    generation,
                    features.len() as u64,
                    metadata,
                );
                if applied {
                    tracing::info!(
                        layer_id = %layer.layer_id,
                        generation,
                        feature_count = features.len(),
                        "ingestion completed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterError, Feature, FeatureSet};
    use async_trait::async_trait;
    use chrono::Utc;
    use geoqb_common::model::{
        BoundingBox, Layer, LayerSpec, LayerStatus, Plan, Tenant, Workspace,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scriptable adapter test double
    struct ScriptedAdapter {
        calls: AtomicUsize,
        features: usize,
        delay_ms: u64,
        fail: bool,
    }

    impl ScriptedAdapter {
        fn ok(features: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                features,
                delay_ms: 0,
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl IngestionAdapter for ScriptedAdapter {
        async fn fetch(
            &self,
            _tags: &HashMap<String, String>,
            bbox: BoundingBox,
            _resolution: u8,
        ) -> Result<FeatureSet, AdapterError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(AdapterError::Fetch("overpass returned 504".into()));
            }
            let features = (0..self.features)
                .map(|i| Feature {
                    element_id: format!("node/{i}"),
                    lat: bbox.lat_min,
                    lon: bbox.lon_min,
                    cell: None,
                    tags: HashMap::new(),
                })
                .collect();
            Ok(FeatureSet { features })
        }
    }

    fn seed_layer(store: &TenantStore) -> Layer {
        let tenant = Tenant::new("o@example.com", "O", Plan::Free);
        store.insert_tenant(tenant.clone());
        let now = Utc::now();
        let workspace = Workspace {
            workspace_id: Uuid::new_v4(),
            tenant_id: tenant.tenant_id,
            name: "ws".into(),
            description: None,
            graph_namespace: "geoqb_test".into(),
            created_at: now,
            updated_at: now,
        };
        store.insert_workspace(workspace.clone());
        let spec = LayerSpec {
            name: "fountains".into(),
            tags: HashMap::from([("amenity".to_string(), "fountain".to_string())]),
            bbox: BoundingBox::new(48.1, 11.4, 48.2, 11.6),
            resolution: 10,
        };
        let layer = Layer::new(workspace.workspace_id, spec);
        store.insert_layer_with_usage(
            layer.clone(),
            geoqb_common::model::UsageEvent::new(
                tenant.tenant_id,
                geoqb_common::model::UsageKind::LayerCreated,
                Some(layer.layer_id),
            ),
        );
        layer
    }

    async fn wait_for_terminal(store: &TenantStore, layer_id: &Uuid) -> Layer {
        for _ in 0..200 {
            if let Some(layer) = store.layer(layer_id) {
                if layer.status.is_terminal() {
                    return layer;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("layer never reached a terminal state");
    }

    fn start(
        adapter: Arc<dyn IngestionAdapter>,
        config: OrchestratorConfig,
    ) -> (Arc<TenantStore>, Arc<IngestionOrchestrator>) {
        let store = Arc::new(TenantStore::new());
        let lifecycle = Arc::new(LayerLifecycleManager::new(store.clone()));
        let orchestrator = IngestionOrchestrator::start(config, store.clone(), lifecycle, adapter);
        (store, orchestrator)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_successful_run_completes_layer() {
        let adapter = Arc::new(ScriptedAdapter::ok(3));
        let (store, orchestrator) = start(adapter.clone(), OrchestratorConfig::default());
        let layer = seed_layer(&store);

        orchestrator.schedule(layer.layer_id);
        let done = wait_for_terminal(&store, &layer.layer_id).await;

        assert_eq!(done.status, LayerStatus::Completed);
        assert_eq!(done.feature_count, 3);
        let metadata = done.metadata.unwrap();
        assert_eq!(metadata["osm_features"], 3);
        assert_eq!(metadata["h3_resolution"], 10);
        assert_eq!(adapter.calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_empty_result_is_failure() {
        let adapter = Arc::new(ScriptedAdapter::ok(0));
        let (store, orchestrator) = start(adapter, OrchestratorConfig::default());
        let layer = seed_layer(&store);

        orchestrator.schedule(layer.layer_id);
        let done = wait_for_terminal(&store, &layer.layer_id).await;

        assert_eq!(done.status, LayerStatus::Failed);
        assert!(done.error_message.unwrap().contains("no data"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_adapter_error_recorded() {
        let adapter = Arc::new(ScriptedAdapter {
            calls: AtomicUsize::new(0),
            features: 0,
            delay_ms: 0,
            fail: true,
        });
        let (store, orchestrator) = start(adapter, OrchestratorConfig::default());
        let layer = seed_layer(&store);

        orchestrator.schedule(layer.layer_id);
        let done = wait_for_terminal(&store, &layer.layer_id).await;

        assert_eq!(done.status, LayerStatus::Failed);
        assert!(done.error_message.unwrap().contains("overpass returned 504"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_adapter_timeout_recorded() {
        let adapter = Arc::new(ScriptedAdapter {
            calls: AtomicUsize::new(0),
            features: 1,
            delay_ms: 5_000,
            fail: false,
        });
        let config = OrchestratorConfig {
            adapter_timeout_secs: 0,
            ..OrchestratorConfig::default()
        };
        let (store, orchestrator) = start(adapter, config);
        let layer = seed_layer(&store);

        orchestrator.schedule(layer.layer_id);
        let done = wait_for_terminal(&store, &layer.layer_id).await;

        assert_eq!(done.status, LayerStatus::Failed);
        assert!(done.error_message.unwrap().contains("timed out"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_duplicate_schedule_runs_once() {
        let adapter = Arc::new(ScriptedAdapter {
            calls: AtomicUsize::new(0),
            features: 2,
            delay_ms: 50,
            fail: false,
        });
        let (store, orchestrator) = start(adapter.clone(), OrchestratorConfig::default());
        let layer = seed_layer(&store);

        // e.g. a user clicking "reingest" twice
        orchestrator.schedule(layer.layer_id);
        orchestrator.schedule(layer.layer_id);
        let done = wait_for_terminal(&store, &layer.layer_id).await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(done.status, LayerStatus::Completed);
        assert_eq!(adapter.calls(), 1);
        assert_eq!(store.layer(&layer.layer_id).unwrap().feature_count, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_canceled_item_never_runs() {
        let adapter = Arc::new(ScriptedAdapter::ok(1));
        let config = OrchestratorConfig {
            workers: 1,
            ..OrchestratorConfig::default()
        };
        let (store, orchestrator) = start(adapter.clone(), config);
        let layer = seed_layer(&store);

        orchestrator.cancel(layer.layer_id);
        orchestrator.schedule(layer.layer_id);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(adapter.calls(), 0);
        assert_eq!(
            store.layer(&layer.layer_id).unwrap().status,
            LayerStatus::Pending
        );
    }
}
