//! The provider abstraction: a narrow capability the pool loop invokes to
//! bring instances into and out of existence.
//!
//! Concrete cloud providers are out of scope for the core (they're treated
//! as an opaque interface); this crate ships only `FakeProvider`, the
//! in-process self-bootstrapping reference implementation the end-to-end
//! scenarios and integration tests run against (§9 design note).

#![forbid(unsafe_code)]

use async_trait::async_trait;
use navarch_error::NavarchResult;
use navarch_proto::{GpuDescriptor, NodeId, NodeMetadata};
use navarch_store::{RegisterNodeInput, Store};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub name: String,
    pub instance_type: String,
    pub region: String,
    pub zone: Option<String>,
    pub ssh_keys: Vec<String>,
    pub labels: HashMap<String, String>,
    pub user_data: String,
}

#[derive(Debug, Clone)]
pub struct ProvisionedSummary {
    pub id: String,
    pub region: String,
    pub zone: Option<String>,
    pub status: String,
    pub gpu_count: Option<u32>,
    pub gpu_type: Option<String>,
}

/// The provider contract (§4.2). Implementations are opaque to the pool
/// loop beyond this surface; `self_bootstraps` lets a provider signal that
/// the pool loop should skip remote SSH/user-data setup because the
/// provider already brings the node up to the point of registering itself.
#[async_trait]
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    async fn provision(&self, req: &ProvisionRequest) -> NavarchResult<ProvisionedSummary>;
    /// Idempotent: terminating an unknown or already-terminated id must
    /// succeed (§4.2).
    async fn terminate(&self, provider_instance_id: &str) -> NavarchResult<()>;
    async fn list(&self) -> NavarchResult<Vec<ProvisionedSummary>>;
    fn self_bootstraps(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
struct FakeInstance {
    summary: ProvisionedSummary,
    node_id: NodeId,
    terminated: bool,
}

/// Self-bootstrapping reference provider: "provisioning" directly registers
/// a node into the store instead of doing SSH/user-data bootstrap against
/// a real VM. This is the reference integration-test provider (§9).
#[derive(Debug, Clone)]
pub struct FakeProvider {
    store: Store,
    instances: Arc<Mutex<HashMap<String, FakeInstance>>>,
    gpu_count_per_instance: u32,
}

impl FakeProvider {
    pub fn new(store: Store) -> Self {
        Self { store, instances: Arc::new(Mutex::new(HashMap::new())), gpu_count_per_instance: 1 }
    }

    pub fn with_gpu_count(mut self, count: u32) -> Self {
        self.gpu_count_per_instance = count;
        self
    }
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn provision(&self, req: &ProvisionRequest) -> NavarchResult<ProvisionedSummary> {
        let instance_id = format!("fake-{}", uuid::Uuid::new_v4());
        let node_id = NodeId::new(instance_id.clone());

        let gpus: Vec<GpuDescriptor> = (0..self.gpu_count_per_instance)
            .map(|i| GpuDescriptor {
                index: i,
                uuid: format!("GPU-{}-{}", instance_id, i),
                name: req.instance_type.clone(),
                pci_bus_id: format!("0000:{:02x}:00.0", i),
            })
            .collect();

        let mut metadata = NodeMetadata { hostname: Some(req.name.clone()), ..Default::default() };
        metadata.labels = req.labels.clone();

        self.store
            .register_node(RegisterNodeInput {
                node_id: node_id.clone(),
                provider: self.name().to_string(),
                region: req.region.clone(),
                zone: req.zone.clone(),
                instance_type: req.instance_type.clone(),
                gpus,
                metadata,
            })
            .await?;

        let summary = ProvisionedSummary {
            id: instance_id.clone(),
            region: req.region.clone(),
            zone: req.zone.clone(),
            status: "provisioning".to_string(),
            gpu_count: Some(self.gpu_count_per_instance),
            gpu_type: Some(req.instance_type.clone()),
        };

        self.instances.lock().await.insert(
            instance_id.clone(),
            FakeInstance { summary: summary.clone(), node_id, terminated: false },
        );

        info!(instance_id, name = %req.name, "fake provider provisioned instance");
        Ok(summary)
    }

    async fn terminate(&self, provider_instance_id: &str) -> NavarchResult<()> {
        let mut instances = self.instances.lock().await;
        let Some(instance) = instances.get_mut(provider_instance_id) else {
            // unknown id: idempotent success, per §4.2.
            return Ok(());
        };
        if instance.terminated {
            return Ok(());
        }
        instance.terminated = true;
        let node_id = instance.node_id.clone();
        drop(instances);

        if let Err(err) = self.store.set_node_status(&node_id, navarch_proto::NodeStatus::Terminated).await {
            warn!(%node_id, %err, "terminate: node already gone from store");
        }
        Ok(())
    }

    async fn list(&self) -> NavarchResult<Vec<ProvisionedSummary>> {
        let instances = self.instances.lock().await;
        Ok(instances.values().filter(|i| !i.terminated).map(|i| i.summary.clone()).collect())
    }

    fn self_bootstraps(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProvisionRequest {
        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), "training".to_string());
        ProvisionRequest {
            name: "training-node".to_string(),
            instance_type: "a100.x1".to_string(),
            region: "us-east".to_string(),
            zone: None,
            ssh_keys: vec![],
            labels,
            user_data: String::new(),
        }
    }

    #[tokio::test]
    async fn provision_registers_node_directly() {
        let store = Store::new();
        let provider = FakeProvider::new(store.clone());
        let summary = provider.provision(&request()).await.expect("provision");

        let node = store.get_node(&NodeId::new(summary.id.clone())).await.expect("node exists");
        assert_eq!(node.metadata.pool_name(), Some("training"));
        assert_eq!(node.status, navarch_proto::NodeStatus::Active);
    }

    #[tokio::test]
    async fn self_bootstraps_is_true() {
        let provider = FakeProvider::new(Store::new());
        assert!(provider.self_bootstraps());
    }

    #[tokio::test]
    async fn terminate_is_idempotent_for_unknown_id() {
        let provider = FakeProvider::new(Store::new());
        provider.terminate("never-existed").await.expect("idempotent success");
        provider.terminate("never-existed").await.expect("idempotent success again");
    }

    #[tokio::test]
    async fn terminate_marks_node_terminated_and_list_excludes_it() {
        let store = Store::new();
        let provider = FakeProvider::new(store.clone());
        let summary = provider.provision(&request()).await.unwrap();

        provider.terminate(&summary.id).await.unwrap();
        // idempotent: terminating again must still succeed
        provider.terminate(&summary.id).await.unwrap();

        let node = store.get_node(&NodeId::new(summary.id.clone())).await.unwrap();
        assert_eq!(node.status, navarch_proto::NodeStatus::Terminated);

        let listed = provider.list().await.unwrap();
        assert!(listed.is_empty());
    }
}
