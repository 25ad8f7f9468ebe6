//! Kubernetes [`NodeProvider`]: manages one `Pod` per fleet node, using pod
//! labels as the node's tag set.

use std::collections::BTreeMap;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::{Api, Client};

use crate::error::ProviderError;
use crate::model::{NodeId, NodeTags};
use crate::provider::{NodeProvider, Result};

/// Label key used to mark pods as managed fleet nodes, distinguishing them
/// from unrelated workloads in the same namespace.
pub const MANAGED_LABEL: &str = "fleet-autoscaler/managed";

#[derive(Debug, Clone)]
pub struct KubernetesNodeProvider {
    pods: Api<Pod>,
    namespace: String,
    pod_template: serde_json::Value,
}

impl KubernetesNodeProvider {
    pub fn new(client: Client, namespace: impl Into<String>, pod_template: serde_json::Value) -> Self {
        let namespace = namespace.into();
        Self {
            pods: Api::namespaced(client, &namespace),
            namespace,
            pod_template,
        }
    }

    pub async fn try_default(namespace: impl Into<String>) -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("failed to construct default Kubernetes client")?;
        Ok(Self::new(client, namespace, serde_json::Value::Null))
    }

    fn list_params(tag_filters: &BTreeMap<String, String>) -> ListParams {
        let mut selector = format!("{MANAGED_LABEL}=true");
        for (key, value) in tag_filters {
            selector.push_str(&format!(",{}={}", sanitize_label_key(key), value));
        }
        ListParams::default().labels(&selector)
    }
}

/// Kubernetes label keys are restricted; tag names here are already
/// identifier-safe constants, but this keeps the mapping explicit and in
/// one place should that change.
fn sanitize_label_key(key: &str) -> String {
    key.to_lowercase().replace('_', "-")
}

fn labels_to_tags(labels: &std::collections::BTreeMap<String, String>) -> NodeTags {
    labels
        .iter()
        .filter(|(k, _)| k.as_str() != MANAGED_LABEL)
        .map(|(k, v)| (k.to_uppercase().replace('-', "_"), v.clone()))
        .collect()
}

fn tags_to_labels(tags: &NodeTags) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = tags
        .iter()
        .map(|(k, v)| (sanitize_label_key(k), v.clone()))
        .collect();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels
}

#[async_trait]
impl NodeProvider for KubernetesNodeProvider {
    async fn non_terminated_nodes(&self, tag_filters: &BTreeMap<String, String>) -> Result<Vec<NodeId>> {
        let list = self
            .pods
            .list(&Self::list_params(tag_filters))
            .await
            .map_err(|e| classify_kube_error(e, "listing pods"))?;
        Ok(list
            .into_iter()
            .filter_map(|pod| pod.metadata.name.map(NodeId))
            .collect())
    }

    async fn node_tags(&self, id: &NodeId) -> Result<NodeTags> {
        let pod = self
            .pods
            .get(id.as_str())
            .await
            .map_err(|e| classify_kube_error(e, "reading pod"))?;
        Ok(labels_to_tags(&pod.metadata.labels.unwrap_or_default()))
    }

    async fn internal_ip(&self, id: &NodeId) -> Result<Option<String>> {
        let pod = self
            .pods
            .get(id.as_str())
            .await
            .map_err(|e| classify_kube_error(e, "reading pod"))?;
        Ok(pod.status.and_then(|s| s.pod_ip))
    }

    async fn terminate_nodes(&self, ids: &[NodeId]) -> Result<()> {
        for id in ids {
            match self.pods.delete(id.as_str(), &DeleteParams::default()).await {
                Ok(_) => {}
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    // Already gone: terminating an already-terminated node is tolerated.
                }
                Err(e) => return Err(classify_kube_error(e, "deleting pod")),
            }
        }
        Ok(())
    }

    async fn create_node(
        &self,
        node_type: &str,
        node_config: &serde_json::Value,
        count: usize,
    ) -> Result<Vec<NodeId>> {
        let mut created = Vec::with_capacity(count);
        for _ in 0..count {
            let name = format!("fleet-node-{}", uuid::Uuid::new_v4());
            let mut labels = BTreeMap::new();
            labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
            labels.insert(
                sanitize_label_key(crate::model::tag::USER_NODE_TYPE),
                node_type.to_string(),
            );

            let spec_override = node_config_or_default(node_config, &self.pod_template);
            let mut pod = Pod {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(self.namespace.clone()),
                    labels: Some(labels),
                    ..Default::default()
                },
                ..Default::default()
            };
            pod.spec = serde_json::from_value(spec_override).ok();

            self.pods
                .create(&PostParams::default(), &pod)
                .await
                .map_err(|e| classify_kube_error(e, "creating pod"))?;
            created.push(NodeId(name));
        }
        Ok(created)
    }

    async fn set_node_tags(&self, id: &NodeId, tags: &NodeTags) -> Result<()> {
        let patch = serde_json::json!({
            "metadata": {
                "labels": tags_to_labels(tags),
            }
        });
        self.pods
            .patch(id.as_str(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify_kube_error(e, "patching pod labels"))?;
        Ok(())
    }
}

fn node_config_or_default(node_config: &serde_json::Value, template: &serde_json::Value) -> serde_json::Value {
    if node_config.is_null() {
        template.clone()
    } else {
        node_config.clone()
    }
}

/// Classifies a `kube::Error` into a [`ProviderError`], surfacing the
/// long-observed transport-retry-exhaustion case so the reconciler can
/// exclude it from the consecutive-failure counter.
fn classify_kube_error(error: kube::Error, context: &str) -> ProviderError {
    match &error {
        kube::Error::HyperError(_) | kube::Error::Service(_) => {
            ProviderError::TransportRetryExhausted(format!("{context}: {error}"))
        }
        _ => ProviderError::Request(anyhow::anyhow!("{context}: {error}")),
    }
}
