use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    ClusterBackend, ClusterConfigError, Container, Deployment, KubeContext, ProxyHandle,
    ReplicaBounds, Service,
};

/// Cluster backend that shells out to `kubectl` and parses its JSON output.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    program: PathBuf,
}

impl Default for KubectlCluster {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlCluster {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn json<T: DeserializeOwned>(&self, args: &[&str]) -> anyhow::Result<T> {
        debug!(program = %self.program.display(), ?args, "running kubectl");
        let output = Command::new(&self.program)
            .args(args)
            .args(["-o", "json"])
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.program.display()))?;
        if !output.status.success() {
            bail!(
                "kubectl {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        serde_json::from_slice(&output.stdout)
            .with_context(|| format!("unexpected output from kubectl {}", args.join(" ")))
    }
}

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    namespace: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    #[serde(default)]
    metadata: Metadata,
}

#[derive(Debug, Deserialize)]
struct KubeConfigView {
    #[serde(default)]
    contexts: Option<Vec<NamedContext>>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    #[serde(default)]
    context: ContextBody,
}

#[derive(Debug, Default, Deserialize)]
struct ContextBody {
    #[serde(default)]
    cluster: String,
}

#[derive(Debug, Deserialize)]
struct DeploymentItem {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: DeploymentSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentSpec {
    replicas: Option<u32>,
    #[serde(default)]
    selector: LabelSelector,
    #[serde(default)]
    template: PodTemplate,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelSelector {
    #[serde(default)]
    match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct PodTemplate {
    #[serde(default)]
    spec: PodSpec,
}

#[derive(Debug, Default, Deserialize)]
struct PodSpec {
    #[serde(default)]
    containers: Vec<ContainerItem>,
}

#[derive(Debug, Deserialize)]
struct ContainerItem {
    name: String,
    #[serde(default)]
    resources: Resources,
}

#[derive(Debug, Default, Deserialize)]
struct Resources {
    #[serde(default)]
    limits: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ServiceItem {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    spec: ServiceSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ServiceSpec {
    #[serde(default)]
    ports: Vec<ServicePort>,
    #[serde(default)]
    selector: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct ServicePort {
    port: u16,
}

#[derive(Debug, Deserialize)]
struct AutoscalerItem {
    #[serde(default)]
    spec: AutoscalerSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AutoscalerSpec {
    #[serde(default)]
    scale_target_ref: ScaleTarget,
    min_replicas: Option<u32>,
    #[serde(default)]
    max_replicas: u32,
}

#[derive(Debug, Default, Deserialize)]
struct ScaleTarget {
    #[serde(default)]
    kind: String,
    #[serde(default)]
    name: String,
}

impl From<DeploymentItem> for Deployment {
    fn from(item: DeploymentItem) -> Self {
        Deployment {
            name: item.metadata.name,
            namespace: item.metadata.namespace,
            replicas: item.spec.replicas.unwrap_or(1),
            match_labels: item.spec.selector.match_labels,
            containers: item
                .spec
                .template
                .spec
                .containers
                .into_iter()
                .map(|container| Container {
                    cpu_limit: container.resources.limits.get("cpu").cloned(),
                    memory_limit: container.resources.limits.get("memory").cloned(),
                    name: container.name,
                })
                .collect(),
        }
    }
}

impl ServiceItem {
    /// Services without ports cannot be reached and are skipped.
    fn into_service(self) -> Option<Service> {
        let port = self.spec.ports.first()?.port;
        Some(Service {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            port,
            selector: self.spec.selector.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ClusterBackend for KubectlCluster {
    async fn contexts(&self) -> anyhow::Result<Vec<KubeContext>> {
        let view: KubeConfigView = self
            .json(&["config", "view"])
            .await
            .map_err(|err| ClusterConfigError::NoConfig(format!("{err:#}")))?;
        let contexts: Vec<KubeContext> = view
            .contexts
            .unwrap_or_default()
            .into_iter()
            .map(|named| KubeContext {
                name: named.name,
                cluster: named.context.cluster,
            })
            .collect();
        if contexts.is_empty() {
            return Err(ClusterConfigError::NoContexts.into());
        }
        Ok(contexts)
    }

    async fn namespaces(&self, context: &str) -> anyhow::Result<Vec<String>> {
        let list: List<Named> = self
            .json(&["--context", context, "get", "namespaces"])
            .await?;
        Ok(list.items.into_iter().map(|item| item.metadata.name).collect())
    }

    async fn deployments(&self, context: &str, namespace: &str) -> anyhow::Result<Vec<Deployment>> {
        let list: List<DeploymentItem> = self
            .json(&["--context", context, "--namespace", namespace, "get", "deployments"])
            .await?;
        Ok(list.items.into_iter().map(Deployment::from).collect())
    }

    async fn services(&self, context: &str, namespace: &str) -> anyhow::Result<Vec<Service>> {
        let list: List<ServiceItem> = self
            .json(&["--context", context, "--namespace", namespace, "get", "services"])
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(ServiceItem::into_service)
            .collect())
    }

    async fn find_service(&self, context: &str, name: &str) -> anyhow::Result<Option<Service>> {
        let list: List<ServiceItem> = self
            .json(&["--context", context, "get", "services", "--all-namespaces"])
            .await?;
        Ok(list
            .items
            .into_iter()
            .filter(|item| item.metadata.name == name)
            .find_map(ServiceItem::into_service))
    }

    async fn replica_bounds(
        &self,
        context: &str,
        namespace: &str,
        deployment: &str,
    ) -> anyhow::Result<Option<ReplicaBounds>> {
        let list: List<AutoscalerItem> = self
            .json(&[
                "--context",
                context,
                "--namespace",
                namespace,
                "get",
                "horizontalpodautoscalers",
            ])
            .await?;
        Ok(list
            .items
            .into_iter()
            .find(|item| {
                item.spec.scale_target_ref.kind == "Deployment"
                    && item.spec.scale_target_ref.name == deployment
            })
            .map(|item| ReplicaBounds {
                min: item.spec.min_replicas.unwrap_or(1),
                max: item.spec.max_replicas,
            }))
    }

    async fn port_forward(&self, context: &str, service: &Service) -> anyhow::Result<ProxyHandle> {
        let target = format!("svc/{}", service.name);
        let port = service.port.to_string();
        let child = Command::new(&self.program)
            .args(["--context", context, "--namespace", service.namespace.as_str()])
            .args(["port-forward", target.as_str(), port.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start port-forward to {target}"))?;
        info!(service = %target, port = service.port, "started port-forward");
        Ok(ProxyHandle::spawned(
            format!("{}/{}:{}", service.namespace, target, service.port),
            child,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_json_maps_limits_and_labels() {
        let raw = r#"{
            "items": [{
                "metadata": {"name": "web", "namespace": "shop"},
                "spec": {
                    "replicas": 3,
                    "selector": {"matchLabels": {"app": "web"}},
                    "template": {"spec": {"containers": [
                        {"name": "main", "resources": {"limits": {"cpu": "500m", "memory": "1Gi"}}},
                        {"name": "sidecar"}
                    ]}}
                }
            }]
        }"#;
        let list: List<DeploymentItem> = serde_json::from_str(raw).unwrap();
        let deployment = Deployment::from(list.items.into_iter().next().unwrap());
        assert_eq!(deployment.replicas, 3);
        assert_eq!(deployment.match_labels.get("app").map(String::as_str), Some("web"));
        assert_eq!(deployment.containers[0].cpu_limit.as_deref(), Some("500m"));
        assert_eq!(deployment.containers[1].memory_limit, None);
    }

    #[test]
    fn list_without_items_is_empty() {
        let list: List<DeploymentItem> = serde_json::from_str(r#"{"kind": "List"}"#).unwrap();
        assert!(list.items.is_empty());
    }

    #[test]
    fn portless_services_are_skipped() {
        let raw = r#"{"items": [
            {"metadata": {"name": "headless", "namespace": "shop"}, "spec": {}},
            {"metadata": {"name": "web", "namespace": "shop"},
             "spec": {"ports": [{"port": 8080}], "selector": {"app": "web"}}}
        ]}"#;
        let list: List<ServiceItem> = serde_json::from_str(raw).unwrap();
        let services: Vec<Service> = list
            .items
            .into_iter()
            .filter_map(ServiceItem::into_service)
            .collect();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].port, 8080);
    }

    #[tokio::test]
    async fn missing_binary_is_a_config_error() {
        let backend = KubectlCluster::new("/nonexistent/kubectl-for-tests");
        let err = backend.contexts().await.unwrap_err();
        assert!(err.downcast_ref::<ClusterConfigError>().is_some());
    }
}
