//! Narrow contracts for the systems discovery talks to.

pub mod kubectl;
pub mod prometheus;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, warn};

pub use kubectl::KubectlCluster;
pub use prometheus::PrometheusHttp;

/// Configuration problems that end discovery with a message instead of
/// routing to recovery.
#[derive(Debug, Error)]
pub enum ClusterConfigError {
    #[error("No kubeconfig could be loaded: {0}")]
    NoConfig(String),
    #[error("No contexts were found in the active kubeconfig")]
    NoContexts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubeContext {
    pub name: String,
    pub cluster: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub name: String,
    pub namespace: String,
    pub replicas: u32,
    pub match_labels: BTreeMap<String, String>,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub namespace: String,
    pub port: u16,
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

impl Service {
    /// In-cluster URL of the service's first port.
    pub fn cluster_url(&self) -> String {
        format!("http://{}.{}.svc:{}", self.name, self.namespace, self.port)
    }

    pub fn local_url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    /// Whether every selector label is present on `labels`.
    pub fn selects(&self, labels: &BTreeMap<String, String>) -> bool {
        !self.selector.is_empty()
            && self
                .selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaBounds {
    pub min: u32,
    pub max: u32,
}

#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn contexts(&self) -> anyhow::Result<Vec<KubeContext>>;

    async fn namespaces(&self, context: &str) -> anyhow::Result<Vec<String>>;

    async fn deployments(&self, context: &str, namespace: &str) -> anyhow::Result<Vec<Deployment>>;

    async fn services(&self, context: &str, namespace: &str) -> anyhow::Result<Vec<Service>>;

    /// Looks a service up by name across all namespaces.
    async fn find_service(&self, context: &str, name: &str) -> anyhow::Result<Option<Service>>;

    /// Autoscaler bounds targeting `deployment`, if one exists.
    async fn replica_bounds(
        &self,
        context: &str,
        namespace: &str,
        deployment: &str,
    ) -> anyhow::Result<Option<ReplicaBounds>>;

    async fn port_forward(&self, context: &str, service: &Service) -> anyhow::Result<ProxyHandle>;
}

#[async_trait]
pub trait MetricsBackend: Send + Sync {
    async fn reachable(&self, endpoint: &str) -> bool;

    /// Names of the metrics carrying every one of `labels`.
    async fn metric_names(
        &self,
        endpoint: &str,
        labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<String>>;
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

enum ProxyInner {
    Process(Child),
    Detached(Option<ReleaseHook>),
}

/// A live port-forward. Released explicitly at module finish, and
/// implicitly when dropped.
pub struct ProxyHandle {
    description: String,
    inner: Option<ProxyInner>,
}

impl ProxyHandle {
    pub fn spawned(description: impl Into<String>, child: Child) -> Self {
        Self {
            description: description.into(),
            inner: Some(ProxyInner::Process(child)),
        }
    }

    /// A proxy without a process behind it; `on_release` runs once when it
    /// is released or dropped.
    pub fn detached(description: impl Into<String>, on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            description: description.into(),
            inner: Some(ProxyInner::Detached(Some(Box::new(on_release)))),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_released(&self) -> bool {
        self.inner.is_none()
    }

    pub fn release(&mut self) {
        match self.inner.take() {
            Some(ProxyInner::Process(mut child)) => {
                if let Err(err) = child.start_kill() {
                    warn!(proxy = %self.description, error = %err, "failed to stop port-forward");
                } else {
                    debug!(proxy = %self.description, "stopped port-forward");
                }
            }
            Some(ProxyInner::Detached(mut hook)) => {
                if let Some(hook) = hook.take() {
                    hook();
                }
            }
            None => {}
        }
    }
}

impl Drop for ProxyHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for ProxyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("description", &self.description)
            .field("released", &self.is_released())
            .finish()
    }
}
