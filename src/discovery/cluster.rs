//! Kubernetes discovery: context, namespace, deployment and container, then
//! the services in front of the deployment and a cluster-wide prometheus.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::record::{prompt_error, prompt_other, DiscoveryModule, ModuleRecord, RecoveryCopy, Resolution};
use super::units::{cpu_cores, memory_gib, min_max};
use super::DiscoveryContext;
use crate::backend::{ClusterBackend, ClusterConfigError, Container, ReplicaBounds, Service};
use crate::emit::MANUAL_CONFIGURATION;
use crate::prompt::{PromptOptions, PromptResult};
use crate::wizard::{StepId, StepOutcome, StepState};

pub const CLUSTER: &str = "cluster";

/// Namespaces never offered for selection.
pub const EXCLUDED_NAMESPACES: &[&str] = &["kube-node-lease", "kube-public", "kube-system"];

const CONTEXT: &str = "context";
const NAMESPACE: &str = "namespace";
const DEPLOYMENT: &str = "deployment_name";
const CONTAINER_SETTINGS: &str = "container_settings";
const MATCH_LABELS: &str = "match_labels";
const CONFIG_ERROR: &str = "config_error";
const NO_DEPLOYMENTS: &str = "no_deployments_found";
const ACKNOWLEDGED: &str = "acknowledged";
const SERVICES: &str = "services";
const PROMETHEUS: &str = "prometheus";

const TRACKED: &[&str] = &[CONTEXT, NAMESPACE, DEPLOYMENT, CONTAINER_SETTINGS];

const DEFAULT_CPU_LIMIT: &str = "100m";
const DEFAULT_MEMORY_LIMIT: &str = "128Mi";
const RESOURCE_STEP: f64 = 0.125;
const MIN_MULTIPLIER: f64 = 0.25;
const MAX_MULTIPLIER: f64 = 4.0;

pub const MSG_NO_DEPLOYMENTS: &str =
    "Discovery stopped: the selected context and namespace contain no deployments";

const ERROR_COPY: RecoveryCopy = RecoveryCopy {
    title: "Unable to Finish Kubernetes Discovery",
    lines: &[
        "Discovery has encountered an unexpected circumstance and is unable to complete Kubernetes discovery",
        "Select Ok to continue to the next discovery section, or select Back if you would like to retry the previous action",
    ],
};

step_kind! {
    pub enum ClusterStep {
        Run => "run",
        SelectNamespace => "select_namespace",
        SelectDeployment => "select_deployment",
        SelectContainer => "select_container",
        Finish => "finish",
        PromptError => "prompt_error",
        PromptOther => "prompt_other",
        Exit => "exit",
    }
}

pub struct ClusterModule {
    record: ModuleRecord,
    cluster: Arc<dyn ClusterBackend>,
    finished: StepId,
    context: Option<String>,
    namespace: Option<String>,
    deployment: Option<String>,
    match_labels: BTreeMap<String, String>,
    components: Map<String, Value>,
}

impl ClusterModule {
    /// `finished` is the step control returns to once this section is done,
    /// whether or not discovery succeeded.
    pub fn new(cluster: Arc<dyn ClusterBackend>, finished: StepId) -> Self {
        Self {
            record: ModuleRecord::new(CLUSTER, TRACKED),
            cluster,
            finished,
            context: None,
            namespace: None,
            deployment: None,
            match_labels: BTreeMap::new(),
            components: Map::new(),
        }
    }

    pub fn initial_step(&self) -> StepId {
        self.record.step(ClusterStep::Run)
    }

    fn next(&self, cx: &mut DiscoveryContext<'_>, step: ClusterStep) -> StepOutcome {
        cx.call_next(self.record.step(step));
        StepOutcome::Forward
    }

    fn context(&self) -> anyhow::Result<String> {
        self.context.clone().context("no kubernetes context was selected")
    }

    fn namespace(&self) -> anyhow::Result<String> {
        self.namespace.clone().context("no namespace was selected")
    }

    fn deployment(&self) -> anyhow::Result<String> {
        self.deployment.clone().context("no deployment was selected")
    }

    async fn select_context(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            match self.cluster.contexts().await {
                Ok(contexts) => {
                    let labels: Vec<String> = contexts
                        .iter()
                        .map(|context| format!("{} - {}", context.name, context.cluster))
                        .collect();
                    let answer = cx
                        .prompts
                        .choose_one(
                            "Select Context of App to be Optimized",
                            "Context - Cluster:",
                            &labels,
                            PromptOptions::with_other(),
                        )
                        .await?;
                    state.set_interacted(true);
                    match answer {
                        PromptResult::Back => return Ok(StepOutcome::Back),
                        PromptResult::Other => state.select_other(),
                        PromptResult::Value(index) => {
                            state.insert(CONTEXT, contexts[index].name.clone())
                        }
                    }
                }
                Err(err) => {
                    let Some(config) = err.downcast_ref::<ClusterConfigError>() else {
                        return Err(err);
                    };
                    warn!(error = %config, "kubeconfig is not usable");
                    state.insert(CONFIG_ERROR, config.to_string());
                }
            }
        }

        if let Some(reason) = state.get_str(CONFIG_ERROR) {
            cx.session.replace_messages([format!(
                "{reason}. Please ensure you have a valid kubeconfig on this host"
            )]);
            return Ok(StepOutcome::Finish);
        }
        if state.other_selected() {
            return Ok(self.next(cx, ClusterStep::PromptOther));
        }
        let context = state
            .get_str(CONTEXT)
            .context("cached context selection is missing")?
            .to_string();
        cx.session.shared.topology.context = Some(context.clone());
        self.context = Some(context);
        Ok(self.next(cx, ClusterStep::SelectNamespace))
    }

    async fn select_namespace(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let context = self.context()?;
        if state.is_empty() {
            state.set_interacted(false);
            let namespaces: Vec<String> = self
                .cluster
                .namespaces(&context)
                .await?
                .into_iter()
                .filter(|namespace| !EXCLUDED_NAMESPACES.contains(&namespace.as_str()))
                .collect();
            if namespaces.is_empty() {
                bail!("context {context} has no namespaces outside the system ones");
            }

            let preferred = if namespaces.len() == 1 {
                namespaces.first().cloned()
            } else {
                preferred_name(cx, &namespaces)
            };
            // An auto-selected namespace must hold something to optimize.
            let automatic = match preferred {
                Some(namespace) => {
                    let deployments = self.cluster.deployments(&context, &namespace).await?;
                    (!deployments.is_empty()).then_some(namespace)
                }
                None => None,
            };

            match automatic {
                Some(namespace) => {
                    debug!(namespace = %namespace, "namespace selected automatically");
                    state.insert(NAMESPACE, namespace);
                }
                None => {
                    let answer = cx
                        .prompts
                        .choose_one(
                            "Select Namespace of App to be Optimized",
                            "Namespace:",
                            &namespaces,
                            PromptOptions::with_other(),
                        )
                        .await?;
                    state.set_interacted(true);
                    match answer {
                        PromptResult::Back => return Ok(StepOutcome::Back),
                        PromptResult::Other => state.select_other(),
                        PromptResult::Value(index) => state.insert(NAMESPACE, namespaces[index].clone()),
                    }
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, ClusterStep::PromptOther));
        }
        let namespace = state
            .get_str(NAMESPACE)
            .context("cached namespace selection is missing")?
            .to_string();
        cx.session.shared.topology.namespace = Some(namespace.clone());
        self.namespace = Some(namespace);
        Ok(self.next(cx, ClusterStep::SelectDeployment))
    }

    async fn select_deployment(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let context = self.context()?;
        let namespace = self.namespace()?;
        if state.is_empty() {
            state.set_interacted(false);
            let deployments = self.cluster.deployments(&context, &namespace).await?;
            if deployments.is_empty() {
                state.insert(NO_DEPLOYMENTS, true);
            } else {
                let names: Vec<String> = deployments.iter().map(|item| item.name.clone()).collect();
                let automatic = if names.len() == 1 {
                    Some(0)
                } else {
                    preferred_name(cx, &names)
                        .and_then(|name| names.iter().position(|candidate| *candidate == name))
                };
                let chosen = match automatic {
                    Some(index) => Some(index),
                    None => {
                        let answer = cx
                            .prompts
                            .choose_one(
                                "Select Deployment to be Optimized",
                                "Deployment:",
                                &names,
                                PromptOptions::with_other(),
                            )
                            .await?;
                        state.set_interacted(true);
                        match answer {
                            PromptResult::Back => return Ok(StepOutcome::Back),
                            PromptResult::Other => {
                                state.select_other();
                                None
                            }
                            PromptResult::Value(index) => Some(index),
                        }
                    }
                };
                if let Some(index) = chosen {
                    let deployment = &deployments[index];
                    if deployment.match_labels.is_empty() {
                        bail!("deployment {} has no matchLabels selector", deployment.name);
                    }
                    state.insert(DEPLOYMENT, deployment.name.clone());
                    state.insert_as(MATCH_LABELS, &deployment.match_labels)?;
                }
            }
        }

        if state.get_bool(NO_DEPLOYMENTS) {
            return Ok(self.next(cx, ClusterStep::Exit));
        }
        if state.other_selected() {
            return Ok(self.next(cx, ClusterStep::PromptOther));
        }
        let deployment = state
            .get_str(DEPLOYMENT)
            .context("cached deployment selection is missing")?
            .to_string();
        self.match_labels = state
            .get_as(MATCH_LABELS)
            .context("cached deployment selector is missing")?;
        let topology = &mut cx.session.shared.topology;
        topology.deployment = Some(deployment.clone());
        topology.match_labels = self.match_labels.clone();
        self.deployment = Some(deployment);
        Ok(self.next(cx, ClusterStep::SelectContainer))
    }

    async fn select_container(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        self.components.clear();
        if state.is_empty() {
            state.set_interacted(false);
            let context = self.context()?;
            let namespace = self.namespace()?;
            let name = self.deployment()?;
            let deployment = self
                .cluster
                .deployments(&context, &namespace)
                .await?
                .into_iter()
                .find(|item| item.name == name)
                .with_context(|| format!("deployment {name} no longer exists in {namespace}"))?;

            let container = match deployment.containers.as_slice() {
                [] => bail!("deployment {name} has no containers"),
                [only] => Some(only.clone()),
                containers => {
                    let names: Vec<String> =
                        containers.iter().map(|container| container.name.clone()).collect();
                    let answer = cx
                        .prompts
                        .choose_one(
                            "Select Container to be Optimized",
                            "Container:",
                            &names,
                            PromptOptions::with_other(),
                        )
                        .await?;
                    state.set_interacted(true);
                    match answer {
                        PromptResult::Back => return Ok(StepOutcome::Back),
                        PromptResult::Other => {
                            state.select_other();
                            None
                        }
                        PromptResult::Value(index) => Some(containers[index].clone()),
                    }
                }
            };

            if let Some(container) = container {
                let bounds = self
                    .cluster
                    .replica_bounds(&context, &namespace, &name)
                    .await?;
                let settings = container_settings(&container, deployment.replicas, bounds)?;
                let key = format!("{name}/{}", container.name);
                state.insert(CONTAINER_SETTINGS, json!({ key: { "settings": settings } }));
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, ClusterStep::PromptOther));
        }
        self.components = state
            .get_as(CONTAINER_SETTINGS)
            .context("cached container settings are missing")?;
        Ok(self.next(cx, ClusterStep::Finish))
    }

    async fn finish(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let namespace = self.namespace()?;
        if state.is_empty() {
            state.set_interacted(false);
            let context = self.context()?;
            let services: Vec<Service> = self
                .cluster
                .services(&context, &namespace)
                .await?
                .into_iter()
                .filter(|service| service.selects(&self.match_labels))
                .collect();
            let prometheus = self.cluster.find_service(&context, PROMETHEUS).await?;
            debug!(services = services.len(), prometheus = prometheus.is_some(), "cluster discovery finished");
            state.insert_as(SERVICES, &services)?;
            if let Some(prometheus) = &prometheus {
                state.insert_as(PROMETHEUS, prometheus)?;
            }
        }

        let topology = &mut cx.session.shared.topology;
        topology.services = state.get_as(SERVICES).unwrap_or_default();
        topology.prometheus = state.get_as(PROMETHEUS);
        cx.session.servo_config.insert(
            "k8s".to_string(),
            json!({
                "namespace": namespace,
                "application": { "components": self.components },
            }),
        );
        cx.call_next(self.finished.clone());
        Ok(StepOutcome::Forward)
    }

    async fn exit(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let lines = vec![
                "Specified context and namespace contained no deployments".to_string(),
                "Select Back to pick another namespace or select Ok to exit".to_string(),
            ];
            let answer = cx
                .prompts
                .acknowledge("No Deployments Found", &lines, PromptOptions::default())
                .await?;
            if answer == PromptResult::Back {
                return Ok(StepOutcome::Back);
            }
            state.insert(ACKNOWLEDGED, true);
        }
        cx.session.replace_messages([MSG_NO_DEPLOYMENTS]);
        Ok(StepOutcome::Finish)
    }

    /// Marks the section for manual configuration and returns to the parent.
    fn degrade(&mut self, cx: &mut DiscoveryContext<'_>) -> StepOutcome {
        cx.session
            .servo_config
            .insert("k8s".to_string(), Value::from(MANUAL_CONFIGURATION));
        let topology = &mut cx.session.shared.topology;
        if topology.namespace.as_deref().map_or(true, str::is_empty) {
            topology.namespace = Some(MANUAL_CONFIGURATION.to_string());
        }
        cx.call_next(self.finished.clone());
        StepOutcome::Forward
    }
}

/// Configured app or account name, if it is one of `candidates`.
fn preferred_name(cx: &DiscoveryContext<'_>, candidates: &[String]) -> Option<String> {
    let settings = &cx.session.shared.settings;
    [settings.app.as_ref(), settings.account.as_ref()]
        .into_iter()
        .flatten()
        .find(|name| candidates.contains(name))
        .cloned()
}

/// Replica, cpu and memory ranges the optimizer may explore for `container`.
fn container_settings(
    container: &Container,
    replicas: u32,
    bounds: Option<ReplicaBounds>,
) -> anyhow::Result<Value> {
    let cpu = cpu_cores(container.cpu_limit.as_deref().unwrap_or(DEFAULT_CPU_LIMIT))?;
    let mem = memory_gib(container.memory_limit.as_deref().unwrap_or(DEFAULT_MEMORY_LIMIT))?;
    let (cpu_min, cpu_max) = min_max(cpu, RESOURCE_STEP, MIN_MULTIPLIER, MAX_MULTIPLIER);
    let (mem_min, mem_max) = min_max(mem, RESOURCE_STEP, MIN_MULTIPLIER, MAX_MULTIPLIER);
    let (replicas_min, replicas_max) = match bounds {
        Some(bounds) => (bounds.min, bounds.max),
        None => {
            let (min, max) = min_max(f64::from(replicas), 1.0, MIN_MULTIPLIER, MAX_MULTIPLIER);
            (min as u32, max as u32)
        }
    };
    Ok(json!({
        "replicas": { "min": replicas_min, "max": replicas_max },
        "cpu": { "min": cpu_min, "max": cpu_max, "step": RESOURCE_STEP },
        "mem": { "min": mem_min, "max": mem_max, "step": RESOURCE_STEP },
    }))
}

#[async_trait]
impl DiscoveryModule for ClusterModule {
    type Step = ClusterStep;

    const PROMPT_ERROR: ClusterStep = ClusterStep::PromptError;

    fn record(&self) -> &ModuleRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut ModuleRecord {
        &mut self.record
    }

    async fn run(
        &mut self,
        step: ClusterStep,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        match step {
            ClusterStep::Run => self.select_context(cx, state).await,
            ClusterStep::SelectNamespace => self.select_namespace(cx, state).await,
            ClusterStep::SelectDeployment => self.select_deployment(cx, state).await,
            ClusterStep::SelectContainer => self.select_container(cx, state).await,
            ClusterStep::Finish => self.finish(cx, state).await,
            ClusterStep::Exit => self.exit(cx, state).await,
            ClusterStep::PromptError => {
                match prompt_error(&mut self.record, cx, state, &ERROR_COPY).await? {
                    Resolution::Back => Ok(StepOutcome::Back),
                    Resolution::Proceed => Ok(self.degrade(cx)),
                }
            }
            ClusterStep::PromptOther => match prompt_other(&mut self.record, cx, state).await? {
                Resolution::Back => Ok(StepOutcome::Back),
                Resolution::Proceed => Ok(self.degrade(cx)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(cpu: Option<&str>, memory: Option<&str>) -> Container {
        Container {
            name: "main".into(),
            cpu_limit: cpu.map(str::to_string),
            memory_limit: memory.map(str::to_string),
        }
    }

    #[test]
    fn unset_limits_fall_back_to_defaults() {
        let settings = container_settings(&container(None, None), 2, None).unwrap();
        assert_eq!(settings["cpu"]["min"], json!(0.1));
        assert_eq!(settings["cpu"]["max"], json!(0.375));
        assert_eq!(settings["mem"]["max"], json!(0.5));
        assert_eq!(settings["replicas"], json!({ "min": 1, "max": 8 }));
    }

    #[test]
    fn autoscaler_bounds_win_over_computed_replicas() {
        let bounds = ReplicaBounds { min: 2, max: 12 };
        let settings =
            container_settings(&container(Some("1"), Some("1Gi")), 3, Some(bounds)).unwrap();
        assert_eq!(settings["replicas"], json!({ "min": 2, "max": 12 }));
        assert_eq!(settings["cpu"], json!({ "min": 0.25, "max": 4.0, "step": 0.125 }));
        assert_eq!(settings["mem"], json!({ "min": 0.25, "max": 4.0, "step": 0.125 }));
    }

    #[test]
    fn malformed_limits_are_errors() {
        assert!(container_settings(&container(Some("fast"), None), 1, None).is_err());
    }
}
