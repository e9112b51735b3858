#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use manifest_builder::backend::{
    ClusterBackend, ClusterConfigError, Container, Deployment, KubeContext, MetricsBackend,
    ProxyHandle, ReplicaBounds, Service,
};
use manifest_builder::config::BuilderConfig;
use manifest_builder::discovery::{Backends, BuilderModule, Discovery};
use manifest_builder::emit::{ArtifactBundle, ArtifactEmitter};
use manifest_builder::errors::WizardError;
use manifest_builder::prompt::{PromptOptions, PromptResult, PromptSurface, ScriptedAnswer, ScriptedPrompts};
use manifest_builder::wizard::{
    CallNext, MemoryStore, MissingInfo, Module, ModuleId, Navigator, Session, StepContext, StepId,
    StepKind, StepOutcome, StepState,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

pub const TRACER: &str = "tracer";
const TRACER_STEPS: &[&str] = &["a", "b", "c", "d", "recover"];
const STEP_KEY: &str = "tracer_step";
const TRACKED: &[&str] = &["endpoint"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TracerStep(pub &'static str);

impl StepKind for TracerStep {
    fn name(self) -> &'static str {
        self.0
    }

    fn from_name(name: &str) -> Option<Self> {
        TRACER_STEPS
            .iter()
            .copied()
            .find(|candidate| *candidate == name)
            .map(TracerStep)
    }
}

/// What a tracer step does once its screen (if any) is answered.
#[derive(Debug, Clone)]
pub enum Then {
    Next(&'static str),
    Finish,
    Fail(&'static str),
    Panic(&'static str),
    /// Forward without registering a successor.
    Stall,
}

#[derive(Debug, Clone)]
pub struct StepPlan {
    pub ask: bool,
    pub writes: Vec<(&'static str, Value)>,
    pub then: Then,
}

impl StepPlan {
    /// Shows an acknowledge screen titled with the step name.
    pub fn ask(then: Then) -> Self {
        Self {
            ask: true,
            writes: Vec::new(),
            then,
        }
    }

    pub fn silent(then: Then) -> Self {
        Self {
            ask: false,
            writes: Vec::new(),
            then,
        }
    }

    pub fn writing(mut self, key: &'static str, value: impl Into<Value>) -> Self {
        self.writes.push((key, value.into()));
        self
    }
}

/// Everything a tracer observed, shared with the test after the module is boxed.
#[derive(Debug, Default)]
pub struct TracerLog {
    pub events: Vec<String>,
    pub backs: Vec<StepState>,
    pub faults: Vec<String>,
    pub missing: Vec<String>,
}

impl TracerLog {
    pub fn count(&self, event: &str) -> usize {
        self.events.iter().filter(|seen| seen.as_str() == event).count()
    }
}

pub type SharedLog = Arc<Mutex<TracerLog>>;

/// A module whose steps follow a per-step plan and log every hook call.
pub struct Tracer {
    id: ModuleId,
    plans: BTreeMap<&'static str, StepPlan>,
    recover: bool,
    missing: MissingInfo,
    log: SharedLog,
}

impl Tracer {
    pub fn new(log: SharedLog) -> Self {
        Self {
            id: ModuleId::new(TRACER),
            plans: BTreeMap::new(),
            recover: true,
            missing: MissingInfo::new(TRACKED),
            log,
        }
    }

    pub fn plan(mut self, step: &'static str, plan: StepPlan) -> Self {
        self.plans.insert(step, plan);
        self
    }

    /// Failures register no recovery step.
    pub fn without_recovery(mut self) -> Self {
        self.recover = false;
        self
    }

    fn push(&self, event: String) {
        self.log.lock().expect("tracer log").events.push(event);
    }

    fn sync_missing(&self) {
        self.log.lock().expect("tracer log").missing = self.missing.missing();
    }
}

pub fn tracer_step(name: &'static str) -> StepId {
    ModuleId::new(TRACER).step(TracerStep(name))
}

#[async_trait]
impl Module<()> for Tracer {
    fn id(&self) -> &ModuleId {
        &self.id
    }

    async fn run_step(
        &mut self,
        step: &StepId,
        cx: &mut StepContext<'_, ()>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let name = step.step_name();
        let plan = self
            .plans
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("no plan for step {name}"))?;
        self.push(format!("run:{name}"));

        if state.is_empty() {
            state.set_interacted(false);
            state.insert(STEP_KEY, name);
            if plan.ask {
                let answer = cx
                    .prompts
                    .acknowledge(name, &[], PromptOptions::default())
                    .await?;
                if answer == PromptResult::Back {
                    return Ok(StepOutcome::Back);
                }
                state.set_interacted(true);
            }
            for (key, value) in &plan.writes {
                state.insert(*key, value.clone());
            }
        }

        match plan.then {
            Then::Next(next) => {
                cx.call_next(tracer_step(next));
                self.push(format!("registered:{}", cx.registered()));
                Ok(StepOutcome::Forward)
            }
            Then::Finish => Ok(StepOutcome::Finish),
            Then::Fail(reason) => bail!("{reason}"),
            Then::Panic(reason) => panic!("{reason}"),
            Then::Stall => Ok(StepOutcome::Forward),
        }
    }

    fn on_forward(&mut self, state: &StepState) {
        self.missing.forward(state);
        self.sync_missing();
        let name = state.get_str(STEP_KEY).unwrap_or("?").to_string();
        self.push(format!("forward:{name}"));
    }

    fn on_back(&mut self, state: &StepState) {
        self.missing.back(state);
        self.sync_missing();
        let name = state.get_str(STEP_KEY).unwrap_or("?").to_string();
        self.push(format!("back:{name}"));
        self.log.lock().expect("tracer log").backs.push(state.clone());
    }

    fn on_error(&mut self, failed: &StepId, fault: &str, next: &mut CallNext) {
        self.push(format!("error:{}", failed.step_name()));
        self.log.lock().expect("tracer log").faults.push(fault.to_string());
        if self.recover {
            next.call_next(tracer_step("recover"));
        }
    }
}

pub struct Harness<D> {
    pub navigator: Navigator<D>,
    pub prompts: Arc<ScriptedPrompts>,
    pub store: MemoryStore,
    pub cancel: CancellationToken,
}

fn harness<D: Send + 'static>(
    session: Session<D>,
    answers: Vec<ScriptedAnswer>,
    store: MemoryStore,
) -> Harness<D> {
    let cancel = CancellationToken::new();
    let prompts = Arc::new(ScriptedPrompts::new(answers).with_cancellation(cancel.clone()));
    let surface: Arc<dyn PromptSurface> = prompts.clone();
    let navigator = Navigator::new(session, surface, Box::new(store.clone()))
        .with_cancellation(cancel.clone());
    Harness {
        navigator,
        prompts,
        store,
        cancel,
    }
}

/// A navigator over a single tracer module.
pub fn tracer_harness(tracer: Tracer, answers: Vec<ScriptedAnswer>, store: MemoryStore) -> Harness<()> {
    let mut harness = harness(Session::new(()), answers, store);
    harness.navigator.install(Box::new(tracer));
    harness
}

pub fn new_log() -> SharedLog {
    Arc::new(Mutex::new(TracerLog::default()))
}

pub fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// In-memory cluster with one deployment (`shop/web`) behind one service.
#[derive(Clone)]
pub struct FakeCluster {
    pub contexts: Vec<KubeContext>,
    pub namespaces: Vec<String>,
    pub deployments: Vec<Deployment>,
    pub services: Vec<Service>,
    pub prometheus: Option<Service>,
    pub config_error: bool,
    pub forwards: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl FakeCluster {
    pub fn shop() -> Self {
        Self {
            contexts: vec![KubeContext {
                name: "prod".into(),
                cluster: "prod-cluster".into(),
            }],
            namespaces: vec!["kube-system".into(), "shop".into()],
            deployments: vec![Deployment {
                name: "web".into(),
                namespace: "shop".into(),
                replicas: 2,
                match_labels: labels(&[("app", "web")]),
                containers: vec![Container {
                    name: "web".into(),
                    cpu_limit: Some("500m".into()),
                    memory_limit: Some("1Gi".into()),
                }],
            }],
            services: vec![
                Service {
                    name: "web".into(),
                    namespace: "shop".into(),
                    port: 80,
                    selector: labels(&[("app", "web")]),
                },
                Service {
                    name: "api".into(),
                    namespace: "shop".into(),
                    port: 8080,
                    selector: labels(&[("app", "api")]),
                },
            ],
            prometheus: Some(Service {
                name: "prometheus".into(),
                namespace: "monitoring".into(),
                port: 9090,
                selector: BTreeMap::new(),
            }),
            config_error: false,
            forwards: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn forwards(&self) -> usize {
        self.forwards.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterBackend for FakeCluster {
    async fn contexts(&self) -> anyhow::Result<Vec<KubeContext>> {
        if self.config_error {
            return Err(ClusterConfigError::NoContexts.into());
        }
        Ok(self.contexts.clone())
    }

    async fn namespaces(&self, _context: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.namespaces.clone())
    }

    async fn deployments(&self, _context: &str, namespace: &str) -> anyhow::Result<Vec<Deployment>> {
        Ok(self
            .deployments
            .iter()
            .filter(|deployment| deployment.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn services(&self, _context: &str, namespace: &str) -> anyhow::Result<Vec<Service>> {
        Ok(self
            .services
            .iter()
            .filter(|service| service.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn find_service(&self, _context: &str, name: &str) -> anyhow::Result<Option<Service>> {
        Ok(self.prometheus.clone().filter(|service| service.name == name))
    }

    async fn replica_bounds(
        &self,
        _context: &str,
        _namespace: &str,
        _deployment: &str,
    ) -> anyhow::Result<Option<ReplicaBounds>> {
        Ok(None)
    }

    async fn port_forward(&self, _context: &str, service: &Service) -> anyhow::Result<ProxyHandle> {
        self.forwards.fetch_add(1, Ordering::SeqCst);
        let releases = self.releases.clone();
        Ok(ProxyHandle::detached(format!("svc/{}", service.name), move || {
            releases.fetch_add(1, Ordering::SeqCst);
        }))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeMetrics {
    pub reachable: Vec<String>,
    pub names: Vec<String>,
}

#[async_trait]
impl MetricsBackend for FakeMetrics {
    async fn reachable(&self, endpoint: &str) -> bool {
        self.reachable.iter().any(|candidate| candidate == endpoint)
    }

    async fn metric_names(
        &self,
        _endpoint: &str,
        _labels: &BTreeMap<String, String>,
    ) -> anyhow::Result<Vec<String>> {
        Ok(self.names.clone())
    }
}

/// Keeps every bundle instead of writing files.
#[derive(Debug, Clone, Default)]
pub struct RecordingEmitter {
    pub bundles: Arc<Mutex<Vec<ArtifactBundle>>>,
}

impl RecordingEmitter {
    pub fn last(&self) -> Option<ArtifactBundle> {
        self.bundles.lock().expect("emitter log").last().cloned()
    }
}

impl ArtifactEmitter for RecordingEmitter {
    fn emit(&self, bundle: &ArtifactBundle) -> Result<Vec<PathBuf>, WizardError> {
        self.bundles.lock().expect("emitter log").push(bundle.clone());
        Ok(vec![PathBuf::from("override.yaml")])
    }
}

pub const PROMETHEUS_URL: &str = "http://prometheus.monitoring.svc:9090";

pub struct DiscoveryRig {
    pub harness: Harness<Discovery>,
    pub initial: StepId,
    pub cluster: FakeCluster,
    pub emitter: RecordingEmitter,
}

/// A discovery navigator wired to fakes, with the builder installed.
pub fn discovery_rig(
    settings: BuilderConfig,
    cluster: FakeCluster,
    metrics: FakeMetrics,
    answers: Vec<ScriptedAnswer>,
    store: MemoryStore,
) -> DiscoveryRig {
    let emitter = RecordingEmitter::default();
    let backends = Backends {
        cluster: Arc::new(cluster.clone()),
        metrics: Arc::new(metrics),
        emitter: Arc::new(emitter.clone()),
    };
    let builder = BuilderModule::new(backends);
    let initial = builder.initial_step();
    let mut harness = harness(Session::new(Discovery::new(settings)), answers, store);
    harness.navigator.install(Box::new(builder));
    DiscoveryRig {
        harness,
        initial,
        cluster,
        emitter,
    }
}

/// Metrics backend that finds prometheus in-cluster with one known metric.
pub fn envoy_metrics() -> FakeMetrics {
    FakeMetrics {
        reachable: vec![PROMETHEUS_URL.to_string()],
        names: vec![
            "envoy_cluster_upstream_rq_total".to_string(),
            "go_goroutines".to_string(),
        ],
    }
}
