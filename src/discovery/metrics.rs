//! Prometheus discovery: endpoints, an optional port-forward, and the
//! deployment metrics the optimizer measures.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::record::{prompt_error, prompt_other, DiscoveryModule, ModuleRecord, RecoveryCopy, Resolution};
use super::DiscoveryContext;
use crate::backend::{ClusterBackend, MetricsBackend, ProxyHandle};
use crate::emit::MANUAL_CONFIGURATION;
use crate::prompt::{PromptOptions, PromptResult, TextField};
use crate::wizard::{StepId, StepOutcome, StepState};

pub const METRICS: &str = "metrics";

const PROMETHEUS_ENDPOINT: &str = "prometheus_endpoint";
const LOCAL_ENDPOINT: &str = "local_endpoint";
const DESIRED: &str = "desired_deployment_metrics";
const CONFIGURED: &str = "configured_deployment_metrics";
const PERF_METRIC: &str = "perf_metric";
const REMOTE_PROMETHEUS: &str = "remote_prometheus_used";
const INSTALL_PROMETHEUS: &str = "install_prometheus_selected";
const PORT_FORWARD_ACCEPTED: &str = "port_forward_accepted";
const NO_METRICS: &str = "no_metrics_found";
const ACKNOWLEDGED: &str = "acknowledged";

const TRACKED: &[&str] = &[PROMETHEUS_ENDPOINT, LOCAL_ENDPOINT, DESIRED, CONFIGURED, PERF_METRIC];

pub const MSG_NO_METRICS: &str = "Unable to locate metrics that match your deployment in your Prometheus instance, please contact Opsani for further assistance";
pub const MSG_INSTALL_PROMETHEUS: &str = "Install prometheus with\n    kubectl apply -f https://raw.githubusercontent.com/opsani/simple-prometheus-installation/master/prometheus.yaml\nand re-run discovery in order to continue.";

const ERROR_COPY: RecoveryCopy = RecoveryCopy {
    title: "Unable to Finish Prometheus Discovery",
    lines: &[
        "Discovery has encountered an unexpected circumstance and is unable to complete Prometheus discovery",
        "Select Ok to continue to the next discovery section, or select Back if you would like to retry the previous action",
    ],
};

const INSTALL_LINES: &[&str] = &[
    "Install prometheus:",
    "",
    "(kubectl apply -f https://raw.githubusercontent.com/opsani/simple-prometheus-installation/master/prometheus.yaml)",
    "",
    "or review the code at https://github.com/opsani/simple-prometheus-installation, and then",
    "re-run discovery in order to continue.",
    "Select Ok to exit or Back to change previous selections",
];

const PORT_FORWARD_LINES: &[&str] = &[
    "To optimize your service, Opsani requires access to Prometheus metrics.",
    "Because you have selected localhost for the discovery endpoint, Opsani",
    "will use port forwarding to proxy access to Prometheus.",
    "If this is not acceptable, press the Escape key to exit now",
];

/// A metric with a suggested servo name, query template and unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KnownMetric {
    pub name: &'static str,
    pub perf_name: &'static str,
    /// `{}` is replaced by the metric selector.
    pub query: &'static str,
    pub unit: &'static str,
}

pub const KNOWN_METRICS: &[KnownMetric] = &[
    KnownMetric {
        name: "envoy_cluster_upstream_rq_total",
        perf_name: "main_request_rate",
        query: "sum(rate({}[1m]))",
        unit: "rpm",
    },
    KnownMetric {
        name: "api_requests_total",
        perf_name: "main_request_rate",
        query: "sum(rate({}))",
        unit: "rpm",
    },
];

pub fn known_metric(name: &str) -> Option<&'static KnownMetric> {
    KNOWN_METRICS.iter().find(|metric| metric.name == name)
}

/// Prefilled name, query and unit for configuring `metric`.
fn suggested_fields(metric: &str, labels: &BTreeMap<String, String>) -> [TextField; 3] {
    let selector: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{value}\""))
        .collect();
    let series = format!("{metric}{{{}}}", selector.join(","));
    let (name, template, unit) = match known_metric(metric) {
        Some(known) => (known.perf_name.to_string(), known.query, known.unit),
        None => (metric.to_string(), "sum({})", ""),
    };
    [
        TextField::new("Enter/Edit the name of the metric to be used by servo:", name),
        TextField::new("Edit Metric Query:", template.replace("{}", &series)),
        TextField::new("Metric Unit:", unit),
    ]
}

step_kind! {
    pub enum MetricsStep {
        Run => "run",
        SelectEndpoints => "select_endpoints",
        PortForward => "port_forward",
        SelectMetrics => "select_metrics",
        ConfigureMetrics => "configure_metrics",
        SelectPerf => "select_perf",
        Finish => "finish",
        PromptError => "prompt_error",
        PromptOther => "prompt_other",
        Exit => "exit",
    }
}

pub struct MetricsModule {
    record: ModuleRecord,
    cluster: Arc<dyn ClusterBackend>,
    metrics: Arc<dyn MetricsBackend>,
    finished: StepId,
    remote_prometheus: bool,
    prometheus_endpoint: String,
    local_endpoint: String,
    desired: Vec<String>,
    configured: Map<String, Value>,
    proxy: Option<ProxyHandle>,
}

impl MetricsModule {
    pub fn new(
        cluster: Arc<dyn ClusterBackend>,
        metrics: Arc<dyn MetricsBackend>,
        finished: StepId,
    ) -> Self {
        Self {
            record: ModuleRecord::new(METRICS, TRACKED),
            cluster,
            metrics,
            finished,
            remote_prometheus: false,
            prometheus_endpoint: String::new(),
            local_endpoint: String::new(),
            desired: Vec::new(),
            configured: Map::new(),
            proxy: None,
        }
    }

    pub fn initial_step(&self) -> StepId {
        self.record.step(MetricsStep::Run)
    }

    /// The live port-forward, if one was started.
    pub fn proxy(&self) -> Option<&ProxyHandle> {
        self.proxy.as_ref()
    }

    fn next(&self, cx: &mut DiscoveryContext<'_>, step: MetricsStep) -> StepOutcome {
        cx.call_next(self.record.step(step));
        StepOutcome::Forward
    }

    fn release_proxy(&mut self) {
        if let Some(mut proxy) = self.proxy.take() {
            proxy.release();
        }
    }

    async fn locate(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            state.insert(REMOTE_PROMETHEUS, false);
            if cx.session.shared.topology.prometheus.is_none() {
                let values = [
                    "Point discovery to a remote prometheus deployment".to_string(),
                    "Install a simple prometheus deployment in order to gather application metrics"
                        .to_string(),
                ];
                let answer = cx
                    .prompts
                    .choose_one(
                        "Prometheus not Found",
                        "We were unable to locate a prometheus deployment in kubernetes. Would you like to...",
                        &values,
                        PromptOptions::with_other(),
                    )
                    .await?;
                state.set_interacted(true);
                match answer {
                    PromptResult::Back => return Ok(StepOutcome::Back),
                    PromptResult::Other => state.select_other(),
                    PromptResult::Value(0) => state.insert(REMOTE_PROMETHEUS, true),
                    PromptResult::Value(_) => state.insert(INSTALL_PROMETHEUS, true),
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, MetricsStep::PromptOther));
        }
        if state.get_bool(INSTALL_PROMETHEUS) {
            return Ok(self.next(cx, MetricsStep::Exit));
        }
        self.remote_prometheus = state.get_bool(REMOTE_PROMETHEUS);
        Ok(self.next(cx, MetricsStep::SelectEndpoints))
    }

    async fn select_endpoints(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let prometheus = cx.session.shared.topology.prometheus.clone();
        if state.is_empty() {
            state.set_interacted(false);
            let (endpoint, local) = match &prometheus {
                Some(service) => {
                    let endpoint = service.cluster_url();
                    let local = if self.metrics.reachable(&endpoint).await {
                        endpoint.clone()
                    } else {
                        service.local_url()
                    };
                    (endpoint, local)
                }
                None => (String::new(), String::new()),
            };
            let fields = [
                TextField::new("Enter/Edit the prometheus endpoint for Servo to use", endpoint),
                TextField::new(
                    "Enter/Edit the local prometheus endpoint (for metrics discovery only)",
                    local,
                ),
            ];
            let answer = cx
                .prompts
                .text_fields("Prometheus Endpoint", &fields, PromptOptions::with_other())
                .await?;
            state.set_interacted(true);
            match answer {
                PromptResult::Back => return Ok(StepOutcome::Back),
                PromptResult::Other => state.select_other(),
                PromptResult::Value(values) => {
                    let mut values = values.into_iter();
                    state.insert(PROMETHEUS_ENDPOINT, values.next().unwrap_or_default());
                    state.insert(LOCAL_ENDPOINT, values.next().unwrap_or_default());
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, MetricsStep::PromptOther));
        }
        self.prometheus_endpoint = state.get_str(PROMETHEUS_ENDPOINT).unwrap_or_default().to_string();
        self.local_endpoint = state.get_str(LOCAL_ENDPOINT).unwrap_or_default().to_string();

        let needs_forward = prometheus.is_some()
            && self.local_endpoint.contains("localhost")
            && !self.metrics.reachable(&self.local_endpoint).await;
        if needs_forward {
            Ok(self.next(cx, MetricsStep::PortForward))
        } else {
            Ok(self.next(cx, MetricsStep::SelectMetrics))
        }
    }

    async fn port_forward(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if !state.get_bool(PORT_FORWARD_ACCEPTED) {
            // Only a disclaimer; Back skips over it.
            state.set_interacted(false);
            self.release_proxy();
            let lines: Vec<String> = PORT_FORWARD_LINES.iter().map(|line| line.to_string()).collect();
            let answer = cx
                .prompts
                .acknowledge("Ok to Port Forward?", &lines, PromptOptions::default())
                .await?;
            if answer == PromptResult::Back {
                return Ok(StepOutcome::Back);
            }
            state.insert(PORT_FORWARD_ACCEPTED, true);
        }

        let topology = &cx.session.shared.topology;
        let context = topology
            .context
            .clone()
            .context("port-forward needs a kubernetes context")?;
        let service = topology
            .prometheus
            .clone()
            .context("port-forward needs a prometheus service")?;
        self.release_proxy();
        let proxy = self.cluster.port_forward(&context, &service).await?;
        info!(proxy = proxy.description(), "port-forward is live");
        self.proxy = Some(proxy);
        Ok(self.next(cx, MetricsStep::SelectMetrics))
    }

    async fn select_metrics(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let labels = cx.session.shared.topology.match_labels.clone();
        if labels.is_empty() {
            bail!("Unable to discover metrics, selector labels were not discovered during kubernetes discovery");
        }

        if state.is_empty() {
            state.set_interacted(false);
            let names = self.metrics.metric_names(&self.local_endpoint, &labels).await?;
            let mut known: Vec<String> = names
                .iter()
                .filter(|name| known_metric(name).is_some())
                .cloned()
                .collect();
            known.sort();

            if names.is_empty() {
                state.insert(NO_METRICS, true);
            } else if known.len() == 1 {
                state.insert_as(DESIRED, &known)?;
            } else {
                let (candidates, header) = if known.is_empty() {
                    let mut requests: Vec<String> = names
                        .iter()
                        .filter(|name| name.contains("request") || name.contains("rq"))
                        .cloned()
                        .collect();
                    requests.sort();
                    (requests, "Metric __name__:")
                } else {
                    (known, "Metric __name__ - Suggested Perf Name:")
                };
                let shown: Vec<String> = candidates
                    .iter()
                    .map(|name| match known_metric(name) {
                        Some(metric) => format!("{name} - {}", metric.perf_name),
                        None => name.clone(),
                    })
                    .collect();
                let answer = cx
                    .prompts
                    .choose_many(
                        "Select Deployment Metrics for Optimization Measurement",
                        header,
                        &shown,
                        PromptOptions::with_other(),
                    )
                    .await?;
                state.set_interacted(true);
                match answer {
                    PromptResult::Back => return Ok(StepOutcome::Back),
                    PromptResult::Other => state.select_other(),
                    PromptResult::Value(indices) => {
                        let desired: Vec<String> =
                            indices.iter().map(|index| candidates[*index].clone()).collect();
                        state.insert_as(DESIRED, &desired)?;
                    }
                }
            }
        }

        if state.get_bool(NO_METRICS) {
            cx.session.replace_messages([MSG_NO_METRICS]);
            return Ok(StepOutcome::Finish);
        }
        if state.other_selected() {
            return Ok(self.next(cx, MetricsStep::PromptOther));
        }
        self.desired = state
            .get_as(DESIRED)
            .context("cached metric selection is missing")?;
        Ok(self.next(cx, MetricsStep::ConfigureMetrics))
    }

    /// One screen per selected metric. Back on any but the first screen
    /// returns to the previous metric.
    async fn configure_metrics(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let labels = cx.session.shared.topology.match_labels.clone();
            let desired = self.desired.clone();
            let total = desired.len();
            let mut configured: Vec<(String, Value)> = Vec::new();
            let mut index = 0;
            let mut other = false;

            while index < total {
                let fields = suggested_fields(&desired[index], &labels);
                let title = format!("Deployment Metrics Config {}/{}", index + 1, total);
                let answer = cx
                    .prompts
                    .text_fields(&title, &fields, PromptOptions::with_other())
                    .await?;
                state.set_interacted(true);
                match answer {
                    PromptResult::Back if index == 0 => return Ok(StepOutcome::Back),
                    PromptResult::Back => {
                        index -= 1;
                        configured.truncate(index);
                    }
                    PromptResult::Other => {
                        other = true;
                        break;
                    }
                    PromptResult::Value(values) => {
                        let mut values = values.into_iter();
                        let name = values.next().unwrap_or_default();
                        let mut entry = Map::new();
                        entry.insert("query".to_string(), Value::from(values.next().unwrap_or_default()));
                        if let Some(unit) = values.next().filter(|unit| !unit.is_empty()) {
                            entry.insert("unit".to_string(), Value::from(unit));
                        }
                        configured.push((name, Value::Object(entry)));
                        index += 1;
                    }
                }
            }

            if other {
                // A partially configured set counts as missing.
                state.select_other();
            } else {
                let configured: Map<String, Value> = configured.into_iter().collect();
                state.insert(CONFIGURED, Value::Object(configured));
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, MetricsStep::PromptOther));
        }
        self.configured = state
            .get_as(CONFIGURED)
            .context("cached metric configuration is missing")?;
        Ok(self.next(cx, MetricsStep::SelectPerf))
    }

    async fn select_perf(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let names: Vec<String> = self.configured.keys().cloned().collect();
            if !names.is_empty() {
                let answer = cx
                    .prompts
                    .choose_one(
                        "Select Performance Metric",
                        "Metric Name:",
                        &names,
                        PromptOptions::with_other(),
                    )
                    .await?;
                state.set_interacted(true);
                match answer {
                    PromptResult::Back => return Ok(StepOutcome::Back),
                    PromptResult::Other => state.select_other(),
                    PromptResult::Value(index) => {
                        state.insert(PERF_METRIC, format!("metrics['{}']", names[index]))
                    }
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, MetricsStep::PromptOther));
        }
        let optimization = cx.session.override_section(&["optimization"]);
        match state.get_str(PERF_METRIC) {
            Some(perf) => {
                optimization.insert("perf".to_string(), Value::from(perf));
            }
            None => {
                optimization.remove("perf");
            }
        }
        Ok(self.next(cx, MetricsStep::Finish))
    }

    fn finish(&mut self, cx: &mut DiscoveryContext<'_>, state: &mut StepState) -> StepOutcome {
        state.set_interacted(false);
        cx.session.servo_config.insert(
            "prom".to_string(),
            json!({
                "prometheus_endpoint": self.prometheus_endpoint,
                "metrics": self.configured,
            }),
        );
        self.release_proxy();
        debug!(metrics = self.configured.len(), remote = self.remote_prometheus, "metrics discovery finished");
        cx.call_next(self.finished.clone());
        StepOutcome::Forward
    }

    async fn exit(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let lines: Vec<String> = INSTALL_LINES.iter().map(|line| line.to_string()).collect();
            let answer = cx
                .prompts
                .acknowledge("Install Prometheus", &lines, PromptOptions::default())
                .await?;
            if answer == PromptResult::Back {
                return Ok(StepOutcome::Back);
            }
            state.insert(ACKNOWLEDGED, true);
        }
        cx.session.replace_messages([MSG_INSTALL_PROMETHEUS]);
        Ok(StepOutcome::Finish)
    }

    fn degrade(&mut self, cx: &mut DiscoveryContext<'_>) -> StepOutcome {
        cx.session
            .servo_config
            .insert("prom".to_string(), Value::from(MANUAL_CONFIGURATION));
        self.release_proxy();
        cx.call_next(self.finished.clone());
        StepOutcome::Forward
    }
}

#[async_trait]
impl DiscoveryModule for MetricsModule {
    type Step = MetricsStep;

    const PROMPT_ERROR: MetricsStep = MetricsStep::PromptError;

    fn record(&self) -> &ModuleRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut ModuleRecord {
        &mut self.record
    }

    async fn run(
        &mut self,
        step: MetricsStep,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        match step {
            MetricsStep::Run => self.locate(cx, state).await,
            MetricsStep::SelectEndpoints => self.select_endpoints(cx, state).await,
            MetricsStep::PortForward => self.port_forward(cx, state).await,
            MetricsStep::SelectMetrics => self.select_metrics(cx, state).await,
            MetricsStep::ConfigureMetrics => self.configure_metrics(cx, state).await,
            MetricsStep::SelectPerf => self.select_perf(cx, state).await,
            MetricsStep::Finish => Ok(self.finish(cx, state)),
            MetricsStep::Exit => self.exit(cx, state).await,
            MetricsStep::PromptError => {
                match prompt_error(&mut self.record, cx, state, &ERROR_COPY).await? {
                    Resolution::Back => Ok(StepOutcome::Back),
                    Resolution::Proceed => Ok(self.degrade(cx)),
                }
            }
            MetricsStep::PromptOther => match prompt_other(&mut self.record, cx, state).await? {
                Resolution::Back => Ok(StepOutcome::Back),
                Resolution::Proceed => Ok(self.degrade(cx)),
            },
        }
    }

    fn unwind(&mut self, state: &StepState) {
        if state.get_bool(PORT_FORWARD_ACCEPTED) {
            self.release_proxy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_metrics_suggest_request_rate() {
        assert_eq!(
            known_metric("api_requests_total").map(|metric| metric.perf_name),
            Some("main_request_rate")
        );
        assert!(known_metric("process_cpu_seconds_total").is_none());
    }

    #[test]
    fn suggested_query_embeds_the_deployment_selector() {
        let labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
        let [name, query, unit] = suggested_fields("envoy_cluster_upstream_rq_total", &labels);
        assert_eq!(name.initial, "main_request_rate");
        assert_eq!(
            query.initial,
            "sum(rate(envoy_cluster_upstream_rq_total{app=\"web\"}[1m]))"
        );
        assert_eq!(unit.initial, "rpm");

        let [name, query, unit] = suggested_fields("http_requests", &labels);
        assert_eq!(name.initial, "http_requests");
        assert_eq!(query.initial, "sum(http_requests{app=\"web\"})");
        assert!(unit.initial.is_empty());
    }
}
