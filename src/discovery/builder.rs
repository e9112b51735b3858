//! Root module: credentials, the discovery sections, servo placement and
//! artifact emission.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::cluster::ClusterModule;
use super::load::LoadModule;
use super::metrics::MetricsModule;
use super::record::{
    prompt_error, prompt_other, DiscoveryModule, ModuleRecord, RecoveryCopy, Resolution,
    MISSING_INFO, OTHER_PROMPT, OTHER_TEXT, OTHER_TITLE,
};
use super::{Backends, DiscoveryContext, DiscoverySession};
use crate::config::OptimizationMode;
use crate::emit::{ArtifactBundle, ServoSettings, MANUAL_CONFIGURATION};
use crate::prompt::{PromptOptions, PromptResult, TextField};
use crate::wizard::{StepId, StepOutcome, StepState};

pub const BUILDER: &str = "builder";

const ACCOUNT: &str = "opsani_account";
const APP: &str = "app_name";
const SERVO_IMAGE: &str = "recommended_servo_image";
const SERVO_NAMESPACE: &str = "servo_namespace";
const CREDENTIALS: &str = "credentials";
const ARTIFACTS: &str = "artifacts";

const TRACKED: &[&str] = &[ACCOUNT, APP, SERVO_IMAGE, SERVO_NAMESPACE];

pub const MSG_SUPPORT: &str =
    "Unable to complete discovery. Please reach out to Opsani support for further assistance";
pub const MSG_PARTIAL: &str = "Partial discovery completed. Please reach out to Opsani support for assistance in completing configuration of the manifests contained in the servo-manifests folder";
pub const MSG_PUSH_OVERRIDE: &str =
    "Run\n    coctl put --file override.yaml\nto push the optimization override.";

const ERROR_COPY: RecoveryCopy = RecoveryCopy {
    title: "Unable to Finish Discovery",
    lines: &[
        "Discovery has encountered an unexpected circumstance and is unable to continue",
        "Select Ok to exit, or select Back if you would like to retry the previous action",
    ],
};

step_kind! {
    pub enum BuilderStep {
        Initialize => "initialize",
        Credentials => "credentials",
        OtherCredentials => "other_credentials",
        DiscoverAdjust => "discover_adjust",
        DiscoverMeasure => "discover_measure",
        DiscoverLoad => "discover_load",
        SelectServo => "select_servo",
        Finish => "finish",
        PromptError => "prompt_error",
        PromptOther => "prompt_other",
    }
}

pub struct BuilderModule {
    record: ModuleRecord,
    backends: Backends,
    servo_image: Option<String>,
    servo_namespace: Option<String>,
}

impl BuilderModule {
    pub fn new(backends: Backends) -> Self {
        Self {
            record: ModuleRecord::new(BUILDER, TRACKED),
            backends,
            servo_image: None,
            servo_namespace: None,
        }
    }

    /// Where every run starts.
    pub fn initial_step(&self) -> StepId {
        self.record.step(BuilderStep::Initialize)
    }

    fn next(&self, cx: &mut DiscoveryContext<'_>, step: BuilderStep) -> StepOutcome {
        cx.call_next(self.record.step(step));
        StepOutcome::Forward
    }

    async fn initialize(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        state.set_interacted(false);
        cx.session.servo_config.clear();
        cx.session.override_doc = json!({
            "adjustment": { "control": {} },
            "measurement": {
                "control": { "load": {}, "warmup": 0, "duration": 0, "past": 60 },
            },
            "optimization": {},
        });
        Ok(self.next(cx, BuilderStep::Credentials))
    }

    async fn credentials(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        let settings = cx.session.shared.settings.clone();

        if !state.other_selected() {
            // The token is never cached, so it is asked for again on resume
            // unless it comes from configuration.
            if state.is_empty() || settings.token.is_none() {
                state.set_interacted(false);
                if settings.has_credentials() {
                    state.insert(ACCOUNT, settings.account.clone().unwrap_or_default());
                    state.insert(APP, settings.app.clone().unwrap_or_default());
                    cx.session.shared.credentials.token = settings.token.clone();
                } else {
                    let account = state
                        .get_str(ACCOUNT)
                        .or(settings.account.as_deref())
                        .unwrap_or_default()
                        .to_string();
                    let app = state
                        .get_str(APP)
                        .or(settings.app.as_deref())
                        .unwrap_or_default()
                        .to_string();
                    let fields = [
                        TextField::new("Please enter the name of your Optune account", account),
                        TextField::new(
                            "Please enter the name of the application to be optimized as it appears in Optune",
                            app,
                        ),
                        TextField::new(
                            "Please enter your Opsani provided Servo auth token",
                            settings.token.clone().unwrap_or_default(),
                        ),
                    ];
                    let answer = cx
                        .prompts
                        .text_fields("Servo Info", &fields, PromptOptions::with_other())
                        .await?;
                    state.set_interacted(true);
                    match answer {
                        PromptResult::Back => return Ok(StepOutcome::Back),
                        PromptResult::Other => state.select_other(),
                        PromptResult::Value(values) => {
                            let mut values = values.into_iter();
                            state.insert(ACCOUNT, values.next().unwrap_or_default());
                            state.insert(APP, values.next().unwrap_or_default());
                            cx.session.shared.credentials.token =
                                values.next().filter(|token| !token.is_empty());
                        }
                    }
                }
            } else {
                cx.session.shared.credentials.token = settings.token.clone();
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, BuilderStep::OtherCredentials));
        }
        let credentials = &mut cx.session.shared.credentials;
        credentials.account = state.get_str(ACCOUNT).map(str::to_string);
        credentials.app = state.get_str(APP).map(str::to_string);
        Ok(self.next(cx, BuilderStep::DiscoverAdjust))
    }

    async fn other_credentials(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let initial = self
                .record
                .info(CREDENTIALS)
                .and_then(|credentials| credentials.get(OTHER_TEXT))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let answer = cx
                .prompts
                .multiline_text(OTHER_TITLE, OTHER_PROMPT, &initial, PromptOptions::default())
                .await?;
            state.set_interacted(true);
            match answer {
                PromptResult::Back => {
                    self.record.remove_info(CREDENTIALS);
                    return Ok(StepOutcome::Back);
                }
                PromptResult::Value(text) => state.insert(OTHER_TEXT, text),
                PromptResult::Other => state.insert(OTHER_TEXT, ""),
            }
        }

        self.record.set_info(
            CREDENTIALS,
            json!({
                MISSING_INFO: [ACCOUNT, APP, "token"],
                OTHER_TEXT: state.get_str(OTHER_TEXT).unwrap_or_default(),
            }),
        );
        Ok(self.next(cx, BuilderStep::DiscoverAdjust))
    }

    fn discover_adjust(&mut self, cx: &mut DiscoveryContext<'_>, state: &mut StepState) -> StepOutcome {
        state.set_interacted(false);
        let cluster = ClusterModule::new(
            self.backends.cluster.clone(),
            self.record.step(BuilderStep::DiscoverMeasure),
        );
        cx.call_next(cluster.initial_step());
        cx.install(Box::new(cluster));
        StepOutcome::Forward
    }

    fn discover_measure(&mut self, cx: &mut DiscoveryContext<'_>, state: &mut StepState) -> StepOutcome {
        state.set_interacted(false);
        let metrics = MetricsModule::new(
            self.backends.cluster.clone(),
            self.backends.metrics.clone(),
            self.record.step(BuilderStep::DiscoverLoad),
        );
        cx.call_next(metrics.initial_step());
        cx.install(Box::new(metrics));
        StepOutcome::Forward
    }

    fn discover_load(&mut self, cx: &mut DiscoveryContext<'_>, state: &mut StepState) -> StepOutcome {
        state.set_interacted(false);
        if cx.session.shared.settings.mode != OptimizationMode::Saturation {
            debug!("load generation skipped outside saturation mode");
            return self.next(cx, BuilderStep::SelectServo);
        }
        let load = LoadModule::new(self.record.step(BuilderStep::SelectServo));
        cx.call_next(load.initial_step());
        cx.install(Box::new(load));
        StepOutcome::Forward
    }

    async fn select_servo(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let namespace = cx.session.shared.topology.namespace.clone().unwrap_or_default();
            let fields = [
                TextField::new(
                    "The following Servo image has been selected. Edit below to override with a different image",
                    cx.session.shared.settings.servo_image(),
                ),
                TextField::new("Please enter the namespace to which servo should be deployed", namespace),
            ];
            let answer = cx
                .prompts
                .text_fields("Servo Info", &fields, PromptOptions::with_other())
                .await?;
            state.set_interacted(true);
            match answer {
                PromptResult::Back => return Ok(StepOutcome::Back),
                PromptResult::Other => state.select_other(),
                PromptResult::Value(values) => {
                    let mut values = values.into_iter();
                    state.insert(SERVO_IMAGE, values.next().unwrap_or_default());
                    state.insert(SERVO_NAMESPACE, values.next().unwrap_or_default());
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, BuilderStep::PromptOther));
        }
        self.servo_image = state.get_str(SERVO_IMAGE).map(str::to_string);
        self.servo_namespace = state.get_str(SERVO_NAMESPACE).map(str::to_string);
        Ok(self.next(cx, BuilderStep::Finish))
    }

    fn bundle(&self, session: &DiscoverySession) -> ArtifactBundle {
        let credentials = &session.shared.credentials;
        ArtifactBundle {
            servo_config: Value::Object(session.servo_config.clone()),
            override_doc: session.override_doc.clone(),
            servo: ServoSettings {
                namespace: self
                    .servo_namespace
                    .clone()
                    .filter(|namespace| !namespace.is_empty())
                    .unwrap_or_else(|| MANUAL_CONFIGURATION.to_string()),
                image: self
                    .servo_image
                    .clone()
                    .unwrap_or_else(|| session.shared.settings.servo_image().to_string()),
                account: credentials.account.clone(),
                app: credentials.app.clone(),
                token: credentials.token.clone(),
            },
        }
    }

    async fn finish(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let bundle = self.bundle(cx.session);
            let written = self.backends.emitter.emit(&bundle)?;
            let written: Vec<String> = written
                .iter()
                .map(|path| path.display().to_string())
                .collect();

            cx.prompts
                .show_text("override.yaml", &serde_yaml::to_string(&bundle.override_doc)?)
                .await?;
            let mut lines = vec!["Press Enter to exit or select Back to change details".to_string()];
            lines.extend(written.iter().map(|path| format!("  wrote {path}")));
            let answer = cx
                .prompts
                .acknowledge("Discovery Complete", &lines, PromptOptions::default())
                .await?;
            if answer == PromptResult::Back {
                return Ok(StepOutcome::Back);
            }
            state.set_interacted(true);
            state.insert(ARTIFACTS, written);
        }

        let partial = self.record.info(CREDENTIALS).is_some()
            || cx
                .module_reports()
                .values()
                .any(|report| report.get(MISSING_INFO).is_some());
        if partial {
            info!("discovery finished with gaps");
            cx.session.replace_messages([MSG_PARTIAL]);
        } else {
            let message = apply_instructions(cx.session, self.servo_namespace.as_deref());
            cx.session.replace_messages([message, MSG_PUSH_OVERRIDE.to_string()]);
        }
        Ok(StepOutcome::Finish)
    }
}

fn apply_instructions(session: &DiscoverySession, namespace: Option<&str>) -> String {
    let shared = &session.shared;
    let or_manual = |value: Option<&str>| value.unwrap_or(MANUAL_CONFIGURATION).to_string();
    format!(
        "Discovery complete. Run the following command:\n    kubectl apply -f servo-manifests/ \\\n        --namespace {namespace} \\\n        --context {context}\nto configure and start Opsani servo and then open your web browser at\n    https://optune.ai/accounts/{account}/applications/{app}\nto observe the optimization process.",
        namespace = or_manual(namespace),
        context = or_manual(shared.topology.context.as_deref()),
        account = or_manual(shared.credentials.account.as_deref()),
        app = or_manual(shared.credentials.app.as_deref()),
    )
}

#[async_trait]
impl DiscoveryModule for BuilderModule {
    type Step = BuilderStep;

    const PROMPT_ERROR: BuilderStep = BuilderStep::PromptError;

    fn record(&self) -> &ModuleRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut ModuleRecord {
        &mut self.record
    }

    async fn run(
        &mut self,
        step: BuilderStep,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        match step {
            BuilderStep::Initialize => self.initialize(cx, state).await,
            BuilderStep::Credentials => self.credentials(cx, state).await,
            BuilderStep::OtherCredentials => self.other_credentials(cx, state).await,
            BuilderStep::DiscoverAdjust => Ok(self.discover_adjust(cx, state)),
            BuilderStep::DiscoverMeasure => Ok(self.discover_measure(cx, state)),
            BuilderStep::DiscoverLoad => Ok(self.discover_load(cx, state)),
            BuilderStep::SelectServo => self.select_servo(cx, state).await,
            BuilderStep::Finish => self.finish(cx, state).await,
            BuilderStep::PromptError => {
                if prompt_error(&mut self.record, cx, state, &ERROR_COPY).await? == Resolution::Back {
                    return Ok(StepOutcome::Back);
                }
                cx.session.replace_messages([MSG_SUPPORT]);
                Ok(StepOutcome::Finish)
            }
            BuilderStep::PromptOther => {
                if prompt_other(&mut self.record, cx, state).await? == Resolution::Back {
                    return Ok(StepOutcome::Back);
                }
                cx.session.replace_messages([MSG_PARTIAL]);
                Ok(StepOutcome::Finish)
            }
        }
    }
}
