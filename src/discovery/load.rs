//! Load generator settings for saturation optimizations.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};

use super::record::{prompt_error, prompt_other, DiscoveryModule, ModuleRecord, RecoveryCopy, Resolution};
use super::units::duration_seconds;
use super::DiscoveryContext;
use crate::backend::Service;
use crate::emit::MANUAL_CONFIGURATION;
use crate::prompt::{PromptOptions, PromptResult, TextField};
use crate::wizard::{StepId, StepOutcome, StepState};

pub const LOAD: &str = "load";

const VEGETA_CONFIG: &str = "vegeta_config";
const LOAD_DURATION: &str = "load_duration";

const TRACKED: &[&str] = &[VEGETA_CONFIG, LOAD_DURATION];

pub const DEFAULT_DURATION: &str = "5m";
const RATE: &str = "3000/m";
const WORKERS: u64 = 50;
const MAX_WORKERS: u64 = 500;

const ERROR_COPY: RecoveryCopy = RecoveryCopy {
    title: "Unable to Finish Load Generator Discovery",
    lines: &[
        "Discovery has encountered an unexpected circumstance and is unable to complete Load Generator discovery",
        "Select Ok to continue to the next discovery section, or select Back if you would like to retry the previous action",
    ],
};

step_kind! {
    pub enum LoadStep {
        Run => "run",
        SelectDuration => "select_duration",
        Finish => "finish",
        PromptError => "prompt_error",
        PromptOther => "prompt_other",
    }
}

pub struct LoadModule {
    record: ModuleRecord,
    finished: StepId,
    vegeta: Map<String, Value>,
}

impl LoadModule {
    pub fn new(finished: StepId) -> Self {
        Self {
            record: ModuleRecord::new(LOAD, TRACKED),
            finished,
            vegeta: Map::new(),
        }
    }

    pub fn initial_step(&self) -> StepId {
        self.record.step(LoadStep::Run)
    }

    fn next(&self, cx: &mut DiscoveryContext<'_>, step: LoadStep) -> StepOutcome {
        cx.call_next(self.record.step(step));
        StepOutcome::Forward
    }

    async fn select_endpoint(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let endpoints: Vec<String> = cx
                .session
                .shared
                .topology
                .services
                .iter()
                .map(Service::cluster_url)
                .collect();
            let chosen = match endpoints.as_slice() {
                [] => bail!("no service routes to the deployment, so there is nothing to generate load against"),
                [only] => Some(only.clone()),
                _ => {
                    let answer = cx
                        .prompts
                        .choose_one(
                            "Select Endpoint for Load Generation",
                            "URL:",
                            &endpoints,
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
                        PromptResult::Value(index) => Some(endpoints[index].clone()),
                    }
                }
            };
            if let Some(url) = chosen {
                let mut vegeta = Map::new();
                vegeta.insert("target".to_string(), Value::from(format!("GET {url}")));
                state.insert(VEGETA_CONFIG, Value::Object(vegeta));
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, LoadStep::PromptOther));
        }
        self.vegeta = state
            .get_as(VEGETA_CONFIG)
            .context("cached load target is missing")?;
        Ok(self.next(cx, LoadStep::SelectDuration))
    }

    async fn select_duration(
        &mut self,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        if state.is_empty() {
            state.set_interacted(false);
            let fields = [TextField::new("Duration of load generation", DEFAULT_DURATION)];
            let answer = cx
                .prompts
                .text_fields("Load Generation Configuration", &fields, PromptOptions::with_other())
                .await?;
            state.set_interacted(true);
            match answer {
                PromptResult::Back => return Ok(StepOutcome::Back),
                PromptResult::Other => state.select_other(),
                PromptResult::Value(values) => {
                    state.insert(LOAD_DURATION, values.into_iter().next().unwrap_or_default())
                }
            }
        }

        if state.other_selected() {
            return Ok(self.next(cx, LoadStep::PromptOther));
        }
        let duration = state
            .get_str(LOAD_DURATION)
            .context("cached load duration is missing")?
            .to_string();
        let seconds = duration_seconds(&duration)?;
        self.vegeta.insert("duration".to_string(), Value::from(duration));
        cx.session
            .override_section(&["measurement", "control"])
            .insert("duration".to_string(), Value::from(seconds));
        Ok(self.next(cx, LoadStep::Finish))
    }

    fn finish(&mut self, cx: &mut DiscoveryContext<'_>, state: &mut StepState) -> StepOutcome {
        state.set_interacted(false);
        self.vegeta.insert("rate".to_string(), Value::from(RATE));
        self.vegeta.insert("workers".to_string(), Value::from(WORKERS));
        self.vegeta.insert("max-workers".to_string(), Value::from(MAX_WORKERS));
        cx.session
            .servo_config
            .insert("vegeta".to_string(), Value::Object(self.vegeta.clone()));
        cx.call_next(self.finished.clone());
        StepOutcome::Forward
    }

    fn degrade(&mut self, cx: &mut DiscoveryContext<'_>) -> StepOutcome {
        cx.session
            .servo_config
            .insert("vegeta".to_string(), Value::from(MANUAL_CONFIGURATION));
        cx.call_next(self.finished.clone());
        StepOutcome::Forward
    }
}

#[async_trait]
impl DiscoveryModule for LoadModule {
    type Step = LoadStep;

    const PROMPT_ERROR: LoadStep = LoadStep::PromptError;

    fn record(&self) -> &ModuleRecord {
        &self.record
    }

    fn record_mut(&mut self) -> &mut ModuleRecord {
        &mut self.record
    }

    async fn run(
        &mut self,
        step: LoadStep,
        cx: &mut DiscoveryContext<'_>,
        state: &mut StepState,
    ) -> anyhow::Result<StepOutcome> {
        match step {
            LoadStep::Run => self.select_endpoint(cx, state).await,
            LoadStep::SelectDuration => self.select_duration(cx, state).await,
            LoadStep::Finish => Ok(self.finish(cx, state)),
            LoadStep::PromptError => {
                match prompt_error(&mut self.record, cx, state, &ERROR_COPY).await? {
                    Resolution::Back => Ok(StepOutcome::Back),
                    Resolution::Proceed => Ok(self.degrade(cx)),
                }
            }
            LoadStep::PromptOther => match prompt_other(&mut self.record, cx, state).await? {
                Resolution::Back => Ok(StepOutcome::Back),
                Resolution::Proceed => Ok(self.degrade(cx)),
            },
        }
    }
}
