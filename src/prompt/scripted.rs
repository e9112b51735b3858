//! Scripted prompt surface for automated runs.
//!
//! Answers come from a queue, typically parsed from the
//! `MANIFEST_BUILDER_TEST_PROMPTS` environment variable. Tokens are separated
//! by `|`:
//!
//! * `<BACK>`, `<OTHER>`: the two escape hatches
//! * `<ESC>`: cancels the run, like pressing Esc in the terminal
//! * `<OK>`: acknowledges an information screen
//! * `<KEEP>`: accepts every initial value of a form
//! * `yes` / `no`
//! * `#2` or `#0,2`: zero-based selection indices
//! * anything else: form text, one value per field separated by `;`

use std::collections::VecDeque;
use std::env;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{PromptError, PromptKind, PromptOutcome, PromptReply, PromptResult, PromptSpec, PromptSurface};

pub const TEST_PROMPTS_ENV: &str = "MANIFEST_BUILDER_TEST_PROMPTS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedAnswer {
    Back,
    Other,
    Escape,
    Ok,
    Keep,
    Yes,
    No,
    Select(Vec<usize>),
    Text(Vec<String>),
}

impl ScriptedAnswer {
    pub fn text(value: impl Into<String>) -> Self {
        ScriptedAnswer::Text(vec![value.into()])
    }

    pub fn fields<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ScriptedAnswer::Text(values.into_iter().map(Into::into).collect())
    }

    pub fn select(index: usize) -> Self {
        ScriptedAnswer::Select(vec![index])
    }
}

#[derive(Debug, Default)]
struct Script {
    answers: VecDeque<ScriptedAnswer>,
    served: Vec<String>,
}

/// Prompt surface that replays a fixed list of answers.
#[derive(Debug, Default)]
pub struct ScriptedPrompts {
    script: Mutex<Script>,
    cancel: Option<CancellationToken>,
}

impl ScriptedPrompts {
    pub fn new<I: IntoIterator<Item = ScriptedAnswer>>(answers: I) -> Self {
        Self {
            script: Mutex::new(Script {
                answers: answers.into_iter().collect(),
                served: Vec::new(),
            }),
            cancel: None,
        }
    }

    /// Builds a surface from `MANIFEST_BUILDER_TEST_PROMPTS`, if it is set.
    pub fn from_env() -> Option<Self> {
        env::var(TEST_PROMPTS_ENV)
            .ok()
            .map(|raw| Self::new(parse_script(&raw)))
    }

    /// Token cancelled when an `<ESC>` answer is served.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Titles of every prompt served so far, in order.
    pub fn served(&self) -> Vec<String> {
        self.lock().served.clone()
    }

    pub fn remaining(&self) -> usize {
        self.lock().answers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PromptSurface for ScriptedPrompts {
    async fn ask(&self, spec: PromptSpec) -> PromptOutcome<PromptReply> {
        if let PromptKind::ShowText { .. } = spec.kind {
            self.lock().served.push(spec.title);
            return Ok(PromptResult::Value(PromptReply::Ack));
        }

        let answer = {
            let mut script = self.lock();
            let answer = script.answers.pop_front().ok_or_else(|| {
                PromptError::Script(format!(
                    "answers exhausted before prompt `{}`",
                    spec.title
                ))
            })?;
            script.served.push(spec.title.clone());
            answer
        };
        debug!(prompt = %spec.title, ?answer, "serving scripted answer");
        resolve(&spec, answer, self.cancel.as_ref())
    }
}

fn resolve(
    spec: &PromptSpec,
    answer: ScriptedAnswer,
    cancel: Option<&CancellationToken>,
) -> PromptOutcome<PromptReply> {
    let mismatch = |answer: &ScriptedAnswer| {
        PromptError::Script(format!(
            "answer {:?} does not fit prompt `{}`",
            answer, spec.title
        ))
    };

    let reply = match (&spec.kind, answer) {
        (_, ScriptedAnswer::Escape) => {
            if let Some(token) = cancel {
                token.cancel();
            }
            return Err(PromptError::Aborted);
        }
        (_, ScriptedAnswer::Back) if spec.options.allow_back => return Ok(PromptResult::Back),
        (_, ScriptedAnswer::Other) if spec.options.allow_other => {
            return Ok(PromptResult::Other)
        }
        (PromptKind::YesNo, ScriptedAnswer::Yes) => PromptReply::Bool(true),
        (PromptKind::YesNo, ScriptedAnswer::No) => PromptReply::Bool(false),
        (PromptKind::Acknowledge, ScriptedAnswer::Ok) => PromptReply::Ack,
        (PromptKind::ChooseOne { .. }, ScriptedAnswer::Select(indices)) if indices.len() == 1 => {
            PromptReply::Index(indices[0])
        }
        (PromptKind::ChooseMany { .. }, ScriptedAnswer::Select(indices)) => {
            PromptReply::Indices(indices)
        }
        (PromptKind::TextFields { fields }, ScriptedAnswer::Keep) => PromptReply::Texts(
            fields.iter().map(|field| field.initial.clone()).collect(),
        ),
        (PromptKind::TextFields { fields }, ScriptedAnswer::Text(values))
            if values.len() == fields.len() =>
        {
            PromptReply::Texts(values)
        }
        (PromptKind::Multiline { initial, .. }, ScriptedAnswer::Keep) => {
            PromptReply::Text(initial.clone())
        }
        (PromptKind::Multiline { .. }, ScriptedAnswer::Text(values)) => {
            PromptReply::Text(values.join("\n"))
        }
        (_, other) => return Err(mismatch(&other)),
    };
    Ok(PromptResult::Value(reply))
}

/// Parses a `|`-separated answer script.
pub fn parse_script(raw: &str) -> VecDeque<ScriptedAnswer> {
    raw.split('|')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(parse_token)
        .collect()
}

fn parse_token(token: &str) -> ScriptedAnswer {
    match token.to_ascii_uppercase().as_str() {
        "<BACK>" => return ScriptedAnswer::Back,
        "<OTHER>" => return ScriptedAnswer::Other,
        "<ESC>" => return ScriptedAnswer::Escape,
        "<OK>" => return ScriptedAnswer::Ok,
        "<KEEP>" => return ScriptedAnswer::Keep,
        "YES" | "Y" => return ScriptedAnswer::Yes,
        "NO" | "N" => return ScriptedAnswer::No,
        _ => {}
    }
    if let Some(rest) = token.strip_prefix('#') {
        let indices: Result<Vec<usize>, _> = rest
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect();
        if let Ok(indices) = indices {
            return ScriptedAnswer::Select(indices);
        }
    }
    ScriptedAnswer::Text(token.split(';').map(|part| part.to_string()).collect())
}
