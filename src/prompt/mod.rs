//! Prompt surface used by steps to talk to the user.
//!
//! Every prompt resolves to a [`PromptResult`]: a concrete value, the user's
//! request to go back, or the "Other" escape hatch. Implementations only have
//! to answer [`PromptSurface::ask`]; the typed helpers are provided on top.

pub mod scripted;
pub mod terminal;

use async_trait::async_trait;
use thiserror::Error;

pub use scripted::{ScriptedAnswer, ScriptedPrompts, TEST_PROMPTS_ENV};
pub use terminal::{Presenter, TerminalPrompts};

pub const BACK_LABEL: &str = "← Back";
pub const DEFAULT_OTHER_LABEL: &str = "Other";

/// Answer to a single prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResult<T> {
    Value(T),
    Back,
    Other,
}

impl<T> PromptResult<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> PromptResult<U> {
        match self {
            PromptResult::Value(value) => PromptResult::Value(f(value)),
            PromptResult::Back => PromptResult::Back,
            PromptResult::Other => PromptResult::Other,
        }
    }
}

/// Which escape hatches a prompt offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptOptions {
    pub allow_back: bool,
    pub allow_other: bool,
    pub other_label: String,
}

impl Default for PromptOptions {
    fn default() -> Self {
        Self {
            allow_back: true,
            allow_other: false,
            other_label: DEFAULT_OTHER_LABEL.to_string(),
        }
    }
}

impl PromptOptions {
    pub fn with_other() -> Self {
        Self {
            allow_other: true,
            ..Self::default()
        }
    }

    pub fn other_label(mut self, label: impl Into<String>) -> Self {
        self.allow_other = true;
        self.other_label = label.into();
        self
    }

    pub fn without_back(mut self) -> Self {
        self.allow_back = false;
        self
    }
}

/// One editable field of a form prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField {
    pub label: String,
    pub initial: String,
}

impl TextField {
    pub fn new(label: impl Into<String>, initial: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            initial: initial.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptKind {
    YesNo,
    Acknowledge,
    ChooseOne { header: String, values: Vec<String> },
    ChooseMany { header: String, values: Vec<String> },
    TextFields { fields: Vec<TextField> },
    Multiline { prompt: String, initial: String },
    ShowText { text: String },
}

/// Fully described prompt, independent of how it is rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSpec {
    pub title: String,
    pub lines: Vec<String>,
    pub kind: PromptKind,
    pub options: PromptOptions,
}

impl PromptSpec {
    pub fn new(title: impl Into<String>, kind: PromptKind) -> Self {
        Self {
            title: title.into(),
            lines: Vec::new(),
            kind,
            options: PromptOptions::default(),
        }
    }

    pub fn lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lines = lines.into_iter().map(Into::into).collect();
        self
    }

    pub fn options(mut self, options: PromptOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptReply {
    Bool(bool),
    Ack,
    Index(usize),
    Indices(Vec<usize>),
    Texts(Vec<String>),
    Text(String),
}

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("prompt surface closed")]
    Closed,
    #[error("interaction aborted by user")]
    Aborted,
    #[error("scripted prompt mismatch: {0}")]
    Script(String),
    #[error("prompt `{title}` returned a reply of the wrong shape")]
    Mismatch { title: String },
    #[error("terminal IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("terminal interaction failed: {0}")]
    Interaction(#[from] dialoguer::Error),
}

pub type PromptOutcome<T> = Result<PromptResult<T>, PromptError>;

#[async_trait]
pub trait PromptSurface: Send + Sync {
    async fn ask(&self, spec: PromptSpec) -> PromptOutcome<PromptReply>;

    async fn yes_no(&self, title: &str, lines: &[String], options: PromptOptions) -> PromptOutcome<bool> {
        let spec = PromptSpec::new(title, PromptKind::YesNo)
            .lines(lines.iter().cloned())
            .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Bool(value) => Some(value),
            _ => None,
        })
    }

    async fn acknowledge(
        &self,
        title: &str,
        lines: &[String],
        options: PromptOptions,
    ) -> PromptOutcome<()> {
        let spec = PromptSpec::new(title, PromptKind::Acknowledge)
            .lines(lines.iter().cloned())
            .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Ack => Some(()),
            _ => None,
        })
    }

    async fn choose_one(
        &self,
        title: &str,
        header: &str,
        values: &[String],
        options: PromptOptions,
    ) -> PromptOutcome<usize> {
        let count = values.len();
        let spec = PromptSpec::new(
            title,
            PromptKind::ChooseOne {
                header: header.to_string(),
                values: values.to_vec(),
            },
        )
        .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Index(index) if index < count => Some(index),
            _ => None,
        })
    }

    async fn choose_many(
        &self,
        title: &str,
        header: &str,
        values: &[String],
        options: PromptOptions,
    ) -> PromptOutcome<Vec<usize>> {
        let count = values.len();
        let spec = PromptSpec::new(
            title,
            PromptKind::ChooseMany {
                header: header.to_string(),
                values: values.to_vec(),
            },
        )
        .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Indices(indices) if indices.iter().all(|index| *index < count) => {
                Some(indices)
            }
            PromptReply::Index(index) if index < count => Some(vec![index]),
            _ => None,
        })
    }

    async fn text_fields(
        &self,
        title: &str,
        fields: &[TextField],
        options: PromptOptions,
    ) -> PromptOutcome<Vec<String>> {
        let count = fields.len();
        let spec = PromptSpec::new(
            title,
            PromptKind::TextFields {
                fields: fields.to_vec(),
            },
        )
        .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Texts(values) if values.len() == count => Some(values),
            _ => None,
        })
    }

    async fn multiline_text(
        &self,
        title: &str,
        prompt: &str,
        initial: &str,
        options: PromptOptions,
    ) -> PromptOutcome<String> {
        let spec = PromptSpec::new(
            title,
            PromptKind::Multiline {
                prompt: prompt.to_string(),
                initial: initial.to_string(),
            },
        )
        .options(options);
        expect_reply(title, self.ask(spec).await?, |reply| match reply {
            PromptReply::Text(text) => Some(text),
            _ => None,
        })
    }

    /// Displays read-only text, e.g. a preview of generated YAML.
    async fn show_text(&self, title: &str, text: &str) -> Result<(), PromptError> {
        let spec = PromptSpec::new(
            title,
            PromptKind::ShowText {
                text: text.to_string(),
            },
        )
        .options(PromptOptions::default().without_back());
        self.ask(spec).await.map(|_| ())
    }
}

fn expect_reply<T>(
    title: &str,
    result: PromptResult<PromptReply>,
    extract: impl FnOnce(PromptReply) -> Option<T>,
) -> PromptOutcome<T> {
    match result {
        PromptResult::Value(reply) => extract(reply)
            .map(PromptResult::Value)
            .ok_or_else(|| PromptError::Mismatch {
                title: title.to_string(),
            }),
        PromptResult::Back => Ok(PromptResult::Back),
        PromptResult::Other => Ok(PromptResult::Other),
    }
}
