//! Interactive terminal surface.
//!
//! Steps never touch the terminal directly. [`TerminalPrompts`] forwards each
//! request over a channel to a single [`Presenter`] task that renders it with
//! `dialoguer` on a blocking thread and replies through a oneshot.

use std::io::{self, Write};

use async_trait::async_trait;
use colored::Colorize;
use dialoguer::{theme::ColorfulTheme, Input, MultiSelect, Select};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    PromptError, PromptKind, PromptOptions, PromptOutcome, PromptReply, PromptResult, PromptSpec,
    PromptSurface, BACK_LABEL,
};

const CHANNEL_DEPTH: usize = 4;

struct Ticket {
    spec: PromptSpec,
    reply: oneshot::Sender<PromptOutcome<PromptReply>>,
}

/// Cloneable handle used by the navigator and its steps.
#[derive(Clone)]
pub struct TerminalPrompts {
    requests: mpsc::Sender<Ticket>,
}

/// Owns the terminal and renders one prompt at a time.
pub struct Presenter {
    requests: mpsc::Receiver<Ticket>,
    cancel: CancellationToken,
}

impl TerminalPrompts {
    /// Creates the handle and the presenter that serves it. Esc in any prompt
    /// cancels `cancel`.
    pub fn channel(cancel: CancellationToken) -> (Self, Presenter) {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        (
            Self { requests: tx },
            Presenter {
                requests: rx,
                cancel,
            },
        )
    }
}

#[async_trait]
impl PromptSurface for TerminalPrompts {
    async fn ask(&self, spec: PromptSpec) -> PromptOutcome<PromptReply> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Ticket { spec, reply })
            .await
            .map_err(|_| PromptError::Closed)?;
        response.await.map_err(|_| PromptError::Closed)?
    }
}

impl Presenter {
    /// Serves prompts until every [`TerminalPrompts`] handle is dropped or the
    /// run is cancelled.
    pub async fn run(mut self) {
        loop {
            let ticket = tokio::select! {
                _ = self.cancel.cancelled() => break,
                ticket = self.requests.recv() => match ticket {
                    Some(ticket) => ticket,
                    None => break,
                },
            };
            let Ticket { spec, reply } = ticket;
            debug!(prompt = %spec.title, "rendering prompt");
            let outcome = match tokio::task::spawn_blocking(move || render(&spec)).await {
                Ok(outcome) => outcome,
                Err(err) => Err(PromptError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    err.to_string(),
                ))),
            };
            if matches!(outcome, Err(PromptError::Aborted)) {
                self.cancel.cancel();
            }
            if reply.send(outcome).is_err() {
                warn!("prompt requester went away before the answer arrived");
            }
        }
    }
}

fn render(spec: &PromptSpec) -> PromptOutcome<PromptReply> {
    print_header(spec)?;
    match &spec.kind {
        PromptKind::YesNo => {
            let choices = vec!["Yes".to_string(), "No".to_string()];
            select_with_escapes(&spec.title, &choices, &spec.options).map(|result| {
                result.map(|index| PromptReply::Bool(index == 0))
            })
        }
        PromptKind::Acknowledge => {
            let choices = vec!["Ok".to_string()];
            select_with_escapes(&spec.title, &choices, &spec.options)
                .map(|result| result.map(|_| PromptReply::Ack))
        }
        PromptKind::ChooseOne { header, values } => {
            select_with_escapes(header, values, &spec.options)
                .map(|result| result.map(PromptReply::Index))
        }
        PromptKind::ChooseMany { header, values } => choose_many(header, values, &spec.options),
        PromptKind::TextFields { fields } => {
            let mut values = Vec::with_capacity(fields.len());
            for field in fields {
                let raw: String = Input::with_theme(&ColorfulTheme::default())
                    .with_prompt(&field.label)
                    .with_initial_text(field.initial.clone())
                    .allow_empty(true)
                    .interact_text()?;
                match interpret_buffer(&raw, &spec.options) {
                    Typed::Value(value) => values.push(value),
                    Typed::Back => return Ok(PromptResult::Back),
                    Typed::Other => return Ok(PromptResult::Other),
                    Typed::Cancel => return Err(PromptError::Aborted),
                }
            }
            Ok(PromptResult::Value(PromptReply::Texts(values)))
        }
        PromptKind::Multiline { prompt, initial } => multiline(prompt, initial, &spec.options),
        PromptKind::ShowText { text } => {
            let mut stdout = io::stdout();
            writeln!(stdout, "{text}")?;
            stdout.flush()?;
            Ok(PromptResult::Value(PromptReply::Ack))
        }
    }
}

fn print_header(spec: &PromptSpec) -> io::Result<()> {
    let mut stderr = io::stderr();
    writeln!(stderr)?;
    writeln!(stderr, "{}", spec.title.bold().cyan())?;
    for line in &spec.lines {
        writeln!(stderr, "{line}")?;
    }
    if spec.options.allow_back || spec.options.allow_other {
        let mut hints = Vec::new();
        if spec.options.allow_back {
            hints.push("`:back` goes back");
        }
        if spec.options.allow_other {
            hints.push("`:other` escapes to manual entry");
        }
        if matches!(
            spec.kind,
            PromptKind::TextFields { .. } | PromptKind::Multiline { .. }
        ) {
            writeln!(stderr, "{}", hints.join(", ").dimmed())?;
        }
    }
    stderr.flush()
}

enum Extra {
    Back,
    Other,
}

/// `Select` menu with Back and Other appended as trailing items.
fn select_with_escapes(
    prompt: &str,
    values: &[String],
    options: &PromptOptions,
) -> PromptOutcome<usize> {
    let (items, extras) = with_escape_items(values, options);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(&items)
        .default(0)
        .interact_opt()?;
    let Some(index) = selection else {
        return Err(PromptError::Aborted);
    };
    if index < values.len() {
        return Ok(PromptResult::Value(index));
    }
    match extras.get(index - values.len()) {
        Some(Extra::Back) => Ok(PromptResult::Back),
        Some(Extra::Other) => Ok(PromptResult::Other),
        None => Err(PromptError::Aborted),
    }
}

fn choose_many(
    header: &str,
    values: &[String],
    options: &PromptOptions,
) -> PromptOutcome<PromptReply> {
    let (items, extras) = with_escape_items(values, options);
    let selection = MultiSelect::with_theme(&ColorfulTheme::default())
        .with_prompt(header)
        .items(&items)
        .interact_opt()?;
    let Some(picked) = selection else {
        return Err(PromptError::Aborted);
    };
    for index in picked.iter().filter(|index| **index >= values.len()) {
        match extras.get(index - values.len()) {
            Some(Extra::Back) => return Ok(PromptResult::Back),
            Some(Extra::Other) => return Ok(PromptResult::Other),
            None => {}
        }
    }
    Ok(PromptResult::Value(PromptReply::Indices(
        picked.into_iter().filter(|index| *index < values.len()).collect(),
    )))
}

fn with_escape_items(values: &[String], options: &PromptOptions) -> (Vec<String>, Vec<Extra>) {
    let mut items = values.to_vec();
    let mut extras = Vec::new();
    if options.allow_back {
        items.push(BACK_LABEL.to_string());
        extras.push(Extra::Back);
    }
    if options.allow_other {
        items.push(options.other_label.clone());
        extras.push(Extra::Other);
    }
    (items, extras)
}

/// Collects lines until an empty one. The first line may be an escape command.
fn multiline(prompt: &str, initial: &str, options: &PromptOptions) -> PromptOutcome<PromptReply> {
    let theme = ColorfulTheme::default();
    let mut lines: Vec<String> = Vec::new();
    loop {
        let label = if lines.is_empty() {
            format!("{prompt} (empty line to finish)")
        } else {
            "...".to_string()
        };
        let mut input = Input::<String>::with_theme(&theme)
            .with_prompt(label)
            .allow_empty(true);
        if lines.is_empty() && !initial.is_empty() {
            input = input.with_initial_text(initial.to_string());
        }
        let raw = input.interact_text()?;
        if lines.is_empty() {
            match interpret_buffer(&raw, options) {
                Typed::Back => return Ok(PromptResult::Back),
                Typed::Other => return Ok(PromptResult::Other),
                Typed::Cancel => return Err(PromptError::Aborted),
                Typed::Value(_) => {}
            }
        }
        if raw.trim().is_empty() {
            break;
        }
        lines.push(raw);
    }
    Ok(PromptResult::Value(PromptReply::Text(lines.join("\n"))))
}

#[derive(Debug, PartialEq, Eq)]
enum Typed {
    Value(String),
    Back,
    Other,
    Cancel,
}

fn interpret_buffer(buffer: &str, options: &PromptOptions) -> Typed {
    match buffer.trim().to_ascii_lowercase().as_str() {
        ":back" if options.allow_back => Typed::Back,
        ":other" if options.allow_other => Typed::Other,
        ":cancel" | ":quit" => Typed::Cancel,
        _ => Typed::Value(buffer.to_string()),
    }
}
