use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::output::{self, OutputPreferences};
use crate::backend::{KubectlCluster, PrometheusHttp};
use crate::config::{ConfigManager, ConfigOverrides, OptimizationMode};
use crate::discovery::{Backends, BuilderModule, Discovery};
use crate::emit::YamlArtifacts;
use crate::prompt::{PromptSurface, ScriptedPrompts, TerminalPrompts};
use crate::wizard::{Navigator, ResumeDecision, ResumeFile, RunOutcome, Session, MSG_CANCELLED};

/// Discovers a Kubernetes application and writes the servo manifests that
/// optimize it.
#[derive(Debug, Parser)]
#[command(name = "manifest_builder_cli", version, about)]
pub struct CliArgs {
    /// Opsani account name.
    #[arg(long)]
    pub account: Option<String>,
    /// Application name as it appears in Opsani.
    #[arg(long)]
    pub app: Option<String>,
    /// Servo auth token.
    #[arg(long, env = "OPSANI_AUTH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,
    #[arg(long, value_enum)]
    pub mode: Option<OptimizationMode>,
    /// Directory the manifests are written to.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,
    /// Where progress is saved between runs.
    #[arg(long)]
    pub resume_file: Option<PathBuf>,
    #[arg(long, default_value = "kubectl")]
    pub kubectl: PathBuf,
    /// Ignore any saved progress.
    #[arg(long)]
    pub fresh: bool,
    /// Keep the effective settings, except the token, as defaults for later runs.
    #[arg(long)]
    pub save_config: bool,
    /// Print the effective configuration and exit.
    #[arg(long)]
    pub print_config: bool,
    /// Disable colours and icons.
    #[arg(long)]
    pub plain: bool,
}

impl CliArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            account: self.account.clone(),
            app: self.app.clone(),
            token: self.token.clone(),
            mode: self.mode,
            servo_image: None,
            output_dir: self.output_dir.clone(),
            resume_file: self.resume_file.clone(),
        }
    }
}

/// Runs one discovery session and returns its outcome.
pub async fn run_cli(args: CliArgs) -> anyhow::Result<RunOutcome> {
    output::set_preferences(OutputPreferences {
        plain: args.plain,
        quiet: false,
    });

    let manager = ConfigManager::new();
    let config = manager
        .load()
        .with_context(|| format!("failed to load {}", manager.path().display()))?
        .merge(args.overrides());

    if args.save_config {
        manager
            .save(&config.without_token())
            .with_context(|| format!("failed to save {}", manager.path().display()))?;
        output::success(format!("Saved settings to {}", manager.path().display()));
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config.redacted())?);
        return Ok(RunOutcome::Completed);
    }

    let cancel = CancellationToken::new();
    let mut presenter = None;
    let prompts: Arc<dyn PromptSurface> = match ScriptedPrompts::from_env() {
        Some(scripted) => Arc::new(scripted.with_cancellation(cancel.clone())),
        None => {
            let (handle, terminal) = TerminalPrompts::channel(cancel.clone());
            presenter = Some(tokio::spawn(terminal.run()));
            Arc::new(handle)
        }
    };

    let backends = Backends {
        cluster: Arc::new(KubectlCluster::new(args.kubectl.clone())),
        metrics: Arc::new(PrometheusHttp::new()?),
        emitter: Arc::new(YamlArtifacts::new(config.output_root())),
    };
    let store = ResumeFile::new(config.resume_path());
    info!(resume_file = %store.path().display(), "starting manifest builder");

    let builder = BuilderModule::new(backends);
    let initial = builder.initial_step();
    let mut navigator = Navigator::new(Session::new(Discovery::new(config)), prompts, Box::new(store))
        .with_cancellation(cancel.clone());
    navigator.install(Box::new(builder));

    let outcome = match resume(&mut navigator, args.fresh).await? {
        Some(outcome) => outcome,
        None => {
            let report = navigator.run(initial).await;
            output::report(&report);
            report.outcome
        }
    };

    // Dropping the navigator drops the last prompt handle, which ends the
    // presenter loop.
    drop(navigator);
    if let Some(presenter) = presenter {
        if let Err(err) = presenter.await {
            output::warning(format!("terminal presenter stopped abnormally: {err}"));
        }
    }
    Ok(outcome)
}

/// Offers saved progress. `Some` means the session ends without running.
async fn resume(
    navigator: &mut Navigator<Discovery>,
    fresh: bool,
) -> anyhow::Result<Option<RunOutcome>> {
    if fresh {
        return Ok(None);
    }
    match navigator.offer_resume().await? {
        ResumeDecision::NothingSaved | ResumeDecision::Resume | ResumeDecision::StartFresh => {
            Ok(None)
        }
        ResumeDecision::BackedOut => {
            for message in &navigator.session().messages {
                output::warning(message);
            }
            Ok(Some(RunOutcome::BackedOut))
        }
        ResumeDecision::Cancelled => {
            output::warning(MSG_CANCELLED);
            Ok(Some(RunOutcome::Cancelled))
        }
    }
}
