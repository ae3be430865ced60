use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use coordination::{ConversationTurn, RequestState};
use futures::StreamExt;
use pedal_agents::adapters::http_orchestrator;
use pedal_agents::config::{check_endpoint, check_service, PedalConfig};
use pedal_agents::telemetry::append_telemetry;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Answer guitar pedal questions through the orchestration pipeline.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file (overrides PEDAL_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask one question
    Ask {
        /// The question text
        query: String,

        /// Pedal the question is about
        #[arg(long, default_value = "")]
        subject: String,

        #[arg(long, default_value = "cli")]
        requester: String,

        #[arg(long, default_value = "cli")]
        conversation: String,

        /// JSON file with earlier turns: [{"role": "user", "content": "..."}]
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print each stage as it completes
        #[arg(long, default_value_t = false)]
        stream: bool,

        /// Print the final state as JSON instead of the answer text
        #[arg(long, default_value_t = false)]
        json: bool,

        /// Append run metrics to this JSONL file
        #[arg(long)]
        telemetry: Option<PathBuf>,
    },
    /// Probe the configured model endpoint and specialist services
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = PedalConfig::load(args.config.as_deref()).context("loading configuration")?;

    match args.command {
        Command::Check => check(&config).await,
        Command::Ask {
            query,
            subject,
            requester,
            conversation,
            history,
            stream,
            json,
            telemetry,
        } => {
            let history = match history {
                Some(path) => load_history(&path)?,
                None => Vec::new(),
            };
            let state =
                RequestState::new(requester, conversation, subject, query).with_history(history);
            let engine = http_orchestrator(&config).context("building orchestrator")?;

            let final_state = if stream {
                let mut events = Box::pin(engine.run_stream(state));
                let mut last = None;
                while let Some(event) = events.next().await {
                    println!("{}", serde_json::to_string(&event)?);
                    last = Some(event.state().clone());
                }
                last.context("stream ended without a final state")?
            } else {
                let (state, metrics) = engine
                    .run_with_telemetry(state, CancellationToken::new())
                    .await;
                metrics.emit();
                if let Some(path) = &telemetry {
                    append_telemetry(&metrics, path);
                }
                state
            };

            if stream && telemetry.is_some() {
                warn!("--telemetry is ignored with --stream");
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&final_state)?);
            } else if !stream {
                println!("{}", final_state.final_answer.as_deref().unwrap_or_default());
            }
            Ok(())
        }
    }
}

fn load_history(path: &std::path::Path) -> Result<Vec<ConversationTurn>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading history from {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing history in {}", path.display()))
}

async fn check(config: &PedalConfig) -> Result<()> {
    let llm_ok = check_endpoint(&config.llm.base_url).await;
    let manual_ok = check_service(&config.specialists.manual_url).await;
    let pricing_ok = check_service(&config.specialists.pricing_url).await;

    info!(url = %config.llm.base_url, ok = llm_ok, "model endpoint");
    info!(url = %config.specialists.manual_url, ok = manual_ok, "manual specialist");
    info!(url = %config.specialists.pricing_url, ok = pricing_ok, "pricing specialist");

    if llm_ok && manual_ok && pricing_ok {
        Ok(())
    } else {
        anyhow::bail!("one or more services are unreachable")
    }
}
