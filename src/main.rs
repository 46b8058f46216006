use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use contextaware_protocol::{
    ChunkData, ContextQuery, EngineKind, Envelope, MessageType, PreferencesPatch, SummarizeData,
    SummaryMode, SummaryQuery, SurfaceBus, SurfaceBusConfig, SurfaceName, Theme,
};
use coordinator::{Coordinator, CoordinatorConfig, CoordinatorController};
use engine_gateway::scripted::{ScriptedEngine, ScriptedReply};
use engine_gateway::{EngineGateway, PlatformEngine};
use result_store::{FileBackend, ResultStore};
use tokio::io::AsyncReadExt;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "ContextAware coordinator developer CLI", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Answer every prompt with this text instead of the host engines
    #[arg(long)]
    scripted_reply: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize text (read from stdin when omitted)
    Summarize {
        text: Option<String>,
        /// Page the text came from; the result is cached under it
        #[arg(short, long)]
        url: Option<String>,
        /// local (fast engine) or cloud (deep engine)
        #[arg(short, long, default_value = "local")]
        mode: String,
        /// Instruction for the deep engine
        #[arg(short, long)]
        prompt: Option<String>,
        /// Print fragments as they are generated
        #[arg(long)]
        stream: bool,
    },
    /// Show the cached summary for a page
    Summary { url: String },
    /// Show visit history, optionally for one site
    Context { domain: Option<String> },
    /// Report engine availability
    Engines,
    /// Show or change preferences
    Preferences {
        #[arg(long)]
        theme: Option<String>,
        #[arg(long)]
        default_engine: Option<String>,
        #[arg(long)]
        speech: Option<bool>,
        #[arg(long)]
        auto_run: Option<bool>,
    },
    /// Erase every stored summary, visit and preference
    Clear,
}

fn load_config(cli: &Cli) -> Result<CoordinatorConfig> {
    let config = match &cli.config {
        Some(path) => CoordinatorConfig::from_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => CoordinatorConfig::default(),
    };
    let mut config = config.apply_env();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    config.ensure_dirs()?;
    Ok(config)
}

fn gateway(scripted_reply: Option<&str>) -> EngineGateway {
    match scripted_reply {
        Some(reply) => [EngineKind::Fast, EngineKind::Deep]
            .into_iter()
            .fold(EngineGateway::new(), |gateway, kind| {
                gateway.with_engine(Arc::new(
                    ScriptedEngine::ready(kind).with_fallback(ScriptedReply::text(reply)),
                ))
            }),
        None => EngineGateway::new()
            .with_engine(Arc::new(PlatformEngine::detect(EngineKind::Fast)))
            .with_engine(Arc::new(PlatformEngine::detect(EngineKind::Deep))),
    }
}

fn preferences_patch(
    theme: Option<String>,
    default_engine: Option<String>,
    speech: Option<bool>,
    auto_run: Option<bool>,
) -> Result<PreferencesPatch> {
    let theme = match theme.as_deref() {
        None => None,
        Some("light") => Some(Theme::Light),
        Some("dark") => Some(Theme::Dark),
        Some("system") => Some(Theme::System),
        Some(other) => bail!("unknown theme {other:?}"),
    };
    let default_engine_kind = match default_engine.as_deref() {
        None => None,
        Some(value) => match SummaryMode::parse(value) {
            Some(mode) => Some(mode.engine_kind()),
            None => bail!("unknown engine {value:?}"),
        },
    };
    Ok(PreferencesPatch {
        theme,
        default_engine_kind,
        speech_enabled: speech,
        auto_run,
    })
}

async fn request_envelope(command: Commands) -> Result<Envelope> {
    let envelope = match command {
        Commands::Summarize {
            text,
            url,
            mode,
            prompt,
            stream,
        } => {
            let mode = SummaryMode::parse(&mode)
                .with_context(|| format!("unknown mode {mode:?}; use local or cloud"))?;
            let text = match text {
                Some(text) => text,
                None => {
                    let mut buffer = String::new();
                    tokio::io::stdin().read_to_string(&mut buffer).await?;
                    buffer
                }
            };
            let mut data = SummarizeData::new(text);
            data.url = url;
            data.prompt = prompt;
            data.stream = stream;
            Envelope::request(MessageType::summarize_for(mode), data)
        }
        Commands::Summary { url } => Envelope::request(MessageType::GetSummary, SummaryQuery { url }),
        Commands::Context { domain } => {
            Envelope::request(MessageType::GetContext, ContextQuery { domain })
        }
        Commands::Engines => Envelope::request(MessageType::CheckEngines, serde_json::json!({})),
        Commands::Preferences {
            theme,
            default_engine,
            speech,
            auto_run,
        } => {
            let patch = preferences_patch(theme, default_engine, speech, auto_run)?;
            if patch.is_empty() {
                Envelope::request(MessageType::GetPreferences, serde_json::json!({}))
            } else {
                Envelope::request(MessageType::UpdatePreferences, patch)
            }
        }
        Commands::Clear => Envelope::request(MessageType::ClearAllData, serde_json::json!({})),
    };
    Ok(envelope)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,coordinator=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    info!(store = %config.store_path().display(), "using result store");

    let store = Arc::new(
        ResultStore::new(Arc::new(FileBackend::new(config.store_path())))
            .with_limits(config.store_limits()),
    );
    let bus = Arc::new(SurfaceBus::new(SurfaceBusConfig {
        mailbox_capacity: config.mailbox_capacity.max(1),
    }));
    let coordinator = Coordinator::new(gateway(cli.scripted_reply.as_deref()), store, config);
    let controller = CoordinatorController::launch(coordinator, bus.clone()).await?;

    let surface = SurfaceName::popup();
    let mut mailbox = bus.register(surface.clone());
    let printer = tokio::spawn(async move {
        while let Some(delivery) = mailbox.recv().await {
            if let Ok(chunk) = delivery.envelope.decode::<ChunkData>() {
                eprint!("{}", chunk.chunk);
            }
        }
    });

    let envelope = request_envelope(cli.command).await?;
    let reply = bus
        .request(&surface, &SurfaceName::background(), envelope)
        .await
        .context("coordinator did not answer")?;
    println!("{}", serde_json::to_string_pretty(&reply.data)?);

    bus.unregister(&surface);
    printer.abort();
    controller.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextaware_protocol::Availability;

    #[tokio::test]
    async fn scripted_reply_serves_both_engines() {
        let gateway = gateway(Some("Canned summary."));
        for kind in [EngineKind::Fast, EngineKind::Deep] {
            assert_eq!(gateway.probe(kind).await, Availability::Ready);
            let options = engine_gateway::EngineOptions::default();
            let reply = gateway.run_once(kind, "text", &options).await.unwrap();
            assert_eq!(reply, "Canned summary.");
        }
    }
}
