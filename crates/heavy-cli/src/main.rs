use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use heavy_core::{AgentConfig, AgentLoop, Attachment, ProgressTracker, Provider};
use heavy_orchestrator::{
    clean_output, AgentFactory, MegamindPipeline, ProgressReporter, TaskOrchestrator,
    POLL_INTERVAL,
};
use heavy_providers::{GeminiProvider, OpenAIProvider};

mod chat;
mod config;
mod output;

use config::{Config, ProviderKind};
use output::Output;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Everything, including raw provider payloads
    Trace,
    /// Agent iterations and tool calls
    Debug,
    /// Stage transitions
    Info,
    /// Only recovered failures and errors
    Warn,
    /// Only errors
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "heavy")]
#[command(author, version, about = "Multi-agent research from the command line", long_about = None)]
pub struct Cli {
    /// Extra configuration file (merged over ~/.config/heavy/config.toml and ./heavy.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Provider to use (overrides config)
    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    /// Model to use (overrides config)
    #[arg(short, long, global = true)]
    pub model: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// How progress and results are printed
    #[arg(long, value_enum, default_value = "human", global = true)]
    pub events: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive session with a single agent
    Chat,
    /// Run a single agent once
    Run {
        prompt: String,

        /// Image to attach (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,
    },
    /// Split the query into parallel sub-tasks and aggregate the answers
    Multi { query: String },
    /// Five-stage research pipeline with validation
    Megamind {
        query: String,

        /// Image to attach (repeatable)
        #[arg(short, long = "image")]
        images: Vec<PathBuf>,

        /// Also print questions, research, draft and critiques
        #[arg(long)]
        show_thinking: bool,
    },
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --debug overrides --log-level
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    let filter = EnvFilter::new(log_level.as_filter());

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        // stdout carries answers only
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if let Some(model) = &cli.model {
        config.provider_settings_mut().model = Some(model.clone());
    }

    if matches!(cli.command, Commands::Config) {
        return show_config(&config);
    }

    config.validate()?;
    let provider = create_provider(&config);

    match &cli.command {
        Commands::Chat => chat::run(provider, &config).await,
        Commands::Run { prompt, images } => {
            let attachments = load_images(images)?;
            run_once(provider, &config, prompt, &attachments, cli.events).await
        }
        Commands::Multi { query } => run_multi(provider, &config, query, cli.events).await,
        Commands::Megamind {
            query,
            images,
            show_thinking,
        } => {
            let attachments = load_images(images)?;
            run_megamind(provider, &config, query, &attachments, *show_thinking, cli.events).await
        }
        Commands::Config => Ok(()),
    }
}

fn create_provider(config: &Config) -> Arc<dyn Provider> {
    let settings = config.provider_settings();
    let api_key = settings.api_key.clone().unwrap_or_default();

    match config.provider {
        ProviderKind::Gemini => {
            let mut provider = GeminiProvider::new(api_key);
            if let Some(model) = &settings.model {
                provider = provider.with_default_model(model);
            }
            if let Some(url) = &settings.base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
        ProviderKind::Openrouter => {
            let mut provider = OpenAIProvider::openrouter(api_key);
            if let Some(model) = &settings.model {
                provider = provider.with_default_model(model);
            }
            if let Some(url) = &settings.base_url {
                provider = provider.with_base_url(url);
            }
            Arc::new(provider)
        }
    }
}

pub(crate) fn create_agent(provider: Arc<dyn Provider>, config: &Config, id: &str) -> AgentLoop {
    let agent_config = AgentConfig::new(id)
        .with_system_prompt(config.system_prompt.as_str())
        .with_max_iterations(config.agent.max_iterations);
    AgentLoop::new(provider, heavy_tools::default_registry(), agent_config)
}

fn agent_factory(provider: Arc<dyn Provider>, config: &Config) -> AgentFactory {
    AgentFactory::new(provider, heavy_tools::default_registry())
        .with_system_prompt(config.system_prompt.as_str())
        .with_max_iterations(config.agent.max_iterations)
}

fn load_images(paths: &[PathBuf]) -> Result<Vec<Attachment>> {
    paths.iter().map(|path| load_image(path)).collect()
}

fn load_image(path: &Path) -> Result<Attachment> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read image: {:?}", path))?;
    let attachment = Attachment::from_bytes(&bytes)
        .with_context(|| format!("Unsupported image: {:?}", path))?;
    if !attachment.mime_type.starts_with("image/") {
        anyhow::bail!("Not an image: {:?} ({})", path, attachment.mime_type);
    }
    Ok(attachment)
}

async fn run_once(
    provider: Arc<dyn Provider>,
    config: &Config,
    prompt: &str,
    attachments: &[Attachment],
    output: Output,
) -> Result<()> {
    output.status("Agent is thinking...");
    match create_agent(provider, config, "agent").run(prompt, attachments).await {
        Ok(answer) => {
            output.result(&clean_output(&answer), None);
            output.done();
            Ok(())
        }
        Err(e) => {
            output.error(&e.to_string());
            Err(e.into())
        }
    }
}

async fn run_multi(
    provider: Arc<dyn Provider>,
    config: &Config,
    query: &str,
    output: Output,
) -> Result<()> {
    let orchestrator = TaskOrchestrator::new(agent_factory(provider, config))
        .with_config(config.orchestrator_config());

    let tracker = Arc::new(ProgressTracker::new());
    let (reporter, events) = ProgressReporter::spawn(Arc::clone(&tracker), POLL_INTERVAL);
    let printer = tokio::spawn(output.forward(events));

    let on_stage = move |label: &str| output.status(label);
    let outcome = orchestrator
        .orchestrate_tracked(query, &tracker, Some(&on_stage))
        .await;

    reporter.stop().await;
    let _ = printer.await;

    match outcome {
        Ok(result) => {
            let details = serde_json::to_value(&result).ok();
            output.result(&clean_output(&result.final_result), details);
            output.done();
            Ok(())
        }
        Err(e) => {
            output.error(&e.to_string());
            Err(e.into())
        }
    }
}

async fn run_megamind(
    provider: Arc<dyn Provider>,
    config: &Config,
    query: &str,
    attachments: &[Attachment],
    show_thinking: bool,
    output: Output,
) -> Result<()> {
    let pipeline = MegamindPipeline::new(agent_factory(provider, config))
        .with_config(config.orchestrator_config())
        .with_prompts(config.prompt_templates());

    let tracker = Arc::new(ProgressTracker::new());
    let (reporter, events) = ProgressReporter::spawn(Arc::clone(&tracker), POLL_INTERVAL);
    let printer = tokio::spawn(output.forward(events));

    let on_stage = move |label: &str| output.status(label);
    let outcome = pipeline
        .orchestrate_tracked(query, attachments, &tracker, Some(&on_stage))
        .await;

    reporter.stop().await;
    let _ = printer.await;

    match outcome {
        Ok(result) => {
            if show_thinking {
                output.thinking(&result);
            }
            let details = show_thinking
                .then(|| serde_json::to_value(&result).ok())
                .flatten();
            output.result(&clean_output(result.final_result().unwrap_or_default()), details);
            output.done();
            Ok(())
        }
        Err(e) => {
            if show_thinking {
                output.thinking(e.partial());
            }
            output.error(&e.to_string());
            Err(e.into())
        }
    }
}

fn show_config(config: &Config) -> Result<()> {
    let redacted = config.redacted();
    let rendered = toml::to_string_pretty(&redacted).context("Failed to render configuration")?;

    let user_file = Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/heavy/config.toml".to_string());
    println!(
        "# Sources (later wins): defaults, {}, ./heavy.toml, --config, HEAVY_* env",
        user_file
    );
    println!("{}", rendered);
    Ok(())
}
