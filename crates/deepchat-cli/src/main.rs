use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use deepchat_core::{Error, Provider, SessionController, SessionOptions};
use deepchat_providers::{OllamaProvider, OpenAIProvider};

mod chat;
mod config;
mod interface;
mod logo;
mod markdown;
mod setup;

use config::{expand_path, Config};
use interface::ReadlineInterface;

/// Widest logo banner, in terminal columns.
const MAX_LOGO_WIDTH: u16 = 48;

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: includes every streamed chunk
    Trace,
    /// Verbose: requests, marker transitions, navigation
    Debug,
    /// Standard: turns and new conversations
    Info,
    /// Quiet: only warnings and errors
    Warn,
    /// Minimal: only errors
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
#[command(name = "deepchat")]
#[command(author, version, about = "Terminal chat for local reasoning models", long_about = None)]
pub struct Cli {
    /// Ask a single question and exit
    #[arg(short, long)]
    pub prompt: Option<String>,

    /// Model to use (overrides config)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Backend to use: ollama or openai (overrides config)
    #[arg(long)]
    pub provider: Option<String>,

    /// Base URL of the backend (overrides config)
    #[arg(long)]
    pub base_url: Option<String>,

    /// System prompt for new conversations (overrides config)
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0-2.0)
    #[arg(short, long)]
    pub temperature: Option<f32>,

    /// Maximum tokens to generate
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Logo image to show at startup (overrides config)
    #[arg(long)]
    pub logo: Option<String>,

    /// Do not show the logo banner
    #[arg(long)]
    pub no_logo: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format)
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the effective configuration
    Config,
    /// List models available on the backend
    Models,
    /// Write a starter configuration to ~/.config/deepchat
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let interactive =
        cli.command.is_none() && cli.prompt.is_none() && atty::is(atty::Stream::Stdout);

    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };

    let filter = EnvFilter::new(log_level.as_filter());

    if interactive && cli.log_file.is_none() {
        // Log lines would tear the live render; drop them.
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::sink)
            .init();
    } else if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::sync::Mutex::new(file))
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    // Handle setup before config is required
    if matches!(&cli.command, Some(Commands::Setup)) {
        return setup::run();
    }

    let mut config = Config::load()?;
    apply_overrides(&mut config, &cli);

    match &cli.command {
        Some(Commands::Config) => show_config(&config),
        Some(Commands::Models) => list_models(&config).await,
        Some(Commands::Setup) => setup::run(),
        None => match &cli.prompt {
            Some(prompt) => completion_mode(&config, prompt).await,
            None => chat_mode(&cli, &config).await,
        },
    }
}

/// Layer command-line flags over the loaded configuration.
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(provider) = &cli.provider {
        config.provider = provider.to_lowercase();
    }
    if let Some(model) = &cli.model {
        config.model = Some(model.clone());
    }
    if let Some(system) = &cli.system {
        config.system_prompt = system.clone();
    }
    if let Some(t) = cli.temperature {
        config.temperature = Some(t);
    }
    if let Some(n) = cli.max_tokens {
        config.max_tokens = Some(n);
    }
    if let Some(logo) = &cli.logo {
        config.logo = Some(logo.clone());
    }
    if let Some(url) = &cli.base_url {
        config
            .providers
            .entry(config.provider.clone())
            .or_default()
            .base_url = Some(url.clone());
    }
}

/// Build the backend client once; the session keeps it for its lifetime.
fn build_provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let entry = config.provider_entry();
    let model = config.resolved_model();

    match config.provider.as_str() {
        "ollama" => {
            let mut provider = OllamaProvider::new();
            if let Some(url) = entry.base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = model {
                provider = provider.with_default_model(model);
            }
            Ok(Arc::new(provider))
        }
        "openai" => {
            let mut provider = OpenAIProvider::new();
            if let Some(url) = entry.base_url {
                provider = provider.with_base_url(url);
            }
            if let Some(model) = model {
                provider = provider.with_default_model(model);
            }
            if let Some(key) = entry
                .api_key
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            {
                provider = provider.with_api_key(key);
            }
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!(
            "Unknown provider '{}'. Supported providers: ollama, openai",
            other
        ),
    }
}

fn session_options(config: &Config) -> SessionOptions {
    SessionOptions {
        system_prompt: config.system_prompt.clone(),
        model: config.resolved_model(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        extra: config.provider_entry().parameters,
        markers: config.markers.clone(),
    }
}

fn stdout_is_terminal() -> bool {
    atty::is(atty::Stream::Stdout)
}

/// Render the logo banner, or None if it is disabled or cannot be loaded.
fn startup_banner(cli: &Cli, config: &Config) -> Option<String> {
    if cli.no_logo || !stdout_is_terminal() {
        return None;
    }
    let path = config.logo_path()?;
    let columns = crossterm::terminal::size()
        .map(|(w, _)| w)
        .unwrap_or(80)
        .min(MAX_LOGO_WIDTH);

    match logo::load_banner(&path, columns as u32) {
        Ok(banner) => Some(banner),
        Err(e @ Error::AssetMissing(_)) => {
            warn!(error = %e, "Logo not shown");
            None
        }
        Err(e) => {
            warn!(error = %e, "Failed to render logo");
            None
        }
    }
}

async fn completion_mode(config: &Config, prompt: &str) -> Result<()> {
    let provider = build_provider(config)?;
    let mut controller = SessionController::new(provider, session_options(config));
    let mut interface = ReadlineInterface::new(None, stdout_is_terminal(), false);

    info!(provider = %config.provider, model = ?controller.model(), "One-shot prompt");
    chat::run_once(&mut interface, &mut controller, prompt).await
}

async fn chat_mode(cli: &Cli, config: &Config) -> Result<()> {
    let provider = build_provider(config)?;
    let mut controller = SessionController::new(provider, session_options(config));

    let model = controller.model().unwrap_or("an unnamed model").to_string();
    let history_path = Config::config_dir().ok().map(|d| d.join("chat_history"));
    debug!(?history_path, "Starting chat");

    let mut interface =
        ReadlineInterface::new(history_path, stdout_is_terminal(), config.collapse_thinking)
            .with_banner(startup_banner(cli, config), logo::title(&model));

    chat::run_chat(&mut interface, &mut controller).await
}

async fn list_models(config: &Config) -> Result<()> {
    let provider = build_provider(config)?;
    let models = provider
        .list_models()
        .await
        .with_context(|| format!("Failed to list models from {}", provider.name()))?;

    let current = config.resolved_model();
    for model in models {
        let marker = if current.as_deref() == Some(model.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{} {}", marker, model);
    }
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    let mut shown = config.clone();
    for entry in shown.providers.values_mut() {
        if entry.api_key.is_some() {
            entry.api_key = Some("(configured)".to_string());
        }
    }

    if let Ok(path) = Config::config_path() {
        println!("# {}", path.display());
    }
    if let Some(path) = shown.logo.as_deref().map(expand_path) {
        println!("# logo resolves to {}", path.display());
    }
    let rendered = toml::to_string_pretty(&shown).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}
