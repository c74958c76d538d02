use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use deepchat_core::{Markers, DEFAULT_SYSTEM_PROMPT};

pub const DEFAULT_PROVIDER: &str = "ollama";
pub const DEFAULT_MODEL: &str = "deepseek-r1";

/// Environment variables with this prefix override the config file,
/// e.g. `DEEPCHAT_MODEL` or `DEEPCHAT_MARKERS__OPEN`.
const ENV_PREFIX: &str = "DEEPCHAT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend to talk to (references [providers.X]; "ollama" or "openai")
    pub provider: String,

    /// Model override (falls back to the provider's default_model)
    pub model: Option<String>,

    /// Seed system message of every conversation
    pub system_prompt: String,

    pub temperature: Option<f32>,

    pub max_tokens: Option<u32>,

    /// Markers around the reasoning segment
    pub markers: Markers,

    /// Logo image shown at startup (supports $HOME, ~)
    pub logo: Option<String>,

    /// Fold the thinking region to one line once the answer starts
    pub collapse_thinking: bool,

    pub providers: HashMap<String, ProviderConfigEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            model: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            temperature: None,
            max_tokens: None,
            markers: Markers::default(),
            logo: None,
            collapse_thinking: true,
            providers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfigEntry {
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub default_model: Option<String>,

    /// Extra parameters to pass to the backend (e.g., num_ctx, keep_alive)
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
}

/// Expand environment variables in a path string
/// Supports: $VAR, ${VAR}, ~
pub fn expand_path(path: &str) -> PathBuf {
    let mut result = path.to_string();

    // Expand ~ at the start
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    } else if result == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    // Expand $VAR and ${VAR}
    let re = match regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") {
        Ok(re) => re,
        Err(_) => return PathBuf::from(result),
    };
    let expanded = re.replace_all(&result, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    });

    PathBuf::from(expanded.to_string())
}

impl Config {
    /// Load defaults, then ~/.config/deepchat/config.toml, then DEEPCHAT_* variables.
    /// A missing config file is not an error.
    pub fn load() -> Result<Self> {
        let figment = Self::figment(&Self::config_path()?)
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Load defaults overlaid with a specific file only.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::extract(Self::figment(path))
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default())).merge(Toml::file(path))
    }

    fn extract(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .context("Invalid deepchat configuration")?;
        config.markers.validate()?;
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("deepchat"))
    }

    /// Settings of the selected provider (empty if the file has none).
    pub fn provider_entry(&self) -> ProviderConfigEntry {
        self.providers.get(&self.provider).cloned().unwrap_or_default()
    }

    /// Model to request: explicit override, then provider default, then the
    /// built-in default for Ollama. OpenAI-compatible servers may serve
    /// whatever they have loaded.
    pub fn resolved_model(&self) -> Option<String> {
        self.model
            .clone()
            .or_else(|| self.provider_entry().default_model)
            .or_else(|| (self.provider == DEFAULT_PROVIDER).then(|| DEFAULT_MODEL.to_string()))
    }

    /// Logo location: configured path or ~/.config/deepchat/logo.png.
    pub fn logo_path(&self) -> Option<PathBuf> {
        match &self.logo {
            Some(path) => Some(expand_path(path)),
            None => Self::config_dir().ok().map(|d| d.join("logo.png")),
        }
    }
}
