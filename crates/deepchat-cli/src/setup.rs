use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::Config;

const CONFIG_TEMPLATE: &str = r#"# deepchat configuration
#
# Every key can also be set from the environment, e.g.
#   DEEPCHAT_MODEL=qwq  DEEPCHAT_MARKERS__OPEN="<reasoning>"

provider = "ollama"
# model = "deepseek-r1"
system_prompt = "You are a helpful assistant."
# temperature = 0.6
# max_tokens = 4096

# Fold the reasoning to a single line once the answer begins.
collapse_thinking = true

# Shown at startup as a terminal banner. Missing files are skipped.
# logo = "~/.config/deepchat/logo.png"

# Markers the model uses around its reasoning.
[markers]
open = "<think>"
close = "</think>"

# ── Backends ─────────────────────────────────────────────────────

[providers.ollama]
base_url = "http://localhost:11434"
default_model = "deepseek-r1"

# [providers.ollama.parameters]
# num_ctx = 8192
# keep_alive = "10m"

# [providers.openai]
# base_url = "http://localhost:8080/v1"   # llama.cpp, vLLM, LM Studio, ...
# api_key = "sk-..."                      # or set OPENAI_API_KEY env var
# default_model = "qwq-32b"
"#;

pub fn run() -> Result<()> {
    let config_dir = Config::config_dir()?;
    let config_path = config_dir.join("config.toml");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("Failed to create config directory: {}", config_dir.display()))?;

    if config_path.exists() {
        println!("Existing config file found:");
        println!("  {}", config_path.display());
        print!("\nOverwrite? (The existing file will be backed up) [y/N] ");

        // Flush stdout so the prompt appears before reading
        std::io::stdout().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Setup cancelled.");
            return Ok(());
        }

        let backup = backup_file(&config_path)?;
        println!("  Backed up to {}", backup.display());
    }

    write_template(&config_path)?;
    println!("Created {}", config_path.display());

    println!("\nNext steps:");
    println!("  1. Pull a reasoning model:  ollama pull deepseek-r1");
    println!("  2. Start chatting:          deepchat");
    println!("  3. Or ask once:             deepchat -p \"why is the sky blue?\"");

    Ok(())
}

fn write_template(path: &Path) -> Result<()> {
    std::fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Move a file to <name>.bak, appending a timestamp if .bak already exists.
fn backup_file(path: &Path) -> Result<PathBuf> {
    let mut backup = path.with_extension("toml.bak");

    if backup.exists() {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        backup = path.with_extension(format!("toml.bak.{}", timestamp));
    }

    std::fs::rename(path, &backup)
        .with_context(|| format!("Failed to back up {} to {}", path.display(), backup.display()))?;

    Ok(backup)
}
