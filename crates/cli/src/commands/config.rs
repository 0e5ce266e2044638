//! Config command - write an example configuration

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;

use crate::args::{ConfigArgs, ConfigCommands};
use crate::config::AppConfig;

pub async fn execute(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommands::Init { path, force } => init_config(&path, force),
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            path.display()
        );
    }

    let content = AppConfig::example_toml();
    let example: AppConfig =
        toml::from_str(&content).context("Built-in example configuration is invalid")?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    println!("Created config file: {}", path.display());
    println!("It lists {} example sources.", example.sources.len());
    println!();
    println!("Next steps:");
    println!("  1. Edit the [[sources]] entries and enable the ones you want");
    println!(
        "  2. Export {}, {} and the source tokens",
        example.telegram.bot_token_env, example.telegram.chat_id_env
    );
    println!("  3. Run 'post-relay doctor' to validate your setup");
    println!("  4. Run 'post-relay run --dry-run --once' to test");

    Ok(())
}
