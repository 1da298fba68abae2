use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use clarity_core::config::{redact_secret, Credentials, CONFIG_TEMPLATE};
use clarity_core::{ClarityConfig, InstructionCatalog};

use crate::commands::load_config;
use crate::ui;

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a commented config file with a placeholder API key
    Init(InitArgs),
    /// Print the effective config (file plus environment), secrets masked
    Show,
    /// Check credentials and template overrides
    Validate,
    /// Show config file path
    Path,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Force overwrite existing config
    #[arg(long, short)]
    pub force: bool,
}

pub fn run_config(args: ConfigArgs, config_path: Option<&Path>) -> Result<()> {
    match args.command {
        ConfigCommands::Init(args) => run_init(args, config_path),
        ConfigCommands::Show => run_show(config_path),
        ConfigCommands::Validate => run_validate(config_path),
        ConfigCommands::Path => run_path(config_path),
    }
}

fn target_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(ClarityConfig::config_path)
}

fn run_init(args: InitArgs, config_path: Option<&Path>) -> Result<()> {
    let path = target_path(config_path);

    if path.exists() && !args.force {
        return Err(anyhow!(
            "Config already exists at {}\n\nUse --force to overwrite",
            path.display()
        ));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(&path, CONFIG_TEMPLATE)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;

    println!("✓ Created config at: {}", path.display());
    println!("\nNext steps:");
    println!("  1. Edit the config: $EDITOR {}", path.display());
    println!("  2. Replace YOUR_API_KEY_HERE, or export GEMINI_API_KEY");
    println!("  3. Run: clarity config validate");
    Ok(())
}

fn run_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    print!("{}", config.redacted().to_toml()?);
    Ok(())
}

fn run_validate(config_path: Option<&Path>) -> Result<()> {
    let path = target_path(config_path);
    let config = load_config(config_path)?;
    if path.exists() {
        println!("✓ Config loaded from {}", path.display());
    } else {
        println!("✓ No config file at {}, using defaults", path.display());
    }

    match &config.catalog.templates_dir {
        Some(dir) => {
            InstructionCatalog::with_overrides_from(dir)?;
            println!("✓ Template overrides readable in {}", dir.display());
        }
        None => println!("✓ Using built-in templates"),
    }
    println!("✓ Artifacts are written to {}", config.output.dir.display());

    match config.resolve_credentials() {
        Ok(Credentials::ApiKey(key)) => {
            println!("✓ API key credential ({})", redact_secret(&key));
        }
        Ok(Credentials::Project {
            project_id,
            location,
            access_token,
        }) => {
            println!("✓ Project credential: {project_id} in {location}");
            if access_token.is_none() {
                println!("  Access token will be requested from gcloud");
            }
        }
        Err(e) => {
            ui::report_failure(&e);
            bail!("Configuration is not ready for generation");
        }
    }

    println!("✓ Model: {}", config.inference.model);
    Ok(())
}

fn run_path(config_path: Option<&Path>) -> Result<()> {
    println!("{}", target_path(config_path).display());
    Ok(())
}
