//! Subcommands and the setup they share: loading config, building the
//! catalog/assembler, and connecting to Gemini.

pub mod ambient;
pub mod catalog;
pub mod generate;
pub mod session;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clarity_core::config::Credentials;
use clarity_core::{ClarityConfig, ClarityError, InstructionCatalog, PayloadAssembler};
use clarity_gemini::{GeminiClient, RetryNotice, RetryObserver};
use indicatif::ProgressBar;
use tokio::process::Command;
use tracing::{debug, info};

/// `--config` file when given, ~/.clarity/config.toml otherwise. Environment
/// overrides apply either way.
pub fn load_config(path: Option<&Path>) -> Result<ClarityConfig> {
    let config = match path {
        Some(path) => {
            let mut config = ClarityConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => ClarityConfig::load()?,
    };
    debug!(model = %config.inference.model, ready = config.is_ready(), "config loaded");
    Ok(config)
}

pub fn build_catalog(config: &ClarityConfig) -> Result<InstructionCatalog> {
    Ok(match &config.catalog.templates_dir {
        Some(dir) => InstructionCatalog::with_overrides_from(dir)?,
        None => InstructionCatalog::builtin(),
    })
}

pub fn build_assembler(config: &ClarityConfig) -> Result<PayloadAssembler> {
    Ok(PayloadAssembler::new(build_catalog(config)?, config.image_encoding()))
}

/// Gemini client for the configured credential. Project mode without a token
/// borrows one from `gcloud auth print-access-token`.
pub async fn build_client(config: &mut ClarityConfig) -> clarity_core::Result<GeminiClient> {
    if let Credentials::Project {
        access_token: None, ..
    } = config.resolve_credentials()?
    {
        config.credentials.access_token = Some(gcloud_access_token().await?);
    }
    GeminiClient::from_config(config)
}

async fn gcloud_access_token() -> clarity_core::Result<String> {
    info!("requesting access token from gcloud");
    let output = Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .await
        .map_err(|e| {
            ClarityError::configuration_missing(format!(
                "no access token configured and gcloud could not be run: {e}"
            ))
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ClarityError::configuration_missing(format!(
            "gcloud auth print-access-token failed: {}",
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(ClarityError::configuration_missing(
            "gcloud returned an empty access token",
        ));
    }
    Ok(token)
}

pub fn retry_message(notice: &RetryNotice) -> String {
    format!(
        "Attempt {}/{} failed ({}), retrying in {:.1}s",
        notice.attempt,
        notice.max_attempts,
        notice.kind,
        notice.delay.as_secs_f32()
    )
}

/// Shows retry progress on the spinner, when there is one.
pub fn spinner_retry_observer(pb: Option<ProgressBar>) -> RetryObserver {
    Arc::new(move |notice: &RetryNotice| {
        if let Some(pb) = &pb {
            pb.set_message(retry_message(notice));
        }
    })
}
