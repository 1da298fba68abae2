use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use clarity_core::{AmbientStart, LatestImageSource, Session, SessionEvent};
use tracing::info;

use super::{build_assembler, build_client, load_config};

#[derive(Parser, Debug)]
pub struct AmbientArgs {
    /// Directory whose newest image is observed (default: ambient.watch_dir)
    #[arg(long, short = 'w')]
    pub watch: Option<PathBuf>,

    /// Seconds between observations (default: ambient.interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Domain context file
    #[arg(long, short = 'c')]
    pub context: Option<PathBuf>,

    /// Model identifier (overrides config and CLARITY_MODEL)
    #[arg(long, short = 'm')]
    pub model: Option<String>,
}

/// Print one tip per changed screen until Ctrl-C.
pub async fn run_ambient(args: AmbientArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(model) = args.model {
        config.inference.model = model;
    }

    let client = build_client(&mut config).await?;
    let (session, mut events) = Session::new(
        build_assembler(&config)?,
        config.inference.model.clone(),
        config.generation_params(),
    );
    let mut session = session.with_generator(Arc::new(client));
    if let Some(path) = &args.context {
        session.load_context(path)?;
    }

    let watch = args.watch.unwrap_or_else(|| config.ambient.watch_dir.clone());
    let interval = Duration::from_secs(args.interval.unwrap_or(config.ambient.interval_secs).max(1));
    let source = Box::new(LatestImageSource::new(watch.clone()));
    if session.start_ambient(source, interval) != AmbientStart::Started {
        bail!("Ambient tips could not be started");
    }
    eprintln!(
        "Watching {} every {}s. Press Ctrl-C to stop.",
        watch.display(),
        interval.as_secs()
    );

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                if let SessionEvent::Tip { text, source } = event {
                    let n = session.record_tip(text.as_str());
                    println!("[tip {n}] {source}: {text}");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.stop_ambient().await;
    info!(tips = session.tips().len(), "ambient stopped");
    Ok(())
}
