use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Result};
use clap::Parser;
use clarity_core::images::list_images;
use clarity_core::writer::NamingMode;
use clarity_core::{
    AddOutcome, ArtifactRequest, ArtifactType, DomainContext, EvidenceStore, Generator,
};
use tracing::info;

use super::{build_assembler, build_client, load_config, spinner_retry_observer};
use crate::ui;

#[derive(Parser, Debug)]
pub struct GenerateArgs {
    /// Evidence in dossier order: image paths, or `note:<text>` for a note
    #[arg(value_name = "EVIDENCE")]
    pub evidence: Vec<EvidenceArg>,

    /// Artifact type: pbi, task or bug
    #[arg(long = "type", short = 't', default_value = "pbi")]
    pub artifact_type: ArtifactType,

    /// Add every png/jpg/jpeg/webp in this directory (before EVIDENCE)
    #[arg(long)]
    pub images_dir: Option<PathBuf>,

    /// Domain context file (markdown or plain text)
    #[arg(long, short = 'c')]
    pub context: Option<PathBuf>,

    /// Extra instruction for the analyst-notes section
    #[arg(long, short = 'i')]
    pub instruction: Option<String>,

    /// Model identifier (overrides config and CLARITY_MODEL)
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Output directory (overrides output.dir)
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,

    /// Replace an existing artifact with the same title
    #[arg(long)]
    pub overwrite: bool,

    /// Also print the generated markdown to stdout
    #[arg(long)]
    pub print: bool,
}

/// One positional evidence argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceArg {
    Image(PathBuf),
    Note(String),
}

impl FromStr for EvidenceArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(text) = s.strip_prefix("note:") {
            return Ok(EvidenceArg::Note(text.to_string()));
        }
        let path = s.strip_prefix("image:").unwrap_or(s);
        if path.trim().is_empty() {
            return Err("empty evidence argument".to_string());
        }
        Ok(EvidenceArg::Image(PathBuf::from(path)))
    }
}

/// Build the dossier from `--images-dir` then the positional items.
pub fn collect_evidence(images_dir: Option<&Path>, items: &[EvidenceArg]) -> Result<EvidenceStore> {
    let mut store = EvidenceStore::new();

    if let Some(dir) = images_dir {
        for path in list_images(dir)? {
            report(store.add_image_file(&path)?);
        }
    }
    for item in items {
        let outcome = match item {
            EvidenceArg::Image(path) => store.add_image_file(path)?,
            EvidenceArg::Note(text) => store.add_text(text),
        };
        report(outcome);
    }
    Ok(store)
}

fn report(outcome: AddOutcome) {
    if !outcome.is_added() {
        eprintln!("⚠ {}", outcome.message());
    }
}

pub async fn run_generate(args: GenerateArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(model) = args.model {
        config.inference.model = model;
    }
    if let Some(out) = args.out {
        config.output.dir = out;
    }
    if args.overwrite {
        config.output.naming = NamingMode::Overwrite;
    }

    let store = collect_evidence(args.images_dir.as_deref(), &args.evidence)?;
    if store.is_empty() {
        bail!("Nothing to analyse: add at least one image or note (see `clarity generate --help`)");
    }

    let context = args.context.as_deref().map(DomainContext::load).transpose()?;
    let assembler = build_assembler(&config)?;
    let model = config.inference.model.clone();
    let artifact_type = args.artifact_type;

    let pb = ui::spinner(format!(
        "Generating {} from {} item(s) with {}",
        artifact_type,
        store.len(),
        model
    ));
    let client = match build_client(&mut config).await {
        Ok(client) => client.with_retry_observer(spinner_retry_observer(pb.clone())),
        Err(e) => {
            ui::finish_error(pb, e.summary());
            return Err(e.into());
        }
    };

    let request = ArtifactRequest::new(artifact_type, model.as_str(), store.snapshot())
        .with_domain_context(context.map(|c| c.content().to_string()))
        .with_instruction(args.instruction.filter(|i| !i.trim().is_empty()));
    let payload = assembler.assemble_request(&request)?;
    info!(segments = payload.len(), artifact = %artifact_type, "payload ready");

    let generated = match client
        .generate(payload, &request.model_identifier, &config.generation_params())
        .await
    {
        Ok(generated) => generated,
        Err(e) => {
            ui::finish_error(pb, e.summary());
            return Err(e.into());
        }
    };

    let path = config
        .artifact_writer()
        .save(&generated.markdown, artifact_type.fallback_title())?;
    ui::finish_success(
        pb,
        format!("{} saved ({} attempt(s))", artifact_type, generated.attempts),
    );

    println!("{}", path.display());
    if args.print {
        println!();
        println!("{}", generated.markdown);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_args_parse() {
        assert_eq!(
            "note:checkout must keep the cart".parse::<EvidenceArg>().unwrap(),
            EvidenceArg::Note("checkout must keep the cart".to_string())
        );
        assert_eq!(
            "shots/login.png".parse::<EvidenceArg>().unwrap(),
            EvidenceArg::Image(PathBuf::from("shots/login.png"))
        );
        assert_eq!(
            "image:a.jpg".parse::<EvidenceArg>().unwrap(),
            EvidenceArg::Image(PathBuf::from("a.jpg"))
        );
        assert!("".parse::<EvidenceArg>().is_err());
    }

    #[test]
    fn collect_keeps_notes_and_skips_blank_ones() {
        let items = vec![
            EvidenceArg::Note("first".to_string()),
            EvidenceArg::Note("   ".to_string()),
            EvidenceArg::Note("second".to_string()),
        ];
        let store = collect_evidence(None, &items).unwrap();
        assert_eq!(store.labels(), ["Note: first", "Note: second"]);
    }

    #[test]
    fn missing_image_file_is_an_error() {
        let items = vec![EvidenceArg::Image(PathBuf::from("/nonexistent/x.png"))];
        assert!(collect_evidence(None, &items).is_err());
    }
}
