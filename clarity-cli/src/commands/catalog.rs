use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use clarity_core::{ArtifactType, DomainContext};

use super::{build_catalog, load_config};

#[derive(Parser, Debug)]
pub struct CatalogArgs {
    /// Artifact type to print; lists the available types when omitted.
    /// Unknown types print the generic instruction.
    pub artifact_type: Option<String>,

    /// Fill the business-context section from this file
    #[arg(long, short = 'c')]
    pub context: Option<PathBuf>,

    /// Fill the analyst-notes section
    #[arg(long)]
    pub notes: Option<String>,
}

fn selector(artifact_type: ArtifactType) -> &'static str {
    match artifact_type {
        ArtifactType::Pbi => "pbi",
        ArtifactType::TechnicalTask => "task",
        ArtifactType::Bug => "bug",
    }
}

pub fn run_catalog(args: CatalogArgs, config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let catalog = build_catalog(&config)?;

    let Some(label) = args.artifact_type else {
        for artifact_type in ArtifactType::ALL {
            println!("{:<6} {}", selector(artifact_type), artifact_type.display_name());
        }
        return Ok(());
    };

    let text = match label.parse::<ArtifactType>() {
        Ok(artifact_type) if args.context.is_some() || args.notes.is_some() => {
            let context = args.context.as_deref().map(DomainContext::load).transpose()?;
            catalog.render(
                artifact_type,
                context.as_ref().map(DomainContext::content),
                args.notes.as_deref(),
            )
        }
        _ => catalog.instruction_for_label(&label).to_string(),
    };
    println!("{text}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_back() {
        for artifact_type in ArtifactType::ALL {
            assert_eq!(selector(artifact_type).parse::<ArtifactType>().unwrap(), artifact_type);
        }
    }
}
