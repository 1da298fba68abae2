//! clarity CLI - turn screenshots and notes into backlog artifacts
//!
//! - `generate`: one-shot PBI / technical task / bug report from a dossier
//! - `session`: interactive dossier with background generation and ambient tips
//! - `ambient`: print refinement tips for the newest screenshot in a folder
//! - `catalog`: inspect the instruction templates
//! - `config`: create, show and validate ~/.clarity/config.toml

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clarity_core::config::load_dotenv;
use clarity_core::ClarityError;

mod commands;
mod config;
mod tracing_setup;
mod ui;

#[derive(Parser, Debug)]
#[command(
    name = "clarity",
    author,
    version,
    about = "Generate PBIs, technical tasks and bug reports from screenshots and notes with Gemini",
    long_about = "Collect screenshots and notes into a dossier, add optional domain context, \
                  and let Gemini write a structured Markdown backlog artifact."
)]
struct Cli {
    /// Suppress progress spinners (for script consumption)
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Debug logging on stderr
    #[arg(long, global = true)]
    debug: bool,

    /// Export traces over OTLP
    #[cfg(feature = "telemetry")]
    #[arg(long, global = true)]
    otel: bool,

    /// Config file (default: ~/.clarity/config.toml)
    #[arg(long = "config", global = true, env = "CLARITY_CONFIG", value_name = "FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate one artifact from images and notes
    Generate(commands::generate::GenerateArgs),
    /// Interactive session with background generation and ambient tips
    Session(commands::session::SessionArgs),
    /// Print refinement tips for the newest image in a folder
    Ambient(commands::ambient::AmbientArgs),
    /// List artifact types or print an instruction template
    Catalog(commands::catalog::CatalogArgs),
    /// Manage clarity configuration (init, show, validate, path)
    Config(config::ConfigArgs),
    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Parser, Debug)]
struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    shell: Shell,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
#[allow(clippy::enum_variant_names)] // PowerShell is a proper noun, not a suffix
enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
    Elvish,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = tracing_setup::TracingConfig {
        debug: cli.debug,
        #[cfg(feature = "telemetry")]
        otel: cli.otel,
        ..Default::default()
    };
    tracing_setup::init(&tracing_config).ok();
    ui::init_quiet_mode(cli.quiet);
    load_dotenv();

    let result = run(cli).await;
    tracing_setup::shutdown_otel();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<ClarityError>() {
                Some(error) => ui::report_failure(error),
                None => eprintln!("Error: {err:#}"),
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config_file.as_deref();
    match cli.command {
        Commands::Generate(args) => commands::generate::run_generate(args, config_path).await,
        Commands::Session(args) => commands::session::run_session(args, config_path).await,
        Commands::Ambient(args) => commands::ambient::run_ambient(args, config_path).await,
        Commands::Catalog(args) => commands::catalog::run_catalog(args, config_path),
        Commands::Config(args) => config::run_config(args, config_path),
        Commands::Completions(args) => run_completions(args),
    }
}

fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::{generate, Shell as CompletionShell};
    use std::io;

    let mut cmd = Cli::command();
    let bin_name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    };

    generate(shell, &mut cmd, bin_name, &mut io::stdout());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn generate_args_keep_evidence_order() {
        let cli = Cli::parse_from([
            "clarity",
            "generate",
            "--type",
            "bug",
            "a.png",
            "note:crash on save",
            "b.png",
        ]);
        let Commands::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.artifact_type, clarity_core::ArtifactType::Bug);
        assert_eq!(args.evidence.len(), 3);
        assert_eq!(
            args.evidence[1],
            commands::generate::EvidenceArg::Note("crash on save".to_string())
        );
    }
}
