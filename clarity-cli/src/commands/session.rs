//! Interactive session: build a dossier line by line, generate in the
//! background, and collect ambient tips while you keep working.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use clarity_core::images::list_images;
use clarity_core::{
    AmbientHandle, AmbientStart, ArtifactType, ArtifactWriter, EvidenceItem, LatestImageSource,
    Session, SessionEvent, TriggerOutcome,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{build_assembler, build_client, load_config};
use crate::ui;

#[derive(Parser, Debug)]
pub struct SessionArgs {
    /// Initial artifact type: pbi, task or bug
    #[arg(long = "type", short = 't')]
    pub artifact_type: Option<ArtifactType>,

    /// Domain context file loaded at start
    #[arg(long, short = 'c')]
    pub context: Option<PathBuf>,

    /// Model identifier (overrides config and CLARITY_MODEL)
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Output directory (overrides output.dir)
    #[arg(long, short = 'o')]
    pub out: Option<PathBuf>,
}

const HELP: &str = "\
Commands:
  image <path>              add an image to the dossier
  images <dir>              add every image in a directory
  note <text>               add a text note
  list                      show the dossier
  remove <n>                remove item n
  clear                     empty the dossier
  context load <path>       load domain context
  context show | clear
  type [pbi|task|bug]       show or set the artifact type
  model [name]              show or set the model
  instruction [text|clear]  show, set or clear the free-text instruction
  generate                  generate in the background
  ambient start [dir]       start ambient tips (default: ambient.watch_dir)
  ambient stop
  tips                      list received tips
  use-tip <n>               turn tip n into the instruction
  status
  help
  quit";

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Image(PathBuf),
    Images(PathBuf),
    Note(String),
    List,
    Remove(usize),
    Clear,
    ContextLoad(PathBuf),
    ContextShow,
    ContextClear,
    Type(Option<ArtifactType>),
    Model(Option<String>),
    Instruction(Option<String>),
    Generate,
    AmbientStart(Option<PathBuf>),
    AmbientStop,
    Tips,
    UseTip(usize),
    Status,
    Help,
    Quit,
    Empty,
}

fn item_number(arg: &str) -> std::result::Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("expected an item number starting at 1, got '{}'", arg.trim())),
    }
}

fn required<'a>(arg: &'a str, usage: &str) -> std::result::Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("usage: {usage}"))
    } else {
        Ok(arg)
    }
}

pub fn parse_line(line: &str) -> std::result::Result<ReplCommand, String> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_ascii_lowercase().as_str() {
        "" => ReplCommand::Empty,
        "image" | "img" => ReplCommand::Image(required(rest, "image <path>")?.into()),
        "images" => ReplCommand::Images(required(rest, "images <dir>")?.into()),
        "note" => ReplCommand::Note(required(rest, "note <text>")?.to_string()),
        "list" | "ls" => ReplCommand::List,
        "remove" | "rm" => ReplCommand::Remove(item_number(required(rest, "remove <n>")?)?),
        "clear" => ReplCommand::Clear,
        "context" => match rest.split_once(char::is_whitespace) {
            Some(("load", path)) => ReplCommand::ContextLoad(path.trim().into()),
            None if rest == "show" || rest.is_empty() => ReplCommand::ContextShow,
            None if rest == "clear" => ReplCommand::ContextClear,
            _ => return Err("usage: context load <path> | context show | context clear".to_string()),
        },
        "type" if rest.is_empty() => ReplCommand::Type(None),
        "type" => ReplCommand::Type(Some(rest.parse()?)),
        "model" if rest.is_empty() => ReplCommand::Model(None),
        "model" => ReplCommand::Model(Some(rest.to_string())),
        "instruction" if rest.is_empty() => ReplCommand::Instruction(None),
        "instruction" if rest == "clear" => ReplCommand::Instruction(Some(String::new())),
        "instruction" => ReplCommand::Instruction(Some(rest.to_string())),
        "generate" | "gen" | "g" => ReplCommand::Generate,
        "ambient" => match rest.split_once(char::is_whitespace) {
            Some(("start", dir)) => ReplCommand::AmbientStart(Some(dir.trim().into())),
            None if rest == "start" => ReplCommand::AmbientStart(None),
            None if rest == "stop" => ReplCommand::AmbientStop,
            _ => return Err("usage: ambient start [dir] | ambient stop".to_string()),
        },
        "tips" => ReplCommand::Tips,
        "use-tip" => ReplCommand::UseTip(item_number(required(rest, "use-tip <n>")?)?),
        "status" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => return Err(format!("unknown command '{other}' (try `help`)")),
    };
    Ok(command)
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

struct Repl {
    session: Session,
    writer: ArtifactWriter,
    watch_dir: PathBuf,
    interval: Duration,
    /// A started generation whose event has not been handled yet
    pending: bool,
    /// Ambient loops told to stop, joined on exit
    stopping: Vec<AmbientHandle>,
}

impl Repl {
    async fn handle(&mut self, command: ReplCommand) -> Flow {
        match command {
            ReplCommand::Empty => {}
            ReplCommand::Image(path) => match self.session.evidence_mut().add_image_file(&path) {
                Ok(outcome) => println!("{}", outcome.message()),
                Err(e) => ui::report_failure(&e),
            },
            ReplCommand::Images(dir) => self.add_directory(&dir),
            ReplCommand::Note(text) => {
                println!("{}", self.session.evidence_mut().add_text(&text).message());
            }
            ReplCommand::List => self.print_dossier(),
            ReplCommand::Remove(n) => match self.session.evidence_mut().remove(n - 1) {
                Some(item) => println!("Removed {}", item.label()),
                None => println!("No item #{n}"),
            },
            ReplCommand::Clear => {
                self.session.evidence_mut().clear();
                println!("Dossier cleared");
            }
            ReplCommand::ContextLoad(path) => match self.session.load_context(&path) {
                Ok(()) => println!("Context loaded from {}", path.display()),
                Err(e) => ui::report_failure(&e),
            },
            ReplCommand::ContextShow => match self.session.context() {
                Some(context) => println!("{}\n{}", context.file_name(), context.content()),
                None => println!("No domain context loaded"),
            },
            ReplCommand::ContextClear => {
                self.session.clear_context();
                println!("Context cleared");
            }
            ReplCommand::Type(None) => println!("{}", self.session.artifact_type().display_name()),
            ReplCommand::Type(Some(artifact_type)) => {
                self.session.set_artifact_type(artifact_type);
                println!("Artifact type: {}", artifact_type.display_name());
            }
            ReplCommand::Model(None) => println!("{}", self.session.model()),
            ReplCommand::Model(Some(model)) => {
                self.session.set_model(model);
                println!("Model: {}", self.session.model());
            }
            ReplCommand::Instruction(None) => match self.session.instruction() {
                Some(instruction) => println!("{instruction}"),
                None => println!("No instruction set"),
            },
            ReplCommand::Instruction(Some(text)) => {
                self.session.set_instruction(text);
                match self.session.instruction() {
                    Some(_) => println!("Instruction set"),
                    None => println!("Instruction cleared"),
                }
            }
            ReplCommand::Generate => self.generate(),
            ReplCommand::AmbientStart(dir) => {
                let dir = dir.unwrap_or_else(|| self.watch_dir.clone());
                let source = Box::new(LatestImageSource::new(dir.clone()));
                match self.session.start_ambient(source, self.interval) {
                    AmbientStart::Started => println!(
                        "Ambient tips on: watching {} every {}s",
                        dir.display(),
                        self.interval.as_secs()
                    ),
                    AmbientStart::AlreadyRunning => println!("Ambient tips are already running"),
                    AmbientStart::NotConfigured => {
                        println!("Ambient tips need an API credential (`clarity config init`)")
                    }
                }
            }
            ReplCommand::AmbientStop => match self.session.request_ambient_stop() {
                Some(handle) => {
                    self.stopping.retain(|h| !h.is_finished());
                    self.stopping.push(handle);
                    println!("Ambient tips stopping after the current observation");
                }
                None => println!("Ambient tips were not running"),
            },
            ReplCommand::Tips => {
                if self.session.tips().is_empty() {
                    println!("No tips yet");
                }
                for (i, tip) in self.session.tips().iter().enumerate() {
                    println!("{:>3}. {}", i + 1, tip);
                }
            }
            ReplCommand::UseTip(n) => match self.session.use_tip(n) {
                Some(_) => println!("Instruction set from tip {n}"),
                None => println!("No tip #{n}"),
            },
            ReplCommand::Status => self.print_status(),
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn add_directory(&mut self, dir: &Path) {
        let paths = match list_images(dir) {
            Ok(paths) => paths,
            Err(e) => return ui::report_failure(&e),
        };
        if paths.is_empty() {
            println!("No images in {}", dir.display());
        }
        for path in paths {
            match self.session.evidence_mut().add_image_file(&path) {
                Ok(outcome) => println!("{}: {}", path.display(), outcome.message()),
                Err(e) => ui::report_failure(&e),
            }
        }
    }

    fn print_dossier(&self) {
        let store = self.session.evidence();
        if store.is_empty() {
            println!("Dossier is empty");
            return;
        }
        for (i, item) in store.iter().enumerate() {
            let kind = match item {
                EvidenceItem::Image { .. } => "image",
                EvidenceItem::Text { .. } => "note ",
            };
            println!("{:>3}. [{kind}] {}", i + 1, item.label());
        }
    }

    fn print_status(&self) {
        println!("Session:     {}", self.session.id());
        println!("Type:        {}", self.session.artifact_type().display_name());
        println!("Model:       {}", self.session.model());
        println!("Items:       {}", self.session.evidence().len());
        println!(
            "Context:     {}",
            self.session
                .context()
                .map(|c| c.file_name().to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        println!("Configured:  {}", self.session.is_configured());
        println!("Generating:  {}", self.session.is_generating());
        println!("Ambient:     {}", self.session.is_ambient_running());
        println!("Tips:        {}", self.session.tips().len());
    }

    fn generate(&mut self) {
        match self.session.trigger_generation() {
            TriggerOutcome::Started { items } => {
                self.pending = true;
                println!(
                    "Generating {} from {items} item(s)...",
                    self.session.artifact_type()
                );
            }
            TriggerOutcome::Busy => println!("A generation is already running"),
            TriggerOutcome::EmptyDossier => println!("Add at least one image or note first"),
            TriggerOutcome::NotConfigured => {
                println!("Generation needs an API credential (`clarity config init`)")
            }
        }
    }

    fn on_event(&mut self, event: SessionEvent) {
        if !matches!(event, SessionEvent::Tip { .. }) {
            self.pending = false;
        }
        match event {
            SessionEvent::Generated {
                artifact_type,
                generated,
            } => match self
                .writer
                .save(&generated.markdown, artifact_type.fallback_title())
            {
                Ok(path) => println!(
                    "\n✓ {} saved to {} ({} attempt(s))",
                    artifact_type,
                    path.display(),
                    generated.attempts
                ),
                Err(e) => ui::report_failure(&e),
            },
            SessionEvent::GenerationFailed { error, .. } => {
                println!();
                ui::report_failure(&error);
            }
            SessionEvent::Tip { text, source } => {
                let n = self.session.record_tip(text.as_str());
                println!("\n[tip {n}] {source}: {text}");
            }
        }
    }

    /// Stop ambient and deliver a pending generation before exiting.
    async fn shutdown(&mut self, events: &mut mpsc::Receiver<SessionEvent>) {
        self.stopping.extend(self.session.request_ambient_stop());
        for handle in self.stopping.drain(..) {
            handle.join().await;
        }
        if self.pending {
            eprintln!("Waiting for the running generation to finish...");
        }
        while self.pending {
            match events.recv().await {
                Some(event) => self.on_event(event),
                None => break,
            }
        }
        while let Ok(event) = events.try_recv() {
            self.on_event(event);
        }
    }
}

fn prompt() {
    print!("clarity> ");
    std::io::stdout().flush().ok();
}

pub async fn run_session(args: SessionArgs, config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(model) = args.model {
        config.inference.model = model;
    }
    if let Some(out) = args.out {
        config.output.dir = out;
    }

    let (session, mut events) = Session::new(
        build_assembler(&config)?,
        config.inference.model.clone(),
        config.generation_params(),
    );
    let mut session = match build_client(&mut config).await {
        Ok(client) => session.with_generator(Arc::new(client)),
        Err(e) => {
            ui::report_failure(&e);
            eprintln!("Continuing without generation; the dossier can still be built.");
            session
        }
    };
    if let Some(path) = &args.context {
        session.load_context(path)?;
    }
    if let Some(artifact_type) = args.artifact_type {
        session.set_artifact_type(artifact_type);
    }
    info!(session = %session.id(), "session started");

    let mut repl = Repl {
        session,
        writer: config.artifact_writer(),
        watch_dir: config.ambient.watch_dir.clone(),
        interval: Duration::from_secs(config.ambient.interval_secs.max(1)),
        pending: false,
        stopping: Vec::new(),
    };

    println!("Clarity session. Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    prompt();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_line(&line) {
                    Ok(command) => {
                        if repl.handle(command).await == Flow::Quit {
                            break;
                        }
                    }
                    Err(message) => eprintln!("{message}"),
                }
                prompt();
            }
            Some(event) = events.recv() => {
                repl.on_event(event);
                prompt();
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                break;
            }
        }
    }

    repl.shutdown(&mut events).await;
    info!(session = %repl.session.id(), "session ended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clarity_core::{
        GenerationParams, GenerationResult, Generator, MockGenerator, NamingMode, Payload,
        PayloadAssembler,
    };
    use std::time::Instant;

    fn repl_with(
        generator: Arc<dyn Generator>,
        watch_dir: &Path,
        out: &Path,
    ) -> (Repl, mpsc::Receiver<SessionEvent>) {
        let (session, events) =
            Session::new(PayloadAssembler::default(), "mock-model", GenerationParams::default());
        let repl = Repl {
            session: session.with_generator(generator),
            writer: ArtifactWriter::new(out, NamingMode::Overwrite),
            watch_dir: watch_dir.to_path_buf(),
            interval: Duration::from_secs(60),
            pending: false,
            stopping: Vec::new(),
        };
        (repl, events)
    }

    #[tokio::test]
    async fn ambient_stop_does_not_wait_for_the_model() {
        let watch = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        image::RgbImage::new(4, 4).save(watch.path().join("screen.png")).unwrap();
        let mock = Arc::new(MockGenerator::new().with_delay(Duration::from_millis(800)));
        let (mut repl, mut events) = repl_with(mock.clone(), watch.path(), out.path());

        repl.handle(ReplCommand::AmbientStart(None)).await;
        tokio::time::timeout(Duration::from_secs(2), async {
            while mock.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("ambient loop should send an observation");

        let started = Instant::now();
        assert_eq!(repl.handle(ReplCommand::AmbientStop).await, Flow::Continue);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(!repl.session.is_ambient_running());
        assert_eq!(repl.stopping.len(), 1);

        tokio::time::timeout(Duration::from_secs(3), repl.shutdown(&mut events))
            .await
            .expect("shutdown joins the stopping loop");
        assert!(repl.stopping.is_empty());
        assert_eq!(repl.session.tips().len(), 1);
    }

    struct PanickingGenerator;

    #[async_trait::async_trait]
    impl Generator for PanickingGenerator {
        async fn generate(&self, _: Payload, _: &str, _: &GenerationParams) -> GenerationResult {
            panic!("generator blew up");
        }
    }

    #[tokio::test]
    async fn quit_does_not_hang_when_the_worker_panics() {
        let dir = tempfile::tempdir().unwrap();
        let (mut repl, mut events) = repl_with(Arc::new(PanickingGenerator), dir.path(), dir.path());
        repl.session.evidence_mut().add_text("checkout times out");

        repl.handle(ReplCommand::Generate).await;
        assert!(repl.pending);

        tokio::time::timeout(Duration::from_secs(3), repl.shutdown(&mut events))
            .await
            .expect("shutdown must not wait forever on a dead worker");
        assert!(!repl.pending);
    }

    #[test]
    fn parses_dossier_commands() {
        assert_eq!(
            parse_line("image shots/a.png").unwrap(),
            ReplCommand::Image("shots/a.png".into())
        );
        assert_eq!(
            parse_line("note  keep the cart on logout ").unwrap(),
            ReplCommand::Note("keep the cart on logout".to_string())
        );
        assert_eq!(parse_line("rm 2").unwrap(), ReplCommand::Remove(2));
        assert_eq!(parse_line("LIST").unwrap(), ReplCommand::List);
        assert_eq!(parse_line("   ").unwrap(), ReplCommand::Empty);
    }

    #[test]
    fn item_numbers_start_at_one() {
        assert!(parse_line("remove 0").is_err());
        assert!(parse_line("remove x").is_err());
        assert!(parse_line("remove").is_err());
        assert_eq!(parse_line("use-tip 3").unwrap(), ReplCommand::UseTip(3));
    }

    #[test]
    fn parses_context_and_ambient_forms() {
        assert_eq!(
            parse_line("context load docs/domain.md").unwrap(),
            ReplCommand::ContextLoad("docs/domain.md".into())
        );
        assert_eq!(parse_line("context").unwrap(), ReplCommand::ContextShow);
        assert_eq!(parse_line("context clear").unwrap(), ReplCommand::ContextClear);
        assert!(parse_line("context drop").is_err());

        assert_eq!(parse_line("ambient start").unwrap(), ReplCommand::AmbientStart(None));
        assert_eq!(
            parse_line("ambient start captures").unwrap(),
            ReplCommand::AmbientStart(Some("captures".into()))
        );
        assert_eq!(parse_line("ambient stop").unwrap(), ReplCommand::AmbientStop);
    }

    #[test]
    fn parses_type_and_instruction() {
        assert_eq!(
            parse_line("type bug").unwrap(),
            ReplCommand::Type(Some(ArtifactType::Bug))
        );
        assert_eq!(parse_line("type").unwrap(), ReplCommand::Type(None));
        assert!(parse_line("type epic").is_err());
        assert_eq!(
            parse_line("instruction clear").unwrap(),
            ReplCommand::Instruction(Some(String::new()))
        );
        assert_eq!(
            parse_line("instruction focus on errors").unwrap(),
            ReplCommand::Instruction(Some("focus on errors".to_string()))
        );
    }

    #[test]
    fn unknown_command_is_reported() {
        let err = parse_line("deploy now").unwrap_err();
        assert!(err.contains("deploy"));
    }
}
