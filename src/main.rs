use std::env;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use is_terminal::IsTerminal;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;
mod diff;
mod encoding;
mod files;
mod hashes;
mod location;
mod logging;
mod orchestrator;
mod patches;
mod prompts;
mod reconcile;
mod transform;
mod version;

use config::{Settings, load_settings};
use diff::DiffReporter;
use files::{SearchPaths, locate_target};
use hashes::{HashIndex, pending_changes, reference_changes};
use orchestrator::{ApplyContext, TargetPaths, TargetState, apply_cycle, restore, target_state};
use patches::{PROMPT_STAGE, REGISTRY};
use prompts::{PromptDescriptor, apply_overrides, load_prompt_data};
use version::Version;

const STATE_DIR_NAME: &str = ".minitweak";

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    // Diffs go through the tracing writer, which is stderr.
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stderr().is_terminal(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "minitweak",
    version,
    about = "Patch a minified CLI bundle in place from a settings file"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Restore the pristine bundle, run every patch, write the result once.
    Apply(ApplyCommand),
    /// Put the pristine backup back in place.
    Restore(RestoreCommand),
    /// Show whether the target is patched and whether prompt edits are pending.
    Status(StatusCommand),
    /// Print the patch registry in application order.
    List,
}

#[derive(Debug, Clone, Args)]
struct TargetArgs {
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    target: Option<PathBuf>,
    /// Extra file or directory to search before the standard install locations.
    #[arg(long = "search-path", value_name = "PATH", value_hint = ValueHint::AnyPath)]
    search_paths: Vec<PathBuf>,
    #[arg(long = "state-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    state_dir: Option<PathBuf>,
}

impl TargetArgs {
    fn resolve(&self) -> Result<TargetPaths> {
        let search = SearchPaths::new(&self.search_paths);
        let target = locate_target(self.target.as_deref(), &search)?;
        let state_dir = match &self.state_dir {
            Some(dir) => dir.clone(),
            None => default_state_dir()?,
        };
        debug!(target = %target.display(), state_dir = %state_dir.display(), "resolved paths");
        Ok(TargetPaths::new(target, state_dir))
    }
}

#[derive(Debug, Clone, Args)]
struct PromptArgs {
    /// Reference prompt data (JSON).
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    prompts: Option<PathBuf>,
    /// Directory of `<id>.md` prompt overrides.
    #[arg(long = "prompt-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    prompt_dir: Option<PathBuf>,
}

impl PromptArgs {
    fn load(&self) -> Result<Vec<PromptDescriptor>> {
        let Some(path) = &self.prompts else {
            return Ok(Vec::new());
        };
        let mut data = load_prompt_data(path)?;
        if let Some(dir) = &self.prompt_dir {
            let overridden = apply_overrides(&mut data, dir)?;
            info!(count = overridden, dir = %dir.display(), "loaded prompt overrides");
        }
        Ok(data.prompts)
    }
}

#[derive(Debug, Args)]
struct ApplyCommand {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    prompts: PromptArgs,
    /// Settings file (.json, otherwise YAML). Built-in defaults when omitted.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
    #[arg(long, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,
    /// Run every patch in memory and report without writing.
    #[arg(long = "dry-run", action = ArgAction::SetTrue)]
    dry_run: bool,
    /// Print the cycle summary as JSON.
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
}

#[derive(Debug, Args)]
struct RestoreCommand {
    #[command(flatten)]
    target: TargetArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
}

#[derive(Debug, Args)]
struct StatusCommand {
    #[command(flatten)]
    target: TargetArgs,
    #[command(flatten)]
    prompts: PromptArgs,
    #[arg(long, action = ArgAction::SetTrue)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Apply(cmd) => {
            init_tracing(cmd.debug);
            handle_apply(cmd)
        }
        Command::Restore(cmd) => {
            init_tracing(cmd.debug);
            handle_restore(cmd)
        }
        Command::Status(cmd) => {
            init_tracing(cmd.debug);
            handle_status(cmd)
        }
        Command::List => {
            init_tracing(false);
            handle_list();
            Ok(())
        }
    }
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).with_target(false))
        .with(filter)
        .init();
}

fn default_state_dir() -> Result<PathBuf> {
    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .filter(|value| !value.is_empty())
        .context("cannot determine home directory; pass --state-dir")?;
    Ok(PathBuf::from(home).join(STATE_DIR_NAME))
}

fn load_settings_or_default(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => load_settings(path),
        None => {
            debug!("no settings file given; using built-in defaults");
            Ok(Settings::default())
        }
    }
}

fn handle_apply(cmd: ApplyCommand) -> Result<()> {
    let paths = cmd.target.resolve()?;
    let settings = load_settings_or_default(cmd.config.as_deref())?;
    let prompts = cmd.prompts.load()?;
    let colorize = cmd.color.should_color();
    colored::control::set_override(colorize);
    let reporter = DiffReporter::new(cmd.debug, colorize);
    let ctx = ApplyContext::new(settings, prompts, reporter);

    let report = apply_cycle(&paths, &ctx, cmd.dry_run)?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else {
        report.print_summary();
        if cmd.dry_run {
            println!("dry run: {} not modified", paths.target.display());
        } else {
            println!("wrote {}", paths.target.display());
        }
    }
    Ok(())
}

fn handle_restore(cmd: RestoreCommand) -> Result<()> {
    let paths = cmd.target.resolve()?;
    restore(&paths)?;
    println!("restored {}", paths.target.display());
    Ok(())
}

fn handle_status(cmd: StatusCommand) -> Result<()> {
    let paths = cmd.target.resolve()?;
    let state = target_state(&paths)?;
    println!("target  {}", paths.target.display());
    println!("state   {state}");

    let text = std::fs::read(&paths.target)
        .with_context(|| format!("reading target {}", paths.target.display()))?;
    match Version::detect(&String::from_utf8_lossy(&text)) {
        Some(version) => println!("version {version}"),
        None => println!("version unknown"),
    }

    let prompts = cmd.prompts.load()?;
    if prompts.is_empty() {
        return Ok(());
    }
    let (applied, original) = if state == TargetState::NotYetBackedUp {
        (HashIndex::default(), HashIndex::default())
    } else {
        (
            HashIndex::load(&paths.applied_hashes())?,
            HashIndex::load(&paths.original_hashes())?,
        )
    };
    let pending = pending_changes(&applied, &prompts);
    let upstream = reference_changes(&original, &prompts);
    if pending.is_empty() && upstream.is_empty() {
        println!("prompts up to date");
    }
    print_prompt_ids("prompt changes pending", &pending);
    print_prompt_ids("reference text changed since last apply", &upstream);
    Ok(())
}

fn print_prompt_ids(heading: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("{heading} ({}):", ids.len());
    for id in ids {
        println!("  {id}");
    }
}

fn handle_list() {
    for def in REGISTRY {
        println!("{:<24} {:<16} {}", def.id, def.versions.to_string(), def.category);
    }
    let (id, category, versions) = PROMPT_STAGE;
    println!("{:<24} {:<16} {}", id, versions.to_string(), category);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_flags_parse() {
        let cli = Cli::try_parse_from([
            "minitweak",
            "apply",
            "--target",
            "cli.js",
            "--search-path",
            "/opt/a",
            "--search-path",
            "/opt/b",
            "--dry-run",
            "--color",
            "never",
        ])
        .expect("parsed");
        let Command::Apply(cmd) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(cmd.target.target, Some(PathBuf::from("cli.js")));
        assert_eq!(cmd.target.search_paths.len(), 2);
        assert!(cmd.dry_run);
        assert!(!cmd.color.should_color());
    }

    #[test]
    fn explicit_state_dir_wins() {
        let temp = tempfile::tempdir().expect("temp dir");
        let target = temp.path().join("cli.js");
        std::fs::write(&target, "x").expect("target");
        let args = TargetArgs {
            target: Some(target.clone()),
            search_paths: Vec::new(),
            state_dir: Some(temp.path().join("state")),
        };
        let paths = args.resolve().expect("resolved");
        assert_eq!(paths.target, target);
        assert_eq!(paths.backup(), temp.path().join("state").join("cli.js.backup"));
    }

    #[test]
    fn prompts_are_optional() {
        let args = PromptArgs {
            prompts: None,
            prompt_dir: None,
        };
        assert!(args.load().expect("loaded").is_empty());
    }
}
