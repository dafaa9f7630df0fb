// moonrepl - interactive Lua shell with isolated contexts

mod commands;
mod exit_codes;
mod repl;
mod setup;

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use crossterm::tty::IsTty;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use moonrepl_config::Settings;
use moonrepl_engine::{ContextManager, Error, Evaluation};

use exit_codes::{exit_code_for, EXIT_ERROR, EXIT_INIT, EXIT_SETTINGS, EXIT_SUCCESS};
use repl::{print_evaluation, Repl};
use setup::Overrides;

#[derive(Parser)]
#[command(name = "moonrepl")]
#[command(about = "Interactive Lua shell with isolated contexts")]
#[command(long_version = long_version())]
#[command(version)]
#[command(after_help = "\
Examples:
  moonrepl                        # interactive shell
  moonrepl -e 'x = 1; return x'   # evaluate and exit
  moonrepl setup.lua              # run a script and exit
  moonrepl --global               # start in the global context

Inside the shell, type .help for the list of dot-commands.")]
struct Cli {
    /// Script to run instead of starting the shell
    script: Option<PathBuf>,

    /// Evaluate code and exit
    #[arg(long, short = 'e', conflicts_with = "script")]
    eval: Option<String>,

    /// Start in (or run inside) the global context
    #[arg(long)]
    global: bool,

    /// Disable colored output (also honors NO_COLOR)
    #[arg(long)]
    no_color: bool,

    /// Nesting depth for rendered tables
    #[arg(long)]
    depth: Option<usize>,

    /// Include built-in names in views and completion
    #[arg(long)]
    show_builtins: bool,

    /// Settings file (default: <config dir>/moonrepl/settings.json)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log engine activity to stderr
    #[arg(long, short = 'v')]
    verbose: bool,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\nengine:  moonrepl-engine ", env!("CARGO_PKG_VERSION"),
        "\nlua:     5.4 (vendored)",
        "\ntarget:  ", env!("TARGET"),
    )
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn engine(err: &Error) -> Self {
        Self { code: exit_code_for(err), message: err.to_string(), hint: None }
    }

    pub fn settings(msg: impl Into<String>) -> Self {
        Self { code: EXIT_SETTINGS, message: msg.into(), hint: None }
    }

    pub fn io(err: io::Error) -> Self {
        Self { code: EXIT_ERROR, message: err.to_string(), hint: None }
    }

    /// Add a hint to an existing error.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr).without_time())
        .with(filter)
        .init();
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, CliError> {
    match path {
        Some(path) if path.exists() => Settings::load_from(path)
            .map_err(|e| CliError::settings(e.to_string()).with_hint("fix the file or pass a different --settings path")),
        Some(_) => Ok(Settings::default()),
        None => Ok(Settings::load()),
    }
}

fn build_manager(cli: &Cli, settings: &Settings) -> Result<ContextManager, CliError> {
    let overrides = Overrides {
        no_color: cli.no_color || std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty()),
        depth: cli.depth,
        show_builtins: cli.show_builtins,
    };
    let options = setup::context_options(settings, &overrides, io::stdout().is_tty());

    let mut manager = ContextManager::new()
        .map_err(|e| CliError::engine(&e))?
        .with_defaults(options)
        .with_styles(setup::styles(settings));
    if let Some(pool) = setup::name_pool(settings) {
        manager = manager.with_names(pool);
    }
    Ok(manager)
}

/// Run one evaluation non-interactively and turn its error into an exit code.
fn finish(evaluation: Evaluation) -> Result<(), CliError> {
    let stdout = io::stdout();
    let stderr = io::stderr();
    let (mut out, mut err) = (stdout.lock(), stderr.lock());
    match &evaluation.error {
        Some(error) => {
            for line in &evaluation.output {
                writeln!(out, "{}", line).map_err(CliError::io)?;
            }
            Err(CliError::engine(error))
        }
        None => print_evaluation(&evaluation, &mut out, &mut err).map_err(CliError::io),
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.settings.as_ref())?;
    let manager = build_manager(&cli, &settings)?;
    let repl = Repl::new(manager, cli.global).map_err(|e| {
        CliError { code: EXIT_INIT, message: e.to_string(), hint: None }
    })?;

    if let Some(code) = &cli.eval {
        let evaluation = repl.current().borrow_mut().eval(code);
        return finish(evaluation);
    }
    if let Some(path) = &cli.script {
        let evaluation = repl.current().borrow_mut().eval_file(path);
        return finish(evaluation);
    }

    let mut repl = repl;
    let stdin = io::stdin();
    let interactive = stdin.is_tty();
    let stdout = io::stdout();
    let stderr = io::stderr();
    repl.run(stdin.lock(), &mut stdout.lock(), &mut stderr.lock(), interactive)
        .map_err(CliError::io)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            eprintln!("error: {}", message);
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}
