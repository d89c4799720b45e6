use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use thread_store::write_crash_dump;
use threadkeeper::Policy;
use threadkeeper_shell::app::{App, Flow, HostOps};
use threadkeeper_shell::commands::Command;
use threadkeeper_shell::config::{Overrides, ShellConfig, ShellSettings};
use threadkeeper_shell::{logging, providers};
use tracing::{error, info};

/// Interactive shell for branching chat threads.
#[derive(Parser, Debug)]
#[command(name = "threadkeeper", version, about)]
struct Cli {
    /// JSON config file (overrides THREADKEEPER_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Configured account to start on
    #[arg(short, long)]
    account: Option<String>,

    /// Provider id
    #[arg(short, long)]
    provider: Option<String>,

    /// Model id
    #[arg(short, long)]
    model: Option<String>,

    /// Fork named threads before retrying: always, ask or never
    #[arg(long, value_name = "POLICY")]
    fork_on_retry: Option<Policy>,

    /// Allow messages with no content: always, ask or never
    #[arg(long, value_name = "POLICY")]
    allow_empty_messages: Option<Policy>,

    /// Thread document to load at startup
    file: Option<PathBuf>,
}

/// Terminal host: stdout for output, the line editor for questions.
struct ConsoleHost {
    editor: DefaultEditor,
}

impl HostOps for ConsoleHost {
    fn print(&mut self, text: &str) {
        println!("{text}");
    }

    fn print_chunk(&mut self, chunk: &str) {
        print!("{chunk}");
        let _ = io::stdout().flush();
    }

    fn confirm(&mut self, question: &str) -> bool {
        match self.editor.readline(&format!("{question} [y/N] ")) {
            Ok(answer) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
            Err(_) => false,
        }
    }
}

fn main() -> Result<()> {
    logging::init_tracing().context("failed to open log file")?;

    let cli = Cli::parse();
    let file = ShellConfig::discover(cli.config.as_deref())?;
    let settings = ShellSettings::resolve(
        file,
        Overrides {
            account: cli.account,
            provider: cli.provider,
            model: cli.model,
            fork_on_retry: cli.fork_on_retry,
            allow_empty_messages: cli.allow_empty_messages,
        },
    )?;

    let provider = providers::provider_for_id(&settings.provider_id).map_err(anyhow::Error::msg)?;
    let mut app = App::new(provider, settings)?;
    let mut host = ConsoleHost {
        editor: DefaultEditor::new()?,
    };

    // Ctrl-C while a reply streams raises the cancel flag; at the prompt the
    // line editor handles it.
    signal_hook::flag::register(signal_hook::consts::SIGINT, app.cancel_signal())
        .context("failed to install SIGINT handler")?;

    if let Some(path) = cli.file {
        if let Err(error) = app.execute(Command::Load(Some(path)), &mut host) {
            eprintln!("error: {error}");
        }
    }

    let outcome = run(&mut app, &mut host);
    if let Err(failure) = &outcome {
        error!(error = %failure, "shell failed");
        if app.session().has_unsaved_changes() {
            let dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
            match write_crash_dump(&dir, app.session(), &format!("{failure:#}")) {
                Ok(path) => eprintln!("unsaved threads written to {}", path.display()),
                Err(dump_error) => eprintln!("failed to write crash dump: {dump_error}"),
            }
        }
    }
    outcome
}

fn run(app: &mut App, host: &mut ConsoleHost) -> Result<()> {
    loop {
        let prompt = app.prompt();
        match host.editor.readline(&prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = host.editor.add_history_entry(line.as_str());
                }
                if app.handle_line(&line, host) == Flow::Quit {
                    info!("shell exiting");
                    return Ok(());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("Ctrl-C: type quit to exit.");
            }
            Err(ReadlineError::Eof) if app.session().has_unsaved_changes() => {
                anyhow::bail!("input closed with unsaved changes");
            }
            Err(ReadlineError::Eof) => return Ok(()),
            Err(error) => return Err(error).context("failed to read input"),
        }
    }
}
