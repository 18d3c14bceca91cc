//! gsync CLI entry point.

use clap::Parser;
use gsync::cli::commands;
use gsync::cli::{Cli, Commands};
use gsync::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.quiet);

    // JSON when asked for, or when stdout is not a terminal
    let json = cli.json || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    match run(&cli, json) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if json {
                eprintln!("{}", e.to_structured_json());
            } else if !cli.quiet {
                if let Some(hint) = e.hint() {
                    eprintln!("Error: {e}\n  Hint: {hint}");
                } else {
                    eprintln!("Error: {e}");
                }
            }
            ExitCode::from(e.exit_code())
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    if quiet {
        return;
    }

    // Honor RUST_LOG if set, otherwise use verbosity flag
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug,rusqlite=info"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(cli: &Cli, json: bool) -> Result<(), Error> {
    match &cli.command {
        Commands::Init { force } => commands::init::execute(cli.db.as_ref(), *force, json),
        Commands::Version => commands::version::execute(json),

        Commands::Gallery { command } => {
            commands::gallery::execute(command, cli.db.as_ref(), cli.actor.as_deref(), json)
        }
        Commands::Album { command } => commands::album::execute(command, cli.db.as_ref(), json),
        Commands::Media { command } => commands::media::execute(command, cli.db.as_ref(), json),
        Commands::Sync { command } => {
            commands::sync::execute(command, cli.db.as_ref(), cli.actor.as_deref(), json)
        }

        Commands::Completions { shell } => commands::completions::execute(shell),
    }
}
