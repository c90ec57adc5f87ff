mod commands;
mod config;
mod db;
mod error;
mod executor;
mod llm;
mod models;
mod orchestrator;
mod parser;
mod platform;
mod prompt;
mod safety;
mod session;
mod tools;
mod types;
mod ui;

use clap::{ArgAction, Parser, Subcommand};
use config::load_config;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Describe a task in plain words; shelp asks a model for the shell commands,
/// checks them, and runs them once you agree.
#[derive(Parser, Debug)]
#[command(name = "shelp", author, version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG wins.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Run the plan without asking for confirmation.
    #[arg(short = 'y', long = "yes")]
    yes: bool,

    /// Show the plan but run nothing.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// The task, e.g. `shelp find files over 1GB in my home directory`.
    #[arg(trailing_var_arg = true)]
    task: Vec<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List recent tasks and what they ran
    History,
    /// Check the backend, config and environment
    Doctor,
    /// Open the config file in $EDITOR, creating it if needed
    Config,
    /// List the diagnostic tools offered to the model
    Tools,
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(default_level.into()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let config = load_config();

    let result = match cli.command {
        Some(Commands::History) => commands::cmd_history(&config),
        Some(Commands::Doctor) => commands::cmd_doctor(&config),
        Some(Commands::Config) => commands::cmd_config(),
        Some(Commands::Tools) => commands::cmd_tools(),
        None => {
            let task = cli.task.join(" ");
            if task.trim().is_empty() {
                eprintln!("usage: shelp [-y] [-n] <task...>");
                eprintln!("       shelp history | doctor | config | tools");
                std::process::exit(2);
            }
            commands::cmd_run(task.trim(), &config, cli.yes, cli.dry_run)
        }
    };

    if let Err(e) = result {
        eprintln!("shelp: {:#}", e);
        std::process::exit(1);
    }
}
