use crate::config::{get_config_path, save_config, Config};
use crate::db::{history_db_path, open_history, recent_history, save_history};
use crate::executor::ShellExecutor;
use crate::llm::OpenAiClient;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::platform::PlatformContext;
use crate::prompt::DEFAULT_SYSTEM_PROMPT;
use crate::safety::SafetyValidator;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::types::{PlanOutcome, TaskOutcome};
use crate::ui::{print_history, TerminalConsent};
use anyhow::{bail, Context, Result};
use std::{env, fs, io::Write, process::Command};
use tracing::warn;

fn api_key(config: &Config) -> Option<String> {
    env::var(&config.llm.api_key_env).ok()
}

pub fn cmd_run(task: &str, config: &Config, auto_confirm: bool, dry_run: bool) -> Result<()> {
    let client = OpenAiClient::new(&config.llm, api_key(config))
        .context("failed to set up the model client")?;
    let system_prompt = config
        .llm
        .system_prompt
        .clone()
        .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
    let mut session = Session::new(client, system_prompt, config.rate_limit.request_delay());

    let registry = ToolRegistry::builtin();
    let validator =
        SafetyValidator::new(&config.safety).context("invalid safety configuration")?;
    let platform = PlatformContext::detect();
    let runner = ShellExecutor::new(platform.shell.clone(), config.safety.command_timeout());
    let mut consent = TerminalConsent;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let outcome = Orchestrator::new(&registry, &validator, &runner, &mut consent)
        .max_iterations(config.behavior.max_iterations)
        .tool_call_delay(config.rate_limit.tool_call_delay())
        .max_output_lines(config.safety.max_output_lines)
        .run(
            &mut session,
            task,
            Some(&platform),
            RunOptions {
                auto_confirm: auto_confirm || config.behavior.auto_confirm,
                dry_run,
            },
            &mut out,
        )
        .context("failed to write output")?;
    out.flush().ok();

    if config.behavior.record_history {
        record(task, &outcome);
    }

    match outcome {
        TaskOutcome::TransportFailed(_) => bail!("task aborted: the model could not be reached"),
        TaskOutcome::Plan {
            outcome: PlanOutcome::Rejected { .. },
            ..
        } => bail!("task aborted: plan refused by the safety check"),
        _ => Ok(()),
    }
}

/// Stores executed and cancelled plans. Failing to record never fails the task.
fn record(task: &str, outcome: &TaskOutcome) {
    let TaskOutcome::Plan { plan, outcome } = outcome else {
        return;
    };
    let (executed, succeeded) = match outcome {
        PlanOutcome::Executed(results) => (true, results.iter().all(|r| r.succeeded())),
        PlanOutcome::Cancelled => (false, false),
        PlanOutcome::DryRun | PlanOutcome::Rejected { .. } => return,
    };

    let result = open_history(&history_db_path())
        .and_then(|conn| save_history(&conn, task, &plan.commands, executed, succeeded));
    if let Err(e) = result {
        warn!(error = %e, "could not record history");
    }
}

pub fn cmd_history(config: &Config) -> Result<()> {
    let db_path = history_db_path();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if !db_path.exists() {
        writeln!(out, "no history yet.")?;
        return Ok(());
    }

    let conn = open_history(&db_path).context("failed to open history")?;
    let entries = recent_history(&conn, config.behavior.history_window)?;
    print_history(&mut out, &entries)?;
    Ok(())
}

pub fn cmd_doctor(config: &Config) -> Result<()> {
    println!("diagnostics:");
    println!();

    let client = OpenAiClient::new(&config.llm, api_key(config))?;

    print!("  backend ({}) ... ", config.llm.endpoint);
    std::io::stdout().flush().ok();
    if client.is_available() {
        println!("ok");
    } else {
        println!("failed");
        println!("    check that the server is running and `endpoint` is right");
    }

    println!("  model ... {}", client.model());

    print!("  api key (${}) ... ", config.llm.api_key_env);
    match api_key(config) {
        Some(key) if !key.trim().is_empty() => println!("set"),
        _ => println!("not set (fine for local servers)"),
    }

    let platform = PlatformContext::detect();
    println!(
        "  shell ... {} ({:?})",
        platform.shell.program, platform.shell.kind
    );
    println!("  platform ... {} {} ({})", platform.platform, platform.os, platform.architecture);

    print!("  config ... ");
    if get_config_path().exists() {
        println!("ok");
    } else {
        println!("using defaults");
    }

    print!("  history ... ");
    let db_path = history_db_path();
    if db_path.exists() {
        println!("ok");
    } else {
        println!("empty");
    }
    println!("    path: {}", db_path.display());

    println!();
    Ok(())
}

pub fn cmd_config() -> Result<()> {
    let config_path = get_config_path();

    if !config_path.exists() {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        save_config(&Config::default()).context("failed to write default config")?;
    }

    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
    Command::new(&editor)
        .arg(&config_path)
        .status()
        .with_context(|| format!("failed to launch {}", editor))?;

    Ok(())
}

pub fn cmd_tools() -> Result<()> {
    let registry = ToolRegistry::builtin();
    println!("{} diagnostic tools:", registry.len());
    println!();
    for tool in registry.definitions() {
        println!("  {}", tool.name);
        println!("    {}", tool.description);
    }
    Ok(())
}
