use crate::types::{CommandPlan, ExecutionOutcome, HistoryEntry};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    terminal,
};
use std::io::{self, BufRead, IsTerminal, Write};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Asks the user whether to go ahead. Anything but an explicit yes is a no.
pub trait Consent {
    fn confirm(&mut self, question: &str) -> bool;
}

/// Reads a single key from the terminal, or a line when stdin is not a tty.
pub struct TerminalConsent;

impl Consent for TerminalConsent {
    fn confirm(&mut self, question: &str) -> bool {
        eprint!("{} (y/N) ", question);
        io::stderr().flush().ok();

        if !io::stdin().is_terminal() {
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).is_err() {
                return false;
            }
            return line.trim().eq_ignore_ascii_case("y");
        }

        let answer = read_key_answer().unwrap_or(false);
        eprintln!("{}", if answer { "y" } else { "n" });
        answer
    }
}

fn read_key_answer() -> Option<bool> {
    terminal::enable_raw_mode().ok()?;
    let result = loop {
        match event::poll(Duration::from_millis(100)) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(_) => break None,
        }
        match event::read() {
            Ok(Event::Key(k)) if k.kind == KeyEventKind::Press => match k.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => break Some(true),
                KeyCode::Char('c') if k.modifiers.contains(KeyModifiers::CONTROL) => {
                    break Some(false)
                }
                _ => break Some(false),
            },
            Ok(_) => {}
            Err(_) => break None,
        }
    };
    terminal::disable_raw_mode().ok();
    result
}

pub fn print_plan(out: &mut dyn Write, plan: &CommandPlan) -> io::Result<()> {
    if !plan.explanation.is_empty() {
        writeln!(out, "explanation: {}", plan.explanation)?;
        writeln!(out)?;
    }

    if !plan.warnings.is_empty() {
        for warning in &plan.warnings {
            writeln!(out, "  warning: {}", warning)?;
        }
        writeln!(out)?;
    }

    writeln!(out, "commands:")?;
    for (i, cmd) in plan.commands.iter().enumerate() {
        writeln!(out, "  {}. {}", i + 1, cmd)?;
    }
    writeln!(out)?;
    Ok(())
}

pub fn print_outcome(
    out: &mut dyn Write,
    outcome: &ExecutionOutcome,
    timeout: Duration,
    max_lines: usize,
) -> io::Result<()> {
    if !outcome.stdout.is_empty() {
        writeln!(out, "{}", truncate_output(&outcome.stdout, max_lines))?;
    }
    if !outcome.stderr.is_empty() {
        writeln!(out, "stderr: {}", truncate_output(&outcome.stderr, max_lines))?;
    }

    if outcome.timed_out {
        writeln!(out, "timed out after {} seconds", timeout.as_secs())?;
    } else {
        match outcome.exit_code {
            Some(0) => writeln!(out, "ok ({:.1}s)", outcome.duration.as_secs_f64())?,
            Some(code) => writeln!(out, "exited with code {}", code)?,
            None => writeln!(out, "terminated by signal")?,
        }
    }
    writeln!(out)?;
    Ok(())
}

/// Keeps the first and last `max_lines / 2` lines of long output.
pub fn truncate_output(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.trim_end_matches('\n').lines().collect();
    if max_lines == 0 || lines.len() <= max_lines {
        return lines.join("\n");
    }
    let half = max_lines / 2;
    let mut truncated: Vec<String> = lines[..half].iter().map(|l| l.to_string()).collect();
    truncated.push(format!("... [{} lines truncated] ...", lines.len() - half * 2));
    truncated.extend(lines[lines.len() - half..].iter().map(|l| l.to_string()));
    truncated.join("\n")
}

pub fn print_history(out: &mut dyn Write, entries: &[HistoryEntry]) -> io::Result<()> {
    if entries.is_empty() {
        writeln!(out, "no history yet.")?;
        return Ok(());
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    writeln!(out, "recent tasks:")?;
    writeln!(out)?;
    for entry in entries {
        let status = match (entry.executed, entry.succeeded) {
            (true, true) => "+",
            (true, false) => "x",
            (false, _) => "-",
        };
        writeln!(out, "{} {}  ({})", status, entry.task, age(now, entry.timestamp))?;
        for cmd in &entry.commands {
            writeln!(out, "    {}", cmd)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn age(now: i64, timestamp: i64) -> String {
    let secs = now.saturating_sub(timestamp).max(0);
    match secs {
        0..=59 => "just now".to_string(),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86400),
    }
}
