use crate::error::ToolError;
use serde_json::{json, Value};
use std::process::{Command, Stdio};

const MAX_MAN_CHARS: usize = 8000;
const MAX_HELP_CHARS: usize = 4000;

/// Only bare program names; this string becomes argv[0] of a child process.
fn validate_command_name(name: &str) -> Result<&str, ToolError> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'));
    if valid {
        Ok(name)
    } else {
        Err(ToolError::Failed(format!("not a command name: '{}'", name)))
    }
}

fn truncate(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() > max_chars {
        (text.chars().take(max_chars).collect(), true)
    } else {
        (text.to_string(), false)
    }
}

pub fn get_man_page(command: &str) -> Result<Value, ToolError> {
    let name = validate_command_name(command)?;
    let output = Command::new("man")
        .arg(name)
        .env("MANPAGER", "cat")
        .env("PAGER", "cat")
        .env("MANWIDTH", "100")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| ToolError::Failed(format!("man is not available: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed(format!(
            "no man page for {}: {}",
            name,
            stderr.trim()
        )));
    }

    // Strip overstrike sequences some man implementations emit without a tty.
    let raw = String::from_utf8_lossy(&output.stdout);
    let mut cleaned = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '\u{8}' {
            cleaned.pop();
        } else {
            cleaned.push(c);
        }
    }
    let (content, truncated) = truncate(&cleaned, MAX_MAN_CHARS);
    Ok(json!({
        "command": name,
        "content": content,
        "truncated": truncated,
    }))
}

/// Runs `<command> --help`, then `-h`, keeping whichever stream said more.
pub fn get_command_help(command: &str) -> Result<Value, ToolError> {
    let name = validate_command_name(command)?;

    for flag in ["--help", "-h"] {
        let output = match Command::new(name)
            .arg(flag)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                return Err(ToolError::Failed(format!("cannot run {}: {}", name, e)));
            }
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let text = if stdout.len() >= stderr.len() {
            stdout
        } else {
            stderr
        };
        if text.trim().len() > 20 {
            let (content, truncated) = truncate(&text, MAX_HELP_CHARS);
            return Ok(json!({
                "command": name,
                "flag": flag,
                "content": content,
                "truncated": truncated,
            }));
        }
    }

    Err(ToolError::Failed(format!("{} printed no help text", name)))
}
