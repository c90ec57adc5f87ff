use crate::types::CommandPlan;
use serde_json::Value;
use tracing::debug;

/// Extracts a command plan from model output.
///
/// Looks at a ```` ```json ```` block first, then any fenced block, then the whole
/// text. Returns `None` when nothing parses into an object with a `commands`
/// array, which callers treat as a plain conversational answer.
pub fn parse_plan(content: &str) -> Option<CommandPlan> {
    let candidate = json_candidate(content)?;
    let parsed: Value = match serde_json::from_str(candidate) {
        Ok(v) => v,
        Err(e) => {
            debug!(error = %e, "model output is not a command plan");
            return None;
        }
    };

    let commands = parsed.get("commands")?.as_array()?;

    Some(CommandPlan {
        commands: commands
            .iter()
            .filter_map(|v| v.as_str().map(String::from))
            .collect(),
        explanation: parsed["explanation"].as_str().unwrap_or("").to_string(),
        warnings: parsed["warnings"]
            .as_array()
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default(),
        requires_confirmation: parsed
            .get("requires_confirmation")
            .or_else(|| parsed.get("needs_confirmation"))
            .and_then(Value::as_bool)
            .unwrap_or(true),
    })
}

fn json_candidate(content: &str) -> Option<&str> {
    if let Some((_, rest)) = content.split_once("```json") {
        return Some(fence_body(rest));
    }
    if let Some((_, rest)) = content.split_once("```") {
        return Some(fence_body(rest));
    }
    let trimmed = content.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

/// Text up to the closing fence, or to the end if the fence is unterminated.
fn fence_body(rest: &str) -> &str {
    rest.split("```").next().unwrap_or(rest).trim()
}
