use crate::platform::PlatformContext;

/// Sent in place of the task on every round after the first.
pub const CONTINUE_PROMPT: &str = "Continue with the task.";

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a command line expert. You turn a user's task into shell commands for their machine.

You may call the diagnostic tools you are given to inspect the system before answering: read man pages or --help output, list directories, check whether files exist, read config files, check ports, disk space and write permissions. Use them when you are unsure about a flag, a path or the state of the system. Do not guess.

STRICT RULES:
1. Generate commands for the platform and shell described in the system context.
2. Prefer simple, common tools and flags you have verified.
3. Never propose commands that wipe disks, delete system directories or change permissions on system paths.
4. Put anything the user should know before running the commands in "warnings".
5. Set "requires_confirmation" to false only for commands that are read-only.

When you are done, respond with ONLY this JSON in a ```json block, no other text:
{"commands": ["the command"], "explanation": "what it does", "warnings": [], "requires_confirmation": true}

If the task is a question that needs no commands, answer it in plain text instead."#;

/// First-turn message: the task plus a snapshot of the host.
pub fn build_task_prompt(task: &str, platform: Option<&PlatformContext>) -> String {
    let Some(ctx) = platform else {
        return task.to_string();
    };

    format!(
        r#"System Context:
- Platform: {platform}
- OS: {os}
- Architecture: {arch}
- Shell: {shell} ({kind:?})

User Task: {task}

IMPORTANT: Generate commands appropriate for the {platform} platform and {shell}."#,
        platform = ctx.platform,
        os = ctx.os,
        arch = ctx.architecture,
        shell = ctx.shell.name(),
        kind = ctx.shell.kind,
        task = task,
    )
}
