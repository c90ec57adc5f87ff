use serde::Serialize;
use std::env;
use std::path::Path;
use sysinfo::System;

/// Shells that accept a whole command line as one argument.
const POSIX_SHELLS: &[&str] = &["sh", "bash", "zsh", "dash", "ksh", "mksh", "ash", "fish"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Posix,
    PowerShell,
    Cmd,
}

/// The interpreter commands are handed to, as a program path plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Shell {
    pub program: String,
    pub kind: ShellKind,
}

impl Shell {
    pub fn posix(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            kind: ShellKind::Posix,
        }
    }

    /// `$SHELL` when it names a known POSIX shell, otherwise `/bin/sh`.
    /// On Windows, PowerShell when `PSModulePath` is set, otherwise `cmd`.
    pub fn detect() -> Self {
        if cfg!(windows) {
            return if env::var_os("PSModulePath").is_some() {
                Self {
                    program: "powershell".to_string(),
                    kind: ShellKind::PowerShell,
                }
            } else {
                Self {
                    program: env::var("COMSPEC").unwrap_or_else(|_| "cmd".to_string()),
                    kind: ShellKind::Cmd,
                }
            };
        }
        match env::var("SHELL") {
            Ok(shell) if POSIX_SHELLS.contains(&shell_name(&shell)) => Self::posix(shell),
            _ => Self::posix("/bin/sh"),
        }
    }

    pub fn name(&self) -> &str {
        shell_name(&self.program)
    }

    /// Argument vector that runs `command` in this shell. The command stays a
    /// single argument; nothing is interpolated into another command line.
    pub fn argv(&self, command: &str) -> Vec<String> {
        let mut argv = vec![self.program.clone()];
        match self.kind {
            ShellKind::Posix => argv.push("-c".to_string()),
            ShellKind::PowerShell => {
                argv.push("-NoProfile".to_string());
                argv.push("-Command".to_string());
            }
            ShellKind::Cmd => argv.push("/C".to_string()),
        }
        argv.push(command.to_string());
        argv
    }
}

fn shell_name(program: &str) -> &str {
    Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program)
}

/// Snapshot of the host, sent with the first turn of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformContext {
    pub platform: String,
    pub os: String,
    pub architecture: String,
    pub shell: Shell,
}

impl PlatformContext {
    pub fn detect() -> Self {
        let platform = match env::consts::OS {
            "linux" => "Linux".to_string(),
            "macos" => "macOS".to_string(),
            "windows" => "Windows".to_string(),
            other => other.to_string(),
        };
        let os = System::long_os_version()
            .or_else(System::name)
            .unwrap_or_else(|| platform.clone());
        Self {
            platform,
            os,
            architecture: env::consts::ARCH.to_string(),
            shell: Shell::detect(),
        }
    }
}
