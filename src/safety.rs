//! Deny-list check applied to every command before it may run.
//!
//! This is pattern matching on the command text, not a sandbox. A command that
//! reaches a dangerous operation through indirection (variables, `eval`, scripts,
//! aliases) passes.

use crate::config::SafetyConfig;
use crate::types::SafetyVerdict;
use regex::Regex;

/// Top-level directories whose removal or re-permissioning breaks the host.
const SYSTEM_DIRS: &[&str] = &[
    "bin", "boot", "dev", "etc", "home", "lib", "lib32", "lib64", "opt", "proc", "root",
    "run", "sbin", "srv", "sys", "usr", "var", "System", "Library", "Users", "Applications",
];

const SENSITIVE_FILES: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/group",
    "/etc/gshadow",
    "/etc/sudoers",
];

/// Programs that format, partition or wipe devices.
const DISK_TOOLS: &[&str] = &["mke2fs", "mkswap", "wipefs", "fdisk", "sfdisk", "gdisk", "parted"];

/// Wrappers that run the program named after their own options, with the
/// options of each wrapper that consume the following word.
const WRAPPERS: &[(&str, &[&str])] = &[
    ("sudo", &["-u", "-g", "-C", "-D", "-h", "-p", "-r", "-t", "-U", "-T", "-R"]),
    ("doas", &["-u", "-C"]),
    ("env", &["-u", "--unset", "-C", "--chdir", "-S", "--split-string"]),
    ("nice", &["-n", "--adjustment"]),
    ("ionice", &["-c", "-n", "-p", "-t"]),
    ("timeout", &["-s", "--signal", "-k", "--kill-after"]),
    ("xargs", &["-a", "-d", "-E", "-I", "-L", "-n", "-P", "-s", "--arg-file", "--delimiter", "--max-args", "--max-procs"]),
    ("stdbuf", &["-i", "-o", "-e"]),
    ("nohup", &[]),
    ("time", &["-f", "-o"]),
    ("command", &[]),
    ("exec", &["-a"]),
    ("builtin", &[]),
];

struct TextRule {
    pattern: Regex,
    reason: &'static str,
}

pub struct SafetyValidator {
    text_rules: Vec<TextRule>,
    extra_patterns: Vec<String>,
}

impl SafetyValidator {
    pub fn new(config: &SafetyConfig) -> Result<Self, regex::Error> {
        let rule = |pattern: &str, reason: &'static str| -> Result<TextRule, regex::Error> {
            Ok(TextRule {
                pattern: Regex::new(pattern)?,
                reason,
            })
        };
        let text_rules = vec![
            rule(
                r":\s*\(\s*\)\s*\{\s*:\s*\|\s*:\s*&\s*\}",
                "fork bomb: spawns processes until the system is exhausted",
            )?,
            rule(
                r"\b(\w+)\s*\(\s*\)\s*\{[^}]*\|[^}]*&\s*;?\s*\}\s*;",
                "fork bomb: self-replicating shell function",
            )?,
            rule(
                r">\s*/dev/(sd|hd|vd|xvd|nvme|mmcblk|disk)\w*",
                "redirects output onto a raw disk device",
            )?,
            rule(
                r"\b(curl|wget)\b[^|;&]*\|\s*(sudo\s+)?(ba|z|da|k)?sh\b",
                "pipes a remote download straight into a shell",
            )?,
        ];
        Ok(Self {
            text_rules,
            extra_patterns: config
                .dangerous_patterns
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect(),
        })
    }

    /// Classifies one command. Anything not matched by a rule is safe.
    pub fn validate(&self, command: &str) -> SafetyVerdict {
        for rule in &self.text_rules {
            if rule.pattern.is_match(command) {
                return SafetyVerdict::unsafe_because(rule.reason);
            }
        }

        for pattern in &self.extra_patterns {
            if command.contains(pattern.as_str()) {
                return SafetyVerdict::unsafe_because(format!(
                    "matches blocked pattern '{}'",
                    pattern
                ));
            }
        }

        for segment in split_segments(command) {
            if let Some(reason) = check_segment(&segment) {
                return SafetyVerdict::unsafe_because(reason);
            }
        }

        SafetyVerdict::safe()
    }
}

/// Splits a command line into simple commands at `;`, `&&`, `||`, `|`, `&`
/// and newlines. Quoting is not interpreted.
fn split_segments(command: &str) -> Vec<Vec<String>> {
    command
        .split(|c: char| c == ';' || c == '|' || c == '&' || c == '\n')
        .map(|segment| {
            segment
                .split_whitespace()
                .map(|word| word.trim_matches(|c: char| c == '"' || c == '\''))
                .filter(|word| !word.is_empty())
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .filter(|words| !words.is_empty())
        .collect()
}

fn check_segment(words: &[String]) -> Option<String> {
    let start = program_index(words)?;
    let program = words[start].rsplit('/').next().unwrap_or(&words[start]);
    let args = &words[start + 1..];

    match program {
        "rm" => check_rm(args),
        "dd" => check_dd(args),
        "shred" => args
            .iter()
            .find(|a| a.starts_with("/dev/"))
            .map(|a| format!("shred overwrites device {}", a)),
        "chmod" | "chown" | "chgrp" => check_permission_change(program, args),
        p if p.starts_with("mkfs") || DISK_TOOLS.contains(&p) => {
            Some(format!("{} formats or repartitions disks", p))
        }
        _ => None,
    }
}

/// Index of the word naming the program that actually runs, looking through
/// env assignments and wrappers such as `sudo -u root` or `timeout 5`.
fn program_index(words: &[String]) -> Option<usize> {
    let mut i = 0;
    while i < words.len() {
        let word = &words[i];
        if is_env_assignment(word) {
            i += 1;
            continue;
        }
        let name = word.rsplit('/').next().unwrap_or(word);
        let Some((wrapper, takes_value)) = WRAPPERS.iter().find(|(w, _)| *w == name) else {
            return Some(i);
        };
        i += 1;
        while let Some(arg) = words.get(i) {
            if arg == "--" {
                i += 1;
                break;
            }
            if arg.starts_with('-') && arg.len() > 1 {
                i += if takes_value.contains(&arg.as_str()) { 2 } else { 1 };
            } else if *wrapper == "env" && is_env_assignment(arg) {
                i += 1;
            } else {
                break;
            }
        }
        // timeout's first operand is the duration, not the program.
        if *wrapper == "timeout" {
            i += 1;
        }
    }
    None
}

fn is_env_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn check_rm(args: &[String]) -> Option<String> {
    let (flags, targets) = split_flags(args);
    let recursive = flags.iter().any(|f| {
        f.as_str() == "--recursive" || (!f.starts_with("--") && (f.contains('r') || f.contains('R')))
    });
    if !recursive {
        return None;
    }
    targets
        .iter()
        .find(|t| is_root_level(t))
        .map(|t| format!("recursive delete of root-level path {}", t))
}

fn check_dd(args: &[String]) -> Option<String> {
    args.iter()
        .filter_map(|a| a.strip_prefix("of="))
        .find(|target| target.starts_with("/dev/") && !is_harmless_device(target))
        .map(|target| format!("dd writes directly to device {}", target))
}

fn check_permission_change(program: &str, args: &[String]) -> Option<String> {
    let (flags, targets) = split_flags(args);
    let recursive = flags
        .iter()
        .any(|f| f.as_str() == "--recursive" || (!f.starts_with("--") && f.contains('R')));

    targets
        .iter()
        .find(|t| {
            is_root_level(t)
                || SENSITIVE_FILES.contains(&t.as_str())
                || (recursive && is_under_system_dir(t))
        })
        .map(|t| format!("{} on sensitive system path {}", program, t))
}

/// Separates option words from operands. For chmod the mode is an operand but
/// is never a path, so it cannot match a path check.
fn split_flags(args: &[String]) -> (Vec<&String>, Vec<&String>) {
    let mut flags = Vec::new();
    let mut targets = Vec::new();
    let mut options_done = false;
    for arg in args {
        if !options_done && arg == "--" {
            options_done = true;
        } else if !options_done && arg.starts_with('-') && arg.len() > 1 {
            flags.push(arg);
        } else {
            targets.push(arg);
        }
    }
    (flags, targets)
}

/// `/`, `/*`, `~`, `$HOME` and top-level system directories.
fn is_root_level(path: &str) -> bool {
    let trimmed = path.trim_end_matches("/*").trim_end_matches('/');
    if trimmed.is_empty() {
        return true;
    }
    if matches!(trimmed, "~" | "$HOME" | "${HOME}" | "/.." | "/.") {
        return true;
    }
    match trimmed.strip_prefix('/') {
        Some(rest) => !rest.contains('/') && SYSTEM_DIRS.contains(&rest),
        None => false,
    }
}

fn is_under_system_dir(path: &str) -> bool {
    path.strip_prefix('/')
        .and_then(|rest| rest.split('/').next())
        .map(|top| SYSTEM_DIRS.contains(&top) && top != "home" && top != "Users")
        .unwrap_or(false)
}

fn is_harmless_device(path: &str) -> bool {
    matches!(path, "/dev/null" | "/dev/stdout" | "/dev/stderr")
}
