//! Running approved commands, and the gate in front of it.

use crate::platform::Shell;
use crate::safety::SafetyValidator;
use crate::types::{CommandPlan, ExecutionOutcome, PlanOutcome};
use crate::ui::{self, Consent};
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Runs one command to completion or timeout.
pub trait CommandRunner {
    fn run(&self, command: &str) -> io::Result<ExecutionOutcome>;

    fn timeout(&self) -> Duration;

    fn describe(&self) -> String;
}

pub struct ShellExecutor {
    shell: Shell,
    timeout: Duration,
}

impl ShellExecutor {
    pub fn new(shell: Shell, timeout: Duration) -> Self {
        Self { shell, timeout }
    }
}

impl CommandRunner for ShellExecutor {
    fn run(&self, command: &str) -> io::Result<ExecutionOutcome> {
        let argv = self.shell.argv(command);
        debug!(?argv, "spawning");
        let started = Instant::now();

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout can take down everything the shell started.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
        let mut child = cmd.spawn()?;

        // Drain both pipes while waiting so a chatty command cannot block on a full pipe.
        let stdout_reader = child.stdout.take().map(drain);
        let stderr_reader = child.stderr.take().map(drain);

        let (exit_code, timed_out) = match child.wait_timeout(self.timeout)? {
            Some(status) => (status.code(), false),
            None => {
                warn!(command, timeout_secs = self.timeout.as_secs(), "command timed out, killing");
                kill_tree(&mut child);
                let status = child.wait().ok();
                (status.and_then(|s| s.code()), true)
            }
        };

        // Something that left the process group may still hold the pipes, so
        // after a timeout both streams share one short grace period.
        let deadline = Instant::now() + PIPE_GRACE;
        let collect = |reader: Option<Receiver<Vec<u8>>>| {
            reader
                .and_then(|rx| {
                    if timed_out {
                        rx.recv_timeout(deadline.saturating_duration_since(Instant::now()))
                            .ok()
                    } else {
                        rx.recv().ok()
                    }
                })
                .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
                .unwrap_or_default()
        };

        Ok(ExecutionOutcome {
            command: command.to_string(),
            exit_code,
            stdout: collect(stdout_reader),
            stderr: collect(stderr_reader),
            timed_out,
            duration: started.elapsed(),
        })
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        format!("{} ({:?})", self.shell.program, self.shell.kind)
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let pgid = Pid::from_raw(child.id() as i32);
    if let Err(e) = killpg(pgid, Signal::SIGKILL) {
        debug!(error = %e, "killpg failed, killing the shell only");
        child.kill().ok();
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    child.kill().ok();
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        pipe.read_to_end(&mut buf).ok();
        tx.send(buf).ok();
    });
    rx
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecuteOptions {
    pub auto_confirm: bool,
    pub dry_run: bool,
    pub max_output_lines: usize,
}

/// Renders the plan, then (unless dry-running) validates every command,
/// asks for consent when required, and runs the commands in order.
///
/// A rejected or declined plan runs nothing. A failing or timed-out command
/// does not stop the ones after it.
pub fn execute_plan(
    plan: &CommandPlan,
    options: ExecuteOptions,
    validator: &SafetyValidator,
    runner: &dyn CommandRunner,
    consent: &mut dyn Consent,
    out: &mut dyn Write,
) -> io::Result<PlanOutcome> {
    ui::print_plan(out, plan)?;

    if options.dry_run {
        writeln!(out, "dry run: not executing commands")?;
        return Ok(PlanOutcome::DryRun);
    }

    for cmd in &plan.commands {
        let verdict = validator.validate(cmd);
        if !verdict.safe {
            warn!(command = %cmd, reason = %verdict.reason, "plan rejected by safety check");
            writeln!(out, "refused: {}", verdict.reason)?;
            writeln!(out, "  command: {}", cmd)?;
            return Ok(PlanOutcome::Rejected {
                command: cmd.clone(),
                reason: verdict.reason,
            });
        }
    }

    if plan.commands.is_empty() {
        writeln!(out, "nothing to run.")?;
        return Ok(PlanOutcome::Executed(Vec::new()));
    }

    if plan.requires_confirmation && !options.auto_confirm {
        out.flush()?;
        if !consent.confirm("Execute these commands?") {
            writeln!(out, "cancelled.")?;
            return Ok(PlanOutcome::Cancelled);
        }
    }

    info!(commands = plan.commands.len(), runner = %runner.describe(), "executing plan");
    writeln!(out, "running with {}", runner.describe())?;
    writeln!(out)?;

    let total = plan.commands.len();
    let mut outcomes = Vec::with_capacity(total);
    for (i, cmd) in plan.commands.iter().enumerate() {
        writeln!(out, "[{}/{}] {}", i + 1, total, cmd)?;
        match runner.run(cmd) {
            Ok(outcome) => {
                ui::print_outcome(out, &outcome, runner.timeout(), options.max_output_lines)?;
                outcomes.push(outcome);
            }
            Err(e) => {
                warn!(command = %cmd, error = %e, "failed to start command");
                writeln!(out, "error: could not start command: {}", e)?;
                writeln!(out)?;
                outcomes.push(ExecutionOutcome {
                    command: cmd.clone(),
                    exit_code: None,
                    stdout: String::new(),
                    stderr: e.to_string(),
                    timed_out: false,
                    duration: Duration::ZERO,
                });
            }
        }
    }

    Ok(PlanOutcome::Executed(outcomes))
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingRunner;
    use super::*;
    use crate::config::SafetyConfig;
    use crate::ui::testing::FixedConsent;

    fn plan(commands: &[&str], requires_confirmation: bool) -> CommandPlan {
        CommandPlan {
            commands: commands.iter().map(|c| c.to_string()).collect(),
            explanation: "test plan".to_string(),
            warnings: Vec::new(),
            requires_confirmation,
        }
    }

    fn validator() -> SafetyValidator {
        SafetyValidator::new(&SafetyConfig::default()).unwrap()
    }

    fn options(auto_confirm: bool, dry_run: bool) -> ExecuteOptions {
        ExecuteOptions {
            auto_confirm,
            dry_run,
            max_output_lines: 100,
        }
    }

    #[cfg(unix)]
    #[test]
    fn shell_executor_captures_streams_separately() {
        let exec = ShellExecutor::new(Shell::posix("/bin/sh"), Duration::from_secs(10));
        let outcome = exec.run("echo out; echo err 1>&2; exit 3").unwrap();
        assert_eq!(outcome.stdout.trim(), "out");
        assert_eq!(outcome.stderr.trim(), "err");
        assert_eq!(outcome.exit_code, Some(3));
        assert!(!outcome.timed_out);
        assert!(!outcome.succeeded());
    }

    #[cfg(unix)]
    #[test]
    fn shell_executor_kills_on_timeout() {
        let exec = ShellExecutor::new(Shell::posix("/bin/sh"), Duration::from_millis(200));
        let started = Instant::now();
        let outcome = exec.run("sleep 5").unwrap();
        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_everything_the_command_started() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("marker");
        let exec = ShellExecutor::new(Shell::posix("/bin/sh"), Duration::from_millis(300));
        let started = Instant::now();
        let outcome = exec
            .run(&format!("sh -c 'sleep 2; touch {}'; true", marker.display()))
            .unwrap();

        assert!(outcome.timed_out);
        assert!(started.elapsed() < Duration::from_millis(1000));
        thread::sleep(Duration::from_secs(3));
        assert!(!marker.exists(), "grandchild kept running after the timeout");
    }

    #[test]
    fn empty_plan_runs_nothing_and_never_prompts() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(false);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&[], true),
            options(false, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        assert_eq!(result, PlanOutcome::Executed(Vec::new()));
        assert_eq!(consent.asked, 0);
        assert!(runner.ran.borrow().is_empty());
        assert!(String::from_utf8(out).unwrap().contains("nothing to run."));
    }

    #[cfg(unix)]
    #[test]
    fn middle_timeout_does_not_stop_the_plan() {
        let exec = ShellExecutor::new(Shell::posix("/bin/sh"), Duration::from_millis(300));
        let mut consent = FixedConsent::new(false);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["echo first", "sleep 5", "echo third"], true),
            options(true, false),
            &validator(),
            &exec,
            &mut consent,
            &mut out,
        )
        .unwrap();

        let PlanOutcome::Executed(outcomes) = result else {
            panic!("expected execution");
        };
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].stdout.trim(), "first");
        assert!(outcomes[1].timed_out);
        assert_eq!(outcomes[2].stdout.trim(), "third");
        assert!(outcomes[2].succeeded());
        assert!(String::from_utf8(out).unwrap().contains("timed out after"));
    }

    #[test]
    fn one_unsafe_command_blocks_the_whole_plan() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(true);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["ls", "rm -rf /", "pwd"], true),
            options(true, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        assert!(matches!(result, PlanOutcome::Rejected { ref command, .. } if command == "rm -rf /"));
        assert!(runner.ran.borrow().is_empty());
        assert_eq!(consent.asked, 0);
        assert!(String::from_utf8(out).unwrap().contains("refused:"));
    }

    #[test]
    fn declining_runs_nothing() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(false);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["ls", "pwd"], true),
            options(false, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        assert_eq!(result, PlanOutcome::Cancelled);
        assert_eq!(consent.asked, 1);
        assert!(runner.ran.borrow().is_empty());
    }

    #[test]
    fn auto_confirm_skips_the_prompt() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(false);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["ls", "pwd"], true),
            options(true, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        assert!(matches!(result, PlanOutcome::Executed(ref o) if o.len() == 2));
        assert_eq!(consent.asked, 0);
        assert_eq!(*runner.ran.borrow(), vec!["ls", "pwd"]);
    }

    #[test]
    fn plan_without_confirmation_runs_without_asking() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(false);
        let mut out = Vec::new();
        execute_plan(
            &plan(&["uptime"], false),
            options(false, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();
        assert_eq!(consent.asked, 0);
        assert_eq!(runner.ran.borrow().len(), 1);
    }

    #[test]
    fn failures_are_reported_and_later_commands_still_run() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(true);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["make fail", "echo after"], true),
            options(false, false),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        let PlanOutcome::Executed(outcomes) = result else {
            panic!("expected execution");
        };
        assert_eq!(outcomes[0].exit_code, Some(1));
        assert!(outcomes[1].succeeded());
        assert!(String::from_utf8(out).unwrap().contains("exited with code 1"));
    }

    #[test]
    fn dry_run_renders_but_never_validates_or_runs() {
        let runner = RecordingRunner::default();
        let mut consent = FixedConsent::new(true);
        let mut out = Vec::new();
        let result = execute_plan(
            &plan(&["rm -rf /", "ls"], true),
            options(false, true),
            &validator(),
            &runner,
            &mut consent,
            &mut out,
        )
        .unwrap();

        assert_eq!(result, PlanOutcome::DryRun);
        assert!(runner.ran.borrow().is_empty());
        assert_eq!(consent.asked, 0);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("1. rm -rf /"));
        assert!(text.contains("dry run"));
    }
}
