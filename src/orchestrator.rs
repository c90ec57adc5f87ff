//! The task loop: ask the model, run the tools it asks for, and hand the
//! final plan to the executor.

use crate::executor::{self, CommandRunner, ExecuteOptions};
use crate::llm::ChatBackend;
use crate::models::ToolCall;
use crate::parser::parse_plan;
use crate::platform::PlatformContext;
use crate::prompt::{build_task_prompt, CONTINUE_PROMPT};
use crate::safety::SafetyValidator;
use crate::session::Session;
use crate::tools::ToolRegistry;
use crate::types::TaskOutcome;
use crate::ui::Consent;
use serde_json::json;
use std::io::{self, Write};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub auto_confirm: bool,
    pub dry_run: bool,
}

pub struct Orchestrator<'a> {
    registry: &'a ToolRegistry,
    validator: &'a SafetyValidator,
    runner: &'a dyn CommandRunner,
    consent: &'a mut dyn Consent,
    max_iterations: usize,
    tool_call_delay: Duration,
    max_output_lines: usize,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        registry: &'a ToolRegistry,
        validator: &'a SafetyValidator,
        runner: &'a dyn CommandRunner,
        consent: &'a mut dyn Consent,
    ) -> Self {
        Self {
            registry,
            validator,
            runner,
            consent,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            tool_call_delay: Duration::ZERO,
            max_output_lines: 100,
        }
    }

    pub fn max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn tool_call_delay(mut self, delay: Duration) -> Self {
        self.tool_call_delay = delay;
        self
    }

    pub fn max_output_lines(mut self, lines: usize) -> Self {
        self.max_output_lines = lines;
        self
    }

    /// Drives one task to a terminal state. Only writing the transcript can
    /// fail; every other failure is reported in the outcome.
    pub fn run<B: ChatBackend>(
        &mut self,
        session: &mut Session<B>,
        task: &str,
        platform: Option<&PlatformContext>,
        options: RunOptions,
        out: &mut dyn Write,
    ) -> io::Result<TaskOutcome> {
        let tools = self.registry.definitions();
        let first_message = build_task_prompt(task, platform);
        writeln!(out, "task: {}", task)?;
        writeln!(out)?;

        for iteration in 1..=self.max_iterations {
            let message = if iteration == 1 {
                first_message.as_str()
            } else {
                CONTINUE_PROMPT
            };
            debug!(iteration, "sending request");

            let reply = match session.send(message, &tools) {
                Ok(reply) => reply,
                Err(e) => {
                    error!(error = %e, iteration, "model request failed");
                    writeln!(out, "error: could not reach the model: {}", e)?;
                    return Ok(TaskOutcome::TransportFailed(e.to_string()));
                }
            };

            if !reply.tool_calls.is_empty() {
                for call in &reply.tool_calls {
                    self.dispatch(session, call, out)?;
                }
                continue;
            }

            let content = match reply.content {
                Some(content) if !content.trim().is_empty() => content,
                _ => {
                    warn!(iteration, "empty reply without tool calls");
                    continue;
                }
            };

            return match parse_plan(&content) {
                Some(plan) => {
                    info!(iteration, commands = plan.commands.len(), "plan received");
                    let outcome = executor::execute_plan(
                        &plan,
                        ExecuteOptions {
                            auto_confirm: options.auto_confirm,
                            dry_run: options.dry_run,
                            max_output_lines: self.max_output_lines,
                        },
                        self.validator,
                        self.runner,
                        &mut *self.consent,
                        out,
                    )?;
                    Ok(TaskOutcome::Plan { plan, outcome })
                }
                None => {
                    info!(iteration, "answered without a plan");
                    writeln!(out, "{}", content.trim())?;
                    Ok(TaskOutcome::Answered(content))
                }
            };
        }

        warn!(max = self.max_iterations, "iteration limit hit");
        writeln!(
            out,
            "maximum iterations reached ({}); the task may be incomplete.",
            self.max_iterations
        )?;
        Ok(TaskOutcome::Incomplete {
            iterations: self.max_iterations,
        })
    }

    /// Runs one requested tool. Every call gets exactly one tool result in the
    /// history, including unknown tools and failures.
    fn dispatch<B: ChatBackend>(
        &self,
        session: &mut Session<B>,
        call: &ToolCall,
        out: &mut dyn Write,
    ) -> io::Result<()> {
        if !self.tool_call_delay.is_zero() {
            thread::sleep(self.tool_call_delay);
        }
        writeln!(out, "calling tool: {}({})", call.name, call.arguments)?;

        let payload = match self.registry.call(&call.name, &call.arguments) {
            None => {
                warn!(tool = %call.name, "model asked for an unknown tool");
                writeln!(out, "warning: unknown tool: {}", call.name)?;
                json!({ "error": format!("unknown tool: {}", call.name) })
            }
            Some(Err(e)) => {
                warn!(tool = %call.name, error = %e, "tool failed");
                writeln!(out, "tool error: {}", e)?;
                json!({ "error": e.to_string() })
            }
            Some(Ok(result)) => {
                debug!(tool = %call.name, "tool succeeded");
                writeln!(out, "tool result received")?;
                result
            }
        };
        session.add_tool_result(&call.id, &call.name, &payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SafetyConfig;
    use crate::error::{BackendError, ToolError};
    use crate::executor::testing::RecordingRunner;
    use crate::models::{AssistantReply, Role};
    use crate::session::testing::ScriptedBackend;
    use crate::types::PlanOutcome;
    use crate::ui::testing::FixedConsent;
    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[derive(Deserialize)]
    struct NoArgs {}

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            "echo",
            "Echo text back",
            json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |args: EchoArgs| Ok(json!({ "echo": args.text })),
        );
        registry.register(
            "broken",
            "Always fails",
            json!({"type": "object", "properties": {}}),
            |_: NoArgs| Err(ToolError::Failed("disk on fire".into())),
        );
        registry
    }

    fn tool_round(name: &str, arguments: Value) -> Result<AssistantReply, BackendError> {
        Ok(AssistantReply::tool_calls(vec![ToolCall {
            id: format!("call_{}", name),
            name: name.to_string(),
            arguments,
        }]))
    }

    fn plan_reply(commands: &[&str]) -> Result<AssistantReply, BackendError> {
        let plan = json!({
            "commands": commands,
            "explanation": "do the thing",
            "warnings": [],
            "requires_confirmation": true,
        });
        Ok(AssistantReply::text(format!("Here you go:\n```json\n{}\n```", plan)))
    }

    struct Harness {
        registry: ToolRegistry,
        validator: SafetyValidator,
        runner: RecordingRunner,
        consent: FixedConsent,
    }

    impl Harness {
        fn new(consent: bool) -> Self {
            Self {
                registry: registry(),
                validator: SafetyValidator::new(&SafetyConfig::default()).unwrap(),
                runner: RecordingRunner::default(),
                consent: FixedConsent::new(consent),
            }
        }

        fn run(
            &mut self,
            replies: Vec<Result<AssistantReply, BackendError>>,
            options: RunOptions,
        ) -> (TaskOutcome, Session<ScriptedBackend>, String) {
            let mut session = Session::new(ScriptedBackend::new(replies), "SYSTEM", Duration::ZERO);
            let mut out = Vec::new();
            let outcome = Orchestrator::new(
                &self.registry,
                &self.validator,
                &self.runner,
                &mut self.consent,
            )
            .run(&mut session, "show disk usage", None, options, &mut out)
            .unwrap();
            (outcome, session, String::from_utf8(out).unwrap())
        }
    }

    #[test]
    fn runaway_tool_calls_stop_after_ten_rounds() {
        let mut h = Harness::new(true);
        let replies = (0..11).map(|_| tool_round("echo", json!({"text": "again"}))).collect();
        let (outcome, session, text) = h.run(replies, RunOptions::default());

        assert_eq!(outcome, TaskOutcome::Incomplete { iterations: 10 });
        assert_eq!(session.backend().request_count(), 10);
        assert!(text.contains("maximum iterations reached"));
        assert!(h.runner.ran.borrow().is_empty());
    }

    #[test]
    fn tool_round_then_plan_executes_commands() {
        let mut h = Harness::new(true);
        let replies = vec![
            tool_round("echo", json!({"text": "probe"})),
            plan_reply(&["df -h", "du -sh ."]),
        ];
        let (outcome, session, text) = h.run(replies, RunOptions::default());

        let TaskOutcome::Plan { plan, outcome } = outcome else {
            panic!("expected a plan");
        };
        assert_eq!(plan.commands, vec!["df -h", "du -sh ."]);
        assert!(matches!(outcome, PlanOutcome::Executed(ref o) if o.len() == 2));
        assert_eq!(*h.runner.ran.borrow(), vec!["df -h", "du -sh ."]);
        assert_eq!(h.consent.asked, 1);
        assert!(text.contains("calling tool: echo"));

        let requests = session.backend().requests.borrow();
        assert_eq!(requests[0].last().unwrap().content, "show disk usage");
        assert_eq!(requests[1].last().unwrap().content, CONTINUE_PROMPT);
        let tool_turn = requests[1].iter().find(|m| m.role == Role::Tool).unwrap();
        assert_eq!(tool_turn.content, r#"{"echo":"probe"}"#);
    }

    #[test]
    fn unknown_and_failing_tools_still_answer_every_call() {
        let mut h = Harness::new(true);
        let replies = vec![
            Ok(AssistantReply::tool_calls(vec![
                ToolCall {
                    id: "a".into(),
                    name: "teleport".into(),
                    arguments: json!({}),
                },
                ToolCall {
                    id: "b".into(),
                    name: "broken".into(),
                    arguments: json!({}),
                },
                ToolCall {
                    id: "c".into(),
                    name: "echo".into(),
                    arguments: json!({"wrong": 1}),
                },
            ])),
            Ok(AssistantReply::text("nothing to do")),
        ];
        let (outcome, session, text) = h.run(replies, RunOptions::default());

        assert_eq!(outcome, TaskOutcome::Answered("nothing to do".into()));
        let results: Vec<_> = session
            .history()
            .iter()
            .filter(|m| m.role == Role::Tool)
            .collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].content.contains("unknown tool: teleport"));
        assert!(results[1].content.contains("disk on fire"));
        assert!(results[2].content.contains("error"));
        assert!(text.contains("warning: unknown tool: teleport"));
    }

    #[test]
    fn dry_run_twice_never_runs_or_prompts() {
        let mut h = Harness::new(true);
        for _ in 0..2 {
            let replies = vec![plan_reply(&["rm -rf ./build", "touch marker"])];
            let (outcome, _, text) = h.run(
                replies,
                RunOptions {
                    auto_confirm: false,
                    dry_run: true,
                },
            );
            assert!(matches!(
                outcome,
                TaskOutcome::Plan {
                    outcome: PlanOutcome::DryRun,
                    ..
                }
            ));
            assert!(text.contains("1. rm -rf ./build"));
        }
        assert!(h.runner.ran.borrow().is_empty());
        assert_eq!(h.consent.asked, 0);
    }

    #[test]
    fn transport_failure_ends_the_task() {
        let mut h = Harness::new(true);
        let replies = vec![
            tool_round("echo", json!({"text": "x"})),
            Err(BackendError::Status {
                status: 503,
                body: "overloaded".into(),
            }),
        ];
        let (outcome, session, text) = h.run(replies, RunOptions::default());

        assert!(matches!(outcome, TaskOutcome::TransportFailed(ref m) if m.contains("503")));
        assert_eq!(session.backend().request_count(), 2);
        assert!(text.contains("error: could not reach the model"));
    }

    #[test]
    fn unsafe_plan_is_rejected_without_running_anything() {
        let mut h = Harness::new(true);
        let replies = vec![plan_reply(&["ls /", "mkfs.ext4 /dev/sda1", "echo done"])];
        let (outcome, _, _) = h.run(
            replies,
            RunOptions {
                auto_confirm: true,
                dry_run: false,
            },
        );

        assert!(matches!(
            outcome,
            TaskOutcome::Plan {
                outcome: PlanOutcome::Rejected { .. },
                ..
            }
        ));
        assert!(h.runner.ran.borrow().is_empty());
    }

    #[test]
    fn empty_reply_moves_on_to_the_next_round() {
        let mut h = Harness::new(true);
        let replies = vec![Ok(AssistantReply::default()), Ok(AssistantReply::text("all good"))];
        let (outcome, session, _) = h.run(replies, RunOptions::default());
        assert_eq!(outcome, TaskOutcome::Answered("all good".into()));
        assert_eq!(session.backend().request_count(), 2);
    }
}
