//! Task Executor
//!
//! Renders a story into a [`Plan`] and dispatches it, strictly in order,
//! through a [`RemoteExecutor`].
//!
//! # Execution Rules
//!
//! - Every template is rendered before the first command is dispatched, so an
//!   unresolved variable never leaves a deployment half-applied
//! - Tasks run in story order; commands run in task order; nothing overlaps
//! - The first non-zero exit (or timeout) ends the run; later commands and
//!   tasks are never dispatched, and nothing is rolled back
//! - Each task starts in its own `working_dir` (login directory if unset). A
//!   plain `cd <dir>` command moves the directory for the rest of that task
//!   only; the next task starts fresh

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::definition::Definition;
use crate::error::{Result, RolloutError};
use crate::remote::RemoteExecutor;
use crate::reporter::{RunOutcome, RunReporter};
use crate::run_state::{RunContext, RunState};
use crate::template::VariableSet;

/// Exit code reported when the connection drops mid-command
const CONNECTION_LOST_EXIT_CODE: i32 = 255;

/// A task with every template rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedTask {
    pub name: String,
    pub message: Option<String>,
    pub working_dir: Option<String>,
    pub commands: Vec<String>,
}

/// The fully rendered story for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub story: String,
    pub tasks: Vec<PlannedTask>,
    /// Optional tasks left out at the operator's request
    pub skipped: Vec<String>,
}

impl Plan {
    /// Render the definition's story against `vars`, leaving out `skip`.
    ///
    /// # Errors
    ///
    /// - `Definition` if a skipped task is not in the story, is not optional,
    ///   or skipping leaves nothing to run
    /// - `MissingVariable` for any template naming an unresolved variable
    pub fn build(definition: &Definition, vars: &VariableSet, skip: &[String]) -> Result<Self> {
        for name in skip {
            let task = definition
                .task(name)
                .filter(|_| definition.story.tasks.contains(name))
                .ok_or_else(|| {
                    RolloutError::definition(format!(
                        "cannot skip '{}': not a task of story '{}'",
                        name, definition.story.name
                    ))
                })?;
            if !task.optional {
                return Err(RolloutError::definition(format!(
                    "cannot skip '{}': task is not optional",
                    name
                )));
            }
        }

        let mut tasks = Vec::new();
        let mut skipped = Vec::new();
        for task in definition.story_tasks()? {
            if skip.contains(&task.name) {
                skipped.push(task.name.clone());
                continue;
            }

            let context = format!("task '{}'", task.name);
            let render = |template: &String| vars.render(template, &context);

            tasks.push(PlannedTask {
                name: task.name.clone(),
                message: task.message.as_ref().map(render).transpose()?,
                working_dir: task.working_dir.as_ref().map(render).transpose()?,
                commands: task.commands.iter().map(render).collect::<Result<_>>()?,
            });
        }

        if tasks.is_empty() {
            return Err(RolloutError::definition(format!(
                "story '{}' has no tasks left to run",
                definition.story.name
            )));
        }

        Ok(Self {
            story: definition.story.name.clone(),
            tasks,
            skipped,
        })
    }

    /// Total number of commands across all tasks
    pub fn command_count(&self) -> usize {
        self.tasks.iter().map(|t| t.commands.len()).sum()
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub context: RunContext,
    pub outcome: RunOutcome,
    /// stderr of the failing command, empty on success
    pub stderr: String,
    /// Commands actually dispatched
    pub dispatched: usize,
}

impl RunReport {
    pub fn state(&self) -> RunState {
        self.context.state()
    }

    /// Turn a failed outcome into `RemoteCommand`
    pub fn into_result(self) -> Result<RunContext> {
        match self.outcome {
            RunOutcome::Succeeded => Ok(self.context),
            RunOutcome::Failed {
                task,
                command,
                exit_code,
            } => Err(RolloutError::RemoteCommand {
                task,
                command,
                exit_code,
                stderr: self.stderr,
            }),
        }
    }
}

/// If `command` is a bare `cd <dir>`, the directory it moves to
fn cd_target(command: &str) -> Option<&str> {
    let rest = command.trim().strip_prefix("cd ")?.trim();
    if rest.is_empty()
        || rest.contains(char::is_whitespace)
        || rest.contains(['&', ';', '|', '$', '`', '(', ')'])
    {
        return None;
    }
    let unquoted = rest
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| rest.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
        .unwrap_or(rest);
    Some(unquoted)
}

/// Working directory after `cd target` from `current`
fn change_dir(current: Option<&str>, target: &str) -> String {
    match current {
        Some(cwd) if !target.starts_with('/') && !target.starts_with('~') => {
            format!("{}/{}", cwd.trim_end_matches('/'), target)
        }
        _ => target.to_string(),
    }
}

/// Dispatches a [`Plan`] and reports progress.
pub struct Executor<'a, R: RemoteExecutor, P: RunReporter> {
    remote: &'a mut R,
    reporter: &'a mut P,
    timeout: Duration,
}

impl<'a, R: RemoteExecutor, P: RunReporter> Executor<'a, R, P> {
    /// `timeout` bounds each command individually
    pub fn new(remote: &'a mut R, reporter: &'a mut P, timeout: Duration) -> Self {
        Self {
            remote,
            reporter,
            timeout,
        }
    }

    /// Run every task of `plan` on the remote host.
    ///
    /// A failing command is not an `Err`: the returned report carries the
    /// `Failed` outcome. `Err` means the host could not be reached (before or
    /// during the run) or the run state was misused.
    pub fn run(&mut self, plan: &Plan, target: &str) -> Result<RunReport> {
        self.remote.check_connection()?;

        let total = plan.tasks.len();
        for name in &plan.skipped {
            self.reporter.task_skipped(name);
        }
        self.reporter.run_started(&plan.story, target, total);

        let mut context = RunContext::new(total);
        context.start()?;
        let mut dispatched = 0;

        for (index, task) in plan.tasks.iter().enumerate() {
            self.reporter.task_started(index, total, task);
            let mut cwd = task.working_dir.clone();

            for command in &task.commands {
                debug!(task = %task.name, cwd = ?cwd, "running: {}", command);
                dispatched += 1;

                let output = match self.remote.run(command, cwd.as_deref(), self.timeout) {
                    Ok(output) => output,
                    Err(e) => {
                        warn!(task = %task.name, "connection lost: {}", e);
                        context.fail()?;
                        self.reporter.run_finished(&RunOutcome::Failed {
                            task: task.name.clone(),
                            command: command.clone(),
                            exit_code: CONNECTION_LOST_EXIT_CODE,
                        });
                        return Err(e);
                    }
                };
                self.reporter.command_finished(&task.name, command, &output);

                if !output.success() {
                    context.fail()?;
                    let outcome = RunOutcome::Failed {
                        task: task.name.clone(),
                        command: command.clone(),
                        exit_code: output.exit_code,
                    };
                    self.reporter.run_finished(&outcome);
                    return Ok(RunReport {
                        context,
                        outcome,
                        stderr: output.stderr,
                        dispatched,
                    });
                }

                if let Some(dir) = cd_target(command) {
                    cwd = Some(change_dir(cwd.as_deref(), dir));
                }
            }

            context.complete_task(index)?;
        }

        let outcome = RunOutcome::Succeeded;
        self.reporter.run_finished(&outcome);
        Ok(RunReport {
            context,
            outcome,
            stderr: String::new(),
            dispatched,
        })
    }
}
