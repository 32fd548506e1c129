//! Run Reporter
//!
//! Human-readable progress for one run: a line when each task starts, the
//! output of each command once it completes, and a single terminal status
//! line. The status line is machine-greppable:
//!
//! ```text
//! success
//! failed: migrate, exit-code 1, command "php artisan migrate --force -q"
//! ```

use std::fmt;
use std::io::Write;
use tracing::{error, info};

use crate::executor::PlannedTask;
use crate::remote::CommandOutput;

/// Terminal status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded,
    Failed {
        task: String,
        command: String,
        exit_code: i32,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "success"),
            Self::Failed {
                task,
                command,
                exit_code,
            } => write!(
                f,
                "failed: {}, exit-code {}, command \"{}\"",
                task, exit_code, command
            ),
        }
    }
}

/// Receives progress events from the executor.
pub trait RunReporter {
    fn run_started(&mut self, _story: &str, _target: &str, _total_tasks: usize) {}

    /// `index` is zero-based
    fn task_started(&mut self, index: usize, total: usize, task: &PlannedTask);

    fn task_skipped(&mut self, _name: &str) {}

    fn command_finished(&mut self, _task: &str, _command: &str, _output: &CommandOutput) {}

    fn run_finished(&mut self, outcome: &RunOutcome);
}

/// Writes progress to a terminal (or any writer) and mirrors it to tracing.
pub struct ConsoleReporter<W: Write> {
    out: W,
}

impl ConsoleReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> ConsoleReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RunReporter for ConsoleReporter<W> {
    fn run_started(&mut self, story: &str, target: &str, total_tasks: usize) {
        info!(story, server = target, total_tasks, "run started");
        let _ = writeln!(
            self.out,
            "Running story '{}' on {} ({} tasks)",
            story, target, total_tasks
        );
    }

    fn task_started(&mut self, index: usize, total: usize, task: &PlannedTask) {
        info!(task = %task.name, "task started");
        let line = task
            .message
            .clone()
            .unwrap_or_else(|| format!("Running {}", task.name));
        let _ = writeln!(self.out, "[{}/{}] {}", index + 1, total, line);
    }

    fn task_skipped(&mut self, name: &str) {
        info!(task = name, "task skipped");
        let _ = writeln!(self.out, "Skipping {}", name);
    }

    fn command_finished(&mut self, task: &str, command: &str, output: &CommandOutput) {
        info!(task, command, exit_code = output.exit_code, "command finished");
        for line in output.stdout.lines().chain(output.stderr.lines()) {
            let _ = writeln!(self.out, "    {}", line);
        }
    }

    fn run_finished(&mut self, outcome: &RunOutcome) {
        if outcome.is_success() {
            info!("run succeeded");
        } else {
            error!("run {}", outcome);
        }
        let _ = writeln!(self.out, "{}", outcome);
        let _ = self.out.flush();
    }
}
