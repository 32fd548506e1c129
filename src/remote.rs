//! Remote execution channel.
//!
//! The executor only talks to a [`RemoteExecutor`]: "run this command in this
//! directory, within this time". [`SshRemote`] implements it with the system
//! `ssh` client; [`DryRunRemote`] echoes what would be dispatched and reports
//! success without touching the host.
//!
//! Every command carries its working directory explicitly and runs in a fresh
//! `sh`, so no shell state survives from one command to the next.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, RolloutError};
use crate::process_guard::{terminate_group, with_registry, CommandProcessGroup};
use crate::types::Server;

/// Exit code reported for a command killed by its timeout (`timeout(1)` convention)
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Exit code reported for a command terminated by a signal
pub const SIGNAL_EXIT_CODE: i32 = -1;

/// `ssh` exits 255 when the connection itself fails
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Grace period between SIGTERM and SIGKILL for a timed-out command
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Result of one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Killed after exceeding its timeout
    pub timed_out: bool,
}

impl CommandOutput {
    /// Successful output with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            timed_out: false,
        }
    }

    /// Failed output with the given exit code and stderr
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            timed_out: false,
        }
    }

    /// Output of a command that ran out of time
    pub fn timed_out() -> Self {
        Self {
            exit_code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }
}

/// An authenticated remote-command capability for one server.
pub trait RemoteExecutor {
    /// Verify the host is reachable before any task runs.
    ///
    /// # Errors
    ///
    /// `Connection` when the host cannot be reached or refuses us.
    fn check_connection(&mut self) -> Result<()>;

    /// Run `command` in `working_dir` (login directory when `None`).
    ///
    /// A command that runs but exits non-zero (or times out) is `Ok` with a
    /// failing [`CommandOutput`]; `Err` is reserved for transport failures.
    fn run(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput>;
}

/// Quote a value for safe use as a single POSIX shell word
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// The script a command becomes once its working directory is attached
pub fn remote_script(command: &str, working_dir: Option<&str>) -> String {
    let Some(dir) = working_dir else {
        return command.to_string();
    };
    format!("cd {} && {}", quote_dir(dir), command)
}

/// Quote a directory, leaving a leading `~` or `~user` bare so it still expands
fn quote_dir(dir: &str) -> String {
    let Some(rest) = dir.strip_prefix('~') else {
        return shell_quote(dir);
    };
    let (user, path) = rest.split_once('/').unwrap_or((rest, ""));
    let plain_user = user
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if !plain_user {
        return shell_quote(dir);
    }
    if path.is_empty() {
        format!("~{}", user)
    } else {
        format!("~{}/{}", user, shell_quote(path))
    }
}

/// Runs commands on a host with the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshRemote {
    server: Server,
    connect_timeout: Duration,
    program: PathBuf,
}

impl SshRemote {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            connect_timeout: Duration::from_secs(10),
            program: PathBuf::from("ssh"),
        }
    }

    /// Use another `ssh`-compatible client binary
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    /// Arguments passed to `ssh` for one remote script
    pub fn ssh_args(&self, script: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.server.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(ref identity) = self.server.identity {
            args.push("-i".to_string());
            args.push(identity.clone());
        }
        args.push(self.server.target.clone());
        args.push("--".to_string());
        // The login shell may not be POSIX; always hand the script to sh
        args.push(format!("sh -c {}", shell_quote(script)));
        args
    }

    fn spawn_ssh(&self, script: &str, timeout: Duration) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.ssh_args(script));

        run_process(&mut cmd, timeout).map_err(|e| {
            RolloutError::connection(format!("failed to start ssh for {}: {}", self.server, e))
        })
    }
}

impl RemoteExecutor for SshRemote {
    fn check_connection(&mut self) -> Result<()> {
        debug!("Checking connection to {}", self.server);
        let output = self.spawn_ssh("true", self.connect_timeout + Duration::from_secs(5))?;
        if output.success() {
            info!("Connected to {}", self.server);
            Ok(())
        } else if output.exit_code == SSH_CONNECTION_FAILURE {
            let reason = output.stderr.trim();
            Err(RolloutError::connection(if reason.is_empty() {
                format!("{}: ssh exited with {}", self.server, SSH_CONNECTION_FAILURE)
            } else {
                format!("{}: {}", self.server, reason)
            }))
        } else if output.timed_out {
            Err(RolloutError::connection(format!(
                "{}: timed out while connecting",
                self.server
            )))
        } else {
            Err(RolloutError::connection(format!(
                "{}: connection check exited with {}: {}",
                self.server,
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }

    fn run(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let script = remote_script(command, working_dir);
        debug!(server = %self.server, script = %script, "dispatching");
        let output = self.spawn_ssh(&script, timeout)?;

        // ssh and the remote command share exit code 255; only a failed
        // reconnect makes it a transport error
        if output.exit_code == SSH_CONNECTION_FAILURE {
            warn!("Command exited with {}, rechecking connection", SSH_CONNECTION_FAILURE);
            self.check_connection()?;
        }
        Ok(output)
    }
}

/// Echoes every remote script as its output and reports success without
/// contacting the host.
#[derive(Debug, Default)]
pub struct DryRunRemote {
    dispatched: Vec<(String, Option<String>)>,
}

impl DryRunRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands "dispatched" so far, with their working directories
    pub fn dispatched(&self) -> &[(String, Option<String>)] {
        &self.dispatched
    }
}

impl RemoteExecutor for DryRunRemote {
    fn check_connection(&mut self) -> Result<()> {
        info!("[DRY RUN] Skipping connection check");
        Ok(())
    }

    fn run(
        &mut self,
        command: &str,
        working_dir: Option<&str>,
        _timeout: Duration,
    ) -> Result<CommandOutput> {
        let script = remote_script(command, working_dir);
        info!("[DRY RUN] {}", script);
        self.dispatched
            .push((command.to_string(), working_dir.map(str::to_string)));
        Ok(CommandOutput::ok(format!("[dry-run] {}", script)))
    }
}

/// Spawn `cmd` in its own process group and wait for it, killing the group
/// when `timeout` elapses.
pub(crate) fn run_process(cmd: &mut Command, timeout: Duration) -> std::io::Result<CommandOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .in_new_process_group()
        .spawn()?;
    let pid = child.id();
    with_registry(|registry| registry.register(pid));

    // Drain pipes on helper threads so a chatty command cannot block on a
    // full pipe while we poll for exit
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = wait_with_deadline(&mut child, pid, timeout);
    with_registry(|registry| registry.unregister(pid));
    let status = waited?;

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    Ok(match status {
        Some(status) => CommandOutput {
            exit_code: status.code().unwrap_or(SIGNAL_EXIT_CODE),
            stdout,
            stderr,
            timed_out: false,
        },
        None => CommandOutput {
            stdout,
            stderr,
            ..CommandOutput::timed_out()
        },
    })
}

/// `Some(status)` on exit, `None` when the deadline passed and the group was killed
fn wait_with_deadline(
    child: &mut Child,
    pid: u32,
    timeout: Duration,
) -> std::io::Result<Option<std::process::ExitStatus>> {
    // A timeout too large to represent never expires
    let deadline = Instant::now().checked_add(timeout);
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            warn!("Command exceeded {:?}, terminating process group {}", timeout, pid);
            terminate_group(pid, KILL_GRACE);
            child.wait()?;
            return Ok(None);
        }
        thread::sleep(Duration::from_millis(20));
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
