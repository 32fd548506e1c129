//! Process lifecycle management for `ssh` child processes
//!
//! A remote command runs for as long as its local `ssh` client is alive. If the
//! orchestrator is interrupted, or a command overruns its timeout, the client
//! has to go too, otherwise a migration or symlink swap keeps running on the
//! host after the run has been reported as failed.
//!
//! - Children are spawned in their own process group
//! - Child PIDs are tracked in a global registry
//! - On SIGINT/SIGTERM/SIGHUP every registered group gets SIGTERM, then SIGKILL
//!   after a grace period
//! - A timed-out command's group is terminated the same way

use nix::libc;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

static CHILD_REGISTRY: OnceLock<Arc<Mutex<ChildRegistry>>> = OnceLock::new();

/// Registry tracking all spawned child processes
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: HashSet<u32>,
    /// Prevents double cleanup when a signal arrives during Drop
    cleanup_initiated: bool,
}

impl ChildRegistry {
    /// Get or create the global child registry
    pub fn global() -> Arc<Mutex<ChildRegistry>> {
        CHILD_REGISTRY
            .get_or_init(|| Arc::new(Mutex::new(ChildRegistry::default())))
            .clone()
    }

    pub fn register(&mut self, pid: u32) {
        self.pids.insert(pid);
        debug!("Registered child process PID {}", pid);
    }

    pub fn unregister(&mut self, pid: u32) {
        self.pids.remove(&pid);
        debug!("Unregistered child process PID {}", pid);
    }

    pub fn count(&self) -> usize {
        self.pids.len()
    }

    /// Terminate all tracked child process groups
    pub fn terminate_all(&mut self, grace_period: Duration) {
        if self.cleanup_initiated {
            debug!("Cleanup already initiated, skipping");
            return;
        }
        self.cleanup_initiated = true;

        if self.pids.is_empty() {
            debug!("No child processes to terminate");
            return;
        }

        info!("Terminating {} child process(es)...", self.pids.len());
        for pid in self.pids.drain() {
            terminate_group(pid, grace_period);
        }
        info!("Child process cleanup complete");
    }
}

/// Helper for registry access; a poisoned lock still holds a usable set
pub fn with_registry<T>(f: impl FnOnce(&mut ChildRegistry) -> T) -> T {
    let registry = ChildRegistry::global();
    let mut guard = registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    f(&mut guard)
}

/// SIGTERM the process group led by `pgid`, SIGKILL it if still alive after
/// `grace_period`
pub fn terminate_group(pgid: u32, grace_period: Duration) {
    if let Err(e) = send_signal_to_group(pgid, Signal::SIGTERM) {
        warn!("Failed to send SIGTERM to process group {}: {}", pgid, e);
        if let Err(e2) = send_signal(pgid, Signal::SIGTERM) {
            warn!("Failed to send SIGTERM to PID {}: {}", pgid, e2);
        }
    } else {
        debug!("Sent SIGTERM to process group {}", pgid);
    }

    let start = Instant::now();
    while start.elapsed() < grace_period {
        if !is_process_alive(pgid) {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    if is_process_alive(pgid) {
        warn!("Process group {} did not terminate, sending SIGKILL", pgid);
        if let Err(e) = send_signal_to_group(pgid, Signal::SIGKILL) {
            error!("Failed to send SIGKILL to process group {}: {}", pgid, e);
            let _ = send_signal(pgid, Signal::SIGKILL);
        }
    }
}

fn send_signal(pid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(pid as i32), signal)
}

/// Negative PID signals every process in the group
fn send_signal_to_group(pgid: u32, signal: Signal) -> Result<(), nix::Error> {
    signal::kill(Pid::from_raw(-(pgid as i32)), signal)
}

/// Check if a process is still alive (not dead or zombie)
fn is_process_alive(pid: u32) -> bool {
    if signal::kill(Pid::from_raw(pid as i32), None).is_err() {
        return false;
    }

    // Field 3 of /proc/pid/stat is the state; Z and X are not running
    if let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        let fields: Vec<&str> = stat.split_whitespace().collect();
        if fields.len() > 2 {
            return !matches!(fields[2], "Z" | "X");
        }
    }

    true
}

/// RAII guard that terminates all registered children on drop
pub struct ProcessGuard {
    registry: Arc<Mutex<ChildRegistry>>,
}

impl ProcessGuard {
    pub fn new() -> Self {
        Self {
            registry: ChildRegistry::global(),
        }
    }

    pub fn child_count(&self) -> usize {
        self.registry.lock().map(|r| r.count()).unwrap_or(0)
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        debug!("ProcessGuard dropped, initiating cleanup");
        if let Ok(mut registry) = self.registry.lock() {
            registry.terminate_all(Duration::from_secs(5));
        }
    }
}

/// Install SIGINT/SIGTERM/SIGHUP handlers that clean up children and exit
/// with 128 + signal. Call once at program start.
pub fn init_signal_handlers() -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        for sig in signals.forever() {
            let signal_name = match sig {
                SIGINT => "SIGINT",
                SIGTERM => "SIGTERM",
                SIGHUP => "SIGHUP",
                _ => "UNKNOWN",
            };

            warn!("Received {}, aborting run", signal_name);
            with_registry(|registry| registry.terminate_all(Duration::from_secs(3)));
            std::process::exit(128 + sig);
        }
    });

    Ok(())
}

/// Extension trait for std::process::Command to set up process groups
pub trait CommandProcessGroup {
    /// Run the command as leader of a new process group that dies with us
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use std::os::unix::process::CommandExt;
        // SAFETY: only async-signal-safe calls between fork and exec
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;

                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }

                Ok(())
            });
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::default();

        registry.register(1234);
        registry.register(5678);
        assert_eq!(registry.count(), 2);

        registry.unregister(1234);
        assert_eq!(registry.count(), 1);

        registry.unregister(5678);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_terminate_all_is_idempotent() {
        let mut registry = ChildRegistry::default();
        registry.terminate_all(Duration::from_millis(10));
        registry.terminate_all(Duration::from_millis(10));
        assert!(registry.cleanup_initiated);
    }

    #[test]
    fn test_terminate_group_kills_real_process() {
        let mut child = Command::new("sleep")
            .arg("30")
            .in_new_process_group()
            .spawn()
            .expect("Failed to spawn sleep");
        let pid = child.id();

        terminate_group(pid, Duration::from_secs(2));

        let status = child.wait().expect("Failed to reap child");
        assert!(!status.success());
    }

    #[test]
    fn test_is_process_alive_nonexistent() {
        // PID near the kernel's max is effectively never in use
        assert!(!is_process_alive(4_194_000));
    }
}
