//! rollout library
//!
//! Declarative remote deployments: a definition file names servers, tasks and
//! a story; a run resolves the release variables once and executes the story
//! task by task over SSH, stopping at the first failing command.

pub mod cli;
pub mod definition;
pub mod error;
pub mod executor;
pub mod process_guard;
pub mod remote;
pub mod reporter;
pub mod resolver;
pub mod run_state;
pub mod template;
pub mod types;

// Re-export main types for convenience
pub use definition::{Definition, EnvironmentConfig, Story, Task, BUILTIN_VARIABLES};
pub use error::{Result, RolloutError};
pub use executor::{Executor, Plan, PlannedTask, RunReport};
pub use process_guard::{ChildRegistry, CommandProcessGroup, ProcessGuard};
pub use remote::{CommandOutput, DryRunRemote, RemoteExecutor, SshRemote, TIMEOUT_EXIT_CODE};
pub use reporter::{ConsoleReporter, RunOutcome, RunReporter};
pub use resolver::{resolve, Release};
pub use run_state::{RunContext, RunState, RunTransitionError};
pub use template::VariableSet;
pub use types::{Environment, Server};
