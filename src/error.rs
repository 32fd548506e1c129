//! Error handling module for rollout
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Every failure class maps to a distinct process exit code so callers (CI jobs,
//! wrapper scripts) can tell a broken definition from a broken deployment.

use thiserror::Error;

use crate::run_state::RunTransitionError;

/// Exit code used when a definition file is malformed or inconsistent
pub const EXIT_DEFINITION: i32 = 2;
/// Exit code used when a template references an unresolved variable
pub const EXIT_MISSING_VARIABLE: i32 = 3;
/// Exit code used when a remote command exits non-zero or times out
pub const EXIT_REMOTE_COMMAND: i32 = 4;
/// Exit code used when the remote host cannot be reached
pub const EXIT_CONNECTION: i32 = 5;
/// Exit code for everything else (I/O, serialization)
pub const EXIT_GENERAL: i32 = 1;

/// Main error type for rollout
#[derive(Error, Debug)]
pub enum RolloutError {
    /// Malformed or inconsistent definitions, detected at load time
    #[error("Definition error: {0}")]
    Definition(String),

    /// A template references a name absent from the resolved variable set
    #[error("Missing variable '{name}' in {context}")]
    MissingVariable { name: String, context: String },

    /// A dispatched command exited non-zero or timed out
    #[error("Task '{task}' failed with exit code {exit_code}: {command}")]
    RemoteCommand {
        task: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// Remote host unreachable or authentication failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Run state machine misuse
    #[error("Run transition error: {0}")]
    Transition(#[from] RunTransitionError),

    /// IO errors (file operations, process spawning)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for rollout operations
pub type Result<T> = std::result::Result<T, RolloutError>;

impl RolloutError {
    /// Create a definition error
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    /// Create a missing variable error
    pub fn missing_variable(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingVariable {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Definition(_) | Self::Json(_) => EXIT_DEFINITION,
            Self::MissingVariable { .. } => EXIT_MISSING_VARIABLE,
            Self::RemoteCommand { .. } => EXIT_REMOTE_COMMAND,
            Self::Connection(_) => EXIT_CONNECTION,
            Self::Transition(_) | Self::Io(_) => EXIT_GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RolloutError::definition("story references unknown task 'build'");
        assert_eq!(
            err.to_string(),
            "Definition error: story references unknown task 'build'"
        );

        let err = RolloutError::missing_variable("commit", "task 'clone_repository'");
        assert_eq!(
            err.to_string(),
            "Missing variable 'commit' in task 'clone_repository'"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RolloutError = io_err.into();
        assert!(matches!(err, RolloutError::Io(_)));
        assert_eq!(err.exit_code(), EXIT_GENERAL);
    }

    #[test]
    fn test_exit_codes_are_distinct_per_class() {
        let codes = [
            RolloutError::definition("x").exit_code(),
            RolloutError::missing_variable("x", "y").exit_code(),
            RolloutError::RemoteCommand {
                task: "migrate".into(),
                command: "php artisan migrate".into(),
                exit_code: 1,
                stderr: String::new(),
            }
            .exit_code(),
            RolloutError::connection("refused").exit_code(),
        ];
        assert_eq!(
            codes,
            [
                EXIT_DEFINITION,
                EXIT_MISSING_VARIABLE,
                EXIT_REMOTE_COMMAND,
                EXIT_CONNECTION
            ]
        );
    }
}
