//! Deployment definition files.
//!
//! A definition names the servers, the per-environment variable table, the
//! tasks (ordered command templates) and the story (ordered task names) of one
//! deployment flow. Definitions are JSON documents:
//!
//! ```json
//! {
//!   "servers": { "web": { "target": "dev@app.example.com" } },
//!   "environments": {
//!     "production": {
//!       "server": "web",
//!       "repository": "git@github.com:account/repo.git",
//!       "app_dir": "/var/www/app"
//!     }
//!   },
//!   "tasks": [
//!     { "name": "restart_queues", "working_dir": "{{ new_release_dir }}",
//!       "commands": ["php artisan queue:restart"] }
//!   ],
//!   "story": { "name": "deploy", "tasks": ["restart_queues"] }
//! }
//! ```
//!
//! Loading always validates, so a `Definition` obtained from
//! [`Definition::from_json`] or [`Definition::load_from_file`] is internally
//! consistent: every story entry names a declared task and every placeholder
//! names a variable the resolver will provide.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::debug;

use crate::error::{Result, RolloutError};
use crate::template::placeholders;
use crate::types::{Environment, Server};

/// Variables the resolver always provides
pub const BUILTIN_VARIABLES: &[&str] = &[
    "env",
    "repository",
    "branch",
    "app_dir",
    "release",
    "releases_dir",
    "new_release_dir",
    "commit",
];

/// Per-environment settings, selected once when a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    /// Alias into `servers`
    pub server: String,

    /// Repository URL to clone from
    pub repository: String,

    /// Base application directory on the host
    pub app_dir: String,

    /// Branch override; defaults to `main` on production, `staging` otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Extra static variables available to templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
}

/// A named, ordered list of shell command templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub name: String,

    /// Status line printed when the task starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Directory the task's first command runs in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    pub commands: Vec<String>,

    /// Operator may leave this task out of a run with `--skip`
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

impl Task {
    /// Every template carried by this task (message, working dir, commands)
    fn templates(&self) -> impl Iterator<Item = &str> {
        self.message
            .iter()
            .chain(self.working_dir.iter())
            .chain(self.commands.iter())
            .map(String::as_str)
    }
}

/// A named, ordered list of task names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Story {
    pub name: String,
    pub tasks: Vec<String>,
}

/// A complete deployment definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub servers: BTreeMap<String, Server>,

    /// Keyed by environment name (`staging`, `production`)
    pub environments: BTreeMap<String, EnvironmentConfig>,

    pub tasks: Vec<Task>,

    pub story: Story,

    /// Default per-command timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl Definition {
    /// Parse and validate a definition from JSON text
    pub fn from_json(content: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(content)
            .map_err(|e| RolloutError::definition(format!("invalid definition JSON: {}", e)))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Load and validate a definition file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Loading definition from {:?}", path.as_ref());
        let content = fs::read_to_string(&path)?;
        Self::from_json(&content)
    }

    /// Serialize for display or audit
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the definition as pretty JSON
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// `Definition` describing the first inconsistency found.
    pub fn validate(&self) -> Result<()> {
        for (alias, server) in &self.servers {
            if server.target.trim().is_empty() {
                return Err(RolloutError::definition(format!(
                    "server '{}' has an empty target",
                    alias
                )));
            }
        }

        if self.environments.is_empty() {
            return Err(RolloutError::definition("no environments configured"));
        }

        if self.timeout_secs == Some(0) {
            return Err(RolloutError::definition("timeout_secs must be at least 1"));
        }

        for (name, config) in &self.environments {
            Environment::from_str(name).map_err(|_| {
                RolloutError::definition(format!(
                    "unknown environment '{}' (expected staging or production)",
                    name
                ))
            })?;

            if !self.servers.contains_key(&config.server) {
                return Err(RolloutError::definition(format!(
                    "environment '{}' references undefined server '{}'",
                    name, config.server
                )));
            }
            if config.repository.trim().is_empty() {
                return Err(RolloutError::definition(format!(
                    "environment '{}' has an empty repository",
                    name
                )));
            }
            if config.app_dir.trim().is_empty() {
                return Err(RolloutError::definition(format!(
                    "environment '{}' has an empty app_dir",
                    name
                )));
            }
            if let Some(shadowed) = config
                .variables
                .keys()
                .find(|key| BUILTIN_VARIABLES.contains(&key.as_str()))
            {
                return Err(RolloutError::definition(format!(
                    "environment '{}' redefines built-in variable '{}'",
                    name, shadowed
                )));
            }
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.name.trim().is_empty() {
                return Err(RolloutError::definition("task with an empty name"));
            }
            if !seen.insert(task.name.as_str()) {
                return Err(RolloutError::definition(format!(
                    "task '{}' is declared more than once",
                    task.name
                )));
            }
            if task.commands.is_empty() {
                return Err(RolloutError::definition(format!(
                    "task '{}' has no commands",
                    task.name
                )));
            }
            for template in task.templates() {
                for name in placeholders(template)? {
                    if !self.declares_variable(name) {
                        return Err(RolloutError::definition(format!(
                            "task '{}' references undeclared variable '{}'",
                            task.name, name
                        )));
                    }
                }
            }
        }

        if self.story.tasks.is_empty() {
            return Err(RolloutError::definition(format!(
                "story '{}' has no tasks",
                self.story.name
            )));
        }
        for name in &self.story.tasks {
            if self.task(name).is_none() {
                return Err(RolloutError::definition(format!(
                    "story '{}' references undefined task '{}'",
                    self.story.name, name
                )));
            }
        }

        Ok(())
    }

    /// A name is declared when it is built in or every environment defines it
    fn declares_variable(&self, name: &str) -> bool {
        BUILTIN_VARIABLES.contains(&name)
            || self
                .environments
                .values()
                .all(|config| config.variables.contains_key(name))
    }

    pub fn task(&self, name: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.name == name)
    }

    /// Tasks of the story, in story order
    pub fn story_tasks(&self) -> Result<Vec<&Task>> {
        self.story
            .tasks
            .iter()
            .map(|name| {
                self.task(name).ok_or_else(|| {
                    RolloutError::definition(format!(
                        "story '{}' references undefined task '{}'",
                        self.story.name, name
                    ))
                })
            })
            .collect()
    }

    /// Settings for `env`
    pub fn environment(&self, env: Environment) -> Result<&EnvironmentConfig> {
        self.environments.get(env.as_str()).ok_or_else(|| {
            RolloutError::definition(format!("environment '{}' is not configured", env))
        })
    }

    /// Connection target the story runs on for `env`
    pub fn server_for(&self, env: Environment) -> Result<&Server> {
        let config = self.environment(env)?;
        self.servers.get(&config.server).ok_or_else(|| {
            RolloutError::definition(format!(
                "environment '{}' references undefined server '{}'",
                env, config.server
            ))
        })
    }
}
