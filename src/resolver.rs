//! Variable Resolver
//!
//! Turns an environment selection, the definition's environment table and an
//! optional commit into the full [`VariableSet`] for one run.
//!
//! # Resolution Rules
//!
//! | Variable          | Source |
//! |-------------------|--------|
//! | `env`             | selected environment |
//! | `repository`      | environment table |
//! | `branch`          | environment table, else `main` (production) / `staging` |
//! | `app_dir`         | environment table, trailing `/` trimmed |
//! | `release`         | run start time, `YYYY_MM_DD_HH_mm` |
//! | `releases_dir`    | `app_dir + "/releases"` |
//! | `new_release_dir` | `releases_dir + "/" + release` |
//! | `commit`          | operator input, else `HEAD` |
//!
//! Resolution is pure: the clock is read once into a [`Release`] by the
//! caller, and every derived path comes from that one value.

use chrono::{DateTime, Local, TimeZone};
use std::fmt;

use crate::definition::EnvironmentConfig;
use crate::template::VariableSet;
use crate::types::Environment;

/// `chrono` format of a release directory name
pub const RELEASE_FORMAT: &str = "%Y_%m_%d_%H_%M";

/// Commit checked out when the operator does not pin one
pub const DEFAULT_COMMIT: &str = "HEAD";

/// Release stamp captured once per run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Release(String);

impl Release {
    /// Stamp the current local time
    pub fn capture() -> Self {
        Self::at(&Local::now())
    }

    /// Stamp an explicit point in time
    pub fn at<Tz: TimeZone>(time: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self(time.format(RELEASE_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the variable set for one run.
pub fn resolve(
    env: Environment,
    config: &EnvironmentConfig,
    release: &Release,
    commit: Option<&str>,
) -> VariableSet {
    let app_dir = config.app_dir.trim_end_matches('/');
    let app_dir = if app_dir.is_empty() { "/" } else { app_dir };
    let releases_dir = format!("{}/releases", app_dir.trim_end_matches('/'));
    let new_release_dir = format!("{}/{}", releases_dir, release);
    let branch = config
        .branch
        .clone()
        .unwrap_or_else(|| env.default_branch().to_string());
    let commit = commit
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_COMMIT);

    let mut vars = VariableSet::new();
    for (name, value) in &config.variables {
        vars.insert(name.as_str(), value.as_str());
    }
    vars.insert("env", env.as_str());
    vars.insert("repository", config.repository.as_str());
    vars.insert("branch", branch);
    vars.insert("app_dir", app_dir);
    vars.insert("release", release.as_str());
    vars.insert("releases_dir", releases_dir);
    vars.insert("new_release_dir", new_release_dir);
    vars.insert("commit", commit);
    vars
}
