//! Command templates and the variable set they are rendered against.
//!
//! Templates use `{{ name }}` placeholders (whitespace inside the braces is
//! optional). Rendering is plain textual substitution: values are inserted
//! verbatim, so quoting is the definition author's business, exactly as it
//! would be in a hand-written shell script.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::{Result, RolloutError};

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder_regex() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// Return the variable names referenced by `template`, in order of appearance.
///
/// # Errors
///
/// `Definition` if the template contains a `{{` that does not open a
/// well-formed placeholder.
pub fn placeholders(template: &str) -> Result<Vec<&str>> {
    let re = placeholder_regex();
    let names = re
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();

    let leftover = re.replace_all(template, "");
    if leftover.contains("{{") {
        return Err(RolloutError::definition(format!(
            "malformed placeholder in template: {}",
            template
        )));
    }

    Ok(names)
}

/// Resolved name -> value mapping for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableSet {
    values: BTreeMap<String, String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Look up a value, failing with `MissingVariable` when absent.
    pub fn require(&self, name: &str, context: &str) -> Result<&str> {
        self.get(name)
            .ok_or_else(|| RolloutError::missing_variable(name, context))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Substitute every placeholder in `template`.
    ///
    /// Every referenced name is checked before anything is substituted, so a
    /// missing variable never yields a half-rendered command.
    ///
    /// # Errors
    ///
    /// - `MissingVariable` for the first referenced name absent from the set
    /// - `Definition` for a malformed placeholder
    pub fn render(&self, template: &str, context: &str) -> Result<String> {
        for name in placeholders(template)? {
            self.require(name, context)?;
        }

        let rendered = placeholder_regex().replace_all(template, |caps: &regex::Captures| {
            // Presence was checked above
            self.get(&caps[1]).unwrap_or_default().to_string()
        });

        Ok(rendered.into_owned())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariableSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> VariableSet {
        [
            ("app_dir", "/var/www/app"),
            ("release", "2024_05_01_12_30"),
            ("branch", "main"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_placeholders_in_order() {
        let names = placeholders("ln -nfs {{ app_dir }}/.env {{release}}/.env {{ app_dir }}")
            .unwrap();
        assert_eq!(names, vec!["app_dir", "release", "app_dir"]);
    }

    #[test]
    fn test_placeholders_none() {
        assert!(placeholders("php artisan queue:restart").unwrap().is_empty());
    }

    #[test]
    fn test_placeholders_malformed() {
        let err = placeholders("cd {{ app_dir").unwrap_err();
        assert!(matches!(err, RolloutError::Definition(_)));

        let err = placeholders("echo {{ 1bad }}").unwrap_err();
        assert!(matches!(err, RolloutError::Definition(_)));
    }

    #[test]
    fn test_render_substitutes_all() {
        let out = vars()
            .render("git clone --branch {{ branch }} repo {{app_dir}}/releases/{{ release }}", "test")
            .unwrap();
        assert_eq!(
            out,
            "git clone --branch main repo /var/www/app/releases/2024_05_01_12_30"
        );
    }

    #[test]
    fn test_render_leaves_shell_braces_alone() {
        let out = vars().render("[ -d {{ app_dir }} ] || echo ${HOME}", "test").unwrap();
        assert_eq!(out, "[ -d /var/www/app ] || echo ${HOME}");
    }

    #[test]
    fn test_render_missing_variable() {
        let err = vars()
            .render("git reset --hard {{ commit }}", "task 'clone_repository'")
            .unwrap_err();
        match err {
            RolloutError::MissingVariable { name, context } => {
                assert_eq!(name, "commit");
                assert_eq!(context, "task 'clone_repository'");
            }
            other => panic!("Expected MissingVariable, got {:?}", other),
        }
    }

    #[test]
    fn test_variable_set_iterates_sorted() {
        let vars = vars();
        let names: Vec<&str> = vars.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["app_dir", "branch", "release"]);
    }
}
