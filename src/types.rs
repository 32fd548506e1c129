//! Core value types shared by the loader, resolver and executor.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::{Display, EnumIter, EnumString};

/// Deployment target class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[derive(Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Environment {
    #[default]
    Staging,
    Production,
}

impl Environment {
    /// Branch deployed when the definition does not pin one
    pub const fn default_branch(self) -> &'static str {
        match self {
            Self::Production => "main",
            Self::Staging => "staging",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Production => "production",
            Self::Staging => "staging",
        }
    }
}

/// SSH connection target for a server alias.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// `user@host` or a bare host
    pub target: String,

    /// Non-default SSH port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Private key passed to `ssh -i`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl Server {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            port: None,
            identity: None,
        }
    }

    /// Host part of the target (without the `user@` prefix)
    pub fn host(&self) -> &str {
        self.target
            .rsplit_once('@')
            .map(|(_, host)| host)
            .unwrap_or(&self.target)
    }

    /// User part of the target, if one was given
    pub fn user(&self) -> Option<&str> {
        self.target.rsplit_once('@').map(|(user, _)| user)
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) => write!(f, "{}:{}", self.target, port),
            None => write!(f, "{}", self.target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_environment_parse_and_display() {
        assert_eq!(Environment::from_str("production").unwrap(), Environment::Production);
        assert_eq!(Environment::from_str("staging").unwrap(), Environment::Staging);
        assert!(Environment::from_str("qa").is_err());

        for env in Environment::iter() {
            assert_eq!(env.to_string(), env.as_str());
        }
    }

    #[test]
    fn test_environment_default_is_staging() {
        assert_eq!(Environment::default(), Environment::Staging);
    }

    #[test]
    fn test_default_branches() {
        assert_eq!(Environment::Production.default_branch(), "main");
        assert_eq!(Environment::Staging.default_branch(), "staging");
    }

    #[test]
    fn test_environment_serde_lowercase() {
        let json = serde_json::to_string(&Environment::Production).unwrap();
        assert_eq!(json, "\"production\"");
        let env: Environment = serde_json::from_str("\"staging\"").unwrap();
        assert_eq!(env, Environment::Staging);
    }

    #[test]
    fn test_server_user_and_host() {
        let server = Server::new("dev@144.126.254.193");
        assert_eq!(server.user(), Some("dev"));
        assert_eq!(server.host(), "144.126.254.193");

        let bare = Server::new("app.example.com");
        assert_eq!(bare.user(), None);
        assert_eq!(bare.host(), "app.example.com");
    }

    #[test]
    fn test_server_display_with_port() {
        let mut server = Server::new("dev@app.example.com");
        assert_eq!(server.to_string(), "dev@app.example.com");
        server.port = Some(2222);
        assert_eq!(server.to_string(), "dev@app.example.com:2222");
    }
}
