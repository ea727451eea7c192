//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_secs, duration_secs_opt};
use crate::error::ConfigError;

/// Placeholder in command arguments replaced by the authenticated user
pub const USER_PLACEHOLDER: &str = "{user}";

/// Configuration for the gateway daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address to bind the SSH server to
    pub bind_address: String,

    /// Path to the server's private host key
    pub host_key_path: PathBuf,

    /// Client authentication
    pub auth: AuthConfig,

    /// Command started for each session
    pub command: CommandConfig,

    /// Session and connection bounds
    pub limits: LimitsConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2200".to_string(),
            host_key_path: PathBuf::from("id_rsa"),
            auth: AuthConfig::default(),
            command: CommandConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Check the configuration for values the gateway cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::MissingField("bind_address".to_string()));
        }
        if self.command.program.trim().is_empty() {
            return Err(ConfigError::MissingField("command.program".to_string()));
        }
        if self.limits.max_sessions == Some(0) || self.limits.max_sessions_per_connection == Some(0)
        {
            return Err(ConfigError::Invalid(
                "session limits must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Client authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Directory of per-user OpenSSH `authorized_keys` files, one per user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_keys_dir: Option<PathBuf>,

    /// Remote identity service that accepts or rejects `(user, key)` pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_url: Option<String>,

    /// Delay before answering a rejected authentication attempt
    #[serde(with = "duration_secs")]
    pub auth_rejection_time: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorized_keys_dir: None,
            verifier_url: None,
            auth_rejection_time: Duration::from_secs(1),
        }
    }
}

/// Command template for sessions
///
/// `{user}` in any argument is replaced by the authenticated user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Executable to run
    pub program: String,

    /// Argument template
    pub args: Vec<String>,

    /// Environment for the child process
    pub env: BTreeMap<String, String>,

    /// Working directory for the child process
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("TERM".to_string(), "xterm-256color".to_string());

        Self {
            program: "kubectl".to_string(),
            args: vec![
                "exec".to_string(),
                "-it".to_string(),
                USER_PLACEHOLDER.to_string(),
                "/bin/bash".to_string(),
            ],
            env,
            cwd: None,
        }
    }
}

/// Bounds on connections and sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum concurrent sessions on one connection
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions_per_connection: Option<u32>,

    /// Maximum concurrent sessions across the whole gateway
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<u32>,

    /// Drop connections with no traffic for this long
    #[serde(
        with = "duration_secs_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub inactivity_timeout: Option<Duration>,

    /// How long teardown waits for the child to exit before killing it
    #[serde(with = "duration_secs")]
    pub teardown_grace: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_connection: None,
            max_sessions: None,
            inactivity_timeout: None,
            teardown_grace: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.bind_address, "0.0.0.0:2200");
        assert_eq!(config.host_key_path, PathBuf::from("id_rsa"));
        assert_eq!(config.command.program, "kubectl");
        assert!(config.command.args.iter().any(|a| a == USER_PLACEHOLDER));
        assert_eq!(config.limits.teardown_grace, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1:2222"

            [command]
            program = "/bin/sh"
            args = []

            [limits]
            inactivity_timeout = 600
            "#,
        )
        .unwrap();

        assert_eq!(config.bind_address, "127.0.0.1:2222");
        assert_eq!(config.command.program, "/bin/sh");
        assert!(config.command.args.is_empty());
        assert_eq!(config.limits.inactivity_timeout, Some(Duration::from_secs(600)));
        assert_eq!(config.limits.teardown_grace, Duration::from_secs(2));
        assert_eq!(config.auth.auth_rejection_time, Duration::from_secs(1));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = GatewayConfig::default();
        config.limits.max_sessions_per_connection = Some(0);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_program() {
        let mut config = GatewayConfig::default();
        config.command.program = "  ".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::MissingField(_))));
    }
}
