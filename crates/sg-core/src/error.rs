//! Core error types for shellgate

use std::path::PathBuf;
use thiserror::Error;

/// Identity verification failures; any of these rejects the handshake
#[derive(Error, Debug)]
pub enum AuthError {
    /// The verifier looked at the key and said no
    #[error("Key rejected for {user}: {reason}")]
    Rejected { user: String, reason: String },

    /// No identity is known for this user
    #[error("Unknown user: {0}")]
    UnknownUser(String),

    /// No verifier has been configured
    #[error("No identity verifier configured")]
    NoVerifier,

    /// The verifier could not be reached or answered garbage
    #[error("Identity verifier unavailable: {0}")]
    Unavailable(String),
}

/// Command resolution failures
#[derive(Error, Debug)]
pub enum ResolveError {
    /// The user identifier cannot be used to build a command
    #[error("Invalid user identifier: {0:?}")]
    InvalidUser(String),

    /// The user has no command they are allowed to run
    #[error("No command authorized for {0}")]
    NotAuthorized(String),
}

/// Session-related errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// PTY allocation failed
    #[error("PTY allocation failed: {0}")]
    PtyAllocation(String),

    /// The command could not be started on the PTY
    #[error("Failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// Waiting for the child process failed
    #[error("Failed to wait for child process: {0}")]
    Wait(String),

    /// Session limit exceeded
    #[error("Session limit exceeded ({0})")]
    LimitExceeded(u32),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
