//! Error types for fetchfox-mcp.
//!
//! # Security Note
//!
//! Error messages are carefully crafted to NEVER include credentials.
//! Variants that relate to authentication describe what is missing, never
//! the value that was (or was not) supplied.

use std::path::PathBuf;

use thiserror::Error;

use crate::fetchfox::{Operation, RemoteError};

/// Where a caller is told to find their API key.
pub const API_KEY_HELP: &str = "API key is required. Find your API key at \
     https://fetchfox.ai/dashboard, and include it as a bearer token or in the \
     FETCHFOX_API_KEY environment variable.";

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

/// No credential could be resolved for a call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Neither a bearer token nor a default credential is available.
    #[error("credential required")]
    CredentialRequired,
}

/// Errors produced by a single tool invocation.
///
/// Every variant is scoped to the call that raised it; none of them
/// terminates the server.
#[derive(Error, Debug)]
pub enum ToolError {
    /// The caller could not be authenticated.
    #[error("{}", API_KEY_HELP)]
    Auth(#[from] AuthError),

    /// The remote service did not accept the job.
    #[error("FetchFox {operation} failed to start: {source}")]
    Submission {
        /// Operation that was being submitted.
        operation: Operation,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },

    /// The remote job started but did not finish successfully.
    #[error("FetchFox {operation} failed: {source}")]
    JobFailed {
        /// Operation the job was running.
        operation: Operation,
        /// Underlying remote error.
        #[source]
        source: RemoteError,
    },

    /// Tool arguments did not match the tool's input schema.
    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// Description of what's wrong.
        message: String,
    },

    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

impl ToolError {
    /// Returns `true` if this error is an authentication failure.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}
