//! fetchfox-mcp: MCP server exposing FetchFox web extraction jobs as tools
//!
//! This library adapts the FetchFox service to the Model Context Protocol.
//! Each remote-backed tool call submits a FetchFox job, relays the job's
//! progress to the caller while it runs, and returns the job's results as a
//! structured tool result.
//!
//! # Architecture
//!
//! - **Transports**: stdio (one session) or streamable HTTP (many sessions)
//! - **Invocation**: one call's credential, progress relay and teardown
//! - **FetchFox client**: job submission and status polling
//!
//! # Modules
//!
//! - [`config`] - Configuration loading and validation
//! - [`credentials`] - Per-call credential resolution
//! - [`error`] - Error types
//! - [`fetchfox`] - FetchFox job service client
//! - [`invocation`] - Tool invocation lifecycle
//! - [`mcp`] - MCP protocol implementation
//! - [`progress`] - Progress normalisation and heartbeat relay

pub mod config;
pub mod credentials;
pub mod error;
pub mod fetchfox;
pub mod invocation;
pub mod mcp;
pub mod progress;
