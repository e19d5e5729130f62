//! Model Context Protocol (MCP) server implementation.
//!
//! This module implements the Model Context Protocol for exposing FetchFox jobs
//! as tools to AI assistants. The server speaks JSON-RPC 2.0 over stdio or
//! over streamable HTTP.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Server                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐     │
//! │   │  Transport  │───▶│   Session   │───▶│   Tools     │     │
//! │   │(stdio/http) │    │ (lifecycle) │    │ (handlers)  │     │
//! │   └─────────────┘    └─────────────┘    └─────────────┘     │
//! │          ▲                  │                  │            │
//! │          │                  ▼                  ▼            │
//! │   ┌─────────────────────────────────────────────────┐       │
//! │   │      Outgoing channel (replies, progress)       │       │
//! │   └─────────────────────────────────────────────────┘       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2025-06-18 and accepts
//! 2025-03-26 and 2024-11-05.

pub mod http;
pub mod params;
pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{McpServer, Session};
pub use transport::{StdioTransport, StdioWriter};
