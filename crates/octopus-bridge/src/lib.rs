//! Octopus bridge: an MCP tool surface over the Diaspora event fabric.
//!
//! Each tool call is parsed into a [`ToolCall`], admitted by the
//! [`AccessGate`] against the current identity session, and served by
//! [`FabricBridge`]. The login lifecycle tools are always admitted; topic
//! management needs a login, and producing or consuming needs a rotated
//! access key as well.

#![deny(unsafe_code)]

pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod gate;
pub mod mcp;
pub mod server;
pub mod tools;

pub use api::{create_router, AppState, HealthCheckResponse};
pub use bridge::{message_json, FabricBridge, ToolOutput};
pub use config::{BackendConfig, BridgeConfig};
pub use error::{BridgeError, DaemonError, DaemonResult, PreconditionError, ToolError};
pub use gate::{AccessGate, AccessLevel, Precondition};
pub use mcp::{JsonRpcRequest, JsonRpcResponse, McpServer, McpToolResult};
pub use server::Server;
pub use tools::{tool_definitions, ToolCall, ToolName, MAX_CONSUME_TIMEOUT_S};
