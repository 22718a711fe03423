//! RMCP: an MCP server for statistical analysis.
//!
//! The binary wires the crates together: configuration, logging, the worker
//! bridge, the VFS policy, and the tool/resource/prompt catalog, then hands
//! the assembled [`rmcp_server::McpServer`] to one of the transports.

pub mod catalog;
