//! Transport layer: line-delimited stdio and HTTP+SSE.
//!
//! Both transports speak to the same [`crate::McpServer`]; they differ only
//! in framing, session handling and how out-of-band traffic reaches the
//! client (stdout requests + stderr logs for stdio, an SSE channel for
//! HTTP).

pub mod http;
pub mod stdio;

pub use http::{serve_http, HttpTransport};
pub use stdio::StdioTransport;
