//! MCP Server for catalog retrieval
//!
//! Exposes image, text and combined product search as MCP tools.

mod server;

pub use server::run_mcp_server;
