#![forbid(unsafe_code)]
//! Duplex control-protocol client for a CLI-based assistant process.
//!
//! Drives an external command-line assistant over newline-delimited
//! JSON on its stdin/stdout: a [`transport::Transport`] owns the child
//! process, a [`control::Controller`] multiplexes the bidirectional
//! control channel, a [`session::Session`] wires host callbacks
//! (permission decisions, hooks, in-process MCP tools) into it, and
//! [`client::Client`] presents the lifecycle callers use. [`query`]
//! offers a one-shot convenience wrapper around the whole stack.
//!
//! CLI binary discovery, argv construction, and settings-file loading
//! are left to callers — this crate starts from an already-resolved
//! [`client::CliInvocation`].

pub mod client;
pub mod control;
pub mod error;
pub mod hooks;
pub mod mcp;
pub mod message;
pub mod options;
pub mod permission;
pub mod query;
pub mod session;
pub mod transport;

pub use client::{Client, CliInvocation, StreamUserMessage};
pub use error::{Error, Result, SharedError};
pub use message::{ContentBlock, Message, UserContent};
pub use options::{Options, OptionsBuilder};
pub use query::query;
pub use session::ServerInfo;
