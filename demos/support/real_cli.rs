//! Small helper for demos that need a real CLI binary.
//!
//! Conventions:
//! - Demos default to requiring the caller to opt in explicitly, since
//!   they spawn a real subprocess and may need auth/network.
//! - Set `CLAUDE_AGENT_CORE_BINARY` to the path of the CLI binary to
//!   drive; defaults to `claude` resolved from `PATH`.

#![allow(dead_code)]

use std::env;
use std::path::PathBuf;

pub const ENV_BINARY: &str = "CLAUDE_AGENT_CORE_BINARY";
pub const ENV_LIVE: &str = "CLAUDE_AGENT_CORE_DEMO_LIVE";

pub fn live_enabled() -> bool {
    matches!(env::var(ENV_LIVE).ok().as_deref(), Some("1") | Some("true"))
}

pub fn resolve_binary() -> PathBuf {
    env::var_os(ENV_BINARY).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("claude"))
}

pub fn require_live(demo: &str) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!(
        "Set {ENV_LIVE}=1 (and optionally {ENV_BINARY}) to run the `{demo}` demo against a real CLI."
    );
    Ok(())
}
