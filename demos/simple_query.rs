//! One-shot query against a real CLI binary (real CLI only).
//!
//! Usage:
//! - `CLAUDE_AGENT_CORE_DEMO_LIVE=1 cargo run --example simple_query -- "Hello"`
//!
//! Environment:
//! - `CLAUDE_AGENT_CORE_BINARY` (optional): path to the CLI binary.
//! - `CLAUDE_AGENT_CORE_DEMO_LIVE=1`: enable live/auth-required demos.

use std::env;
use std::error::Error;

use claude_agent_core::client::CliInvocation;
use claude_agent_core::message::{ContentBlock, Message};
use claude_agent_core::options::Options;

#[path = "support/real_cli.rs"]
mod real_cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if !real_cli::live_enabled() {
        return real_cli::require_live("simple_query");
    }

    let prompt = collect_prompt()?;
    let invocation = CliInvocation::new(real_cli::resolve_binary())
        .args(["--input-format", "stream-json", "--output-format", "stream-json"]);
    let options = Options::builder().build();

    for message in claude_agent_core::query(invocation, &prompt, options).await? {
        if let Message::Assistant(assistant) = message {
            for block in assistant.content {
                if let ContentBlock::Text { text } = block {
                    println!("{text}");
                }
            }
        }
    }
    Ok(())
}

fn collect_prompt() -> Result<String, Box<dyn Error>> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() {
        return Err("Provide a prompt string".into());
    }
    Ok(args.join(" "))
}
