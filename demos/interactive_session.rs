//! A persistent session with a permission callback and a `PreToolUse`
//! hook wired up, streaming two turns of input (real CLI only).
//!
//! Usage:
//! - `CLAUDE_AGENT_CORE_DEMO_LIVE=1 cargo run --example interactive_session`
//!
//! Environment:
//! - `CLAUDE_AGENT_CORE_BINARY` (optional): path to the CLI binary.
//! - `CLAUDE_AGENT_CORE_DEMO_LIVE=1`: enable live/auth-required demos.

use std::error::Error;

use claude_agent_core::client::{Client, CliInvocation};
use claude_agent_core::hooks::{self, HookEvent, HookOutput, HookRegistry, Matcher};
use claude_agent_core::message::Message;
use claude_agent_core::options::Options;
use claude_agent_core::permission::{self, PermissionDecision};

#[path = "support/real_cli.rs"]
mod real_cli;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    if !real_cli::live_enabled() {
        return real_cli::require_live("interactive_session");
    }

    let mut hooks = HookRegistry::new();
    hooks.register(
        HookEvent::PreToolUse,
        Matcher::new(vec![hooks::callback(|input, _cancel| async move {
            eprintln!("about to run {:?}", input.tool_name);
            Ok(HookOutput::default())
        })])
        .with_tool_filter("Bash"),
    );

    let permission_callback = permission::callback(|ctx| async move {
        if ctx.tool_name == "Write" {
            PermissionDecision::deny("this demo runs read-only")
        } else {
            PermissionDecision::allow()
        }
    });

    let options = Options::builder()
        .hooks(hooks)
        .permission_callback(permission_callback)
        .build();

    let client = Client::new(options);
    let invocation = CliInvocation::new(real_cli::resolve_binary())
        .args(["--input-format", "stream-json", "--output-format", "stream-json"]);
    client.start(invocation).await?;

    client.query("List the files in this directory.", None).await?;
    for message in client.receive_response().await {
        print_message(message?);
    }

    client.query("Now summarize what you found.", None).await?;
    for message in client.receive_response().await {
        print_message(message?);
    }

    client.close().await?;
    Ok(())
}

fn print_message(message: Message) {
    match message {
        Message::Assistant(a) => println!("{a:?}"),
        Message::Result(r) => println!("turn finished: {}", r.subtype),
        _ => {}
    }
}
