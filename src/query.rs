//! One-shot `query()`: construct a [`Client`], drive it to completion,
//! and tear it down (spec §4.5, "One-shot Query" component).

use tokio::sync::mpsc;

use crate::client::{Client, CliInvocation, StreamUserMessage};
use crate::error::Result;
use crate::message::Message;
use crate::options::Options;

/// Build a one-element streaming-message channel carrying `prompt`.
pub fn single_message(prompt: impl Into<String>) -> mpsc::Receiver<StreamUserMessage> {
    let (tx, rx) = mpsc::channel(1);
    let message = StreamUserMessage {
        content: prompt.into(),
        parent_tool_use_id: None,
        session_id: None,
    };
    // Buffered with capacity 1, so this send never blocks.
    let _ = tx.try_send(message);
    rx
}

/// Build a streaming-message channel from an owned slice of prompts,
/// preserving order.
pub fn messages_from_slice(prompts: Vec<String>) -> mpsc::Receiver<StreamUserMessage> {
    let (tx, rx) = mpsc::channel(prompts.len().max(1));
    for prompt in prompts {
        let _ = tx.try_send(StreamUserMessage {
            content: prompt,
            parent_tool_use_id: None,
            session_id: None,
        });
    }
    rx
}

/// Pass an existing channel through unchanged; named for symmetry with
/// [`single_message`] and [`messages_from_slice`].
pub fn messages_from_channel(
    channel: mpsc::Receiver<StreamUserMessage>,
) -> mpsc::Receiver<StreamUserMessage> {
    channel
}

/// Construct a [`Client`], start it in streaming mode with a single
/// prompt, collect parsed messages up to and including the terminal
/// `result`, then close the client.
pub async fn query(invocation: CliInvocation, prompt: &str, options: Options) -> Result<Vec<Message>> {
    let client = Client::new(options);
    client.start_with_stream(invocation, single_message(prompt)).await?;

    let mut out = Vec::new();
    for item in client.receive_response().await {
        out.push(item?);
    }
    client.close().await?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn single_message_yields_exactly_one_item() {
        let mut rx = single_message("hello");
        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.content, "hello");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn messages_from_slice_preserves_order() {
        let mut rx = messages_from_slice(vec!["a".into(), "b".into()]);
        assert_eq!(rx.recv().await.unwrap().content, "a");
        assert_eq!(rx.recv().await.unwrap().content, "b");
    }
}
