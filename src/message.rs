//! Message parser: turns one decoded JSON line from the CLI into a typed
//! [`Message`] (spec §4.2).
//!
//! Parsing here is intentionally permissive on optional keys — only the
//! fields each variant's contract requires are validated, everything
//! else is ignored. Unknown top-level `type` values are not treated as
//! errors by [`parse_message`]'s caller contract: they come back as
//! `Err(Error::UnknownMessageType)`, which every message iterator in
//! this crate treats as a skip-and-continue signal, never a fatal one.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A single piece of conversational content.
///
/// Forward-compatible by construction: a block whose `type` this crate
/// does not recognize degrades to a [`ContentBlock::Text`] rather than
/// failing to parse, since the CLI is expected to introduce new block
/// kinds faster than this crate can be revised.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Thinking {
        text: String,
        signature: Option<String>,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
}

impl ContentBlock {
    fn parse(value: &Value) -> Result<ContentBlock> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::message_parse("content block is not an object", value.clone()))?;
        let kind = obj.get("type").and_then(Value::as_str).unwrap_or("");
        match kind {
            "text" => Ok(ContentBlock::Text {
                text: obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            }),
            "thinking" => Ok(ContentBlock::Thinking {
                text: obj
                    .get("thinking")
                    .or_else(|| obj.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                signature: obj
                    .get("signature")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string()),
            }),
            "tool_use" => Ok(ContentBlock::ToolUse {
                id: obj
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: obj.get("input").cloned().unwrap_or(Value::Null),
            }),
            "tool_result" => Ok(ContentBlock::ToolResult {
                tool_use_id: obj
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                content: parse_tool_result_content(obj.get("content"))?,
                is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            }),
            _ => Ok(ContentBlock::Text {
                text: obj
                    .get("text")
                    .and_then(Value::as_str)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| value.to_string()),
            }),
        }
    }

    fn parse_array(value: Option<&Value>) -> Result<Vec<ContentBlock>> {
        match value {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items.iter().map(ContentBlock::parse).collect(),
            Some(other) => Err(Error::message_parse(
                "content is neither absent nor an array",
                other.clone(),
            )),
        }
    }
}

/// Tool-result content accepts a bare string (normalised to a single
/// text block), an array of blocks (order preserved), or absence
/// (empty).
fn parse_tool_result_content(value: Option<&Value>) -> Result<Vec<ContentBlock>> {
    match value {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![ContentBlock::Text { text: s.clone() }]),
        Some(Value::Array(items)) => items.iter().map(ContentBlock::parse).collect(),
        Some(other) => Err(Error::message_parse(
            "tool_result content is neither a string, an array, nor absent",
            other.clone(),
        )),
    }
}

/// The content of a `user` message: a plain string, or an ordered
/// sequence of content blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum UserContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    pub content: UserContent,
    pub uuid: Option<String>,
    pub parent_tool_use_id: Option<String>,
    pub session_id: Option<String>,
}

/// The wire error taxonomy for `assistant` messages (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantErrorKind {
    AuthenticationFailed,
    BillingError,
    RateLimit,
    InvalidRequest,
    ServerError,
    Unknown,
}

impl AssistantErrorKind {
    fn from_wire(s: &str) -> AssistantErrorKind {
        match s {
            "authentication_failed" => AssistantErrorKind::AuthenticationFailed,
            "billing_error" => AssistantErrorKind::BillingError,
            "rate_limit" => AssistantErrorKind::RateLimit,
            "invalid_request" => AssistantErrorKind::InvalidRequest,
            "server_error" => AssistantErrorKind::ServerError,
            _ => AssistantErrorKind::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub content: Vec<ContentBlock>,
    pub model: String,
    pub parent_tool_use_id: Option<String>,
    /// Read from the envelope, never from inside `message`: an `error`
    /// key nested in the message body is ignored (spec §4.2, §8).
    pub error: Option<AssistantErrorKind>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    pub subtype: String,
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    pub subtype: String,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub is_error: bool,
    pub num_turns: u64,
    pub session_id: String,
    pub total_cost_usd: Option<f64>,
    pub usage: Option<TokenUsage>,
    pub result: Option<String>,
    pub structured_output: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMessage {
    pub uuid: String,
    pub session_id: String,
    pub event: Value,
}

/// A typed decode of one line from the CLI's stdout (spec §3 Message).
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    User(UserMessage),
    Assistant(AssistantMessage),
    System(SystemMessage),
    Result(ResultMessage),
    StreamEvent(StreamEventMessage),
}

impl Message {
    /// True for the terminal message of a query/turn; iterators that
    /// stop at the first result (`Client::receive_response`) check this.
    pub fn is_result(&self) -> bool {
        matches!(self, Message::Result(_))
    }
}

/// Parse one decoded JSON object into a [`Message`].
///
/// Returns `Err(Error::UnknownMessageType)` for a recognized-but-unknown
/// `type`, and `Err(Error::MessageParse)` when `type` is missing,
/// non-string, or the required nested shape for a known type is absent.
pub fn parse_message(value: &Value) -> Result<Message> {
    let obj = value
        .as_object()
        .ok_or_else(|| Error::message_parse("top-level record is not an object", value.clone()))?;
    let ty = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::message_parse("missing or non-string `type`", value.clone()))?;

    match ty {
        "user" => parse_user(obj, value),
        "assistant" => parse_assistant(obj, value),
        "system" => parse_system(obj, value),
        "result" => parse_result(obj, value),
        "stream_event" => parse_stream_event(obj, value),
        other => Err(Error::UnknownMessageType(other.to_string())),
    }
}

fn nested_message<'a>(obj: &'a Map<String, Value>, whole: &Value) -> Result<&'a Map<String, Value>> {
    obj.get("message")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::message_parse("missing nested `message` object", whole.clone()))
}

fn parse_user(obj: &Map<String, Value>, whole: &Value) -> Result<Message> {
    let nested = nested_message(obj, whole)?;
    let content = match nested.get("content") {
        Some(Value::String(s)) => UserContent::Text(s.clone()),
        Some(Value::Array(_)) => {
            UserContent::Blocks(ContentBlock::parse_array(nested.get("content"))?)
        }
        other => {
            return Err(Error::message_parse(
                "message.content is neither a string nor an array",
                other.cloned().unwrap_or(Value::Null),
            ))
        }
    };
    Ok(Message::User(UserMessage {
        content,
        uuid: str_field(obj, "uuid"),
        parent_tool_use_id: str_field(obj, "parent_tool_use_id"),
        session_id: str_field(obj, "session_id"),
    }))
}

fn parse_assistant(obj: &Map<String, Value>, whole: &Value) -> Result<Message> {
    let nested = nested_message(obj, whole)?;
    let content = ContentBlock::parse_array(nested.get("content"))?;
    let model = nested
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    // The error tag lives at the envelope level only; a nested
    // `message.error` is deliberately never consulted (spec §8).
    let error = obj
        .get("error")
        .and_then(Value::as_str)
        .map(AssistantErrorKind::from_wire);
    Ok(Message::Assistant(AssistantMessage {
        content,
        model,
        parent_tool_use_id: str_field(obj, "parent_tool_use_id"),
        error,
        session_id: str_field(obj, "session_id"),
    }))
}

fn parse_system(obj: &Map<String, Value>, whole: &Value) -> Result<Message> {
    let subtype = obj
        .get("subtype")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::message_parse("system message missing `subtype`", whole.clone()))?
        .to_string();

    let data = match obj.get("data").and_then(Value::as_object) {
        Some(data) => data.clone(),
        None => {
            let mut folded = Map::new();
            for (k, v) in obj {
                if k == "type" || k == "subtype" {
                    continue;
                }
                folded.insert(k.clone(), v.clone());
            }
            folded
        }
    };

    Ok(Message::System(SystemMessage { subtype, data }))
}

fn parse_result(obj: &Map<String, Value>, whole: &Value) -> Result<Message> {
    let subtype = obj
        .get("subtype")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::message_parse("result message missing `subtype`", whole.clone()))?
        .to_string();

    let usage = obj.get("usage").and_then(Value::as_object).map(|u| TokenUsage {
        input_tokens: u.get("input_tokens").and_then(Value::as_u64),
        output_tokens: u.get("output_tokens").and_then(Value::as_u64),
        cache_creation_input_tokens: u.get("cache_creation_input_tokens").and_then(Value::as_u64),
        cache_read_input_tokens: u.get("cache_read_input_tokens").and_then(Value::as_u64),
    });

    Ok(Message::Result(ResultMessage {
        subtype,
        duration_ms: obj.get("duration_ms").and_then(Value::as_u64).unwrap_or(0),
        duration_api_ms: obj
            .get("duration_api_ms")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        is_error: obj.get("is_error").and_then(Value::as_bool).unwrap_or(false),
        num_turns: obj.get("num_turns").and_then(Value::as_u64).unwrap_or(0),
        session_id: str_field(obj, "session_id").unwrap_or_default(),
        total_cost_usd: obj.get("total_cost_usd").and_then(Value::as_f64),
        usage,
        result: str_field(obj, "result"),
        structured_output: obj.get("structured_output").cloned(),
    }))
}

fn parse_stream_event(obj: &Map<String, Value>, whole: &Value) -> Result<Message> {
    let uuid = str_field(obj, "uuid")
        .ok_or_else(|| Error::message_parse("stream_event missing `uuid`", whole.clone()))?;
    let session_id = str_field(obj, "session_id")
        .ok_or_else(|| Error::message_parse("stream_event missing `session_id`", whole.clone()))?;
    let event = obj
        .get("event")
        .cloned()
        .ok_or_else(|| Error::message_parse("stream_event missing `event`", whole.clone()))?;
    Ok(Message::StreamEvent(StreamEventMessage {
        uuid,
        session_id,
        event,
    }))
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_type_is_unknown_message_type() {
        let v = json!({"type": "future_thing"});
        match parse_message(&v) {
            Err(Error::UnknownMessageType(t)) => assert_eq!(t, "future_thing"),
            other => panic!("expected UnknownMessageType, got {other:?}"),
        }
    }

    #[test]
    fn missing_type_is_message_parse() {
        let v = json!({"foo": "bar"});
        assert!(matches!(parse_message(&v), Err(Error::MessageParse { .. })));
    }

    #[test]
    fn user_string_content() {
        let v = json!({
            "type": "user",
            "message": {"role": "user", "content": "hello"},
            "uuid": "u1",
            "session_id": "s1",
        });
        let msg = parse_message(&v).unwrap();
        match msg {
            Message::User(u) => {
                assert_eq!(u.content, UserContent::Text("hello".into()));
                assert_eq!(u.uuid.as_deref(), Some("u1"));
            }
            _ => panic!("expected user"),
        }
    }

    #[test]
    fn assistant_error_lives_at_envelope_level_only() {
        let v = json!({
            "type": "assistant",
            "message": {"model": "claude-x", "content": [], "error": "rate_limit"},
            "error": "billing_error",
        });
        match parse_message(&v).unwrap() {
            Message::Assistant(a) => {
                assert_eq!(a.error, Some(AssistantErrorKind::BillingError));
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn assistant_without_envelope_error_is_none_even_if_nested_has_one() {
        let v = json!({
            "type": "assistant",
            "message": {"model": "claude-x", "content": [], "error": "rate_limit"},
        });
        match parse_message(&v).unwrap() {
            Message::Assistant(a) => assert_eq!(a.error, None),
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn unknown_content_block_degrades_to_text() {
        let v = json!({
            "type": "assistant",
            "message": {"model": "m", "content": [{"type": "mystery", "text": "hi"}]},
        });
        match parse_message(&v).unwrap() {
            Message::Assistant(a) => {
                assert_eq!(a.content, vec![ContentBlock::Text { text: "hi".into() }]);
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn content_block_order_preserved() {
        let v = json!({
            "type": "assistant",
            "message": {"model": "m", "content": [
                {"type": "text", "text": "a"},
                {"type": "tool_use", "id": "1", "name": "Bash", "input": {}},
                {"type": "text", "text": "b"},
            ]},
        });
        match parse_message(&v).unwrap() {
            Message::Assistant(a) => {
                assert_eq!(a.content.len(), 3);
                assert_eq!(a.content[0], ContentBlock::Text { text: "a".into() });
                assert_eq!(a.content[2], ContentBlock::Text { text: "b".into() });
            }
            _ => panic!("expected assistant"),
        }
    }

    #[test]
    fn tool_result_string_content_becomes_single_text_block() {
        let block = ContentBlock::parse(&json!({
            "type": "tool_result",
            "tool_use_id": "1",
            "content": "ok",
        }))
        .unwrap();
        assert_eq!(
            block,
            ContentBlock::ToolResult {
                tool_use_id: "1".into(),
                content: vec![ContentBlock::Text { text: "ok".into() }],
                is_error: false,
            }
        );
    }

    #[test]
    fn tool_result_absent_content_is_empty() {
        let block = ContentBlock::parse(&json!({
            "type": "tool_result",
            "tool_use_id": "1",
        }))
        .unwrap();
        assert_eq!(
            block,
            ContentBlock::ToolResult {
                tool_use_id: "1".into(),
                content: vec![],
                is_error: false,
            }
        );
    }

    #[test]
    fn system_init_folds_top_level_keys_when_data_absent() {
        let v = json!({
            "type": "system",
            "subtype": "init",
            "tools": ["Bash", "Read"],
            "agents": {},
            "slash_commands": ["/compact"],
        });
        match parse_message(&v).unwrap() {
            Message::System(s) => {
                assert_eq!(s.subtype, "init");
                assert!(s.data.contains_key("tools"));
                assert!(s.data.contains_key("agents"));
                assert!(s.data.contains_key("slash_commands"));
            }
            _ => panic!("expected system"),
        }
    }

    #[test]
    fn system_uses_data_subobject_when_present() {
        let v = json!({
            "type": "system",
            "subtype": "init",
            "other_field": "ignored",
            "data": {"tools": ["Bash"]},
        });
        match parse_message(&v).unwrap() {
            Message::System(s) => {
                assert!(s.data.contains_key("tools"));
                assert!(!s.data.contains_key("other_field"));
            }
            _ => panic!("expected system"),
        }
    }

    #[test]
    fn stream_event_requires_uuid_session_event() {
        let v = json!({"type": "stream_event", "uuid": "u", "session_id": "s", "event": {"delta": "x"}});
        match parse_message(&v).unwrap() {
            Message::StreamEvent(e) => {
                assert_eq!(e.uuid, "u");
                assert_eq!(e.session_id, "s");
                assert_eq!(e.event, json!({"delta": "x"}));
            }
            _ => panic!("expected stream_event"),
        }
    }

    #[test]
    fn result_message_fields() {
        let v = json!({
            "type": "result",
            "subtype": "success",
            "duration_ms": 120,
            "duration_api_ms": 100,
            "is_error": false,
            "num_turns": 1,
            "session_id": "s1",
            "total_cost_usd": 0.01,
            "result": "42",
        });
        match parse_message(&v).unwrap() {
            Message::Result(r) => {
                assert_eq!(r.session_id, "s1");
                assert_eq!(r.result.as_deref(), Some("42"));
                assert_eq!(r.total_cost_usd, Some(0.01));
            }
            _ => panic!("expected result"),
        }
    }
}
