//! Spawns a `sh`-scripted stand-in for the CLI so Controller/Session/
//! Client integration tests can drive the duplex protocol without a
//! real `claude` binary (spec §5 test tooling).

use std::sync::Arc;

use claude_agent_core::transport::{Transport, TransportConfig};

/// Start a Transport whose "CLI" is the given POSIX shell script, read
/// line-by-line from its own stdin via the conventional `while IFS=
/// read -r line; do ... done` loop.
pub async fn spawn_fake_cli(script: &str) -> Arc<Transport> {
    let config = TransportConfig::new("sh").args(["-c", script]);
    Arc::new(Transport::start(config).await.expect("fake CLI should spawn"))
}

/// A script that answers `initialize` and then, for any `user`
/// message, emits the scenario-1 sequence from spec §8: one
/// `system(init)`, one `assistant`, one `result`.
pub const SIMPLE_QUERY_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"protocol_version":"1","name":"fake-cli","version":"0.0.1","tool_presets":[],"slash_commands":[],"agents":[]}}}\n' "$rid"
      ;;
    *'"type":"user"'*)
      printf '{"type":"system","subtype":"init","tools":["Bash"]}\n'
      printf '{"type":"assistant","message":{"model":"fake-model","content":[{"type":"text","text":"4"}]}}\n'
      printf '{"type":"result","subtype":"success","duration_ms":1,"duration_api_ms":1,"is_error":false,"num_turns":1,"session_id":"s1","result":"4"}\n'
      ;;
  esac
done
"#;

/// A script that answers `initialize` immediately, then echoes back a
/// `control_response` for any other `control_request` subtype it
/// sees, tagging the response payload with the request's own subtype
/// so a test can tell two concurrent requests apart.
pub const ECHO_CONTROL_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"type":"control_request"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      subtype=$(printf '%s' "$line" | sed -n 's/.*"subtype":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"echoed_subtype":"%s"}}}\n' "$rid" "$subtype"
      ;;
  esac
done
"#;

/// Answers `initialize`, then immediately turns around and issues a
/// host-directed `can_use_tool` control_request of its own for a
/// `Write` of `important.txt` (spec §8 scenario 3), echoing whatever
/// the host decided back as a `system` message the test can inspect.
pub const PERMISSION_PROBE_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"protocol_version":"1","name":"fake-cli","version":"0.0.1","tool_presets":[],"slash_commands":[],"agents":[]}}}\n' "$rid"
      printf '{"type":"control_request","request_id":"req_host_1","request":{"subtype":"can_use_tool","tool_name":"Write","tool_input":{"file_path":"important.txt"}}}\n'
      ;;
    *'"control_response"'*'"req_host_1"'*)
      printf '{"type":"system","subtype":"permission_echo","payload":%s}\n' "$line"
      ;;
  esac
done
"#;

/// Answers `initialize`, then issues a host-directed `hook_callback`
/// control_request for `PreToolUse` on `Bash ./foo.sh` (spec §8
/// scenario 2), echoing the host's decision back as a `system`
/// message.
pub const HOOK_PROBE_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"protocol_version":"1","name":"fake-cli","version":"0.0.1","tool_presets":[],"slash_commands":[],"agents":[]}}}\n' "$rid"
      printf '{"type":"control_request","request_id":"req_host_1","request":{"subtype":"hook_callback","hook_event_name":"PreToolUse","matcher_index":0,"callback_index":0,"tool_name":"Bash","tool_input":{"command":"./foo.sh"}}}\n'
      ;;
    *'"control_response"'*'"req_host_1"'*)
      printf '{"type":"system","subtype":"hook_echo","payload":%s}\n' "$line"
      ;;
  esac
done
"#;

/// Answers `initialize`, then issues a host-directed `mcp_message`
/// control_request invoking the in-process `calculator` server's
/// `add` tool (spec §8 scenario 5), echoing the result back. Also
/// echoes the `initialize` request itself as a `system` message so a
/// test can inspect the declared MCP tool descriptors.
pub const MCP_PROBE_SCRIPT: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"subtype":"initialize"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"system","subtype":"initialize_echo","payload":%s}\n' "$line"
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"protocol_version":"1","name":"fake-cli","version":"0.0.1","tool_presets":[],"slash_commands":[],"agents":[]}}}\n' "$rid"
      printf '{"type":"control_request","request_id":"req_host_1","request":{"subtype":"mcp_message","server_name":"calculator","tool_name":"add","arguments":{"a":2,"b":3}}}\n'
      ;;
    *'"subtype":"mcp_status"'*)
      rid=$(printf '%s' "$line" | sed -n 's/.*"request_id":"\([^"]*\)".*/\1/p')
      printf '{"type":"control_response","response":{"request_id":"%s","subtype":"success","response":{"servers":[]}}}\n' "$rid"
      ;;
    *'"control_response"'*'"req_host_1"'*)
      printf '{"type":"system","subtype":"mcp_echo","payload":%s}\n' "$line"
      ;;
  esac
done
"#;
