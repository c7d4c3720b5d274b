//! Session: glue between [`Options`] and the [`Controller`] — owns the
//! host-side handler set and the `initialize` handshake (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::control::{CancelHandle, Controller};
use crate::error::{Error, Result};
use crate::hooks::{HookEvent, HookInput};
use crate::options::Options;
use crate::permission::{PermissionDecision, ToolPermissionContext};

const INTERRUPT_TIMEOUT: Duration = Duration::from_secs(5);
const REWIND_TIMEOUT: Duration = Duration::from_secs(10);
const SET_PERMISSION_MODE_TIMEOUT: Duration = Duration::from_secs(5);
const SET_MODEL_TIMEOUT: Duration = Duration::from_secs(5);
const MCP_STATUS_TIMEOUT: Duration = Duration::from_secs(10);

/// The server info the CLI returns from a successful `initialize`.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub protocol_version: String,
    pub name: String,
    pub version: String,
    pub tool_presets: Vec<String>,
    pub slash_commands: Vec<String>,
    pub agents: Vec<String>,
}

impl ServerInfo {
    fn from_wire(value: &Value) -> ServerInfo {
        let strs = |key: &str| -> Vec<String> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                .unwrap_or_default()
        };
        ServerInfo {
            protocol_version: value
                .get("protocol_version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            name: value.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            version: value
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tool_presets: strs("tool_presets"),
            slash_commands: strs("slash_commands"),
            agents: strs("agents"),
        }
    }
}

pub struct Session {
    controller: Arc<Controller>,
    options: Arc<Options>,
    server_info: tokio::sync::Mutex<Option<ServerInfo>>,
}

impl Session {
    pub fn new(controller: Arc<Controller>, options: Arc<Options>) -> Session {
        Session {
            controller,
            options,
            server_info: tokio::sync::Mutex::new(None),
        }
    }

    /// Register `can_use_tool`, `hook_callback`, and `mcp_message`
    /// handlers on the Controller, then perform the `initialize`
    /// handshake. Failure here should tear down the transport (spec
    /// §4.4) — the caller (`Client::start`) is responsible for that.
    pub async fn handshake(&self) -> Result<ServerInfo> {
        self.register_handlers().await;

        let payload = serde_json::json!({
            "hooks": self.options.hooks.descriptors(),
            "lineage": self.options.lineage.to_wire(),
            "mcpServers": self.options.mcp_servers.list_tools_descriptor(),
        });
        let response = self
            .controller
            .send_request("initialize", payload, self.options.initialize_timeout)
            .await?;
        let info = ServerInfo::from_wire(&response);
        *self.server_info.lock().await = Some(info.clone());
        Ok(info)
    }

    pub async fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().await.clone()
    }

    async fn register_handlers(&self) {
        let options = self.options.clone();
        self.controller
            .register_handler(
                "can_use_tool",
                Arc::new(move |payload: Value, _cancel: CancelHandle| {
                    let options = options.clone();
                    Box::pin(async move {
                        let ctx = ToolPermissionContext::from_payload(&payload);
                        let decision = match &options.permission_callback {
                            Some(callback) => callback(ctx).await,
                            // Absent callback allows every tool use (spec §9).
                            None => PermissionDecision::allow(),
                        };
                        Ok(decision.to_wire())
                    }) as crate::control::HandlerFuture
                }),
            )
            .await;

        let options = self.options.clone();
        self.controller
            .register_handler(
                "hook_callback",
                Arc::new(move |payload: Value, cancel: CancelHandle| {
                    let options = options.clone();
                    Box::pin(async move {
                        let event = payload
                            .get("hook_event_name")
                            .and_then(Value::as_str)
                            .and_then(HookEvent::from_wire)
                            .ok_or_else(|| Error::CliConnection {
                                message: "hook_callback missing a recognised `hook_event_name`".into(),
                            })?;
                        let matcher_index = payload
                            .get("matcher_index")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        let callback_index = payload
                            .get("callback_index")
                            .and_then(Value::as_u64)
                            .unwrap_or(0) as usize;
                        let input = HookInput::from_wire(&payload);
                        let output = options
                            .hooks
                            .dispatch_by_index(event, matcher_index, callback_index, input, cancel)
                            .await?;
                        Ok(output.to_wire())
                    }) as crate::control::HandlerFuture
                }),
            )
            .await;

        let options = self.options.clone();
        self.controller
            .register_handler(
                "mcp_message",
                Arc::new(move |payload: Value, _cancel: CancelHandle| {
                    let options = options.clone();
                    Box::pin(async move { options.mcp_servers.dispatch(&payload).await })
                        as crate::control::HandlerFuture
                }),
            )
            .await;
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.controller
            .send_request("interrupt", Value::Null, INTERRUPT_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.controller
            .send_request(
                "rewind_files",
                serde_json::json!({ "user_message_id": user_message_id }),
                REWIND_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn set_permission_mode(&self, mode: &str) -> Result<()> {
        let wire_mode = crate::permission::PermissionMode::normalise_wire(mode);
        self.controller
            .send_request(
                "set_permission_mode",
                serde_json::json!({ "mode": wire_mode }),
                SET_PERMISSION_MODE_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    /// `None` restores the default model.
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.controller
            .send_request(
                "set_model",
                serde_json::json!({ "model": model }),
                SET_MODEL_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    pub async fn mcp_status(&self) -> Result<Value> {
        let response = self
            .controller
            .send_request("mcp_status", Value::Null, MCP_STATUS_TIMEOUT)
            .await?;
        let mut servers = response
            .get("servers")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for name in self.options.mcp_servers.server_names() {
            servers.push(serde_json::json!({ "name": name, "status": "connected" }));
        }
        Ok(serde_json::json!({ "servers": servers }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_info_parses_known_fields() {
        let wire = serde_json::json!({
            "protocol_version": "1",
            "name": "claude-cli",
            "version": "2.0.0",
            "tool_presets": ["default"],
            "slash_commands": ["/compact"],
            "agents": ["reviewer"],
        });
        let info = ServerInfo::from_wire(&wire);
        assert_eq!(info.name, "claude-cli");
        assert_eq!(info.tool_presets, vec!["default".to_string()]);
    }
}
