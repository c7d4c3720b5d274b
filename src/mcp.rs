//! In-process tool server registry: host-side tools the CLI can invoke
//! through the `mcp_message` control request (spec §2 component 7,
//! §4.4).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};

/// The outcome of one tool invocation: either text content or a
/// tool-level error, mirroring the CLI's own tool-result shape
/// (spec §3 content block `tool-result`).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Text(String),
    Error(String),
}

impl ToolOutcome {
    pub(crate) fn to_wire(&self) -> Value {
        match self {
            ToolOutcome::Text(text) => serde_json::json!({
                "content": [{"type": "text", "text": text}],
                "isError": false,
            }),
            ToolOutcome::Error(message) => serde_json::json!({
                "content": [{"type": "text", "text": message}],
                "isError": true,
            }),
        }
    }
}

pub type ToolFuture = Pin<Box<dyn Future<Output = ToolOutcome> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value) -> ToolFuture + Send + Sync>;

pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolOutcome> + Send + 'static,
{
    Arc::new(move |input| Box::pin(f(input)))
}

#[derive(Clone)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: ToolHandler,
    ) -> Tool {
        Tool {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }
}

/// One named collection of tools, addressable from the CLI by server
/// name in `mcp_message` requests.
#[derive(Clone, Default)]
pub struct ToolServer {
    pub name: String,
    tools: HashMap<String, Tool>,
}

impl ToolServer {
    pub fn new(name: impl Into<String>) -> ToolServer {
        ToolServer {
            name: name.into(),
            tools: HashMap::new(),
        }
    }

    pub fn with_tool(mut self, tool: Tool) -> ToolServer {
        self.tools.insert(tool.name.clone(), tool);
        self
    }

    fn descriptors(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect()
    }
}

/// The set of in-process tool servers configured for a session.
#[derive(Clone, Default)]
pub struct McpRegistry {
    servers: HashMap<String, ToolServer>,
}

impl McpRegistry {
    pub fn new() -> McpRegistry {
        McpRegistry::default()
    }

    pub fn register(&mut self, server: ToolServer) {
        self.servers.insert(server.name.clone(), server);
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Server names, for augmenting `mcp_status` with `connected`
    /// entries (spec §4.4).
    pub(crate) fn server_names(&self) -> impl Iterator<Item = &str> {
        self.servers.keys().map(String::as_str)
    }

    /// Handle one `mcp_message` control-request payload: `{server_name,
    /// tool_name, arguments}`.
    pub(crate) async fn dispatch(&self, payload: &Value) -> Result<Value> {
        let server_name = payload
            .get("server_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::CliConnection {
                message: "mcp_message missing `server_name`".into(),
            })?;
        let tool_name = payload
            .get("tool_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::CliConnection {
                message: "mcp_message missing `tool_name`".into(),
            })?;
        let arguments = payload.get("arguments").cloned().unwrap_or(Value::Null);

        let server = self.servers.get(server_name).ok_or_else(|| Error::CliConnection {
            message: format!("no in-process tool server named `{server_name}`"),
        })?;
        let tool = server.tools.get(tool_name).ok_or_else(|| Error::CliConnection {
            message: format!("server `{server_name}` has no tool `{tool_name}`"),
        })?;

        let outcome = (tool.handler)(arguments).await;
        Ok(outcome.to_wire())
    }

    pub(crate) fn list_tools_descriptor(&self) -> Value {
        let mut servers = Vec::new();
        for server in self.servers.values() {
            servers.push(serde_json::json!({
                "name": server.name,
                "tools": server.descriptors(),
            }));
        }
        Value::Array(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_tool() -> Tool {
        Tool::new(
            "add",
            "adds two numbers",
            serde_json::json!({"a": "float", "b": "float"}),
            tool_handler(|input| async move {
                let a = input.get("a").and_then(Value::as_f64).unwrap_or(0.0);
                let b = input.get("b").and_then(Value::as_f64).unwrap_or(0.0);
                ToolOutcome::Text(format!("{a} + {b} = {}", a + b))
            }),
        )
    }

    #[tokio::test]
    async fn dispatch_invokes_registered_tool() {
        let mut registry = McpRegistry::new();
        registry.register(ToolServer::new("calc").with_tool(add_tool()));

        let result = registry
            .dispatch(&serde_json::json!({
                "server_name": "calc",
                "tool_name": "add",
                "arguments": {"a": 1.0, "b": 2.0},
            }))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], "1 + 2 = 3");
        assert_eq!(result["isError"], false);
    }

    #[tokio::test]
    async fn dispatch_unknown_server_is_an_error() {
        let registry = McpRegistry::new();
        let result = registry
            .dispatch(&serde_json::json!({"server_name": "missing", "tool_name": "x"}))
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn server_names_reflects_registered_servers() {
        let mut registry = McpRegistry::new();
        registry.register(ToolServer::new("calc").with_tool(add_tool()));
        let names: Vec<&str> = registry.server_names().collect();
        assert_eq!(names, vec!["calc"]);
    }
}
