//! Tool-permission decisions: the `can_use_tool` control-request handler
//! and the permission-mode normalisation rules of spec §3/§8.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

/// One of the four permission modes the CLI understands. Legacy aliases
/// (`acceptAll`, `prompt`) are normalised away before reaching the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    Plan,
    BypassPermissions,
}

impl PermissionMode {
    /// Parse a raw string, applying the legacy-alias normalisation:
    /// `acceptAll` → `bypassPermissions`, `prompt` → `default`. Any
    /// other recognised spelling passes through; anything else is
    /// treated as `default` rather than rejected, since the CLI is the
    /// authority on valid mode strings.
    pub fn normalise(raw: &str) -> PermissionMode {
        match raw {
            "acceptAll" => PermissionMode::BypassPermissions,
            "prompt" => PermissionMode::Default,
            "acceptEdits" => PermissionMode::AcceptEdits,
            "plan" => PermissionMode::Plan,
            "bypassPermissions" => PermissionMode::BypassPermissions,
            _ => PermissionMode::Default,
        }
    }

    pub fn as_wire(&self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::Plan => "plan",
            PermissionMode::BypassPermissions => "bypassPermissions",
        }
    }

    /// Apply only the legacy-alias rewrite (`acceptAll` →
    /// `bypassPermissions`, `prompt` → `default`) and forward every
    /// other value verbatim, including a mode this enum doesn't know
    /// about. Used by `Session::set_permission_mode`, whose wire
    /// contract is "any other value is passed through" (spec §8) —
    /// unlike `normalise`, this must not collapse an unrecognised mode
    /// to `default` since the CLI, not this crate, is the authority on
    /// valid mode strings for that operation.
    pub fn normalise_wire(raw: &str) -> String {
        match raw {
            "acceptAll" => PermissionMode::BypassPermissions.as_wire().to_string(),
            "prompt" => PermissionMode::Default.as_wire().to_string(),
            other => other.to_string(),
        }
    }
}

/// The `can_use_tool` request payload (spec §4.4).
#[derive(Debug, Clone)]
pub struct ToolPermissionContext {
    pub tool_name: String,
    pub tool_input: Value,
    pub suggestions: Option<Value>,
}

impl ToolPermissionContext {
    pub(crate) fn from_payload(payload: &Value) -> ToolPermissionContext {
        ToolPermissionContext {
            tool_name: payload
                .get("tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            tool_input: payload.get("tool_input").cloned().unwrap_or(Value::Null),
            suggestions: payload.get("permission_suggestions").cloned(),
        }
    }
}

/// The host's answer to a `can_use_tool` request.
#[derive(Debug, Clone)]
pub enum PermissionDecision {
    Allow {
        updated_input: Option<Value>,
        updated_permissions: Option<Value>,
    },
    Deny {
        message: String,
        interrupt: bool,
    },
}

impl PermissionDecision {
    pub fn allow() -> PermissionDecision {
        PermissionDecision::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    pub fn deny(message: impl Into<String>) -> PermissionDecision {
        PermissionDecision::Deny {
            message: message.into(),
            interrupt: false,
        }
    }

    pub(crate) fn to_wire(&self) -> Value {
        match self {
            PermissionDecision::Allow {
                updated_input,
                updated_permissions,
            } => {
                let mut body = serde_json::json!({ "behavior": "allow" });
                if let Some(input) = updated_input {
                    body["updatedInput"] = input.clone();
                }
                if let Some(updates) = updated_permissions {
                    body["updatedPermissions"] = updates.clone();
                }
                body
            }
            PermissionDecision::Deny { message, interrupt } => serde_json::json!({
                "behavior": "deny",
                "message": message,
                "interrupt": interrupt,
            }),
        }
    }
}

pub type PermissionFuture = Pin<Box<dyn Future<Output = PermissionDecision> + Send>>;

/// Host-supplied permission callback. Invocations MAY run concurrently
/// and each MUST be treated as independent (spec §5).
pub type PermissionCallback =
    Arc<dyn Fn(ToolPermissionContext) -> PermissionFuture + Send + Sync>;

pub fn callback<F, Fut>(f: F) -> PermissionCallback
where
    F: Fn(ToolPermissionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PermissionDecision> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}
