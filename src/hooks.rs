//! Hook registry and dispatch: the `hook_callback` control-request
//! handler, its matcher-selection rules, and output-merge policy
//! (spec §3/§4.4).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::control::CancelHandle;
use crate::error::{Error, Result};
use crate::permission::{PermissionDecision, PermissionMode};

const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(60);

/// A lifecycle point the CLI may invoke a registered hook at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    UserPromptSubmit,
    Stop,
    SubagentStart,
    SubagentStop,
    PreCompact,
    PostToolUseFailure,
    Notification,
    PermissionRequest,
}

impl HookEvent {
    pub fn as_wire(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::Stop => "Stop",
            HookEvent::SubagentStart => "SubagentStart",
            HookEvent::SubagentStop => "SubagentStop",
            HookEvent::PreCompact => "PreCompact",
            HookEvent::PostToolUseFailure => "PostToolUseFailure",
            HookEvent::Notification => "Notification",
            HookEvent::PermissionRequest => "PermissionRequest",
        }
    }

    pub fn from_wire(s: &str) -> Option<HookEvent> {
        Some(match s {
            "PreToolUse" => HookEvent::PreToolUse,
            "PostToolUse" => HookEvent::PostToolUse,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "Stop" => HookEvent::Stop,
            "SubagentStart" => HookEvent::SubagentStart,
            "SubagentStop" => HookEvent::SubagentStop,
            "PreCompact" => HookEvent::PreCompact,
            "PostToolUseFailure" => HookEvent::PostToolUseFailure,
            "Notification" => HookEvent::Notification,
            "PermissionRequest" => HookEvent::PermissionRequest,
            _ => return None,
        })
    }

    /// Events that carry a tool name and are therefore subject to a
    /// matcher's tool-name filter.
    fn carries_tool_name(&self) -> bool {
        matches!(
            self,
            HookEvent::PreToolUse
                | HookEvent::PostToolUse
                | HookEvent::PostToolUseFailure
                | HookEvent::PermissionRequest
        )
    }
}

/// The fields common to every hook input variant (spec §3).
#[derive(Debug, Clone)]
pub struct HookInput {
    pub session_id: String,
    pub transcript_path: String,
    pub cwd: String,
    pub permission_mode: Option<PermissionMode>,
    pub tool_name: Option<String>,
    /// Remaining event-specific fields, modelled as an opaque mapping
    /// per spec §9 rather than one struct per event.
    pub payload: Map<String, Value>,
}

impl HookInput {
    pub(crate) fn from_wire(value: &Value) -> HookInput {
        let obj = value.as_object();
        let get_str = |key: &str| obj.and_then(|o| o.get(key)).and_then(Value::as_str).map(str::to_string);
        let permission_mode = obj
            .and_then(|o| o.get("permission_mode"))
            .and_then(Value::as_str)
            .map(PermissionMode::normalise);
        let tool_name = get_str("tool_name");

        let mut payload = Map::new();
        if let Some(obj) = obj {
            for (k, v) in obj {
                if matches!(
                    k.as_str(),
                    "session_id" | "transcript_path" | "cwd" | "permission_mode" | "hook_event_name"
                ) {
                    continue;
                }
                payload.insert(k.clone(), v.clone());
            }
        }

        HookInput {
            session_id: get_str("session_id").unwrap_or_default(),
            transcript_path: get_str("transcript_path").unwrap_or_default(),
            cwd: get_str("cwd").unwrap_or_default(),
            permission_mode,
            tool_name,
            payload,
        }
    }
}

/// The synchronous output a hook callback returns.
#[derive(Debug, Clone)]
pub struct HookOutput {
    pub continue_execution: bool,
    pub suppress_output: bool,
    pub stop_reason: Option<String>,
    pub decision: Option<String>,
    pub system_message: Option<String>,
    /// The `PreToolUse`/`PermissionRequest`-specific sub-payload.
    pub permission_decision: Option<PermissionDecision>,
}

impl Default for HookOutput {
    fn default() -> Self {
        HookOutput {
            continue_execution: true,
            suppress_output: false,
            stop_reason: None,
            decision: None,
            system_message: None,
            permission_decision: None,
        }
    }
}

impl HookOutput {
    pub(crate) fn to_wire(&self) -> Value {
        let mut body = serde_json::json!({
            "continue": self.continue_execution,
            "suppressOutput": self.suppress_output,
        });
        if let Some(reason) = &self.stop_reason {
            body["stopReason"] = Value::String(reason.clone());
        }
        if let Some(decision) = &self.decision {
            body["decision"] = Value::String(decision.clone());
        }
        if let Some(message) = &self.system_message {
            body["systemMessage"] = Value::String(message.clone());
        }
        if let Some(permission) = &self.permission_decision {
            let wire = permission.to_wire();
            body["permissionDecision"] = wire["behavior"].clone();
            if let Some(reason) = wire.get("message") {
                body["permissionDecisionReason"] = reason.clone();
            }
        }
        body
    }

    /// Merge policy of spec §4.4: the first callback that reports a
    /// stopping decision (deny/block, or `continue=false`) wins
    /// outright; otherwise later callbacks overwrite earlier scalar
    /// fields and nothing is concatenated since these outputs carry no
    /// list-valued fields.
    fn merge(outputs: Vec<HookOutput>) -> HookOutput {
        let mut merged = HookOutput::default();
        for output in outputs {
            let stops = !output.continue_execution
                || matches!(output.permission_decision, Some(PermissionDecision::Deny { .. }));
            if stops {
                return output;
            }
            if output.stop_reason.is_some() {
                merged.stop_reason = output.stop_reason;
            }
            if output.decision.is_some() {
                merged.decision = output.decision;
            }
            if output.system_message.is_some() {
                merged.system_message = output.system_message;
            }
            if output.permission_decision.is_some() {
                merged.permission_decision = output.permission_decision;
            }
            merged.suppress_output = merged.suppress_output || output.suppress_output;
        }
        merged
    }
}

pub type HookFuture = Pin<Box<dyn Future<Output = Result<HookOutput>> + Send>>;
pub type HookCallback = Arc<dyn Fn(HookInput, CancelHandle) -> HookFuture + Send + Sync>;

pub fn callback<F, Fut>(f: F) -> HookCallback
where
    F: Fn(HookInput, CancelHandle) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookOutput>> + Send + 'static,
{
    Arc::new(move |input, cancel| Box::pin(f(input, cancel)))
}

/// A matcher: selects which tool names (if any) a list of callbacks
/// applies to, plus a per-callback timeout override.
#[derive(Clone)]
pub struct Matcher {
    pub tool_filter: Option<String>,
    pub callbacks: Vec<HookCallback>,
    pub timeout: Duration,
}

impl Matcher {
    pub fn new(callbacks: Vec<HookCallback>) -> Matcher {
        Matcher {
            tool_filter: None,
            callbacks,
            timeout: DEFAULT_CALLBACK_TIMEOUT,
        }
    }

    pub fn with_tool_filter(mut self, filter: impl Into<String>) -> Matcher {
        self.tool_filter = Some(filter.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Matcher {
        self.timeout = timeout;
        self
    }

    fn applies_to(&self, event: HookEvent, tool_name: Option<&str>) -> bool {
        if !event.carries_tool_name() {
            return true;
        }
        match &self.tool_filter {
            None => true,
            Some(filter) if filter.is_empty() => true,
            Some(filter) => match tool_name {
                Some(name) => filter.split('|').any(|f| f == name),
                None => false,
            },
        }
    }
}

/// The host's hook configuration: event → ordered matcher list.
#[derive(Clone, Default)]
pub struct HookRegistry {
    matchers: HashMap<HookEvent, Vec<Matcher>>,
}

impl HookRegistry {
    pub fn new() -> HookRegistry {
        HookRegistry::default()
    }

    pub fn register(&mut self, event: HookEvent, matcher: Matcher) {
        self.matchers.entry(event).or_default().push(matcher);
    }

    /// Descriptors the `initialize` handshake declares to the CLI:
    /// event → ordered list of `(tool_filter, callback_count, timeout_ms)`.
    pub(crate) fn descriptors(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for (event, matchers) in &self.matchers {
            let list: Vec<Value> = matchers
                .iter()
                .map(|m| {
                    serde_json::json!({
                        "matcher": m.tool_filter.clone().unwrap_or_default(),
                        "callbackCount": m.callbacks.len(),
                        "timeoutMs": m.timeout.as_millis() as u64,
                    })
                })
                .collect();
            out.insert(event.as_wire().to_string(), Value::Array(list));
        }
        out
    }

    /// Resolve a callback by the stable `(event, matcher_index,
    /// callback_index)` triplet the CLI echoes back on `hook_callback`
    /// (spec §9).
    fn lookup(&self, event: HookEvent, matcher_index: usize, callback_index: usize) -> Option<&HookCallback> {
        self.matchers
            .get(&event)?
            .get(matcher_index)?
            .callbacks
            .get(callback_index)
    }

    /// Run every eligible matcher's callbacks in declaration order and
    /// merge their outputs (spec §4.4). Each callback gets its own
    /// `CancelHandle` and per-matcher timeout; a timed-out callback is
    /// treated as a no-op and logged rather than failing the dispatch.
    pub async fn dispatch(&self, event: HookEvent, input: HookInput, cancel: CancelHandle) -> Result<HookOutput> {
        let tool_name = input.tool_name.clone();
        let Some(matchers) = self.matchers.get(&event) else {
            return Ok(HookOutput::default());
        };

        let mut outputs = Vec::new();
        for matcher in matchers {
            if !matcher.applies_to(event, tool_name.as_deref()) {
                continue;
            }
            for cb in &matcher.callbacks {
                let call = cb(input.clone(), cancel.clone());
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(Error::OperationCancelled),
                    res = tokio::time::timeout(matcher.timeout, call) => match res {
                        Ok(inner) => inner,
                        Err(_) => {
                            tracing::warn!(event = event.as_wire(), "hook callback timed out, treating as no-op");
                            Ok(HookOutput::default())
                        }
                    },
                };
                outputs.push(result?);
            }
        }

        Ok(HookOutput::merge(outputs))
    }

    /// Dispatch by the stable index triplet a `hook_callback` control
    /// request names, rather than by scanning matchers again.
    pub async fn dispatch_by_index(
        &self,
        event: HookEvent,
        matcher_index: usize,
        callback_index: usize,
        input: HookInput,
        cancel: CancelHandle,
    ) -> Result<HookOutput> {
        let cb = self.lookup(event, matcher_index, callback_index).ok_or_else(|| {
            Error::CliConnection {
                message: format!(
                    "no hook callback registered for {}[{matcher_index}][{callback_index}]",
                    event.as_wire()
                ),
            }
        })?;
        let timeout = self
            .matchers
            .get(&event)
            .and_then(|m| m.get(matcher_index))
            .map(|m| m.timeout)
            .unwrap_or(DEFAULT_CALLBACK_TIMEOUT);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::OperationCancelled),
            res = tokio::time::timeout(timeout, cb(input, cancel.clone())) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    tracing::warn!(event = event.as_wire(), "hook callback timed out, treating as no-op");
                    Ok(HookOutput::default())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn input(tool_name: Option<&str>) -> HookInput {
        HookInput {
            session_id: "s1".into(),
            transcript_path: "/tmp/t".into(),
            cwd: "/tmp".into(),
            permission_mode: None,
            tool_name: tool_name.map(str::to_string),
            payload: Map::new(),
        }
    }

    #[test]
    fn matcher_with_empty_filter_matches_any_tool() {
        let matcher = Matcher::new(vec![]);
        assert!(matcher.applies_to(HookEvent::PreToolUse, Some("Bash")));
    }

    #[test]
    fn matcher_filter_rejects_non_matching_tool() {
        let matcher = Matcher::new(vec![]).with_tool_filter("Write|Edit");
        assert!(!matcher.applies_to(HookEvent::PreToolUse, Some("Bash")));
        assert!(matcher.applies_to(HookEvent::PreToolUse, Some("Write")));
    }

    #[test]
    fn non_tool_events_ignore_filter() {
        let matcher = Matcher::new(vec![]).with_tool_filter("Bash");
        assert!(matcher.applies_to(HookEvent::Stop, None));
    }

    #[tokio::test]
    async fn deny_decision_short_circuits_merge() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::PreToolUse,
            Matcher::new(vec![callback(|_input, _cancel| async move {
                Ok(HookOutput {
                    permission_decision: Some(PermissionDecision::deny("blocked")),
                    ..HookOutput::default()
                })
            })])
            .with_tool_filter("Bash"),
        );

        let output = registry
            .dispatch(HookEvent::PreToolUse, input(Some("Bash")), CancelHandle::new())
            .await
            .unwrap();
        assert!(matches!(output.permission_decision, Some(PermissionDecision::Deny { .. })));
    }

    #[tokio::test]
    async fn non_matching_tool_does_not_invoke_callback() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::PreToolUse,
            Matcher::new(vec![callback(move |_input, _cancel| {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(HookOutput::default())
                }
            })])
            .with_tool_filter("Bash"),
        );

        registry
            .dispatch(HookEvent::PreToolUse, input(Some("Write")), CancelHandle::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timed_out_callback_is_treated_as_no_op() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::Stop,
            Matcher::new(vec![callback(|_input, _cancel| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(HookOutput::default())
            })])
            .with_timeout(Duration::from_millis(10)),
        );

        let output = registry
            .dispatch(HookEvent::Stop, input(None), CancelHandle::new())
            .await
            .unwrap();
        assert!(output.continue_execution);
    }

    #[tokio::test]
    async fn cancel_handle_aborts_dispatch_with_operation_cancelled() {
        let mut registry = HookRegistry::new();
        registry.register(
            HookEvent::Stop,
            Matcher::new(vec![callback(|_input, cancel| async move {
                cancel.cancelled().await;
                Ok(HookOutput::default())
            })]),
        );

        let cancel = CancelHandle::new();
        cancel.cancel();
        let result = registry.dispatch(HookEvent::Stop, input(None), cancel).await;
        assert!(matches!(result, Err(Error::OperationCancelled)));
    }
}
