//! Session configuration: the immutable `Options` record passed to
//! `Client::start` and its chained-setter builder (spec §3).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::hooks::HookRegistry;
use crate::mcp::McpRegistry;
use crate::permission::{PermissionCallback, PermissionMode};
use crate::transport::Transport;

pub(crate) const DEFAULT_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);

/// Either a raw system prompt or a reference to a built-in preset with
/// optional appended text.
#[derive(Debug, Clone)]
pub enum SystemPrompt {
    Raw(String),
    Preset { name: String, append: Option<String> },
}

/// How the assistant may use extended thinking.
#[derive(Debug, Clone)]
pub enum ThinkingConfig {
    Disabled,
    Adaptive,
    Budget(u32),
}

/// How prior conversation state should be attached to a new session.
#[derive(Debug, Clone, Default)]
pub enum SessionLineage {
    #[default]
    New,
    ContinueLatest,
    Resume {
        session_id: String,
        fork: bool,
    },
}

impl SessionLineage {
    /// The `lineage` field of the `initialize` handshake payload: the
    /// only channel this crate owns for conveying continue/resume/fork
    /// to the CLI, since argv assembly is an external collaborator's
    /// concern (spec §1).
    pub(crate) fn to_wire(&self) -> Value {
        match self {
            SessionLineage::New => serde_json::json!({ "mode": "new" }),
            SessionLineage::ContinueLatest => serde_json::json!({ "mode": "continue" }),
            SessionLineage::Resume { session_id, fork } => serde_json::json!({
                "mode": "resume",
                "session_id": session_id,
                "fork": fork,
            }),
        }
    }
}

/// Tool allow/deny configuration: an explicit list, a named preset, or
/// both together.
#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    pub allowed: Vec<String>,
    pub denied: Vec<String>,
    pub preset: Option<String>,
}

/// An externally-hosted MCP server reference (as opposed to an
/// in-process [`crate::mcp::ToolServer`]).
#[derive(Debug, Clone)]
pub struct ExternalToolServer {
    pub name: String,
    pub descriptor: Value,
}

/// A custom agent definition the CLI can delegate subtasks to.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub description: String,
    pub system_prompt: Option<String>,
    pub allowed_tools: Vec<String>,
    pub model: Option<String>,
}

/// Which configuration layers to import (`settings.json` et al).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    User,
    Project,
    Local,
}

/// Immutable session configuration (spec §3). Construct via
/// [`Options::builder`].
#[derive(Clone)]
pub struct Options {
    pub system_prompt: Option<SystemPrompt>,
    pub model: Option<String>,
    pub fallback_model: Option<String>,
    pub permission_mode: PermissionMode,
    pub max_turns: Option<u32>,
    pub max_cost_usd: Option<f64>,
    pub working_dir: Option<PathBuf>,
    pub additional_directories: Vec<PathBuf>,
    pub tools: ToolConfig,
    pub hooks: HookRegistry,
    pub permission_callback: Option<PermissionCallback>,
    /// Name of an external MCP tool the CLI should call for permission
    /// prompts instead of routing them over this crate's control
    /// channel. Mutually exclusive with `permission_callback` (spec §4.5).
    pub permission_prompt_tool_name: Option<String>,
    pub mcp_servers: McpRegistry,
    pub external_tool_servers: BTreeMap<String, ExternalToolServer>,
    pub thinking: ThinkingConfig,
    pub effort: Option<String>,
    pub stream_partial_updates: bool,
    pub lineage: SessionLineage,
    pub output_schema: Option<Value>,
    pub agents: BTreeMap<String, AgentDefinition>,
    pub setting_sources: Vec<SettingSource>,
    pub plugins: Vec<String>,
    pub beta_flags: Vec<String>,
    pub sandbox: bool,
    pub stderr_sink: Option<Arc<dyn Fn(&[u8]) + Send + Sync>>,
    pub transport_override: Option<Arc<Transport>>,
    pub initialize_timeout: Duration,
}

impl std::fmt::Debug for Options {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Options")
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("max_turns", &self.max_turns)
            .field("working_dir", &self.working_dir)
            .field("lineage", &self.lineage)
            .field("has_permission_callback", &self.permission_callback.is_some())
            .field("permission_prompt_tool_name", &self.permission_prompt_tool_name)
            .field("transport_override", &self.transport_override.is_some())
            .finish()
    }
}

impl Default for Options {
    fn default() -> Self {
        Options {
            system_prompt: None,
            model: None,
            fallback_model: None,
            permission_mode: PermissionMode::Default,
            max_turns: None,
            max_cost_usd: None,
            working_dir: None,
            additional_directories: Vec::new(),
            tools: ToolConfig::default(),
            hooks: HookRegistry::new(),
            permission_callback: None,
            permission_prompt_tool_name: None,
            mcp_servers: McpRegistry::new(),
            external_tool_servers: BTreeMap::new(),
            thinking: ThinkingConfig::Adaptive,
            effort: None,
            stream_partial_updates: false,
            lineage: SessionLineage::New,
            output_schema: None,
            agents: BTreeMap::new(),
            setting_sources: Vec::new(),
            plugins: Vec::new(),
            beta_flags: Vec::new(),
            sandbox: false,
            stderr_sink: None,
            transport_override: None,
            initialize_timeout: DEFAULT_INITIALIZE_TIMEOUT,
        }
    }
}

impl Options {
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::default()
    }

    /// Resolve the effective initialize timeout: an explicit
    /// `Options::initialize_timeout` wins outright; otherwise
    /// `CLAUDE_CODE_STREAM_CLOSE_TIMEOUT` (seconds) overrides the
    /// 60-second default (spec §6).
    pub(crate) fn effective_initialize_timeout(&self, explicit: bool) -> Duration {
        if explicit {
            return self.initialize_timeout;
        }
        std::env::var("CLAUDE_CODE_STREAM_CLOSE_TIMEOUT")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_INITIALIZE_TIMEOUT)
    }
}

#[derive(Default)]
pub struct OptionsBuilder {
    options: Options,
    initialize_timeout_explicit: bool,
}

impl OptionsBuilder {
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.options.system_prompt = Some(SystemPrompt::Raw(prompt.into()));
        self
    }

    pub fn system_prompt_preset(mut self, name: impl Into<String>, append: Option<String>) -> Self {
        self.options.system_prompt = Some(SystemPrompt::Preset {
            name: name.into(),
            append,
        });
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.options.model = Some(model.into());
        self
    }

    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.options.fallback_model = Some(model.into());
        self
    }

    /// Accepts the raw wire spelling, applying legacy-alias
    /// normalisation (spec §3/§8).
    pub fn permission_mode(mut self, raw: &str) -> Self {
        self.options.permission_mode = PermissionMode::normalise(raw);
        self
    }

    pub fn max_turns(mut self, turns: u32) -> Self {
        self.options.max_turns = Some(turns);
        self
    }

    pub fn max_cost_usd(mut self, cost: f64) -> Self {
        self.options.max_cost_usd = Some(cost);
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.working_dir = Some(dir.into());
        self
    }

    pub fn additional_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.options.additional_directories.push(dir.into());
        self
    }

    pub fn tools(mut self, tools: ToolConfig) -> Self {
        self.options.tools = tools;
        self
    }

    pub fn hooks(mut self, hooks: HookRegistry) -> Self {
        self.options.hooks = hooks;
        self
    }

    pub fn permission_callback(mut self, callback: PermissionCallback) -> Self {
        self.options.permission_callback = Some(callback);
        self
    }

    /// Route permission prompts to an external MCP tool by name instead
    /// of a host callback. Rejected at `Client::start` if a
    /// `permission_callback` is also set (spec §4.5).
    pub fn permission_prompt_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.options.permission_prompt_tool_name = Some(tool_name.into());
        self
    }

    pub fn mcp_servers(mut self, servers: McpRegistry) -> Self {
        self.options.mcp_servers = servers;
        self
    }

    pub fn external_tool_server(mut self, server: ExternalToolServer) -> Self {
        self.options.external_tool_servers.insert(server.name.clone(), server);
        self
    }

    pub fn thinking(mut self, config: ThinkingConfig) -> Self {
        self.options.thinking = config;
        self
    }

    pub fn effort(mut self, effort: impl Into<String>) -> Self {
        self.options.effort = Some(effort.into());
        self
    }

    pub fn stream_partial_updates(mut self, enabled: bool) -> Self {
        self.options.stream_partial_updates = enabled;
        self
    }

    pub fn lineage(mut self, lineage: SessionLineage) -> Self {
        self.options.lineage = lineage;
        self
    }

    pub fn output_schema(mut self, schema: Value) -> Self {
        self.options.output_schema = Some(schema);
        self
    }

    pub fn agent(mut self, name: impl Into<String>, agent: AgentDefinition) -> Self {
        self.options.agents.insert(name.into(), agent);
        self
    }

    pub fn setting_source(mut self, source: SettingSource) -> Self {
        self.options.setting_sources.push(source);
        self
    }

    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.options.plugins.push(plugin.into());
        self
    }

    pub fn beta_flag(mut self, flag: impl Into<String>) -> Self {
        self.options.beta_flags.push(flag.into());
        self
    }

    pub fn sandbox(mut self, enabled: bool) -> Self {
        self.options.sandbox = enabled;
        self
    }

    pub fn stderr_sink(mut self, sink: Arc<dyn Fn(&[u8]) + Send + Sync>) -> Self {
        self.options.stderr_sink = Some(sink);
        self
    }

    /// For tests: inject a pre-started transport instead of spawning
    /// the real CLI binary.
    pub fn transport_override(mut self, transport: Arc<Transport>) -> Self {
        self.options.transport_override = Some(transport);
        self
    }

    pub fn initialize_timeout(mut self, timeout: Duration) -> Self {
        self.options.initialize_timeout = timeout;
        self.initialize_timeout_explicit = true;
        self
    }

    pub fn build(self) -> Options {
        let mut options = self.options;
        options.initialize_timeout = options.effective_initialize_timeout(self.initialize_timeout_explicit);
        options
    }
}
