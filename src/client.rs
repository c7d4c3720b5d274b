//! Client façade: lifecycle, background read loop, and the lazy message
//! sequence callers consume (spec §4.5).

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::control::Controller;
use crate::error::{Error, Result};
use crate::message::{parse_message, Message};
use crate::options::Options;
use crate::session::{ServerInfo, Session};
use crate::transport::{Transport, TransportConfig};

const INTERNAL_MESSAGES_CAPACITY: usize = 10;

/// A user message for streaming-mode input (spec §4.5).
#[derive(Debug, Clone)]
pub struct StreamUserMessage {
    pub content: String,
    pub parent_tool_use_id: Option<String>,
    pub session_id: Option<String>,
}

impl StreamUserMessage {
    fn to_wire(&self) -> Value {
        serde_json::json!({
            "type": "user",
            "uuid": uuid::Uuid::new_v4().to_string(),
            "message": { "role": "user", "content": self.content },
            "parent_tool_use_id": self.parent_tool_use_id,
            "session_id": self.session_id.clone().unwrap_or_else(|| "default".to_string()),
        })
    }
}

/// The resolved subprocess argv a caller hands to [`Client::start`].
/// Binary discovery and CLI flag assembly are external collaborators'
/// concerns (spec §1) — by the time it reaches here, it is a plain
/// program + args pair.
#[derive(Debug, Clone)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CliInvocation {
    pub fn new(program: impl Into<PathBuf>) -> CliInvocation {
        CliInvocation {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> CliInvocation {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

struct Connected {
    controller: Arc<Controller>,
    session: Arc<Session>,
    transport: Arc<Transport>,
    messages_rx: Mutex<Option<mpsc::Receiver<Result<Message>>>>,
    read_loop: Mutex<Option<JoinHandle<Option<Error>>>>,
    stream_writer: Mutex<Option<JoinHandle<Option<Error>>>>,
}

/// The duplex session client. Entities are created in [`Client::new`],
/// populated by [`Client::start`], and torn down exactly once by
/// [`Client::close`]; reuse after close fails (spec §3 Lifecycle).
pub struct Client {
    options: Arc<Options>,
    connected: Mutex<Option<Connected>>,
    closed: AtomicBool,
}

impl Client {
    pub fn new(options: Options) -> Client {
        Client {
            options: Arc::new(options),
            connected: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Spawn the Transport/Controller/Session trio, perform the
    /// `initialize` handshake, and launch the background read loop.
    pub async fn start(&self, invocation: CliInvocation) -> Result<ServerInfo> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ClientClosed);
        }
        let mut guard = self.connected.lock().await;
        if guard.is_some() {
            return Err(Error::ClientAlreadyConnected);
        }

        if self.options.permission_callback.is_some()
            && self.options.permission_prompt_tool_name.is_some()
        {
            return Err(Error::IncompatibleOptions(
                "permission_callback and permission_prompt_tool_name both configure \
                 permission-prompt routing; set only one"
                    .to_string(),
            ));
        }

        let transport = match &self.options.transport_override {
            Some(transport) => transport.clone(),
            None => {
                let mut config = TransportConfig::new(invocation.program).args(invocation.args);
                if let Some(dir) = &self.options.working_dir {
                    config = config.working_dir(dir.clone());
                }
                if let Some(sink) = &self.options.stderr_sink {
                    config = config.stderr_sink(sink.clone());
                }
                Arc::new(Transport::start(config).await?)
            }
        };

        let controller = Controller::new(transport.clone());
        controller.start().await?;

        let session = Arc::new(Session::new(controller.clone(), self.options.clone()));
        let server_info = match session.handshake().await {
            Ok(info) => info,
            Err(err) => {
                let _ = transport.close().await;
                return Err(err);
            }
        };

        let mut outbound = controller.take_messages().await?;
        let (tx, rx) = mpsc::channel::<Result<Message>>(INTERNAL_MESSAGES_CAPACITY);
        let read_loop = tokio::spawn(async move {
            while let Some(record) = outbound.recv().await {
                let forwarded = match record {
                    Ok(value) => match parse_message(&value) {
                        Ok(message) => Ok(message),
                        Err(err) if err.is_unknown_message_type() => continue,
                        Err(err) => Err(err),
                    },
                    Err(err) => Err(err),
                };
                if tx.send(forwarded).await.is_err() {
                    break;
                }
            }
            None
        });

        *guard = Some(Connected {
            controller,
            session,
            transport,
            messages_rx: Mutex::new(Some(rx)),
            read_loop: Mutex::new(Some(read_loop)),
            stream_writer: Mutex::new(None),
        });
        Ok(server_info)
    }

    pub async fn start_with_prompt(&self, invocation: CliInvocation, prompt: &str) -> Result<ServerInfo> {
        let info = self.start(invocation).await?;
        self.query(prompt, None).await?;
        Ok(info)
    }

    /// Start, then spawn a worker that writes each element of `messages`
    /// to stdin in order before calling `EndInput` (spec §4.5).
    pub async fn start_with_stream(
        &self,
        invocation: CliInvocation,
        mut messages: mpsc::Receiver<StreamUserMessage>,
    ) -> Result<ServerInfo> {
        let info = self.start(invocation).await?;

        let guard = self.connected.lock().await;
        let connected = guard.as_ref().ok_or(Error::ClientNotConnected)?;
        let transport = connected.transport.clone();
        let writer = tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                let bytes = match serde_json::to_vec(&message.to_wire()) {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        return Some(Error::CliConnection {
                            message: format!("failed to encode streamed user message: {err}"),
                        })
                    }
                };
                if let Err(err) = transport.send_message(&bytes).await {
                    return Some(err);
                }
            }
            transport.end_input().await.err()
        });
        *connected.stream_writer.lock().await = Some(writer);
        drop(guard);
        Ok(info)
    }

    /// Write a user message to stdin (spec §4.5).
    pub async fn query(&self, prompt: &str, session_id: Option<&str>) -> Result<()> {
        let guard = self.connected.lock().await;
        let connected = guard.as_ref().ok_or(Error::ClientNotConnected)?;
        let envelope = serde_json::json!({
            "type": "user",
            "uuid": uuid::Uuid::new_v4().to_string(),
            "message": { "role": "user", "content": prompt },
            "parent_tool_use_id": Value::Null,
            "session_id": session_id.unwrap_or("default"),
        });
        let bytes = serde_json::to_vec(&envelope).map_err(|e| Error::CliConnection {
            message: format!("failed to encode query: {e}"),
        })?;
        connected.transport.send_message(&bytes).await
    }

    /// Pull the next parsed message. Returns `None` on EOF, close, or a
    /// stored fatal error having already been surfaced once.
    pub async fn receive_messages(&self) -> Option<Result<Message>> {
        let guard = self.connected.lock().await;
        let connected = guard.as_ref()?;
        let mut rx_guard = connected.messages_rx.lock().await;
        let rx = rx_guard.as_mut()?;
        match rx.recv().await {
            Some(item) => Some(item),
            None => match connected.controller.fatal_error().await {
                Some(err) => Some(Err(Error::Fatal(err))),
                None => None,
            },
        }
    }

    /// Like [`Client::receive_messages`] but stops after yielding the
    /// first `result` message.
    pub async fn receive_response(&self) -> Vec<Result<Message>> {
        let mut out = Vec::new();
        while let Some(item) = self.receive_messages().await {
            let is_result = matches!(&item, Ok(m) if m.is_result());
            out.push(item);
            if is_result {
                break;
            }
        }
        out
    }

    pub async fn interrupt(&self) -> Result<()> {
        self.session().await?.interrupt().await
    }

    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.session().await?.rewind_files(user_message_id).await
    }

    pub async fn set_permission_mode(&self, mode: &str) -> Result<()> {
        self.session().await?.set_permission_mode(mode).await
    }

    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.session().await?.set_model(model).await
    }

    pub async fn get_mcp_status(&self) -> Result<Value> {
        self.session().await?.mcp_status().await
    }

    /// Returns the cached `initialize` result, or `None` if not
    /// connected.
    pub async fn get_server_info(&self) -> Option<ServerInfo> {
        let guard = self.connected.lock().await;
        let connected = guard.as_ref()?;
        connected.session.server_info().await
    }

    async fn session(&self) -> Result<Arc<Session>> {
        let guard = self.connected.lock().await;
        guard.as_ref().map(|c| c.session.clone()).ok_or(Error::ClientNotConnected)
    }

    /// Idempotent teardown: stops the Controller, closes the Transport,
    /// and waits for all background workers, returning their first
    /// error. After this, the Client is single-use.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let connected = self.connected.lock().await.take();
        let Some(connected) = connected else {
            return Ok(());
        };

        connected.controller.stop().await;
        connected.transport.close().await?;

        let mut first_error = None;
        if let Some(handle) = connected.read_loop.lock().await.take() {
            if let Ok(Some(err)) = handle.await {
                first_error.get_or_insert(err);
            }
        }
        if let Some(handle) = connected.stream_writer.lock().await.take() {
            if let Ok(Some(err)) = handle.await {
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    #[tokio::test]
    async fn operations_before_start_fail_with_not_connected() {
        let client = Client::new(Options::builder().build());
        assert!(matches!(client.interrupt().await, Err(Error::ClientNotConnected)));
    }

    #[tokio::test]
    async fn close_before_start_is_a_no_op() {
        let client = Client::new(Options::builder().build());
        assert!(client.close().await.is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = Client::new(Options::builder().build());
        client.close().await.unwrap();
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn start_rejects_a_permission_callback_alongside_a_prompt_tool_name() {
        let callback = crate::permission::callback(|_ctx| async { crate::permission::PermissionDecision::allow() });
        let options = Options::builder()
            .permission_callback(callback)
            .permission_prompt_tool_name("mcp__example__permission_prompt")
            .build();
        let client = Client::new(options);

        let err = client.start(CliInvocation::new("unused")).await.unwrap_err();
        assert!(matches!(err, Error::IncompatibleOptions(_)));
    }
}
