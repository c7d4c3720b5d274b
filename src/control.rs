//! Protocol Controller: sole reader of the [`Transport`], multiplexer of
//! the control channel, and dispatcher of CLI-initiated requests onto
//! host-registered handlers (spec §4.3).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result, SharedError};
use crate::transport::Transport;

/// A cooperative cancellation signal handed to every inbound handler.
/// Cancelled when the CLI sends `control_cancel_request` for the
/// handler's request id, or when the Controller stops.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<(tokio::sync::Notify, AtomicBool)>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0 .1.store(true, Ordering::SeqCst);
        self.0 .0.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0 .1.load(Ordering::SeqCst)
    }

    /// Resolves once cancelled. Safe to await repeatedly/concurrently.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.0 .0.notified().await;
    }
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;
pub type HandlerFn = Arc<dyn Fn(Value, CancelHandle) -> HandlerFuture + Send + Sync>;

struct PendingState {
    pending: HashMap<String, oneshot::Sender<Result<Value>>>,
    handlers: HashMap<String, HandlerFn>,
    active_cancels: HashMap<String, CancelHandle>,
}

/// Hub of the duplex control protocol. Owns the only path by which the
/// Transport is read; routes every inbound record to one of: a pending
/// request's waiter, a registered inbound-handler dispatch, or the
/// outbound messages stream handed to the Client.
pub struct Controller {
    transport: Arc<Transport>,
    state: Mutex<PendingState>,
    next_id: AtomicU64,
    outbound_tx: mpsc::Sender<Result<Value>>,
    outbound_rx: Mutex<Option<mpsc::Receiver<Result<Value>>>>,
    fatal: Mutex<Option<SharedError>>,
    done_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<bool>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(transport: Arc<Transport>) -> Arc<Self> {
        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (done_tx, done_rx) = watch::channel(false);
        Arc::new(Self {
            transport,
            state: Mutex::new(PendingState {
                pending: HashMap::new(),
                handlers: HashMap::new(),
                active_cancels: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            fatal: Mutex::new(None),
            done_tx,
            done_rx,
            reader_task: Mutex::new(None),
            dispatch_tasks: Mutex::new(Vec::new()),
        })
    }

    /// Register the handler invoked for inbound `control_request`s of
    /// the given `subtype` (e.g. `can_use_tool`, `hook_callback`,
    /// `mcp_message`). Registering the same subtype twice replaces the
    /// previous handler.
    pub async fn register_handler(&self, subtype: impl Into<String>, handler: HandlerFn) {
        self.state.lock().await.handlers.insert(subtype.into(), handler);
    }

    /// Start the single reader task that drains the Transport and
    /// routes every record (spec §4.3 lifecycle).
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (mut inbound_rx, mut fatal_rx) = self.transport.take_reader().await?;
        let this = self.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    record = inbound_rx.recv() => {
                        match record {
                            Some(record) => this.clone().route(record).await,
                            None => break,
                        }
                    }
                    fatal = &mut fatal_rx => {
                        if let Ok(err) = fatal {
                            this.set_fatal(err).await;
                        }
                        break;
                    }
                }
            }
            this.fail_all_pending(Error::ControllerStopped).await;
        });
        *self.reader_task.lock().await = Some(task);
        Ok(())
    }

    async fn set_fatal(&self, err: Error) {
        let mut guard = self.fatal.lock().await;
        if guard.is_none() {
            *guard = Some(Arc::new(err));
        }
    }

    /// The first terminal transport error observed, if any.
    pub async fn fatal_error(&self) -> Option<SharedError> {
        self.fatal.lock().await.clone()
    }

    async fn route(self: Arc<Self>, record: std::result::Result<Value, Error>) {
        let value = match record {
            Ok(v) => v,
            Err(e) => {
                // A malformed line: non-fatal, surfaced to the caller
                // through the message stream (spec §4.2/§7).
                let _ = self.outbound_tx.send(Err(e)).await;
                return;
            }
        };

        let ty = value.get("type").and_then(Value::as_str).unwrap_or("");
        match ty {
            "control_response" => self.handle_control_response(value).await,
            "control_request" => self.clone().spawn_handle_control_request(value).await,
            "control_cancel_request" => self.handle_cancel_request(value).await,
            _ => {
                let _ = self.outbound_tx.send(Ok(value)).await;
            }
        }
    }

    async fn handle_control_response(&self, value: Value) {
        let response = match value.get("response").and_then(Value::as_object) {
            Some(r) => r,
            None => {
                tracing::warn!("control_response missing `response` object");
                return;
            }
        };
        let request_id = match response.get("request_id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("control_response missing `request_id`");
                return;
            }
        };

        let sender = self.state.lock().await.pending.remove(&request_id);
        let Some(sender) = sender else {
            tracing::warn!(request_id, "dropping unmatched control_response");
            return;
        };

        let subtype = response.get("subtype").and_then(Value::as_str).unwrap_or("");
        let result = if subtype == "error" {
            let message = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("control request failed")
                .to_string();
            Err(Error::CliConnection { message })
        } else {
            Ok(response.get("response").cloned().unwrap_or(Value::Null))
        };
        let _ = sender.send(result);
    }

    async fn spawn_handle_control_request(self: Arc<Self>, value: Value) {
        let request_id = value
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let request = value.get("request").and_then(Value::as_object).cloned();
        let Some(request) = request else {
            tracing::warn!(request_id, "control_request missing `request` object");
            return;
        };
        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let payload = Value::Object(request);

        let handler = self.state.lock().await.handlers.get(&subtype).cloned();
        let cancel = CancelHandle::new();
        self.state
            .lock()
            .await
            .active_cancels
            .insert(request_id.clone(), cancel.clone());

        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = match handler {
                Some(handler) => {
                    tracing::debug!(subtype = %subtype, request_id, "dispatching control_request");
                    handler(payload, cancel).await
                }
                None => Err(Error::CliConnection {
                    message: format!("no handler registered for control request subtype `{subtype}`"),
                }),
            };
            this.state.lock().await.active_cancels.remove(&request_id);
            this.reply(&request_id, result).await;
        });
        self.dispatch_tasks.lock().await.push(task);
    }

    async fn handle_cancel_request(&self, value: Value) {
        let Some(request_id) = value.get("request_id").and_then(Value::as_str) else {
            return;
        };
        if let Some(cancel) = self.state.lock().await.active_cancels.get(request_id) {
            cancel.cancel();
        }
    }

    async fn reply(&self, request_id: &str, result: Result<Value>) {
        let response = match result {
            Ok(value) => serde_json::json!({
                "request_id": request_id,
                "subtype": "success",
                "response": value,
            }),
            Err(err) => serde_json::json!({
                "request_id": request_id,
                "subtype": "error",
                "error": err.to_string(),
            }),
        };
        let envelope = serde_json::json!({
            "type": "control_response",
            "response": response,
        });
        if let Ok(bytes) = serde_json::to_vec(&envelope) {
            if let Err(err) = self.transport.send_message(&bytes).await {
                tracing::warn!(error = %err, "failed to write control_response");
            }
        }
    }

    /// Mint a fresh request id, send a `control_request`, and await the
    /// matching `control_response` or a timeout (spec §4.3).
    pub async fn send_request(&self, subtype: &str, payload: Value, timeout: Duration) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request_id = format!("req_{id}");

        let (tx, rx) = oneshot::channel();
        self.state.lock().await.pending.insert(request_id.clone(), tx);

        let mut request = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other);
                map
            }
        };
        request.insert("subtype".to_string(), Value::String(subtype.to_string()));

        let envelope = serde_json::json!({
            "type": "control_request",
            "request_id": request_id,
            "request": Value::Object(request),
        });
        let bytes = serde_json::to_vec(&envelope).map_err(|e| Error::CliConnection {
            message: format!("failed to encode control_request: {e}"),
        })?;

        if let Err(err) = self.transport.send_message(&bytes).await {
            self.state.lock().await.pending.remove(&request_id);
            return Err(err);
        }

        let mut done_rx = self.done_rx.clone();
        if *done_rx.borrow() {
            self.state.lock().await.pending.remove(&request_id);
            return Err(Error::ControllerStopped);
        }
        tokio::select! {
            biased;
            _ = done_rx.changed() => {
                self.state.lock().await.pending.remove(&request_id);
                Err(Error::ControllerStopped)
            }
            res = rx => {
                match res {
                    Ok(result) => result,
                    Err(_) => Err(Error::ControllerStopped),
                }
            }
            _ = tokio::time::sleep(timeout) => {
                self.state.lock().await.pending.remove(&request_id);
                Err(Error::RequestTimeout(timeout))
            }
        }
    }

    async fn fail_all_pending(&self, make_err: Error) {
        let mut state = self.state.lock().await;
        for (_, sender) in state.pending.drain() {
            let _ = sender.send(Err(match &make_err {
                Error::ControllerStopped => Error::ControllerStopped,
                other => Error::CliConnection {
                    message: other.to_string(),
                },
            }));
        }
        for (_, cancel) in state.active_cancels.drain() {
            cancel.cancel();
        }
    }

    /// Take the outbound stream of forwarded, non-control records.
    /// May be called exactly once.
    pub async fn take_messages(&self) -> Result<mpsc::Receiver<Result<Value>>> {
        self.outbound_rx
            .lock()
            .await
            .take()
            .ok_or(Error::TransportNotConnected)
    }

    /// Stop the Controller: cancel all pending waiters and in-flight
    /// handlers, then drain every background task.
    pub async fn stop(&self) {
        let _ = self.done_tx.send(true);
        self.fail_all_pending(Error::ControllerStopped).await;

        if let Some(task) = self.reader_task.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        let tasks = std::mem::take(&mut *self.dispatch_tasks.lock().await);
        for task in tasks {
            let _ = task.await;
        }
    }
}
