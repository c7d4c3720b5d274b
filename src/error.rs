use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced by the control-protocol client core.
///
/// Every variant corresponds to one of the failure modes enumerated in
/// the error-handling design: subprocess lifecycle failures, protocol
/// framing/parsing failures, and the sentinel lifecycle states a caller
/// can run into by misusing a [`crate::client::Client`].
#[derive(Debug, Error)]
pub enum Error {
    /// The configured CLI executable could not be resolved against the
    /// explicit path or the searched path list.
    #[error("claude CLI executable not found (searched: {searched:?})")]
    CliNotFound { searched: Vec<PathBuf> },

    /// The child process could not be spawned, or the initialize
    /// handshake failed.
    #[error("failed to connect to claude CLI: {message}")]
    CliConnection { message: String },

    /// The child exited with a non-zero status.
    #[error("claude CLI process exited with {exit_code:?}: {stderr_tail}")]
    Process {
        exit_code: Option<i32>,
        stderr_tail: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// A decoded record did not satisfy the schema expected for its
    /// declared type.
    #[error("failed to parse protocol message: {reason}")]
    MessageParse { reason: String, raw: Value },

    /// A stdout line was not valid JSON.
    #[error("failed to decode JSON line from claude CLI: {raw}")]
    CliJsonDecode { raw: String },

    /// A `SendRequest` call's timer fired before a matching response
    /// arrived.
    #[error("control request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The Controller has been stopped; pending and future requests
    /// cannot be served.
    #[error("protocol controller has stopped")]
    ControllerStopped,

    /// An operation was attempted on a transport that has not been
    /// started, or has already been closed.
    #[error("transport is not connected")]
    TransportNotConnected,

    /// An operation requiring a live session was attempted before
    /// `Client::start` completed.
    #[error("client is not connected")]
    ClientNotConnected,

    /// `Client::start` was called on a client that is already
    /// connected.
    #[error("client is already connected")]
    ClientAlreadyConnected,

    /// `Client::start` rejected a combination of `Options` fields that
    /// cannot both take effect (spec §4.5), e.g. a `permission_callback`
    /// together with a `permission_prompt_tool_name` — each claims a
    /// different channel for permission prompts.
    #[error("incompatible options: {0}")]
    IncompatibleOptions(String),

    /// An operation was attempted on a client after `Client::close`.
    #[error("client has been closed")]
    ClientClosed,

    /// A write was attempted after `Transport::end_input`.
    #[error("stdin has been closed")]
    StdinClosed,

    /// A host callback or in-flight operation observed cancellation.
    #[error("operation was cancelled")]
    OperationCancelled,

    /// A decoded record's `type` was not one of the known message
    /// types. Carried as an error variant so call sites that need it
    /// can match on it, but the message iterators treat it as a
    /// non-fatal skip signal rather than returning it.
    #[error("unknown message type: {0}")]
    UnknownMessageType(String),

    /// Wraps a lower-level I/O failure (pipe read/write, process wait)
    /// that does not fit a more specific variant.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A single line on the CLI's stdout exceeded the scanner's
    /// configured buffer limit. Terminal — the line is not truncated
    /// and parsing does not resume.
    #[error("line exceeded maximum buffer size of {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// The first terminal transport error observed by a Controller,
    /// stored once and handed back by every subsequent iterator or
    /// helper call on the owning Client (spec §7).
    #[error("{0}")]
    Fatal(Arc<Error>),
}

/// A terminal error shared across every future caller that asks for it,
/// stored write-once by the Controller (spec §3 "Fatal-error slot").
pub type SharedError = Arc<Error>;

impl Error {
    pub fn message_parse(reason: impl Into<String>, raw: Value) -> Self {
        Error::MessageParse {
            reason: reason.into(),
            raw,
        }
    }

    /// True for errors that terminate a message iterator without being
    /// propagated as the iterator's own error (spec: "UnknownMessageType
    /// is never fatal").
    pub fn is_unknown_message_type(&self) -> bool {
        matches!(self, Error::UnknownMessageType(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
