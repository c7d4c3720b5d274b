//! Subprocess transport: owns the CLI child process and presents it as a
//! duplex newline-delimited-JSON record channel (spec §4.1).
//!
//! The line scanner (`LineScanner`) is factored out from process
//! management so its chunking/overflow behaviour can be unit tested
//! against an in-memory duplex pipe instead of a real child process.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};

/// Default line buffer cap: generous enough for large tool inputs/
/// outputs without letting a runaway line exhaust memory.
pub const DEFAULT_MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

/// How to launch the CLI child process. Binary resolution (searching
/// `PATH`, honouring an explicit override) is an external collaborator's
/// concern per spec §1 — by the time a `TransportConfig` reaches
/// [`Transport::start`], `program` is already resolved.
#[derive(Clone)]
pub struct TransportConfig {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub max_line_bytes: usize,
    /// Callback invoked with each raw stderr chunk. Stderr is forwarded
    /// verbatim and never parsed.
    pub stderr_sink: Option<Arc<dyn Fn(&[u8]) + Send + Sync>>,
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &self.env)
            .field("working_dir", &self.working_dir)
            .field("max_line_bytes", &self.max_line_bytes)
            .field(
                "stderr_sink",
                &self.stderr_sink.as_ref().map(|_| "Fn(&[u8])"),
            )
            .finish()
    }
}

impl TransportConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            stderr_sink: None,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn max_line_bytes(mut self, n: usize) -> Self {
        self.max_line_bytes = n;
        self
    }

    pub fn stderr_sink(mut self, sink: Arc<dyn Fn(&[u8]) + Send + Sync>) -> Self {
        self.stderr_sink = Some(sink);
        self
    }
}

/// A newline-delimited JSON line scanner over any `AsyncRead`.
///
/// Tolerates objects split across reads and multiple objects delivered
/// in one read; skips blank lines; a line whose raw bytes (before the
/// newline) exceed `max_len` is a terminal [`Error::FrameTooLarge`], not
/// a truncation.
pub(crate) struct LineScanner<R> {
    reader: R,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineScanner<R> {
    pub(crate) fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_len,
        }
    }

    /// Returns the next non-empty line (newline stripped), or `Ok(None)`
    /// on clean EOF.
    pub(crate) async fn next_line(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                line.pop(); // drop the '\n'
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                return Ok(Some(line));
            }

            if self.buf.len() > self.max_len {
                return Err(Error::FrameTooLarge {
                    limit: self.max_len,
                });
            }

            let mut chunk = [0u8; 8192];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                if self.buf.iter().all(u8::is_ascii_whitespace) {
                    return Ok(None);
                }
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(line));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// One decoded record from the CLI's stdout, or the line-level decode
/// failure for a line that was not valid JSON (spec: `CLIJSONDecode`,
/// non-fatal — the scanner keeps reading subsequent lines).
pub type InboundRecord = std::result::Result<Value, Error>;

struct Shared {
    stdin: Mutex<Option<ChildStdin>>,
    child: Mutex<Option<Child>>,
    ready: AtomicBool,
    closed: AtomicBool,
    stderr_tail: Mutex<Vec<u8>>,
}

/// How many trailing stderr bytes to keep for `Error::Process`'s
/// `stderr_tail`, independent of whatever the caller's `stderr_sink`
/// does with the same bytes.
const STDERR_TAIL_CAP: usize = 4096;

/// At most one of the reader task (on a scanner failure) and the
/// waiter task (on unexpected process exit) ever reports a fatal
/// error; whichever observes one first takes the sender and sends.
type FatalSender = Arc<Mutex<Option<oneshot::Sender<Error>>>>;

async fn report_fatal(sender: &FatalSender, err: Error) {
    if let Some(tx) = sender.lock().await.take() {
        let _ = tx.send(err);
    }
}

/// Owns the CLI child process and exposes it as a duplex record
/// channel. See module docs and spec §4.1.
pub struct Transport {
    shared: Arc<Shared>,
    inbound_rx: Mutex<Option<mpsc::Receiver<InboundRecord>>>,
    fatal_rx: Mutex<Option<oneshot::Receiver<Error>>>,
    reader_task: Mutex<Option<JoinHandle<()>>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    waiter_task: Mutex<Option<JoinHandle<()>>>,
}

impl Transport {
    /// Spawn the child process and begin reading its stdout in the
    /// background. `ReadMessages`-equivalent access is obtained by
    /// calling [`Transport::take_reader`] exactly once.
    pub async fn start(config: TransportConfig) -> Result<Self> {
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (k, v) in &config.env {
            command.env(k, v);
        }
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                Error::CliNotFound {
                    searched: vec![config.program.clone()],
                }
            } else {
                Error::CliConnection {
                    message: source.to_string(),
                }
            }
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or(Error::CliConnection {
            message: "child stdout pipe missing".into(),
        })?;
        let stderr = child.stderr.take().ok_or(Error::CliConnection {
            message: "child stderr pipe missing".into(),
        })?;

        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundRecord>(64);
        let (fatal_tx, fatal_rx) = oneshot::channel::<Error>();
        let fatal_tx: FatalSender = Arc::new(Mutex::new(Some(fatal_tx)));

        let shared = Arc::new(Shared {
            stdin: Mutex::new(stdin),
            child: Mutex::new(None),
            ready: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            stderr_tail: Mutex::new(Vec::new()),
        });

        let max_line_bytes = config.max_line_bytes;
        let reader_fatal = fatal_tx.clone();
        let reader_task = tokio::spawn(async move {
            let mut scanner = LineScanner::new(stdout, max_line_bytes);
            loop {
                match scanner.next_line().await {
                    Ok(None) => break,
                    Ok(Some(line)) => {
                        let decoded = serde_json::from_slice::<Value>(&line).map_err(|_| {
                            Error::CliJsonDecode {
                                raw: String::from_utf8_lossy(&line).into_owned(),
                            }
                        });
                        tracing::trace!(bytes = line.len(), "read line from claude CLI stdout");
                        if inbound_tx.send(decoded).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "claude CLI stdout scanner failed");
                        report_fatal(&reader_fatal, err).await;
                        break;
                    }
                }
            }
        });

        let stderr_sink = config.stderr_sink.clone();
        let stderr_shared = shared.clone();
        let stderr_task = tokio::spawn(async move {
            let mut reader = stderr;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Some(sink) = stderr_sink.as_ref() {
                            sink(&buf[..n]);
                        }
                        let mut tail = stderr_shared.stderr_tail.lock().await;
                        tail.extend_from_slice(&buf[..n]);
                        if tail.len() > STDERR_TAIL_CAP {
                            let cut = tail.len() - STDERR_TAIL_CAP;
                            tail.drain(..cut);
                        }
                    }
                }
            }
        });

        // The waiter task observes unexpected process exit and reports
        // it as a terminal transport error, distinct from an
        // intentional `Close` (spec §4.1/§7 `Process`).
        *shared.child.lock().await = Some(child);
        let waiter_shared = shared.clone();
        let waiter_fatal = fatal_tx.clone();
        let waiter_task = tokio::spawn(async move {
            let status = {
                let mut guard = waiter_shared.child.lock().await;
                match guard.as_mut() {
                    Some(child) => child.wait().await,
                    None => return,
                }
            };
            if waiter_shared.closed.load(Ordering::SeqCst) {
                return;
            }
            let stderr_tail =
                String::from_utf8_lossy(&waiter_shared.stderr_tail.lock().await).into_owned();
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => {
                    tracing::warn!(?status, "claude CLI process exited unexpectedly");
                    report_fatal(
                        &waiter_fatal,
                        Error::Process {
                            exit_code: status.code(),
                            stderr_tail,
                            source: None,
                        },
                    )
                    .await;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "failed to wait on claude CLI process");
                    report_fatal(
                        &waiter_fatal,
                        Error::Process {
                            exit_code: None,
                            stderr_tail,
                            source: Some(err),
                        },
                    )
                    .await;
                }
            }
        });

        Ok(Self {
            shared,
            inbound_rx: Mutex::new(Some(inbound_rx)),
            fatal_rx: Mutex::new(Some(fatal_rx)),
            reader_task: Mutex::new(Some(reader_task)),
            stderr_task: Mutex::new(Some(stderr_task)),
            waiter_task: Mutex::new(Some(waiter_task)),
        })
    }

    /// Take ownership of the inbound record receiver and the terminal
    /// error receiver. May be called exactly once — the structural
    /// single-reader invariant (spec §9) is enforced by returning
    /// `Error::TransportNotConnected` on a second call.
    pub async fn take_reader(
        &self,
    ) -> Result<(mpsc::Receiver<InboundRecord>, oneshot::Receiver<Error>)> {
        let rx = self
            .inbound_rx
            .lock()
            .await
            .take()
            .ok_or(Error::TransportNotConnected)?;
        let fatal = self
            .fatal_rx
            .lock()
            .await
            .take()
            .ok_or(Error::TransportNotConnected)?;
        Ok((rx, fatal))
    }

    /// Write one record, followed by a single newline. Concurrent
    /// callers are serialised through the write-lane mutex (spec §5
    /// "single-writer" invariant).
    pub async fn send_message(&self, bytes: &[u8]) -> Result<()> {
        let mut guard = self.shared.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(Error::StdinClosed)?;
        stdin.write_all(bytes).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Close the child's stdin without terminating the process, to
    /// signal "no more user input" at the end of streaming-mode input.
    pub async fn end_input(&self) -> Result<()> {
        let mut guard = self.shared.stdin.lock().await;
        if let Some(mut stdin) = guard.take() {
            stdin.shutdown().await?;
        }
        Ok(())
    }

    /// Terminate the process and release all resources. Idempotent.
    pub async fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.shared.ready.store(false, Ordering::SeqCst);

        {
            let mut guard = self.shared.stdin.lock().await;
            if let Some(mut stdin) = guard.take() {
                let _ = stdin.shutdown().await;
            }
        }
        {
            let mut guard = self.shared.child.lock().await;
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }

        for task in [
            self.reader_task.lock().await.take(),
            self.stderr_task.lock().await.take(),
            self.waiter_task.lock().await.take(),
        ] {
            if let Some(task) = task {
                let _ = task.await;
            }
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst) && !self.shared.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncWriteExt as _};

    #[tokio::test]
    async fn scans_single_object_per_line() {
        let (mut writer, reader) = duplex(64);
        let mut scanner = LineScanner::new(reader, 1024);

        tokio::spawn(async move {
            writer.write_all(b"{\"a\":1}\n{\"a\":2}\n").await.unwrap();
        });

        let first = scanner.next_line().await.unwrap().unwrap();
        assert_eq!(first, b"{\"a\":1}");
        let second = scanner.next_line().await.unwrap().unwrap();
        assert_eq!(second, b"{\"a\":2}");
    }

    #[tokio::test]
    async fn tolerates_objects_split_across_many_small_reads() {
        let (mut writer, reader) = duplex(4); // force tiny chunks
        let mut scanner = LineScanner::new(reader, 4096);

        let payload = b"{\"long_field\":\"value with words\"}\n".to_vec();
        tokio::spawn(async move {
            for chunk in payload.chunks(3) {
                writer.write_all(chunk).await.unwrap();
            }
        });

        let line = scanner.next_line().await.unwrap().unwrap();
        assert_eq!(line, b"{\"long_field\":\"value with words\"}");
    }

    #[tokio::test]
    async fn embedded_escaped_newline_does_not_split_object() {
        let (mut writer, reader) = duplex(64);
        let mut scanner = LineScanner::new(reader, 4096);

        tokio::spawn(async move {
            writer
                .write_all(b"{\"text\":\"line one\\nline two\"}\n")
                .await
                .unwrap();
        });

        let line = scanner.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["text"], "line one\nline two");
    }

    #[tokio::test]
    async fn blank_lines_are_skipped() {
        let (mut writer, reader) = duplex(64);
        let mut scanner = LineScanner::new(reader, 4096);

        tokio::spawn(async move {
            writer.write_all(b"\n\n{\"a\":1}\n").await.unwrap();
        });

        let line = scanner.next_line().await.unwrap().unwrap();
        assert_eq!(line, b"{\"a\":1}");
    }

    #[tokio::test]
    async fn oversize_line_is_fatal_not_truncated() {
        let (mut writer, reader) = duplex(64);
        let mut scanner = LineScanner::new(reader, 8);

        tokio::spawn(async move {
            writer.write_all(b"{\"this_line_is_too_long\":1}\n").await.unwrap();
        });

        let err = scanner.next_line().await.unwrap_err();
        assert!(matches!(err, Error::FrameTooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn clean_eof_with_no_trailing_data_yields_none() {
        let (writer, reader) = duplex(64);
        drop(writer);
        let mut scanner = LineScanner::new(reader, 4096);
        assert_eq!(scanner.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn unexpected_process_exit_reports_a_fatal_process_error() {
        let config = TransportConfig::new("sh")
            .args(["-c", "echo going down >&2; exit 7"]);
        let transport = Transport::start(config).await.unwrap();
        let (_inbound, fatal_rx) = transport.take_reader().await.unwrap();

        let err = fatal_rx.await.unwrap();
        match err {
            Error::Process { exit_code, stderr_tail, .. } => {
                assert_eq!(exit_code, Some(7));
                assert!(stderr_tail.contains("going down"));
            }
            other => panic!("expected Error::Process, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn intentional_close_does_not_report_a_fatal_error() {
        let config = TransportConfig::new("sh").args(["-c", "sleep 5"]);
        let transport = Transport::start(config).await.unwrap();
        let (_inbound, mut fatal_rx) = transport.take_reader().await.unwrap();

        transport.close().await.unwrap();
        assert!(fatal_rx.try_recv().is_err());
    }
}
