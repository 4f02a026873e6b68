//! Standard-stream transport
//!
//! This module implements [`StdioTransport`], which exchanges
//! newline-delimited JSON over an input stream and an output stream.
//!
//! # Protocol
//!
//! - Outbound messages are written as a single JSON object followed by a
//!   newline (`\n`).
//! - Inbound lines are decoded with [`tokio_util::codec::LinesCodec`]; a
//!   trailing `\r` is stripped and blank lines are skipped.
//! - End of input marks the transport disconnected.
//!
//! # Construction
//!
//! - [`StdioTransport::stdio`] uses the current process's stdin/stdout.
//! - [`StdioTransport::spawn`] starts a child process and talks to it over
//!   its pipes; the child's stderr is logged via `tracing::debug!`.
//! - [`StdioTransport::new`] accepts any `AsyncRead`/`AsyncWrite` pair.
//!
//! `connect` does no I/O: it marks readiness and starts the reader task.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::sync::CancellationToken;

use crate::error::{McpError, Result};
use crate::mcp::transport::{EventQueue, Transport, TransportEvent};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Newline-delimited JSON transport over a pair of byte streams.
///
/// # Examples
///
/// ```no_run
/// use std::collections::HashMap;
/// use mcp_engine::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "mcp-engine".into(),
///     vec!["serve".into()],
///     HashMap::new(),
///     None,
/// )?;
/// # Ok(())
/// # }
/// ```
pub struct StdioTransport {
    /// Input stream, held until `connect` hands it to the reader task.
    reader: std::sync::Mutex<Option<BoxedReader>>,
    /// Output stream; `None` after `disconnect`.
    writer: Mutex<Option<BoxedWriter>>,
    connected: Arc<AtomicBool>,
    events: EventQueue,
    /// Stops the reader task on `disconnect`.
    cancel: CancellationToken,
    /// Child process driven by this transport, if any; used by `Drop`.
    child: Option<Arc<Mutex<Child>>>,
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .field("has_child", &self.child.is_some())
            .finish_non_exhaustive()
    }
}

impl StdioTransport {
    /// Wrap an arbitrary input/output pair.
    ///
    /// # Arguments
    ///
    /// * `reader` - Stream the peer writes to.
    /// * `writer` - Stream the peer reads from.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            reader: std::sync::Mutex::new(Some(Box::new(reader))),
            writer: Mutex::new(Some(Box::new(writer))),
            connected: Arc::new(AtomicBool::new(false)),
            events: EventQueue::new(),
            cancel: CancellationToken::new(),
            child: None,
        }
    }

    /// Transport over this process's stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawn a child process and wire up its stdio pipes.
    ///
    /// The environment of the child is built by first clearing all inherited
    /// variables (`env_clear`) and then applying the caller-supplied `env`
    /// map. If `working_dir` is `Some`, the child's working directory is set
    /// accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] if the process cannot be spawned or
    /// if the stdio pipes are unavailable.
    pub fn spawn(
        executable: PathBuf,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&executable);
        cmd.args(&args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.env_clear().envs(&env);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            McpError::Transport(format!(
                "failed to spawn `{}`: {}",
                executable.display(),
                e
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Transport("child stderr unavailable after spawn".into()))?;

        // stderr is diagnostic only.
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(
                    target: "mcp_engine::mcp::transport::stdio",
                    "child stderr: {}",
                    line
                );
            }
        });

        let mut transport = Self::new(stdout, stdin);
        transport.child = Some(Arc::new(Mutex::new(child)));
        Ok(transport)
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Mark the transport ready and start reading lines.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::Transport`] when called again after a
    /// `disconnect`; the input stream is consumed by the first connection.
    async fn connect(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        let reader = self
            .reader
            .lock()
            .map_err(|_| McpError::Transport("stdio reader lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| McpError::Transport("stdio transport cannot reconnect".to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        self.events.emit(TransportEvent::Connected);

        let connected = Arc::clone(&self.connected);
        let events = self.events.sender();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut lines = FramedRead::new(reader, LinesCodec::new());
            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => break,

                    next = lines.next() => match next {
                        Some(Ok(line)) => {
                            let line = line.trim_end_matches('\r');
                            if line.trim().is_empty() {
                                continue;
                            }
                            if events.send(TransportEvent::Message(line.to_string())).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(
                                target: "mcp_engine::mcp::transport::stdio",
                                "stdio read failed: {}",
                                e
                            );
                            break;
                        }
                        None => {
                            tracing::debug!(
                                target: "mcp_engine::mcp::transport::stdio",
                                "stdio input closed"
                            );
                            break;
                        }
                    },
                }
            }

            if connected.swap(false, Ordering::SeqCst) {
                let _ = events.send(TransportEvent::Disconnected);
            }
        });

        Ok(())
    }

    /// Write `message` followed by a newline and flush.
    ///
    /// # Errors
    ///
    /// Returns [`McpError::NotConnected`] when not connected and
    /// [`McpError::Transport`] if the write fails.
    async fn send(&self, message: String) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(McpError::NotConnected.into());
        }
        debug_assert!(
            !message.contains('\n'),
            "framed payloads must not contain raw newlines"
        );

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(McpError::NotConnected)?;

        let mut line = message;
        line.push('\n');
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| McpError::Transport(format!("stdio write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| McpError::Transport(format!("stdio flush failed: {}", e)))?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.cancel.cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            // Closing our output is how the peer learns we are gone.
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(
                    target: "mcp_engine::mcp::transport::stdio",
                    "stdio shutdown failed: {}",
                    e
                );
            }
        }

        self.events.emit(TransportEvent::Disconnected);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        self.events.stream()
    }
}

impl Drop for StdioTransport {
    /// Best-effort termination of the child process on drop.
    ///
    /// On Unix, sends SIGTERM to the child PID via `libc::kill`. On
    /// non-Unix platforms, calls `start_kill()` on the child handle.
    fn drop(&mut self) {
        self.cancel.cancel();

        let Some(child) = &self.child else {
            return;
        };
        if let Ok(child) = child.try_lock() {
            #[cfg(unix)]
            {
                if let Some(pid) = child.id() {
                    // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
                    unsafe {
                        libc::kill(pid as libc::pid_t, libc::SIGTERM);
                    }
                }
            }
            #[cfg(not(unix))]
            {
                let mut child = child;
                let _ = child.start_kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, DuplexStream};

    async fn next_event(transport: &StdioTransport) -> TransportEvent {
        let mut events = transport.events();
        tokio::time::timeout(Duration::from_secs(2), events.next())
            .await
            .expect("timed out")
            .expect("stream ended")
    }

    /// Build a transport over in-memory pipes.
    ///
    /// Returns `(transport, feed, drain)`: write to `feed` to simulate the
    /// peer; read from `drain` to see what the transport wrote.
    fn piped() -> (StdioTransport, DuplexStream, DuplexStream) {
        let (feed, input) = tokio::io::duplex(4096);
        let (output, drain) = tokio::io::duplex(4096);
        (StdioTransport::new(input, output), feed, drain)
    }

    /// Lines written by the peer arrive as message events without the newline.
    #[tokio::test]
    async fn test_reads_newline_delimited_messages() {
        let (transport, mut feed, _drain) = piped();
        transport.connect().await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Connected);

        feed.write_all(b"{\"a\":1}\r\n\n{\"b\":2}\n").await.unwrap();

        assert_eq!(
            next_event(&transport).await,
            TransportEvent::Message("{\"a\":1}".into())
        );
        assert_eq!(
            next_event(&transport).await,
            TransportEvent::Message("{\"b\":2}".into())
        );
    }

    /// `send` appends exactly one newline.
    #[tokio::test]
    async fn test_send_writes_line() {
        let (transport, _feed, mut drain) = piped();
        transport.connect().await.unwrap();
        transport.send("{\"x\":true}".to_string()).await.unwrap();

        let mut buf = vec![0u8; 11];
        drain.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, b"{\"x\":true}\n");
    }

    /// `send` before `connect` is rejected.
    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let (transport, _feed, _drain) = piped();
        assert!(transport.send("{}".to_string()).await.is_err());
    }

    /// Closing the input marks the transport disconnected.
    #[tokio::test]
    async fn test_eof_disconnects() {
        let (transport, feed, _drain) = piped();
        transport.connect().await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Connected);

        drop(feed);

        assert_eq!(next_event(&transport).await, TransportEvent::Disconnected);
        assert!(!transport.is_connected());
    }

    /// `disconnect` emits one event and blocks further sends; reconnecting
    /// is refused.
    #[tokio::test]
    async fn test_disconnect_then_reconnect_fails() {
        let (transport, _feed, _drain) = piped();
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();

        assert_eq!(next_event(&transport).await, TransportEvent::Connected);
        assert_eq!(next_event(&transport).await, TransportEvent::Disconnected);
        assert!(transport.send("{}".to_string()).await.is_err());
        assert!(transport.connect().await.is_err());
    }

    /// Verifies that `spawn` returns an error when the executable does not
    /// exist.
    #[test]
    fn test_spawn_nonexistent_executable_returns_error() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();
        let result = StdioTransport::spawn(
            PathBuf::from("/nonexistent/binary/that/does/not/exist"),
            vec![],
            HashMap::new(),
            None,
        );
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("failed to spawn"), "unexpected error message: {msg}");
    }

    /// A `cat` child echoes what we send back to us.
    #[tokio::test]
    async fn test_spawn_cat_round_trip() {
        let transport = match StdioTransport::spawn(PathBuf::from("cat"), vec![], HashMap::new(), None)
        {
            Ok(t) => t,
            // Skip if `cat` is unavailable.
            Err(_) => return,
        };
        transport.connect().await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Connected);

        let msg = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#.to_string();
        transport.send(msg.clone()).await.unwrap();
        assert_eq!(next_event(&transport).await, TransportEvent::Message(msg));
    }
}
