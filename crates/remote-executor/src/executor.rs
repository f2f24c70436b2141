//! The remote execution seam every higher-level component is built on

use async_trait::async_trait;
use futures::io::{AsyncWrite, AsyncWriteExt};
use futures::stream::BoxStream;

use crate::command::Command;
use crate::credential::NodeCredential;
use crate::error::Result;
use crate::event::SessionEvent;

/// Captured result of a completed remote command
///
/// A non-zero exit code is data, not an error: callers decide what constitutes
/// failure for their operation.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
    /// Remote exit code
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns true if the remote command exited zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout with surrounding whitespace trimmed
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Exit status of a streamed session
#[derive(Debug, Clone)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,
    /// Signal that terminated the process (Unix only)
    #[cfg(unix)]
    pub signal: Option<i32>,
}

impl ExitStatus {
    /// Returns true if the process exited successfully (code 0)
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A handle to control a live remote session
#[async_trait]
pub trait SessionHandle: Send + Sync {
    /// Local pid of the transport process, if known
    fn pid(&self) -> Option<u32>;

    /// Wait for the session to complete and return its exit status
    async fn wait(&mut self) -> Result<ExitStatus>;

    /// Cancel the session
    ///
    /// Cancellation terminates the remote process's session, not merely the
    /// local read side: the transport allocates a TTY so tearing the session
    /// down hangs up the remote command.
    async fn cancel(&mut self) -> Result<()>;
}

/// Writer feeding a live session's remote stdin
///
/// Present on a session whenever the transport left the input channel open,
/// so interactive remote commands can be driven byte-for-byte. Dropping the
/// writer closes the pipe and the remote command sees EOF.
pub struct SessionInput {
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl SessionInput {
    /// Wrap an async writer as session input
    pub fn new(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    /// Write raw bytes to the remote stdin and flush
    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write one newline-terminated line
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        self.write_all(line.as_bytes()).await?;
        self.write_all(b"\n").await
    }

    /// Close the channel, signalling EOF to the remote command
    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await?;
        Ok(())
    }
}

/// A live, cancellable remote session
pub struct RemoteSession {
    /// Line-oriented events from the remote command
    pub events: BoxStream<'static, SessionEvent>,
    /// Input channel to the remote command, when the transport provides one
    pub stdin: Option<SessionInput>,
    /// Control handle for the session
    pub handle: Box<dyn SessionHandle>,
}

/// Executes commands on remote nodes
///
/// Every call establishes an independent, freshly-authenticated connection;
/// implementations hold no session cache. That trades connection-setup
/// overhead for the absence of a stale-session class of bugs.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command to completion, capturing stdout, stderr and exit code
    ///
    /// Fails only on transport-level problems (unreachable host, rejected
    /// authentication, configured timeout); a non-zero remote exit code is
    /// returned as data.
    async fn exec(&self, credential: &NodeCredential, command: &Command) -> Result<ExecOutput>;

    /// Run a long-lived command as a streaming session
    ///
    /// The returned session stays attached until the remote command exits or
    /// the caller cancels through the handle. Output arrives as line events;
    /// input, when the transport supports it, goes through the session's
    /// stdin writer, so an interactive remote shell is drivable end to end.
    async fn exec_stream(
        &self,
        credential: &NodeCredential,
        command: &Command,
    ) -> Result<RemoteSession>;
}
