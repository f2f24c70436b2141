//! SSH transport via the system `ssh` CLI
//!
//! This backend shells out to `ssh` (and `sshpass` for password-primary
//! credentials) rather than speaking the wire protocol itself: the remote
//! shell daemon is an opaque external service we drive, not reimplement.
//!
//! Host-key checking is relaxed (`StrictHostKeyChecking=no` with a null
//! known-hosts file) because fleet nodes are routinely reimaged and addressed
//! by IP. Private keys are staged into a 0600 temporary file for the lifetime
//! of a single invocation and removed when it completes.

use async_io::Timer;
use async_process::{Child, Stdio};
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use futures_lite::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::command::{Command, shell_escape};
use crate::credential::{AuthSecret, NodeCredential};
use crate::error::{Error, Result};
use crate::event::{SessionEvent, SessionEventType};
use crate::executor::{
    ExecOutput, ExitStatus, RemoteExecutor, RemoteSession, SessionHandle, SessionInput,
};

/// SSH-backed implementation of [`RemoteExecutor`]
#[derive(Debug, Clone)]
pub struct SshExecutor {
    /// Connection establishment timeout passed to ssh
    connect_timeout: Duration,
    /// Optional whole-command timeout for [`RemoteExecutor::exec`]
    command_timeout: Option<Duration>,
}

impl SshExecutor {
    /// Create an executor with the default 10s connect timeout
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: None,
        }
    }

    /// Set the connection establishment timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Bound the total runtime of a blocking [`RemoteExecutor::exec`] call
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// A fully-resolved local invocation: program, argv, environment, and any
/// payload to feed the child's stdin
#[derive(Debug, Clone)]
struct Invocation {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    stdin_payload: Option<String>,
}

/// Normalize private key text the way the token transports it
///
/// Escaped `\n` sequences and CRLF line endings are collapsed to plain
/// newlines and a trailing newline is ensured, since OpenSSH rejects key
/// files without one.
fn normalize_key(key: &str) -> String {
    let mut normalized = key.replace("\\n", "\n").replace("\r\n", "\n");
    let trimmed_len = normalized.trim_end().len();
    normalized.truncate(trimmed_len);
    normalized.push('\n');
    normalized
}

/// Write key material to a 0600 temporary file
fn stage_private_key(key: &str) -> Result<NamedTempFile> {
    use std::io::Write;

    let mut file = NamedTempFile::new().map_err(|e| Error::key_material(e.to_string()))?;
    file.write_all(normalize_key(key).as_bytes())
        .map_err(|e| Error::key_material(e.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::key_material(e.to_string()))?;
    }

    Ok(file)
}

/// Render the remote side of the invocation, wrapping in sudo when the
/// command needs root and the login user does not have it
fn remote_command_string(credential: &NodeCredential, command: &Command) -> String {
    let rendered = command.to_shell_string();

    if !command.is_privileged() || credential.user() == "root" {
        return rendered;
    }

    match credential.sudo_password() {
        // -S reads the password from stdin; an empty -p suppresses the prompt
        // text so it never interleaves with command output.
        Some(_) => format!("sudo -S -p '' {}", rendered),
        // Without a carried password, sudo must be non-interactive or fail
        // fast instead of hanging the session on an invisible prompt.
        None => format!("sudo -n {}", rendered),
    }
}

/// Build the complete local invocation for a command against a node
fn build_invocation(
    credential: &NodeCredential,
    command: &Command,
    key_path: Option<&std::path::Path>,
    connect_timeout: Duration,
    tty: bool,
) -> Invocation {
    let mut args = Vec::new();
    let mut env = Vec::new();

    let mut program = "ssh".to_string();
    if let AuthSecret::Password(password) = credential.auth() {
        // sshpass reads the password from SSHPASS with -e, keeping it out of
        // the process list.
        program = "sshpass".to_string();
        args.push("-e".to_string());
        args.push("ssh".to_string());
        env.push(("SSHPASS".to_string(), password.clone()));
    }

    args.push("-o".to_string());
    args.push("StrictHostKeyChecking=no".to_string());
    args.push("-o".to_string());
    args.push("UserKnownHostsFile=/dev/null".to_string());
    args.push("-o".to_string());
    args.push("LogLevel=ERROR".to_string());
    args.push("-o".to_string());
    args.push(format!("ConnectTimeout={}", connect_timeout.as_secs()));

    if let Some(path) = key_path {
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());
        args.push("-i".to_string());
        args.push(path.to_string_lossy().to_string());
    }

    if credential.get_port() != 22 {
        args.push("-p".to_string());
        args.push(credential.get_port().to_string());
    }

    if tty {
        // Force TTY allocation so cancelling the local process hangs up the
        // remote command instead of orphaning it.
        args.push("-tt".to_string());
    }

    args.push(format!("{}@{}", credential.user(), credential.host()));
    args.push(remote_command_string(credential, command));

    let stdin_payload = if command.is_privileged() && credential.user() != "root" {
        credential.sudo_password().map(|pw| format!("{}\n", pw))
    } else {
        None
    };

    Invocation {
        program,
        args,
        env,
        stdin_payload,
    }
}

/// Whether stderr text points at a rejected credential
fn stderr_indicates_auth_failure(stderr: &str) -> bool {
    stderr.contains("Permission denied")
        || stderr.contains("Authentication fail")
        || stderr.contains("incorrect password")
}

/// Map ssh/sshpass exit conventions onto the error taxonomy
///
/// ssh reserves 255 for its own failures and sshpass reserves 5 for a wrong
/// password; everything else is the remote command's exit code, returned as
/// data. The remote command's exit code shares the channel with sshpass's
/// reserved 5, so that code only counts as an auth failure when stderr
/// corroborates it. A remote command that exits 5 while itself printing
/// "Permission denied" remains indistinguishable from a rejected login.
fn classify_exit(
    host: &str,
    password_auth: bool,
    exit_code: i32,
    stdout: String,
    stderr: String,
) -> Result<ExecOutput> {
    if password_auth && exit_code == 5 && stderr_indicates_auth_failure(&stderr) {
        return Err(Error::AuthenticationRejected {
            host: host.to_string(),
        });
    }

    if exit_code == 255 {
        let reason = stderr.trim().to_string();
        if stderr_indicates_auth_failure(&reason) {
            return Err(Error::AuthenticationRejected {
                host: host.to_string(),
            });
        }
        return Err(Error::ConnectionFailed {
            host: host.to_string(),
            reason: if reason.is_empty() {
                "connection closed".to_string()
            } else {
                reason
            },
        });
    }

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

fn spawn_invocation(invocation: &Invocation, pipe_stdin: bool) -> Result<Child> {
    let mut cmd = async_process::Command::new(&invocation.program);
    cmd.args(&invocation.args);
    for (key, value) in &invocation.env {
        cmd.env(key, value);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(if pipe_stdin {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    cmd.spawn()
        .map_err(|e| Error::spawn_failed(format!("failed to spawn {}: {}", invocation.program, e)))
}

async fn feed_stdin(child: &mut Child, payload: Option<&str>) -> Result<()> {
    if let (Some(payload), Some(mut stdin)) = (payload, child.stdin.take()) {
        stdin.write_all(payload.as_bytes()).await?;
        stdin.flush().await?;
        // Dropping stdin closes the pipe so the remote side sees EOF.
    }
    Ok(())
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn exec(&self, credential: &NodeCredential, command: &Command) -> Result<ExecOutput> {
        let key_file = match credential.auth() {
            AuthSecret::PrivateKey(key) => Some(stage_private_key(key)?),
            AuthSecret::Password(_) => None,
        };

        let invocation = build_invocation(
            credential,
            command,
            key_file.as_ref().map(|f| f.path()),
            self.connect_timeout,
            false,
        );

        debug!(
            host = credential.host(),
            command = %command.to_shell_string(),
            "executing remote command"
        );

        let mut child = spawn_invocation(&invocation, invocation.stdin_payload.is_some())?;
        feed_stdin(&mut child, invocation.stdin_payload.as_deref()).await?;

        let mut stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn_failed("child stdout not captured"))?;
        let mut stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn_failed("child stderr not captured"))?;

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let (out, err) = futures_lite::future::zip(
                stdout_pipe.read_to_string(&mut stdout),
                stderr_pipe.read_to_string(&mut stderr),
            )
            .await;
            out?;
            err?;
            let status = child.status().await?;
            Ok::<_, Error>((stdout, stderr, status))
        };

        let collected = match self.command_timeout {
            Some(timeout) => {
                let host = credential.host().to_string();
                let deadline = async {
                    Timer::after(timeout).await;
                    Err(Error::Timeout {
                        host,
                        seconds: timeout.as_secs(),
                    })
                };
                futures_lite::future::race(collect, deadline).await
            }
            None => collect.await,
        };

        let (stdout, stderr, status) = match collected {
            Ok(parts) => parts,
            Err(err) => {
                // The transport may still be running after a timeout race.
                let _ = child.kill();
                return Err(err);
            }
        };

        classify_exit(
            credential.host(),
            matches!(credential.auth(), AuthSecret::Password(_)),
            status.code().unwrap_or(-1),
            stdout,
            stderr,
        )
    }

    async fn exec_stream(
        &self,
        credential: &NodeCredential,
        command: &Command,
    ) -> Result<RemoteSession> {
        let key_file = match credential.auth() {
            AuthSecret::PrivateKey(key) => Some(stage_private_key(key)?),
            AuthSecret::Password(_) => None,
        };

        let invocation = build_invocation(
            credential,
            command,
            key_file.as_ref().map(|f| f.path()),
            self.connect_timeout,
            true,
        );

        debug!(
            host = credential.host(),
            command = %command.to_shell_string(),
            "opening streaming session"
        );

        // The input pipe stays open for the session's lifetime: after any
        // escalation payload it is handed to the caller as the interactive
        // channel, and only dropping it signals EOF to the remote command.
        let mut child = spawn_invocation(&invocation, true)?;
        let mut stdin_pipe = child.stdin.take();
        if let (Some(payload), Some(stdin)) = (invocation.stdin_payload.as_deref(), stdin_pipe.as_mut())
        {
            stdin.write_all(payload.as_bytes()).await?;
            stdin.flush().await?;
        }

        let child_id = child.id();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());

        let events = SessionEventStream {
            stdout,
            stderr,
            started_sent: false,
            child_id,
        };

        let handle = SshSessionHandle {
            child,
            host: credential.host().to_string(),
            // The key file must outlive the session, not just the spawn.
            _key_file: key_file,
        };

        Ok(RemoteSession {
            events: events.boxed(),
            stdin: stdin_pipe.map(SessionInput::new),
            handle: Box::new(handle),
        })
    }
}

/// Stream of line events from a streaming session
struct SessionEventStream {
    stdout: Option<Lines<BufReader<async_process::ChildStdout>>>,
    stderr: Option<Lines<BufReader<async_process::ChildStderr>>>,
    started_sent: bool,
    child_id: u32,
}

impl Stream for SessionEventStream {
    type Item = SessionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if !self.started_sent {
            self.started_sent = true;
            let event = SessionEvent::new(SessionEventType::Started { pid: self.child_id });
            return Poll::Ready(Some(event));
        }

        if let Some(stdout) = &mut self.stdout {
            match Pin::new(stdout).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(SessionEvent::new_with_data(
                        SessionEventType::Stdout,
                        line,
                    )));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stdout = None;
                }
                Poll::Pending => {}
            }
        }

        if let Some(stderr) = &mut self.stderr {
            match Pin::new(stderr).poll_next(cx) {
                Poll::Ready(Some(Ok(line))) => {
                    return Poll::Ready(Some(SessionEvent::new_with_data(
                        SessionEventType::Stderr,
                        line,
                    )));
                }
                Poll::Ready(Some(Err(_))) | Poll::Ready(None) => {
                    self.stderr = None;
                }
                Poll::Pending => {}
            }
        }

        if self.stdout.is_none() && self.stderr.is_none() {
            return Poll::Ready(None);
        }

        Poll::Pending
    }
}

/// Handle controlling a live SSH session
struct SshSessionHandle {
    child: Child,
    host: String,
    _key_file: Option<NamedTempFile>,
}

#[async_trait]
impl SessionHandle for SshSessionHandle {
    fn pid(&self) -> Option<u32> {
        Some(self.child.id())
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let status = self.child.status().await.map_err(|e| {
            Error::spawn_failed(format!("failed to wait for session to {}: {}", self.host, e))
        })?;

        Ok(ExitStatus {
            code: status.code(),
            #[cfg(unix)]
            signal: {
                use std::os::unix::process::ExitStatusExt;
                status.signal()
            },
        })
    }

    async fn cancel(&mut self) -> Result<()> {
        debug!(host = %self.host, "cancelling remote session");

        #[cfg(unix)]
        {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(self.child.id() as i32);
            signal::kill(pid, Signal::SIGTERM)
                .map_err(|e| Error::SignalFailed {
                    signal: 15,
                    reason: e.to_string(),
                })?;
        }

        #[cfg(not(unix))]
        {
            self.child.kill().map_err(|e| Error::SignalFailed {
                signal: -1,
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}

impl Drop for SshSessionHandle {
    fn drop(&mut self) {
        // A dropped handle must not leave the remote command running.
        let _ = self.child.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "-----BEGIN KEY-----\\nAAAA\\n-----END KEY-----";

    fn key_cred() -> NodeCredential {
        NodeCredential::with_key("10.0.0.5", "deploy", KEY).port(2222)
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key("a\\nb\r\nc"), "a\nb\nc\n");
        assert_eq!(normalize_key("already\nfine\n"), "already\nfine\n");
    }

    #[test]
    fn test_key_invocation_shape() {
        let cmd = Command::new("docker").arg("info");
        let path = std::path::Path::new("/tmp/key");
        let inv = build_invocation(&key_cred(), &cmd, Some(path), Duration::from_secs(10), false);

        assert_eq!(inv.program, "ssh");
        assert!(inv.env.is_empty());
        assert!(inv.stdin_payload.is_none());
        assert!(inv.args.contains(&"BatchMode=yes".to_string()));
        assert!(inv.args.contains(&"-i".to_string()));
        assert!(inv.args.contains(&"/tmp/key".to_string()));
        assert!(inv.args.contains(&"-p".to_string()));
        assert!(inv.args.contains(&"2222".to_string()));
        assert_eq!(inv.args[inv.args.len() - 2], "deploy@10.0.0.5");
        assert_eq!(inv.args[inv.args.len() - 1], "docker info");
    }

    #[test]
    fn test_password_invocation_uses_sshpass_env() {
        let cred = NodeCredential::with_password("10.0.0.5", "root", "pw");
        let cmd = Command::new("docker").arg("info");
        let inv = build_invocation(&cred, &cmd, None, Duration::from_secs(10), false);

        assert_eq!(inv.program, "sshpass");
        assert_eq!(&inv.args[..2], ["-e", "ssh"]);
        assert_eq!(inv.env, vec![("SSHPASS".to_string(), "pw".to_string())]);
        // The password must never appear in the argv.
        assert!(!inv.args.iter().any(|a| a.contains("pw")));
        // BatchMode would make ssh refuse the password prompt.
        assert!(!inv.args.contains(&"BatchMode=yes".to_string()));
    }

    #[test]
    fn test_default_port_omitted() {
        let cred = NodeCredential::with_key("h", "u", KEY);
        let cmd = Command::new("true");
        let inv = build_invocation(&cred, &cmd, None, Duration::from_secs(10), false);
        assert!(!inv.args.contains(&"-p".to_string()));
    }

    #[test]
    fn test_tty_flag_for_streaming() {
        let cmd = Command::new("docker").arg("service").arg("logs").arg("-f").arg("x");
        let inv = build_invocation(&key_cred(), &cmd, None, Duration::from_secs(10), true);
        assert!(inv.args.contains(&"-tt".to_string()));
    }

    #[test]
    fn test_privileged_with_escalation_password() {
        let cred = key_cred().escalation_password("sudo-pw");
        let cmd = Command::new("ufw").arg("allow").arg("2377/tcp").privileged();
        let inv = build_invocation(&cred, &cmd, None, Duration::from_secs(10), false);

        let remote = inv.args.last().unwrap();
        assert_eq!(remote, "sudo -S -p '' ufw allow 2377/tcp");
        assert_eq!(inv.stdin_payload.as_deref(), Some("sudo-pw\n"));
    }

    #[test]
    fn test_privileged_without_password_is_non_interactive() {
        let cmd = Command::new("iptables").arg("-L").privileged();
        let inv = build_invocation(&key_cred(), &cmd, None, Duration::from_secs(10), false);

        assert_eq!(inv.args.last().unwrap(), "sudo -n iptables -L");
        assert!(inv.stdin_payload.is_none());
    }

    #[test]
    fn test_root_needs_no_sudo() {
        let cred = NodeCredential::with_password("h", "root", "pw");
        let cmd = Command::new("iptables").arg("-L").privileged();
        assert_eq!(remote_command_string(&cred, &cmd), "iptables -L");
    }

    #[test]
    fn test_classify_remote_failure_is_data() {
        let out = classify_exit("h", false, 1, String::new(), "no such service".into()).unwrap();
        assert_eq!(out.exit_code, 1);
        assert!(!out.success());
    }

    #[test]
    fn test_classify_transport_errors() {
        let err = classify_exit(
            "h",
            false,
            255,
            String::new(),
            "ssh: connect to host h port 22: Connection refused".into(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));

        let err = classify_exit(
            "h",
            false,
            255,
            String::new(),
            "deploy@h: Permission denied (publickey).".into(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRejected { .. }));

        let err = classify_exit(
            "h",
            true,
            5,
            String::new(),
            "Permission denied, please try again.".into(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRejected { .. }));
    }

    #[test]
    fn test_remote_exit_five_under_password_auth_is_data() {
        // The remote command's own exit code shares the channel with
        // sshpass's reserved 5; without corroborating stderr it is the
        // command's result, not a rejected login.
        let out = classify_exit("h", true, 5, String::new(), "grep: no match".into()).unwrap();
        assert_eq!(out.exit_code, 5);
        assert!(!out.success());
    }

    #[smol_potat::test]
    async fn test_exec_captures_exit_code() {
        // Exercise the child plumbing without a network: `ssh` is absent or
        // unreachable in CI, so just verify the invocation machinery against
        // a local command through the same spawn/collect path.
        let invocation = Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo out; echo err >&2; exit 3".to_string()],
            env: vec![],
            stdin_payload: None,
        };

        let mut child = spawn_invocation(&invocation, false).unwrap();
        let mut stdout = String::new();
        let mut stderr = String::new();
        child.stdout.take().unwrap().read_to_string(&mut stdout).await.unwrap();
        child.stderr.take().unwrap().read_to_string(&mut stderr).await.unwrap();
        let status = child.status().await.unwrap();

        let out = classify_exit("h", false, status.code().unwrap_or(-1), stdout, stderr).unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout_trimmed(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    fn local_stream_parts(
        invocation: &Invocation,
        pipe_stdin: bool,
    ) -> (Child, SessionEventStream) {
        let mut child = spawn_invocation(invocation, pipe_stdin).unwrap();
        let child_id = child.id();
        let stdout = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr = child.stderr.take().map(|s| BufReader::new(s).lines());
        let events = SessionEventStream {
            stdout,
            stderr,
            started_sent: false,
            child_id,
        };
        (child, events)
    }

    #[smol_potat::test]
    async fn test_cancel_terminates_streamed_session() {
        // A long-running local process stands in for the remote command; the
        // stream and handle plumbing is identical either way.
        let invocation = Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo ready; exec sleep 30".to_string()],
            env: vec![],
            stdin_payload: None,
        };
        let (child, mut events) = local_stream_parts(&invocation, false);
        let child_id = child.id();

        let started = events.next().await.unwrap();
        assert_eq!(started.event_type, SessionEventType::Started { pid: child_id });
        let ready = events.next().await.unwrap();
        assert_eq!(ready.event_type, SessionEventType::Stdout);
        assert_eq!(ready.data.as_deref(), Some("ready"));

        let mut handle = SshSessionHandle {
            child,
            host: "local".to_string(),
            _key_file: None,
        };
        handle.cancel().await.unwrap();

        let status = handle.wait().await.unwrap();
        assert!(!status.success());
        #[cfg(unix)]
        assert_eq!(status.signal, Some(15));

        // The process is gone, so the event stream must end too.
        assert!(events.next().await.is_none());
    }

    #[smol_potat::test]
    async fn test_streamed_session_accepts_input() {
        let invocation = Invocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "read line; echo \"got $line\"".to_string()],
            env: vec![],
            stdin_payload: None,
        };
        let (mut child, mut events) = local_stream_parts(&invocation, true);
        let mut input = SessionInput::new(child.stdin.take().unwrap());

        input.write_line("hello").await.unwrap();

        let started = events.next().await.unwrap();
        assert!(matches!(started.event_type, SessionEventType::Started { .. }));
        let echoed = events.next().await.unwrap();
        assert_eq!(echoed.data.as_deref(), Some("got hello"));

        input.close().await.unwrap();
        let status = child.status().await.unwrap();
        assert!(status.success());
    }
}
