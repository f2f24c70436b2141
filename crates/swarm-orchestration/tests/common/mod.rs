//! Shared test support: a scripted in-memory executor
//!
//! Commands are matched by substring against `host::rendered-command` and
//! every issued command is logged in order, so tests can script remote
//! behavior per node and assert on exactly what was sent.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream;
use remote_executor::{
    Command, Error, ExecOutput, ExitStatus, NodeCredential, RemoteExecutor, RemoteSession,
    Result, SessionHandle,
};

/// A scripted response for one matched command
#[derive(Clone)]
pub enum FakeResponse {
    /// Return this captured output
    Output {
        /// Remote exit code
        exit_code: i32,
        /// Captured stdout
        stdout: String,
        /// Captured stderr
        stderr: String,
    },
    /// Fail at the transport level
    Transport(String),
}

/// Shorthand for a successful output response
pub fn ok(stdout: &str) -> FakeResponse {
    FakeResponse::Output {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Shorthand for a failed output response
pub fn fail(exit_code: i32, stderr: &str) -> FakeResponse {
    FakeResponse::Output {
        exit_code,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

struct Rule {
    pattern: String,
    responses: VecDeque<FakeResponse>,
    last: FakeResponse,
}

/// In-memory [`RemoteExecutor`] driven by substring-matched rules
#[derive(Default)]
pub struct FakeExecutor {
    rules: Mutex<Vec<Rule>>,
    log: Mutex<Vec<String>>,
}

impl FakeExecutor {
    /// Create an executor with no rules; unmatched commands succeed silently
    pub fn new() -> Self {
        Self::default()
    }

    /// Respond to every command matching `pattern` with `response`
    pub fn on(&self, pattern: &str, response: FakeResponse) {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses: VecDeque::new(),
            last: response,
        });
    }

    /// Respond to successive matches with successive responses; the final
    /// response repeats once the sequence is exhausted
    pub fn on_sequence(&self, pattern: &str, responses: Vec<FakeResponse>) {
        let mut responses: VecDeque<FakeResponse> = responses.into();
        let last = responses.back().cloned().expect("sequence must be non-empty");
        responses.pop_back();
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            responses,
            last,
        });
    }

    /// Every issued command, as `host::rendered-command`, in order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// How many issued commands contain `pattern`
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.log().iter().filter(|entry| entry.contains(pattern)).count()
    }

    /// Index of the first issued command containing `pattern`
    pub fn first_index(&self, pattern: &str) -> Option<usize> {
        self.log().iter().position(|entry| entry.contains(pattern))
    }

    fn respond(&self, key: &str) -> FakeResponse {
        let mut rules = self.rules.lock().unwrap();
        for rule in rules.iter_mut() {
            if key.contains(&rule.pattern) {
                return rule.responses.pop_front().unwrap_or_else(|| rule.last.clone());
            }
        }
        ok("")
    }
}

#[async_trait]
impl RemoteExecutor for FakeExecutor {
    async fn exec(&self, credential: &NodeCredential, command: &Command) -> Result<ExecOutput> {
        let key = format!("{}::{}", credential.host(), command.to_shell_string());
        self.log.lock().unwrap().push(key.clone());

        match self.respond(&key) {
            FakeResponse::Output {
                exit_code,
                stdout,
                stderr,
            } => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
            }),
            FakeResponse::Transport(reason) => Err(Error::ConnectionFailed {
                host: credential.host().to_string(),
                reason,
            }),
        }
    }

    async fn exec_stream(
        &self,
        credential: &NodeCredential,
        command: &Command,
    ) -> Result<RemoteSession> {
        let key = format!("{}::{}", credential.host(), command.to_shell_string());
        self.log.lock().unwrap().push(key);

        Ok(RemoteSession {
            events: Box::pin(stream::empty()),
            stdin: None,
            handle: Box::new(NullHandle),
        })
    }
}

struct NullHandle;

#[async_trait]
impl SessionHandle for NullHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(ExitStatus {
            code: Some(0),
            #[cfg(unix)]
            signal: None,
        })
    }

    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A key-authenticated credential for tests
pub fn node(host: &str) -> NodeCredential {
    NodeCredential::with_key(host, "deploy", "-----BEGIN KEY-----\ntest\n-----END KEY-----")
}
