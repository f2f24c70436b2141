//! Remote command execution over SSH
//!
//! This crate provides the two leaves every other swarm-harness component is
//! built on: a portable credential token that addresses and authenticates a
//! single node, and an executor abstraction that runs commands on that node
//! either to completion or as a live, cancellable session.

#![warn(missing_docs)]

pub mod command;
pub mod credential;
pub mod error;
pub mod event;
pub mod executor;
pub mod ssh;

pub use command::Command;
pub use credential::{AuthSecret, DecodeError, NodeCredential};
pub use error::{Error, Result};
pub use event::{SessionEvent, SessionEventType};
pub use executor::{
    ExecOutput, ExitStatus, RemoteExecutor, RemoteSession, SessionHandle, SessionInput,
};
pub use ssh::SshExecutor;
