#![allow(unused)]

//! # contract: seams between the pipeline and the outside world
//!
//! The pipeline never talks to SSH, sockets or the wall clock directly. It goes
//! through the traits in this module so the binary crate can plug in real
//! adapters and tests can plug in `mockall` mocks.
//!
//! ## Interface
//! - [`RemoteTransport`] opens one authenticated [`RemoteSession`] per logical
//!   operation. Sessions are never shared between operations.
//! - [`RemoteSession`] exposes the few remote file and exec operations delivery
//!   needs. Callers must call [`RemoteSession::close`] on every exit path.
//! - [`ReachabilityProbe`] is the bare preflight check.
//! - [`Clock`] supplies the date stamped into front matter and remote paths.
//!
//! ## Mocking & Testing
//! - Every trait is annotated for `mockall`; mocks are exported with the
//!   `test-export-mocks` feature (on by default).

use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::Path;
use std::time::Duration;

use mockall::{automock, predicate::*};

use crate::config::RemoteTarget;
use crate::error::SessionError;

/// Captured result of a remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Opens authenticated sessions against a [`RemoteTarget`].
///
/// Implementations resolve the credential on every call, so a missing or
/// unreadable key surfaces as a per-operation [`SessionError::Credential`].
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>, SessionError>;
}

/// One authenticated connection, scoped to a single logical operation.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RemoteSession: Send {
    /// Copy a local file to `remote`, creating or truncating it.
    async fn put(&mut self, local: &Path, remote: &str) -> Result<(), SessionError>;

    async fn exists(&mut self, remote: &str) -> Result<bool, SessionError>;

    /// Rename `from` onto `to`, replacing `to` if present.
    async fn rename(&mut self, from: &str, to: &str) -> Result<(), SessionError>;

    async fn remove(&mut self, remote: &str) -> Result<(), SessionError>;

    /// Run `command` and wait for it to exit.
    async fn exec(&mut self, command: &str) -> Result<ExecOutput, SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Transport-level reachability check. Never fails; any error is `false`.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn reachable(&self, host: &str, port: u16, timeout: Duration) -> bool;
}

#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Local wall-clock date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Always reports the same date.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}
