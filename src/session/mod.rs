//! Device connector: failover connect, login negotiation and command execution.
//!
//! A [`Connector`] owns at most one live [`Session`] at a time. Sessions are
//! opened lazily, across an ordered list of candidate addresses, and torn
//! down explicitly by [`Connector::disconnect`].
//!
//! # Main Components
//!
//! - [`Connector`] - One logical device endpoint and its session
//! - [`LoginState`] - Bounded login prompt handshake
//! - [`ExecOptions`] / [`ExecOutput`] - Command execution knobs and results
//! - [`SessionRecorder`] - Structured event log injected into the connector

use async_trait::async_trait;
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::error::ConnectError;
use crate::params::{ConnectorParams, DeviceType};
use crate::transport::{OpenRequest, Session, Transport};

pub use exec::classify_response;
pub use login::{LoginReply, LoginState, LoginTransition};
pub use recording::{
    NormalizeOptions, ReplayContext, SessionEvent, SessionRecordEntry, SessionRecordLevel,
    SessionRecorder, SessionReplayer,
};

/// Prompt a command read waits for.
static SHELL_PROMPT: Lazy<Regex> = Lazy::new(|| match Regex::new(config::SHELL_PROMPT_PATTERN) {
    Ok(re) => re,
    Err(err) => panic!("invalid SHELL_PROMPT regex: {err}"),
});

/// Prompt a login reply waits for: a shell, or the next credential prompt.
static LOGIN_REPLY_PROMPT: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"(?i)(?:[#$>]|login:|username:|password:)\s*$") {
            Ok(re) => re,
            Err(err) => panic!("invalid LOGIN_REPLY_PROMPT regex: {err}"),
        },
    );

/// Pause source for backoff and settle delays.
///
/// The connector never calls `tokio::time::sleep` directly, so timing can be
/// observed in tests without real waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// One logical device endpoint.
pub struct Connector {
    params: ConnectorParams,
    addresses: Vec<String>,
    active_hostname: String,
    session: Option<Box<dyn Session>>,
    default_timeout: Duration,
    device_type: DeviceType,
    transport: Arc<dyn Transport>,
    recorder: SessionRecorder,
    sleeper: Arc<dyn Sleeper>,
    retry_backoff: Duration,
    settle_delay: Duration,
}

/// Per-call knobs for [`Connector::exec_command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Read bound for the prompt; the connector default when `None`.
    pub timeout: Option<Duration>,
    /// Exit statuses accepted as success.
    pub exit_codes: Vec<i32>,
    /// Fail with `UnexpectedExit` when the status is not accepted.
    pub raise_on_unexpected: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            exit_codes: vec![0],
            raise_on_unexpected: true,
        }
    }
}

impl ExecOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_exit_codes(mut self, exit_codes: Vec<i32>) -> Self {
        self.exit_codes = exit_codes;
        self
    }

    pub fn raise_on_unexpected(mut self, raise: bool) -> Self {
        self.raise_on_unexpected = raise;
        self
    }
}

/// Response text and the exit status inferred from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExecOutput {
    pub output: String,
    pub exit_status: i32,
}

mod connector;
mod exec;
mod login;
mod recording;
