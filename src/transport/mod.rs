//! Interactive terminal sessions consumed by the connector.
//!
//! The connector never speaks a wire protocol itself. It asks a [`Transport`]
//! to open a [`Session`] against one address and then drives that session
//! through prompts. Concrete transports live in the submodules:
//!
//! - [`SshTransport`] - password SSH with a PTY shell (russh / async-ssh2-tokio)
//! - [`TelnetTransport`] - raw Telnet with minimal option negotiation
//! - [`FallbackTransport`] - SSH first, Telnet if SSH cannot be opened
//! - [`ReplayTransport`] - offline sessions served from a recording

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ConnectError;
use crate::params::{ConnectorParams, DeviceType, TransportKind};

pub use channel::ChannelSession;
pub use fallback::FallbackTransport;
pub use replay::{ReplaySession, ReplayTransport};
pub use security::{SecurityLevel, SshProfile};
pub use ssh::{SshSession, SshTransport};
pub use telnet::{TelnetDecoder, TelnetTransport};

mod channel;
mod fallback;
mod replay;
mod security;
mod ssh;
mod telnet;

/// Escape sequences emitted by device shells (colors, cursor moves).
static ANSI_ESCAPE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]|\x1b[()][A-Z0-9]") {
            Ok(re) => re,
            Err(err) => panic!("invalid ANSI_ESCAPE regex: {err}"),
        },
    );

/// Backspace runs some busybox shells emit when redrawing the input line.
static BACKSPACE_RUN: Lazy<Regex> = Lazy::new(|| match Regex::new(r"\u{8}+(\s+\u{8}+)*") {
    Ok(re) => re,
    Err(err) => panic!("invalid BACKSPACE_RUN regex: {err}"),
});

/// Anything that looks like a device waiting for input.
pub(crate) static ANY_PROMPT: Lazy<Regex> = Lazy::new(|| match Regex::new(r"[>#$%:\]]\s*$") {
    Ok(re) => re,
    Err(err) => panic!("invalid ANY_PROMPT regex: {err}"),
});

/// Everything a transport needs to open one session.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub address: String,
    pub timeout: Duration,
    pub device_type: DeviceType,
    pub params: ConnectorParams,
}

/// Opens sessions against a single address.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, request: &OpenRequest) -> Result<Box<dyn Session>, ConnectError>;
}

/// A live interactive terminal channel.
#[async_trait]
pub trait Session: Send + Sync {
    /// Returns the prompt line the device is currently sitting at.
    async fn find_prompt(&mut self) -> Result<String, ConnectError>;

    /// Sends `command` and reads until the last line matches `prompt`.
    ///
    /// The returned text has the echoed command and the trailing prompt
    /// removed. Fails with [`ConnectError::ExecTimeout`] if `prompt` is not
    /// seen within `read_timeout`.
    async fn send(
        &mut self,
        command: &str,
        read_timeout: Duration,
        prompt: &Regex,
    ) -> Result<String, ConnectError>;

    fn is_alive(&self) -> bool;

    async fn close(&mut self) -> Result<(), ConnectError>;
}

/// Builds the transport selected by the parameters.
pub fn transport_for(kind: TransportKind, security: SecurityLevel) -> Arc<dyn Transport> {
    let profile = SshProfile::new(security);
    match kind {
        TransportKind::Telnet => Arc::new(TelnetTransport::new()),
        TransportKind::Ssh => Arc::new(SshTransport::new(profile)),
        TransportKind::SshTelnetFallback => Arc::new(FallbackTransport::new(profile)),
    }
}

/// Accumulates shell output until a prompt shows up on the last line.
#[derive(Debug, Default)]
pub(crate) struct PromptReader {
    text: String,
}

impl PromptReader {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &str) {
        let clean = ANSI_ESCAPE.replace_all(chunk, "");
        let clean = BACKSPACE_RUN.replace_all(&clean, "");
        self.text.push_str(&clean.replace('\r', ""));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Text after the last newline, which is where a prompt sits.
    pub(crate) fn tail(&self) -> &str {
        match self.text.rfind('\n') {
            Some(pos) => &self.text[pos + 1..],
            None => &self.text,
        }
    }

    /// Last line with visible content.
    pub(crate) fn last_line(&self) -> Option<&str> {
        self.text
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
    }

    /// True once the tail matches `prompt`.
    ///
    /// While the first line is still (part of) the echoed command, the echo
    /// itself is not taken for a prompt. Shells that do not echo are matched
    /// right away.
    pub(crate) fn prompt_seen(&self, command: &str, prompt: &Regex) -> bool {
        if self.echo_pending(command) {
            return false;
        }
        prompt.is_match(self.tail())
    }

    fn echo_pending(&self, command: &str) -> bool {
        let text = self.text.trim_start_matches('\n');
        !command.is_empty()
            && !text.contains('\n')
            && (text.starts_with(command) || command.starts_with(text))
    }

    pub(crate) fn all(&self) -> &str {
        &self.text
    }

    /// Output with the echoed command and trailing prompt line removed.
    pub(crate) fn output(&self, command: &str) -> String {
        let mut content = self.text.as_str();
        if !command.is_empty()
            && let Some((first, rest)) = content.trim_start_matches('\n').split_once('\n')
            && first.trim_end() == command
        {
            content = rest;
        }
        let content = match content.rfind('\n') {
            Some(pos) => &content[..pos],
            None => "",
        };
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shell_prompt() -> Regex {
        Regex::new(crate::config::SHELL_PROMPT_PATTERN).unwrap()
    }

    #[test]
    fn reader_strips_echo_and_prompt() {
        let mut reader = PromptReader::new();
        reader.push("uname -a\r\n");
        reader.push("Linux OpenWrt 5.15.137\r\nroot@OpenWrt:~# ");

        assert!(reader.prompt_seen("uname -a", &shell_prompt()));
        assert_eq!(reader.output("uname -a"), "Linux OpenWrt 5.15.137");
        assert_eq!(reader.tail(), "root@OpenWrt:~# ");
    }

    #[test]
    fn echoed_command_does_not_count_as_prompt() {
        let mut reader = PromptReader::new();
        reader.push("echo $HOME");

        assert!(!reader.prompt_seen("echo $HOME", &shell_prompt()));
        reader.push("\r\n/root\r\nroot@OpenWrt:~# ");
        assert!(reader.prompt_seen("echo $HOME", &shell_prompt()));
        assert_eq!(reader.output("echo $HOME"), "/root");
    }

    #[test]
    fn prompt_without_echo_is_accepted() {
        let mut reader = PromptReader::new();
        reader.push("root@OpenWrt:/tmp# ");

        assert!(reader.prompt_seen("cd /tmp", &shell_prompt()));
        assert_eq!(reader.output("cd /tmp"), "");
    }

    #[test]
    fn output_starting_with_command_name_is_kept_without_echo() {
        let mut reader = PromptReader::new();
        reader.push("uptime: 3 days\r\nroot@OpenWrt:~# ");

        assert!(reader.prompt_seen("uptime", &shell_prompt()));
        assert_eq!(reader.output("uptime"), "uptime: 3 days");
    }

    #[test]
    fn partial_echo_is_not_a_prompt() {
        let mut reader = PromptReader::new();
        reader.push("echo $");

        assert!(!reader.prompt_seen("echo $HOME", &shell_prompt()));
    }

    #[test]
    fn ansi_sequences_are_removed() {
        let mut reader = PromptReader::new();
        reader.push("\x1b[0;32mroot@router\x1b[0m:~# ");

        assert_eq!(reader.tail(), "root@router:~# ");
        assert!(ANY_PROMPT.is_match(reader.tail()));
    }

    #[test]
    fn command_without_output_yields_empty_text() {
        let mut reader = PromptReader::new();
        reader.push("cd /tmp\r\nroot@XiaoQiang:/tmp# ");

        assert_eq!(reader.output("cd /tmp"), "");
        assert_eq!(reader.last_line(), Some("root@XiaoQiang:/tmp#"));
    }

    #[test]
    fn login_banner_matches_generic_prompt() {
        let mut reader = PromptReader::new();
        reader.push("\r\nXiaoQiang login: ");
        assert!(ANY_PROMPT.is_match(reader.tail()));
        assert!(!reader.is_empty());
    }
}
