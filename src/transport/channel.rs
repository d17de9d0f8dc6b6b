use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace};
use regex::Regex;
use tokio::sync::mpsc::{Receiver, Sender};

use super::{ANY_PROMPT, PromptReader, Session};
use crate::error::ConnectError;

/// Quiet period after which pending output is considered complete.
const PROMPT_QUIET: Duration = Duration::from_millis(500);

/// Upper bound for a prompt probe.
const PROMPT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns raw shell bytes into text across reads.
///
/// A multibyte character cut by a read boundary is held back until the rest
/// of it arrives. Invalid bytes still become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Carry {
    pending: Vec<u8>,
}

impl Utf8Carry {
    pub(crate) fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let rest = self.pending.split_off(self.pending.len() - keep);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = rest;
        text
    }
}

/// Length of a truncated UTF-8 sequence at the end of `bytes`.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 != 0x80 {
            let needed = match byte {
                0xC0..=0xDF => 2,
                0xE0..=0xEF => 3,
                0xF0..=0xF7 => 4,
                _ => 1,
            };
            return if needed > back { back } else { 0 };
        }
    }
    0
}

/// Session backed by a pair of string channels to an I/O pump task.
///
/// Both the SSH and the Telnet transport spawn a task that owns the socket
/// and forwards decoded text through `recv`. Dropping the sender ends that
/// task.
pub struct ChannelSession {
    label: String,
    sender: Option<Sender<String>>,
    recv: Receiver<String>,
    alive: Arc<AtomicBool>,
    line_ending: &'static str,
    last_prompt: String,
}

impl ChannelSession {
    pub(crate) fn new(
        label: String,
        sender: Sender<String>,
        recv: Receiver<String>,
        alive: Arc<AtomicBool>,
        line_ending: &'static str,
    ) -> Self {
        Self {
            label,
            sender: Some(sender),
            recv,
            alive,
            line_ending,
            last_prompt: String::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn write_line(&mut self, line: &str) -> Result<(), ConnectError> {
        let sender = self.sender.as_ref().ok_or(ConnectError::ConnectClosedError)?;
        sender.send(format!("{line}{}", self.line_ending)).await?;
        Ok(())
    }

    /// Reads whatever the device prints until it goes quiet.
    async fn read_pending(&mut self, reader: &mut PromptReader) -> Result<(), ConnectError> {
        loop {
            match tokio::time::timeout(PROMPT_QUIET, self.recv.recv()).await {
                Ok(Some(data)) => {
                    trace!("{:?}", data);
                    reader.push(&data);
                    if ANY_PROMPT.is_match(reader.tail()) {
                        return Ok(());
                    }
                }
                Ok(None) => return Err(ConnectError::ChannelDisconnectError),
                Err(_) => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Session for ChannelSession {
    async fn find_prompt(&mut self) -> Result<String, ConnectError> {
        let mut reader = PromptReader::new();
        self.read_pending(&mut reader).await?;
        if ANY_PROMPT.is_match(reader.tail()) {
            self.last_prompt = reader.tail().trim().to_string();
            return Ok(self.last_prompt.clone());
        }
        if reader.is_empty() && !self.last_prompt.is_empty() {
            return Ok(self.last_prompt.clone());
        }

        // Nothing recognizable yet: ask the device to redraw its prompt.
        debug!("{} probing prompt", self.label);
        self.write_line("").await?;
        let probe = tokio::time::timeout(PROMPT_PROBE_TIMEOUT, async {
            loop {
                match self.recv.recv().await {
                    Some(data) => {
                        reader.push(&data);
                        if ANY_PROMPT.is_match(reader.tail()) {
                            return Ok(());
                        }
                    }
                    None => return Err(ConnectError::ChannelDisconnectError),
                }
            }
        })
        .await;

        match probe {
            Ok(Ok(())) => {
                self.last_prompt = reader.tail().trim().to_string();
                Ok(self.last_prompt.clone())
            }
            Ok(Err(err)) => Err(err),
            Err(_) => match reader.last_line() {
                Some(line) => {
                    self.last_prompt = line.to_string();
                    Ok(self.last_prompt.clone())
                }
                None => Err(ConnectError::ExecTimeout(
                    "waiting for initial prompt".to_string(),
                )),
            },
        }
    }

    async fn send(
        &mut self,
        command: &str,
        read_timeout: Duration,
        prompt: &Regex,
    ) -> Result<String, ConnectError> {
        // Discard output nobody asked for.
        while self.recv.try_recv().is_ok() {}

        self.write_line(command).await?;

        let mut reader = PromptReader::new();
        let recv = &mut self.recv;
        let result = tokio::time::timeout(read_timeout, async {
            loop {
                match recv.recv().await {
                    Some(data) => {
                        trace!("{:?}", data);
                        reader.push(&data);
                        if reader.prompt_seen(command, prompt) {
                            return Ok(());
                        }
                    }
                    None => return Err(ConnectError::ChannelDisconnectError),
                }
            }
        })
        .await;

        match result {
            Ok(Ok(())) => {
                self.last_prompt = reader.tail().trim().to_string();
                Ok(reader.output(command))
            }
            Ok(Err(err)) => Err(err),
            Err(_) => Err(ConnectError::ExecTimeout(reader.all().to_string())),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
            && self.sender.as_ref().is_some_and(|sender| !sender.is_closed())
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        debug!("Closing session {}", self.label);
        self.recv.close();

        if self.is_alive() {
            if let Err(e) = self.write_line("exit").await {
                debug!("Failed to send exit command: {:?}", e);
            }
            // Give the device a moment to process the exit.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        self.sender = None;
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn character_split_across_reads_is_joined() {
        let bytes = "温度 21°C".as_bytes();
        let mut carry = Utf8Carry::default();

        let first = carry.decode(&bytes[..2]);
        let second = carry.decode(&bytes[2..]);

        assert_eq!(first, "");
        assert_eq!(format!("{first}{second}"), "温度 21°C");
    }

    #[test]
    fn invalid_bytes_are_not_held_back() {
        let mut carry = Utf8Carry::default();
        assert_eq!(carry.decode(&[b'o', b'k', 0xFF]), "ok\u{FFFD}");
        assert_eq!(carry.decode(b"#"), "#");
    }

    fn session() -> (ChannelSession, mpsc::Receiver<String>, mpsc::Sender<String>) {
        let (to_device, from_user) = mpsc::channel(16);
        let (to_user, from_device) = mpsc::channel(16);
        let session = ChannelSession::new(
            "test".to_string(),
            to_device,
            from_device,
            Arc::new(AtomicBool::new(true)),
            "\n",
        );
        (session, from_user, to_user)
    }

    #[tokio::test]
    async fn send_returns_output_between_echo_and_prompt() {
        let (mut session, mut device_in, device_out) = session();
        let prompt = Regex::new(crate::config::SHELL_PROMPT_PATTERN).unwrap();

        let device = tokio::spawn(async move {
            let line = device_in.recv().await.unwrap();
            assert_eq!(line, "ls /tmp\n");
            device_out.send("ls /tmp\r\n".to_string()).await.unwrap();
            device_out
                .send("openwrt.bin\r\nroot@OpenWrt:/tmp# ".to_string())
                .await
                .unwrap();
            device_out
        });

        let output = session
            .send("ls /tmp", Duration::from_secs(5), &prompt)
            .await
            .expect("send");
        assert_eq!(output, "openwrt.bin");
        drop(device.await.unwrap());
    }

    #[tokio::test]
    async fn send_times_out_without_prompt() {
        let (mut session, _device_in, device_out) = session();
        let prompt = Regex::new(crate::config::SHELL_PROMPT_PATTERN).unwrap();
        device_out.send("sleep 100\r\n".to_string()).await.unwrap();

        let err = session
            .send("sleep 100", Duration::from_millis(50), &prompt)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn find_prompt_uses_pending_banner() {
        let (mut session, _device_in, device_out) = session();
        device_out
            .send("\r\nBusyBox v1.25\r\nXiaoQiang login: ".to_string())
            .await
            .unwrap();

        let prompt = session.find_prompt().await.expect("prompt");
        assert_eq!(prompt, "XiaoQiang login:");
    }

    #[tokio::test]
    async fn closed_session_is_not_alive() {
        let (mut session, _device_in, _device_out) = session();
        assert!(session.is_alive());
        session.close().await.expect("close");
        assert!(!session.is_alive());
    }
}
