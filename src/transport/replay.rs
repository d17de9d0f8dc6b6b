use std::io;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use regex::Regex;

use super::{OpenRequest, Session, Transport};
use crate::error::ConnectError;
use crate::session::SessionReplayer;

/// Serves sessions from a recording instead of a network device.
///
/// Addresses that never reached `connection_established` in the recording
/// are refused, so failover paths replay as well.
#[derive(Debug, Clone)]
pub struct ReplayTransport {
    replayer: SessionReplayer,
}

impl ReplayTransport {
    pub fn new(replayer: SessionReplayer) -> Self {
        Self { replayer }
    }

    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        Ok(Self::new(SessionReplayer::from_jsonl(jsonl)?))
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn open(&self, request: &OpenRequest) -> Result<Box<dyn Session>, ConnectError> {
        match self.replayer.session_for(&request.address) {
            Some((replayer, ctx)) => {
                debug!("Replaying recorded session for {}", ctx.address);
                Ok(Box::new(ReplaySession {
                    replayer,
                    prompt: ctx.prompt,
                    alive: true,
                }))
            }
            None => Err(ConnectError::IoError(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("no recorded session for {}", request.address),
            ))),
        }
    }
}

/// One replayed session.
#[derive(Debug)]
pub struct ReplaySession {
    replayer: SessionReplayer,
    prompt: String,
    alive: bool,
}

#[async_trait]
impl Session for ReplaySession {
    async fn find_prompt(&mut self) -> Result<String, ConnectError> {
        if !self.alive {
            return Err(ConnectError::ConnectClosedError);
        }
        if let Some(prompt) = self.replayer.next_prompt() {
            self.prompt = prompt;
        }
        Ok(self.prompt.clone())
    }

    async fn send(
        &mut self,
        command: &str,
        _read_timeout: Duration,
        _prompt: &Regex,
    ) -> Result<String, ConnectError> {
        if !self.alive {
            return Err(ConnectError::ConnectClosedError);
        }
        let (output, _) = self.replayer.replay_next(command)?;
        Ok(output)
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.alive = false;
        Ok(())
    }
}
