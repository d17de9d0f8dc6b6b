use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_ssh2_tokio::client::{AuthMethod, Client};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use russh::ChannelMsg;
use tokio::sync::mpsc;

use super::channel::Utf8Carry;
use super::{ChannelSession, OpenRequest, Session, SshProfile, Transport};
use crate::error::ConnectError;

/// Password-authenticated SSH with an interactive PTY shell.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    profile: SshProfile,
}

impl SshTransport {
    pub fn new(profile: SshProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &SshProfile {
        &self.profile
    }
}

/// An open SSH shell. Keeps the client alive for as long as the shell is used.
pub struct SshSession {
    client: Client,
    channel: ChannelSession,
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, request: &OpenRequest) -> Result<Box<dyn Session>, ConnectError> {
        let params = &request.params;
        let port = params.ssh_port();
        let device_addr = format!("{}@{}:{}", params.username, request.address, port);

        let client = tokio::time::timeout(
            request.timeout,
            Client::connect_with_config(
                (request.address.clone(), port),
                &params.username,
                AuthMethod::with_password(&params.password),
                self.profile.server_check.clone(),
                self.profile.client_config(),
            ),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout(device_addr.clone()))??;
        debug!("{} TCP connection successful", device_addr);

        let mut channel = client.get_channel().await?;
        channel
            .request_pty(false, "xterm", 800, 600, 0, 0, &[])
            .await?;
        channel.request_shell(false).await?;
        debug!("{} Shell request successful", device_addr);

        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);
        let alive = Arc::new(AtomicBool::new(true));

        let io_alive = alive.clone();
        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut utf8 = Utf8Carry::default();
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => match data {
                        Some(data) => {
                            if let Err(e) = channel.data(data.as_bytes()).await {
                                debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                                break;
                            }
                        }
                        None => {
                            let _ = channel.eof().await;
                            break;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            let text = utf8.decode(data);
                            if !text.is_empty() && sender_to_user.send(text).await.is_err() {
                                debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                break;
                            }
                        }
                        Some(ChannelMsg::ExitStatus { exit_status }) => {
                            debug!("{} Shell exited with status code: {}", io_task_device_addr, exit_status);
                            let _ = channel.eof().await;
                            break;
                        }
                        Some(ChannelMsg::Eof) | None => {
                            debug!("{} Shell sent EOF.", io_task_device_addr);
                            break;
                        }
                        Some(_) => {}
                    },
                }
            }
            io_alive.store(false, Ordering::SeqCst);
            debug!("{} SSH I/O task ended.", io_task_device_addr);
        });

        Ok(Box::new(SshSession {
            client,
            channel: ChannelSession::new(
                device_addr,
                sender_to_shell,
                receiver_from_shell,
                alive,
                request.device_type.line_ending(),
            ),
        }))
    }
}

#[async_trait]
impl Session for SshSession {
    async fn find_prompt(&mut self) -> Result<String, ConnectError> {
        self.channel.find_prompt().await
    }

    async fn send(
        &mut self,
        command: &str,
        read_timeout: Duration,
        prompt: &Regex,
    ) -> Result<String, ConnectError> {
        self.channel.send(command, read_timeout, prompt).await
    }

    fn is_alive(&self) -> bool {
        !self.client.is_closed() && self.channel.is_alive()
    }

    async fn close(&mut self) -> Result<(), ConnectError> {
        self.channel.close().await?;
        if let Err(e) = self.client.disconnect().await {
            debug!("{} SSH disconnect failed: {}", self.channel.label(), e);
        }
        debug!("SSH connection safely closed");
        Ok(())
    }
}
