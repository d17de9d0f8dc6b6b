use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::channel::Utf8Carry;
use super::{ChannelSession, OpenRequest, Session, Transport};
use crate::error::ConnectError;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

const OPT_ECHO: u8 = 1;
const OPT_SUPPRESS_GO_AHEAD: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecodeState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Splits a Telnet byte stream into text and negotiation replies.
///
/// The client refuses every option except the server's ECHO and
/// SUPPRESS-GO-AHEAD, which line-mode device shells expect.
#[derive(Debug, Default)]
pub struct TelnetDecoder {
    state: DecodeState,
    /// Server options this side has agreed to with DO.
    accepted: Vec<u8>,
}

impl TelnetDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `(text, reply)` for one received buffer.
    pub fn decode(&mut self, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut text = Vec::with_capacity(input.len());
        let mut reply = Vec::new();

        for &byte in input {
            self.state = match self.state {
                DecodeState::Data if byte == IAC => DecodeState::Iac,
                DecodeState::Data => {
                    text.push(byte);
                    DecodeState::Data
                }
                DecodeState::Iac => match byte {
                    IAC => {
                        text.push(IAC);
                        DecodeState::Data
                    }
                    DO | DONT | WILL | WONT => DecodeState::Negotiate(byte),
                    SB => DecodeState::Subnegotiation,
                    _ => DecodeState::Data,
                },
                DecodeState::Negotiate(verb) => {
                    self.negotiate(verb, byte, &mut reply);
                    DecodeState::Data
                }
                DecodeState::Subnegotiation if byte == IAC => DecodeState::SubnegotiationIac,
                DecodeState::Subnegotiation => DecodeState::Subnegotiation,
                DecodeState::SubnegotiationIac if byte == SE => DecodeState::Data,
                DecodeState::SubnegotiationIac => DecodeState::Subnegotiation,
            };
        }

        (text, reply)
    }

    /// Answers one option command. A request for the state an option is
    /// already in gets no answer, so negotiation cannot loop.
    fn negotiate(&mut self, verb: u8, option: u8, reply: &mut Vec<u8>) {
        let accepted = self.accepted.contains(&option);
        match verb {
            // This side never enables options of its own.
            DO => reply.extend_from_slice(&[IAC, WONT, option]),
            WILL if option == OPT_ECHO || option == OPT_SUPPRESS_GO_AHEAD => {
                if !accepted {
                    self.accepted.push(option);
                    reply.extend_from_slice(&[IAC, DO, option]);
                }
            }
            WILL => reply.extend_from_slice(&[IAC, DONT, option]),
            WONT if accepted => {
                self.accepted.retain(|&o| o != option);
                reply.extend_from_slice(&[IAC, DONT, option]);
            }
            _ => {}
        }
    }
}

/// Plain Telnet transport.
#[derive(Debug, Clone, Default)]
pub struct TelnetTransport;

impl TelnetTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn open(&self, request: &OpenRequest) -> Result<Box<dyn Session>, ConnectError> {
        let port = request.params.telnet_port();
        let device_addr = format!("{}:{}", request.address, port);

        let stream = tokio::time::timeout(
            request.timeout,
            TcpStream::connect((request.address.as_str(), port)),
        )
        .await
        .map_err(|_| ConnectError::ConnectTimeout(device_addr.clone()))??;
        debug!("{} TCP connection successful", device_addr);

        let (mut reader, mut writer) = stream.into_split();
        let (sender_to_shell, mut receiver_from_user) = mpsc::channel::<String>(256);
        let (sender_to_user, receiver_from_shell) = mpsc::channel::<String>(256);
        let alive = Arc::new(AtomicBool::new(true));

        let io_alive = alive.clone();
        let io_task_device_addr = device_addr.clone();
        tokio::spawn(async move {
            let mut decoder = TelnetDecoder::new();
            let mut utf8 = Utf8Carry::default();
            let mut buf = [0u8; 4096];
            loop {
                tokio::select! {
                    data = receiver_from_user.recv() => match data {
                        Some(data) => {
                            if let Err(e) = writer.write_all(data.as_bytes()).await {
                                debug!("{} Failed to send data to shell: {:?}", io_task_device_addr, e);
                                break;
                            }
                        }
                        None => break,
                    },
                    read = reader.read(&mut buf) => match read {
                        Ok(0) => {
                            debug!("{} Telnet peer closed the connection.", io_task_device_addr);
                            break;
                        }
                        Ok(n) => {
                            let (data, reply) = decoder.decode(&buf[..n]);
                            if !reply.is_empty() && writer.write_all(&reply).await.is_err() {
                                break;
                            }
                            let text = utf8.decode(&data);
                            if !text.is_empty() && sender_to_user.send(text).await.is_err() {
                                debug!("{} Shell output receiver dropped. Closing task.", io_task_device_addr);
                                break;
                            }
                        }
                        Err(e) => {
                            debug!("{} Telnet read failed: {:?}", io_task_device_addr, e);
                            break;
                        }
                    },
                }
            }
            io_alive.store(false, Ordering::SeqCst);
            let _ = writer.shutdown().await;
            debug!("{} Telnet I/O task ended.", io_task_device_addr);
        });

        Ok(Box::new(ChannelSession::new(
            device_addr,
            sender_to_shell,
            receiver_from_shell,
            alive,
            "\r\n",
        )))
    }
}
