//! # rtelconn - Failover Telnet/SSH Connector for Network Devices
//!
//! `rtelconn` drives remote administration of routers and other network
//! devices over an interactive shell. A [`session::Connector`] tries an
//! ordered list of candidate addresses, walks the device's login prompts,
//! and runs shell commands whose outcome is classified from the response
//! text.
//!
//! ## Features
//!
//! - **Address Failover**: Candidates are tried in order with a backoff between failures
//! - **Login Handshake**: Bounded login/password prompt negotiation
//! - **Exit Classification**: Status inferred from the response, checked against accepted codes
//! - **SSH with Telnet Fallback**: SSH first, Telnet for factory firmware that only speaks Telnet
//! - **Session Recording**: Structured JSONL event log and offline replay
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rtelconn::params::ConnectorParams;
//! use rtelconn::session::Connector;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut connector = Connector::new(
//!         ConnectorParams::new("root", ""),
//!         vec!["192.168.31.1".to_string()],
//!         Duration::from_secs(50),
//!     );
//!
//!     let output = connector.exec("cd /tmp").await?;
//!     println!("exit={} output={}", output.exit_status, output.output);
//!
//!     connector.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::Connector`] - Failover connect, login negotiation, command execution
//! - [`transport`] - `Transport`/`Session` traits and the SSH, Telnet and replay transports
//! - [`params::ConnectorParams`] - Explicit device parameters
//! - [`error::ConnectError`] - Error types for connection and command operations
//! - [`config`] - Timing defaults and SSH algorithm profiles

pub mod config;
pub mod error;
pub mod params;
pub mod session;
pub mod transport;
