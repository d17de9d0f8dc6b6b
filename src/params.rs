//! Device parameters handed to the transport when a session is opened.

use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;
use crate::error::ConnectError;
use crate::transport::SecurityLevel;

/// Device profile tag passed to the transport.
///
/// The connector only logs it. Transports read it for CLI conventions such as
/// the line terminator.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceType {
    Generic,
    #[default]
    Linux,
    CiscoIos,
    Other(String),
}

impl DeviceType {
    pub fn as_str(&self) -> &str {
        match self {
            DeviceType::Generic => "generic",
            DeviceType::Linux => "linux",
            DeviceType::CiscoIos => "cisco_ios",
            DeviceType::Other(name) => name,
        }
    }

    /// Line terminator the device CLI expects on an SSH shell.
    ///
    /// Telnet always uses CR LF.
    pub fn line_ending(&self) -> &'static str {
        match self {
            DeviceType::CiscoIos => "\r\n",
            DeviceType::Generic | DeviceType::Linux | DeviceType::Other(_) => "\n",
        }
    }
}

impl From<String> for DeviceType {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "generic" => DeviceType::Generic,
            "linux" => DeviceType::Linux,
            "cisco_ios" => DeviceType::CiscoIos,
            _ => DeviceType::Other(value),
        }
    }
}

impl From<DeviceType> for String {
    fn from(value: DeviceType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which wire protocol a connector opens sessions with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Telnet,
    Ssh,
    /// SSH first, Telnet on the same address if SSH cannot be opened.
    #[default]
    SshTelnetFallback,
}

/// Authentication and transport options for one device.
#[derive(Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectorParams {
    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Telnet port. Defaults to 23.
    #[serde(default)]
    pub port: Option<u16>,

    /// SSH port tried by the fallback transport. Defaults to 22.
    #[serde(default)]
    pub ssh_port: Option<u16>,

    #[serde(default)]
    #[schemars(with = "String")]
    pub device_type: DeviceType,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(default = "default_security")]
    pub security: SecurityLevel,

    /// Multiplier applied to the login settle delay.
    #[serde(default = "default_delay_factor")]
    pub global_delay_factor: f64,

    /// Transport specific options passed through untouched.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_security() -> SecurityLevel {
    SecurityLevel::Secure
}

fn default_delay_factor() -> f64 {
    1.0
}

impl Default for ConnectorParams {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: None,
            ssh_port: None,
            device_type: DeviceType::default(),
            transport: TransportKind::default(),
            security: default_security(),
            global_delay_factor: default_delay_factor(),
            extra: HashMap::new(),
        }
    }
}

impl fmt::Debug for ConnectorParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorParams")
            .field("username", &self.username)
            .field("password", &"***")
            .field("port", &self.port)
            .field("ssh_port", &self.ssh_port)
            .field("device_type", &self.device_type)
            .field("transport", &self.transport)
            .field("security", &self.security)
            .field("global_delay_factor", &self.global_delay_factor)
            .field("extra", &self.extra)
            .finish()
    }
}

impl ConnectorParams {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    /// Parses a JSON parameter document. Unknown keys are kept in `extra`.
    pub fn from_json(json: &str) -> Result<Self, ConnectError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_ssh_port(mut self, port: u16) -> Self {
        self.ssh_port = Some(port);
        self
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_security(mut self, security: SecurityLevel) -> Self {
        self.security = security;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn telnet_port(&self) -> u16 {
        self.port.unwrap_or(config::DEFAULT_TELNET_PORT)
    }

    pub fn ssh_port(&self) -> u16 {
        self.ssh_port.unwrap_or(config::DEFAULT_SSH_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_document_fills_defaults_and_keeps_unknown_keys() {
        let params = ConnectorParams::from_json(
            r#"{"username":"root","password":"","device_type":"linux","fast_cli":false}"#,
        )
        .expect("parse params");

        assert_eq!(params.username, "root");
        assert_eq!(params.device_type, DeviceType::Linux);
        assert_eq!(params.transport, TransportKind::SshTelnetFallback);
        assert_eq!(params.telnet_port(), 23);
        assert_eq!(params.ssh_port(), 22);
        assert_eq!(params.extra.get("fast_cli"), Some(&serde_json::Value::Bool(false)));
    }

    #[test]
    fn unknown_device_type_is_kept_verbatim() {
        let params = ConnectorParams::from_json(r#"{"device_type":"mikrotik_routeros"}"#)
            .expect("parse params");
        assert_eq!(
            params.device_type,
            DeviceType::Other("mikrotik_routeros".to_string())
        );
        assert_eq!(params.device_type.to_string(), "mikrotik_routeros");
    }

    #[test]
    fn device_type_defaults_to_linux_shell() {
        let params = ConnectorParams::new("root", "");
        assert_eq!(params.device_type, DeviceType::Linux);
        assert_eq!(params.device_type.line_ending(), "\n");
        assert_eq!(DeviceType::CiscoIos.line_ending(), "\r\n");
    }

    #[test]
    fn debug_output_hides_password() {
        let params = ConnectorParams::new("admin", "hunter2");
        let rendered = format!("{params:?}");
        assert!(rendered.contains("admin"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn malformed_document_is_rejected() {
        let err = ConnectorParams::from_json("{\"port\": \"twenty\"}").unwrap_err();
        assert!(matches!(err, ConnectError::InvalidParams(_)));
    }
}
