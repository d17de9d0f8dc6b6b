use std::borrow::Cow;

use async_ssh2_tokio::{Config, ServerCheckMethod};
use russh::Preferred;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config;

/// SSH algorithm policy chosen per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SecurityLevel {
    #[default]
    Secure,
    Balanced,
    /// Dropbear builds shipped on factory router firmware.
    LegacyCompatible,
}

/// How the SSH leg of a connection is negotiated.
///
/// Reflashing a router regenerates its host key, so the legacy profile does
/// not pin keys against `known_hosts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshProfile {
    pub level: SecurityLevel,
    pub server_check: ServerCheckMethod,
}

impl Default for SshProfile {
    fn default() -> Self {
        Self::new(SecurityLevel::default())
    }
}

impl From<SecurityLevel> for SshProfile {
    fn from(level: SecurityLevel) -> Self {
        Self::new(level)
    }
}

impl SshProfile {
    pub fn new(level: SecurityLevel) -> Self {
        let server_check = match level {
            SecurityLevel::LegacyCompatible => ServerCheckMethod::NoCheck,
            SecurityLevel::Secure | SecurityLevel::Balanced => {
                ServerCheckMethod::DefaultKnownHostsFile
            }
        };
        Self {
            level,
            server_check,
        }
    }

    pub fn with_server_check(mut self, server_check: ServerCheckMethod) -> Self {
        self.server_check = server_check;
        self
    }

    fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = match self.level {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }

    /// Client configuration for an interactive shell.
    ///
    /// A flash or download can keep the shell silent for minutes, so there is
    /// no inactivity cutoff; the per-command read bound is the only timeout.
    /// Keepalives notice a peer that went away.
    pub(super) fn client_config(&self) -> Config {
        Config {
            preferred: self.preferred(),
            inactivity_timeout: None,
            keepalive_interval: Some(config::SSH_KEEPALIVE_INTERVAL),
            keepalive_max: config::SSH_KEEPALIVE_MAX,
            ..Default::default()
        }
    }
}
