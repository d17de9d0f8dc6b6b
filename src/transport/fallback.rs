use async_trait::async_trait;
use log::{debug, info};

use super::{OpenRequest, Session, SshProfile, SshTransport, TelnetTransport, Transport};
use crate::error::ConnectError;

/// Tries SSH first and falls back to Telnet on the same address.
///
/// Factory firmware on consumer routers often only exposes Telnet, while the
/// same box after a reflash only exposes SSH.
#[derive(Debug, Clone, Default)]
pub struct FallbackTransport {
    ssh: SshTransport,
    telnet: TelnetTransport,
}

impl FallbackTransport {
    pub fn new(profile: SshProfile) -> Self {
        Self {
            ssh: SshTransport::new(profile),
            telnet: TelnetTransport::new(),
        }
    }
}

#[async_trait]
impl Transport for FallbackTransport {
    async fn open(&self, request: &OpenRequest) -> Result<Box<dyn Session>, ConnectError> {
        match self.ssh.open(request).await {
            Ok(session) => Ok(session),
            Err(ssh_err) => {
                debug!("SSH to {} failed: {}", request.address, ssh_err);
                info!(
                    "Falling back to telnet on {}:{}",
                    request.address,
                    request.params.telnet_port()
                );
                self.telnet.open(request).await
            }
        }
    }
}
