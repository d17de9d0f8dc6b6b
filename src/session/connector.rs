use super::*;

impl Connector {
    /// Creates a connector using the transport selected by `params.transport`.
    ///
    /// Nothing is validated here; an empty address list is reported by
    /// [`Connector::connect`].
    pub fn new(params: ConnectorParams, addresses: Vec<String>, default_timeout: Duration) -> Self {
        let transport = crate::transport::transport_for(params.transport, params.security);
        Self::with_transport(params, addresses, default_timeout, transport)
    }

    /// Creates a connector on top of an explicit transport.
    pub fn with_transport(
        params: ConnectorParams,
        addresses: Vec<String>,
        default_timeout: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let active_hostname = addresses
            .first()
            .cloned()
            .unwrap_or_else(|| config::LOOPBACK_ADDRESS.to_string());
        let device_type = params.device_type.clone();

        Self {
            params,
            addresses,
            active_hostname,
            session: None,
            default_timeout,
            device_type,
            transport,
            recorder: SessionRecorder::disabled(),
            sleeper: Arc::new(TokioSleeper),
            retry_backoff: config::DEFAULT_RETRY_BACKOFF,
            settle_delay: config::DEFAULT_SETTLE_DELAY,
        }
    }

    /// Routes structured session events to `recorder`.
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Wait between failed candidate addresses.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// Pause after each login reply.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    /// A copy of the connection parameters.
    pub fn params(&self) -> ConnectorParams {
        self.params.clone()
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Address in use, or most recently tried.
    pub fn active_hostname(&self) -> &str {
        &self.active_hostname
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn device_type(&self) -> &DeviceType {
        &self.device_type
    }

    pub fn recorder(&self) -> &SessionRecorder {
        &self.recorder
    }

    /// True only if a session exists and the transport reports it alive.
    pub fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|session| session.is_alive())
    }

    /// Opens a session, trying each candidate address in order.
    ///
    /// Does nothing if a live session already exists. After a failed
    /// candidate the connector waits for the retry backoff before moving on.
    /// If every candidate fails, any session is released and the last
    /// candidate's error is returned inside [`ConnectError::ConnectFailure`].
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        info!("Connecting to {:?}", self.addresses);
        if self.addresses.is_empty() {
            return Err(ConnectError::InvalidConfiguration(
                "No valid IP addresses to initiate connections found".to_string(),
            ));
        }
        self.scaled_settle_delay()?;
        if self.is_connected() {
            return Ok(());
        }
        // A dead session may still be held; release it before opening another.
        self.disconnect().await;

        let mut last_error = None;
        for (idx, address) in self.addresses.clone().into_iter().enumerate() {
            self.active_hostname = address.clone();
            let _ = self.recorder.record_event(SessionEvent::ConnectAttempt {
                address: address.clone(),
                attempt: idx + 1,
            });

            match self.open_session(&address).await {
                Ok((session, prompt)) => {
                    self.session = Some(session);
                    let _ = self.recorder.record_event(SessionEvent::ConnectionEstablished {
                        address: address.clone(),
                        prompt,
                    });
                    info!("Connected to {address}");
                    return Ok(());
                }
                Err(err) => {
                    error!("Connection to {address} failed: {err}");
                    let _ = self.recorder.record_event(SessionEvent::ConnectAttemptFailed {
                        address: address.clone(),
                        reason: err.to_string(),
                    });
                    self.sleeper.sleep(self.retry_backoff).await;
                    last_error = Some(err);
                }
            }
        }

        self.disconnect().await;
        let source = last_error.unwrap_or_else(|| {
            ConnectError::InternalServerError("no connection attempt was made".to_string())
        });
        Err(ConnectError::ConnectFailure {
            attempts: self.addresses.len(),
            address: self.active_hostname.clone(),
            source: Box::new(source),
        })
    }

    /// Opens one candidate and runs the login handshake on it.
    ///
    /// A session that fails the handshake is closed before returning.
    async fn open_session(
        &self,
        address: &str,
    ) -> Result<(Box<dyn Session>, String), ConnectError> {
        let request = OpenRequest {
            address: address.to_string(),
            timeout: self.default_timeout,
            device_type: self.device_type.clone(),
            params: self.params(),
        };
        debug!("Opening {} session to {address}", self.device_type);
        let mut session = self.transport.open(&request).await?;

        match self.negotiate_login(session.as_mut()).await {
            Ok(prompt) => Ok((session, prompt)),
            Err(err) => {
                if let Err(close_err) = session.close().await {
                    debug!("Error closing half-open session to {address}: {close_err}");
                }
                Err(err)
            }
        }
    }

    /// Closes the session, if any. Never fails.
    pub async fn disconnect(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if session.is_alive() {
            match session.close().await {
                Ok(()) => debug!("Session to {} closed", self.active_hostname),
                Err(e) => debug!("Error closing session to {}: {}", self.active_hostname, e),
            }
        }
        let _ = self.recorder.record_event(SessionEvent::ConnectionClosed {
            address: self.active_hostname.clone(),
            reason: "disconnect".to_string(),
        });
    }
}
