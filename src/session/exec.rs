use super::*;

/// Infers an exit status from response text.
///
/// The transports carry no exit code, so a response containing the
/// `bad command` marker counts as status 1 with the response as error text.
pub fn classify_response(response: &str) -> (i32, Option<&str>) {
    if response.contains(config::BAD_COMMAND_MARKER) {
        (1, Some(response))
    } else {
        (0, None)
    }
}

impl Connector {
    /// Runs `command` with default options: connector timeout, exit code 0
    /// accepted, unexpected status raised.
    pub async fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectError> {
        self.exec_command(command, ExecOptions::default()).await
    }

    /// Runs `command` and classifies its outcome.
    ///
    /// Connects first if there is no live session. Reads until a shell prompt
    /// (`#` or `$`) shows up, bounded by the timeout. Timeouts surface as
    /// [`ConnectError::ExecTimeout`]; other transport errors are returned
    /// unchanged and never retried here.
    pub async fn exec_command(
        &mut self,
        command: &str,
        options: ExecOptions,
    ) -> Result<ExecOutput, ConnectError> {
        let timeout = options.timeout.unwrap_or(self.default_timeout);
        if !self.is_connected() {
            self.connect().await?;
        }
        debug!("the connection is working: {}", self.is_connected());
        info!("Executing command: {command}");

        let session = self.session.as_mut().ok_or(ConnectError::NotConnected)?;
        let response = match session.send(command, timeout, &SHELL_PROMPT).await {
            Ok(response) => response,
            Err(err) => {
                error!("Command {command:?} failed: {err}");
                return Err(err);
            }
        };
        if !response.is_empty() {
            debug!("{response}");
        }

        let (exit_status, error_text) = classify_response(&response);
        let _ = self.recorder.record_event(SessionEvent::CommandOutput {
            command: command.to_string(),
            exit_status,
            output: response.clone(),
        });

        if !options.exit_codes.contains(&exit_status) && options.raise_on_unexpected {
            let log_message = format!("Unexpected exit code: {exit_status}");
            info!("{log_message}");
            let message = error_text
                .filter(|text| !text.is_empty())
                .map(str::to_string)
                .or_else(|| (!response.is_empty()).then(|| response.clone()))
                .unwrap_or(log_message);
            return Err(ConnectError::UnexpectedExit {
                exit_status,
                message,
            });
        }

        Ok(ExecOutput {
            output: response,
            exit_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::classify_response;

    #[test]
    fn bad_command_marker_means_failure() {
        let response = "mtd: bad command";
        assert_eq!(classify_response(response), (1, Some(response)));
    }

    #[test]
    fn plain_output_means_success() {
        assert_eq!(classify_response("Connecting to downloads.openwrt.org"), (0, None));
        assert_eq!(classify_response(""), (0, None));
    }

    #[test]
    fn marker_match_is_case_sensitive() {
        assert_eq!(classify_response("Bad Command"), (0, None));
    }
}
