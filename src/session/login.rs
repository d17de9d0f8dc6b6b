use super::*;

/// Login handshake states.
///
/// Each state names what the next prompt read answers. Three reads happen in
/// total and at most two replies are sent; the handshake never loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LoginState {
    /// First prompt after the session opened.
    AwaitingPrompt,
    /// Prompt following the login/username stage.
    AwaitingLoginResponse,
    /// Prompt following the password stage.
    AwaitingPasswordResponse,
    Ready,
}

/// Text sent in answer to a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginReply {
    Username,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTransition {
    pub next: LoginState,
    pub reply: Option<LoginReply>,
}

impl LoginState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginState::AwaitingPrompt => "awaiting_prompt",
            LoginState::AwaitingLoginResponse => "awaiting_login_response",
            LoginState::AwaitingPasswordResponse => "awaiting_password_response",
            LoginState::Ready => "ready",
        }
    }

    /// Advances on one prompt read.
    pub fn step(self, prompt: &str) -> LoginTransition {
        let prompt = prompt.to_lowercase();
        match self {
            LoginState::AwaitingPrompt => LoginTransition {
                next: LoginState::AwaitingLoginResponse,
                reply: (prompt.contains("login") || prompt.contains("username"))
                    .then_some(LoginReply::Username),
            },
            // Devices in the field answered the password prompt with the
            // username; the configured password is never sent.
            LoginState::AwaitingLoginResponse => LoginTransition {
                next: LoginState::AwaitingPasswordResponse,
                reply: prompt.contains("password").then_some(LoginReply::Username),
            },
            LoginState::AwaitingPasswordResponse | LoginState::Ready => LoginTransition {
                next: LoginState::Ready,
                reply: None,
            },
        }
    }
}

impl LoginReply {
    pub fn text<'a>(&self, params: &'a ConnectorParams) -> &'a str {
        match self {
            LoginReply::Username => &params.username,
        }
    }
}

impl Connector {
    /// Settle delay scaled by `global_delay_factor`.
    ///
    /// The factor comes from caller-supplied parameters, so a factor that is
    /// negative, not finite, or too large for a [`Duration`] is rejected.
    pub(super) fn scaled_settle_delay(&self) -> Result<Duration, ConnectError> {
        let factor = self.params.global_delay_factor;
        if !factor.is_finite() || factor < 0.0 {
            return Err(ConnectError::InvalidConfiguration(format!(
                "global_delay_factor must be a finite non-negative number, got {factor}"
            )));
        }
        Duration::try_from_secs_f64(self.settle_delay.as_secs_f64() * factor).map_err(|e| {
            ConnectError::InvalidConfiguration(format!(
                "global_delay_factor {factor} is out of range: {e}"
            ))
        })
    }

    /// Walks a freshly opened session through the login prompts.
    ///
    /// Returns the last prompt read.
    pub(super) async fn negotiate_login(
        &self,
        session: &mut dyn Session,
    ) -> Result<String, ConnectError> {
        let settle = self.scaled_settle_delay()?;
        let mut state = LoginState::AwaitingPrompt;
        let mut prompt = String::new();

        while state != LoginState::Ready {
            prompt = session.find_prompt().await?;
            info!("Connected to device. Prompt: {prompt}");
            let _ = self.recorder.record_event(SessionEvent::PromptRead {
                state: state.as_str().to_string(),
                prompt: prompt.clone(),
            });

            let transition = state.step(&prompt);
            if let Some(reply) = transition.reply {
                let text = reply.text(&self.params);
                debug!("Login {}: replying to {prompt:?}", state.as_str());
                session
                    .send(text, self.default_timeout, &LOGIN_REPLY_PROMPT)
                    .await?;
                let _ = self.recorder.record_event(SessionEvent::LoginReply {
                    state: state.as_str().to_string(),
                    reply: text.to_string(),
                });
                self.sleeper.sleep(settle).await;
            }
            state = transition.next;
        }

        Ok(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_prompt_asks_for_username() {
        let t = LoginState::AwaitingPrompt.step("XiaoQiang Login: ");
        assert_eq!(t.next, LoginState::AwaitingLoginResponse);
        assert_eq!(t.reply, Some(LoginReply::Username));

        let t = LoginState::AwaitingPrompt.step("Username:");
        assert_eq!(t.reply, Some(LoginReply::Username));
    }

    #[test]
    fn shell_prompt_needs_no_reply() {
        let t = LoginState::AwaitingPrompt.step("root@OpenWrt:~#");
        assert_eq!(t.next, LoginState::AwaitingLoginResponse);
        assert_eq!(t.reply, None);

        let t = t.next.step("root@OpenWrt:~#");
        assert_eq!(t.next, LoginState::AwaitingPasswordResponse);
        assert_eq!(t.reply, None);
    }

    #[test]
    fn password_prompt_is_answered_with_username() {
        let t = LoginState::AwaitingLoginResponse.step("Password: ");
        assert_eq!(t.next, LoginState::AwaitingPasswordResponse);
        assert_eq!(t.reply, Some(LoginReply::Username));

        let params = ConnectorParams::new("root", "secret");
        assert_eq!(LoginReply::Username.text(&params), "root");
    }

    #[test]
    fn handshake_is_bounded() {
        let mut state = LoginState::AwaitingPrompt;
        let mut replies = 0;
        for _ in 0..10 {
            let t = state.step("login: password:");
            replies += usize::from(t.reply.is_some());
            state = t.next;
        }
        assert_eq!(state, LoginState::Ready);
        assert_eq!(replies, 2);
    }

    #[test]
    fn password_before_login_stage_is_ignored() {
        // Only the second read checks for a password prompt.
        let t = LoginState::AwaitingPrompt.step("Password:");
        assert_eq!(t.reply, None);
    }
}
