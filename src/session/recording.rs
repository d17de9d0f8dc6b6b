use super::*;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Session recording granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
pub enum SessionRecordLevel {
    /// Disable recording.
    Off,
    /// Record connection lifecycle events only.
    KeyEventsOnly,
    /// Record lifecycle events, login prompts and command outputs.
    #[default]
    Full,
}

/// A single recorded session event.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionRecordEntry {
    pub ts_ms: u128,
    pub event: SessionEvent,
}

/// Options for normalizing JSONL recordings into stable fixtures.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Keep failed connection attempts.
    pub keep_failed_attempts: bool,
    /// Keep prompts read during login negotiation.
    pub keep_prompt_reads: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            keep_failed_attempts: true,
            keep_prompt_reads: true,
        }
    }
}

/// Supported recorded event types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    ConnectAttempt {
        address: String,
        attempt: usize,
    },
    ConnectAttemptFailed {
        address: String,
        reason: String,
    },
    ConnectionEstablished {
        address: String,
        prompt: String,
    },
    PromptRead {
        state: String,
        prompt: String,
    },
    LoginReply {
        state: String,
        reply: String,
    },
    CommandOutput {
        command: String,
        exit_status: i32,
        output: String,
    },
    ConnectionClosed {
        address: String,
        reason: String,
    },
}

impl SessionEvent {
    fn is_detail(&self) -> bool {
        matches!(
            self,
            SessionEvent::PromptRead { .. }
                | SessionEvent::LoginReply { .. }
                | SessionEvent::CommandOutput { .. }
        )
    }
}

/// In-memory session recorder.
///
/// Cloning yields another handle to the same event log, so a caller can keep
/// one handle while the connector writes through another.
#[derive(Debug, Clone)]
pub struct SessionRecorder {
    level: SessionRecordLevel,
    entries: Arc<Mutex<Vec<SessionRecordEntry>>>,
}

impl SessionRecorder {
    /// Create a recorder with the given level.
    pub fn new(level: SessionRecordLevel) -> Self {
        Self {
            level,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A recorder that drops everything.
    pub fn disabled() -> Self {
        Self::new(SessionRecordLevel::Off)
    }

    /// Current recording level.
    pub fn level(&self) -> SessionRecordLevel {
        self.level
    }

    /// Record an event if the level keeps it.
    pub fn record_event(&self, event: SessionEvent) -> Result<(), ConnectError> {
        match self.level {
            SessionRecordLevel::Off => return Ok(()),
            SessionRecordLevel::KeyEventsOnly if event.is_detail() => return Ok(()),
            _ => {}
        }
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.push(SessionRecordEntry {
            ts_ms: now_ms(),
            event,
        });
        Ok(())
    }

    /// Snapshot all records.
    pub fn entries(&self) -> Result<Vec<SessionRecordEntry>, ConnectError> {
        let guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        Ok(guard.clone())
    }

    /// Snapshot of the events without timestamps.
    pub fn events(&self) -> Result<Vec<SessionEvent>, ConnectError> {
        Ok(self.entries()?.into_iter().map(|entry| entry.event).collect())
    }

    /// Clears all recorded events.
    pub fn clear(&self) -> Result<(), ConnectError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        guard.clear();
        Ok(())
    }

    /// Export records as JSONL.
    pub fn to_jsonl(&self) -> Result<String, ConnectError> {
        let entries = self.entries()?;
        let mut lines = Vec::with_capacity(entries.len());
        for entry in entries {
            let line = serde_json::to_string(&entry).map_err(|e| {
                ConnectError::InternalServerError(format!("record encode error: {e}"))
            })?;
            lines.push(line);
        }
        Ok(lines.join("\n"))
    }

    /// Restore recorder from JSONL lines.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = Self::new(SessionRecordLevel::Full);
        if jsonl.trim().is_empty() {
            return Ok(recorder);
        }

        let mut parsed = Vec::new();
        for line in jsonl.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry: SessionRecordEntry = serde_json::from_str(line).map_err(|e| {
                ConnectError::InternalServerError(format!("record decode error: {e}"))
            })?;
            parsed.push(entry);
        }

        let mut guard = recorder
            .entries
            .lock()
            .map_err(|e| ConnectError::InternalServerError(format!("record lock error: {e}")))?;
        *guard = parsed;
        drop(guard);

        Ok(recorder)
    }

    /// Normalize JSONL recording content into a stable fixture representation.
    ///
    /// Events are sorted by timestamp (stable for equal timestamps) and
    /// optionally filtered.
    pub fn normalize_jsonl(jsonl: &str, options: NormalizeOptions) -> Result<String, ConnectError> {
        let recorder = Self::from_jsonl(jsonl)?;
        let mut indexed = recorder
            .entries()?
            .into_iter()
            .enumerate()
            .collect::<Vec<(usize, SessionRecordEntry)>>();

        indexed
            .sort_by(|(idx_a, a), (idx_b, b)| a.ts_ms.cmp(&b.ts_ms).then_with(|| idx_a.cmp(idx_b)));

        let filtered = indexed
            .into_iter()
            .filter_map(|(_, entry)| match &entry.event {
                SessionEvent::ConnectAttemptFailed { .. } if !options.keep_failed_attempts => None,
                SessionEvent::PromptRead { .. } if !options.keep_prompt_reads => None,
                _ => Some(entry),
            })
            .collect::<Vec<_>>();

        let normalized = SessionRecorder {
            level: SessionRecordLevel::Full,
            entries: Arc::new(Mutex::new(filtered)),
        };
        normalized.to_jsonl()
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new(SessionRecordLevel::Full)
    }
}

/// Offline replayer backed by session recording data.
#[derive(Debug, Clone)]
pub struct SessionReplayer {
    entries: Vec<SessionRecordEntry>,
    cursor: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    pub address: String,
    pub prompt: String,
}

impl SessionReplayer {
    /// Build a replayer from a recorder snapshot.
    pub fn from_recorder(recorder: &SessionRecorder) -> Self {
        let entries = recorder.entries().unwrap_or_default();
        Self { entries, cursor: 0 }
    }

    /// Build a replayer from JSONL recording data.
    pub fn from_jsonl(jsonl: &str) -> Result<Self, ConnectError> {
        let recorder = SessionRecorder::from_jsonl(jsonl)?;
        Ok(Self::from_recorder(&recorder))
    }

    /// Returns the first established connection in the recording.
    pub fn initial_context(&self) -> Option<ReplayContext> {
        self.entries.iter().find_map(|entry| match &entry.event {
            SessionEvent::ConnectionEstablished { address, prompt } => Some(ReplayContext {
                address: address.clone(),
                prompt: prompt.clone(),
            }),
            _ => None,
        })
    }

    /// Replayer positioned at the attempt that reached `address`.
    ///
    /// Returns `None` if the recording never established a session there.
    pub fn session_for(&self, address: &str) -> Option<(SessionReplayer, ReplayContext)> {
        let established = self.entries.iter().position(|entry| {
            matches!(&entry.event, SessionEvent::ConnectionEstablished { address: a, .. } if a == address)
        })?;
        let start = self.entries[..established]
            .iter()
            .rposition(|entry| {
                matches!(&entry.event, SessionEvent::ConnectAttempt { address: a, .. } if a == address)
            })
            .unwrap_or(0);
        let prompt = match &self.entries[established].event {
            SessionEvent::ConnectionEstablished { prompt, .. } => prompt.clone(),
            _ => String::new(),
        };
        Some((
            SessionReplayer {
                entries: self.entries[start..].to_vec(),
                cursor: 0,
            },
            ReplayContext {
                address: address.to_string(),
                prompt,
            },
        ))
    }

    /// Next prompt read during login negotiation, if any remain.
    pub fn next_prompt(&mut self) -> Option<String> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;
            match &entry.event {
                SessionEvent::PromptRead { prompt, .. } => return Some(prompt.clone()),
                SessionEvent::ConnectionEstablished { .. } => {
                    // Login negotiation is over, leave commands for `replay_next`.
                    self.cursor -= 1;
                    return None;
                }
                _ => {}
            }
        }
        None
    }

    /// Replay the next recorded output for the given command or login reply.
    pub fn replay_next(&mut self, command: &str) -> Result<(String, i32), ConnectError> {
        while self.cursor < self.entries.len() {
            let entry = &self.entries[self.cursor];
            self.cursor += 1;

            match &entry.event {
                SessionEvent::CommandOutput {
                    command: recorded,
                    exit_status,
                    output,
                } if recorded == command => return Ok((output.clone(), *exit_status)),
                SessionEvent::LoginReply { reply, .. } if reply == command => {
                    return Ok((String::new(), 0));
                }
                _ => {}
            }
        }

        Err(ConnectError::ReplayMismatchError(format!(
            "no replayable output found for command '{command}'"
        )))
    }

    /// Replay a script of commands, failing on the first missing one.
    pub fn replay_script(&mut self, script: &[&str]) -> Result<Vec<(String, i32)>, ConnectError> {
        let mut outputs = Vec::with_capacity(script.len());
        for command in script {
            outputs.push(self.replay_next(command)?);
        }
        Ok(outputs)
    }
}

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recorder() -> SessionRecorder {
        let recorder = SessionRecorder::new(SessionRecordLevel::Full);
        recorder
            .record_event(SessionEvent::ConnectAttempt {
                address: "192.168.31.1".to_string(),
                attempt: 1,
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::PromptRead {
                state: "awaiting_prompt".to_string(),
                prompt: "XiaoQiang login:".to_string(),
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::LoginReply {
                state: "awaiting_prompt".to_string(),
                reply: "root".to_string(),
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::PromptRead {
                state: "awaiting_login_response".to_string(),
                prompt: "root@XiaoQiang:~#".to_string(),
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::ConnectionEstablished {
                address: "192.168.31.1".to_string(),
                prompt: "root@XiaoQiang:~#".to_string(),
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::CommandOutput {
                command: "cd /tmp".to_string(),
                exit_status: 0,
                output: String::new(),
            })
            .unwrap();
        recorder
    }

    #[test]
    fn recorder_jsonl_roundtrip() {
        let recorder = sample_recorder();
        let jsonl = recorder.to_jsonl().expect("encode");
        let restored = SessionRecorder::from_jsonl(&jsonl).expect("decode");

        assert_eq!(restored.events().unwrap(), recorder.events().unwrap());
        assert!(jsonl.contains(r#""kind":"connection_established""#));
    }

    #[test]
    fn key_events_only_skips_prompts_and_outputs() {
        let recorder = SessionRecorder::new(SessionRecordLevel::KeyEventsOnly);
        recorder
            .record_event(SessionEvent::ConnectAttempt {
                address: "10.0.0.1".to_string(),
                attempt: 1,
            })
            .unwrap();
        recorder
            .record_event(SessionEvent::CommandOutput {
                command: "uptime".to_string(),
                exit_status: 0,
                output: "up 3 days".to_string(),
            })
            .unwrap();

        let events = recorder.events().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::ConnectAttempt { .. }));
    }

    #[test]
    fn off_level_records_nothing() {
        let recorder = SessionRecorder::disabled();
        recorder
            .record_event(SessionEvent::ConnectAttempt {
                address: "10.0.0.1".to_string(),
                attempt: 1,
            })
            .unwrap();
        assert!(recorder.entries().unwrap().is_empty());
    }

    #[test]
    fn replayer_walks_login_prompts_then_commands() {
        let replayer = SessionReplayer::from_recorder(&sample_recorder());
        let (mut session, ctx) = replayer.session_for("192.168.31.1").expect("session");

        assert_eq!(ctx.prompt, "root@XiaoQiang:~#");
        assert_eq!(session.next_prompt().as_deref(), Some("XiaoQiang login:"));
        assert_eq!(session.replay_next("root").unwrap(), (String::new(), 0));
        assert_eq!(session.next_prompt().as_deref(), Some("root@XiaoQiang:~#"));
        assert_eq!(session.next_prompt(), None);
        assert_eq!(session.replay_next("cd /tmp").unwrap(), (String::new(), 0));
    }

    #[test]
    fn replayer_has_no_session_for_unreached_address() {
        let replayer = SessionReplayer::from_recorder(&sample_recorder());
        assert!(replayer.session_for("10.9.9.9").is_none());
    }

    #[test]
    fn replay_mismatch_is_reported() {
        let mut replayer = SessionReplayer::from_recorder(&sample_recorder());
        let err = replayer.replay_next("reboot").unwrap_err();
        assert!(matches!(err, ConnectError::ReplayMismatchError(_)));
    }

    #[test]
    fn normalize_drops_filtered_events() {
        let jsonl = sample_recorder().to_jsonl().unwrap();
        let normalized = SessionRecorder::normalize_jsonl(
            &jsonl,
            NormalizeOptions {
                keep_failed_attempts: true,
                keep_prompt_reads: false,
            },
        )
        .unwrap();

        assert!(!normalized.contains("prompt_read"));
        assert!(normalized.contains("login_reply"));
    }
}
