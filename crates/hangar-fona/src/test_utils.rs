//! Test utilities for exercising the modem stack without hardware
//!
//! [`ScriptedTransport`] plays the modem side of a serial line: framed AT
//! commands are echoed back followed by a scripted response, the SMS
//! handshake gets a `>` prompt and a submit acknowledgement, and every write
//! is recorded for assertions. Clones share state, so a test can keep one
//! handle while the channel owns the other.
//!
//! # Example
//!
//! ```rust,ignore
//! use hangar_fona::test_utils::ScriptedTransport;
//! use hangar_fona::AtChannel;
//!
//! let transport = ScriptedTransport::new().respond("AT+CSQ", "+CSQ: 14,0\r\nOK\r\n");
//! let channel = AtChannel::new(Some(transport.clone()), Default::default(), 8);
//! let lines = channel.send_command("AT+CSQ").await;
//! assert_eq!(transport.command_count("AT+CSQ"), 1);
//! ```

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::command::SMS_SUBMIT;
use crate::config::{FonaConfig, FonaConfigBuilder, ModemTiming};
use crate::error::{FonaError, Result};
use crate::transport::Transport;

/// Response for commands with nothing scripted
const DEFAULT_RESPONSE: &str = "\r\nOK\r\n";

/// Acknowledgement after an SMS body is submitted
const DEFAULT_SUBMIT_ACK: &str = "\r\n+CMGS: 1\r\n\r\nOK\r\n";

/// Prompt the modem sends after `AT+CMGS`
const SMS_PROMPT: &str = "\r\n> ";

#[derive(Debug, Default)]
struct ScriptState {
    responses: HashMap<String, String>,
    submit_ack: Option<String>,
    pending: Vec<u8>,
    writes: Vec<Vec<u8>>,
    commands: Vec<String>,
    sent_messages: Vec<String>,
    write_attempts: usize,
    fail_writes: bool,
    fail_sms_submit: bool,
    muted: bool,
}

/// In-memory modem answering from a script
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create a transport that answers `OK` to everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `response` (after the echo)
    pub fn respond(self, command: &str, response: &str) -> Self {
        self.state
            .lock()
            .responses
            .insert(command.to_string(), response.to_string());
        self
    }

    /// Acknowledgement sent after an SMS body
    pub fn submit_ack(self, ack: &str) -> Self {
        self.state.lock().submit_ack = Some(ack.to_string());
        self
    }

    /// Fail every write
    pub fn fail_writes(&self, enabled: bool) {
        self.state.lock().fail_writes = enabled;
    }

    /// Fail only the write that submits an SMS body
    pub fn fail_sms_submit(&self, enabled: bool) {
        self.state.lock().fail_sms_submit = enabled;
    }

    /// Accept writes but never answer, like a modem that has hung
    pub fn mute(&self, enabled: bool) {
        self.state.lock().muted = enabled;
    }

    /// Make `text` readable as unsolicited modem output
    pub fn queue_output(&self, text: &str) {
        self.state.lock().pending.extend_from_slice(text.as_bytes());
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Every framed command received, without framing
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// How many times `command` was received
    pub fn command_count(&self, command: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Bodies of every SMS submitted
    pub fn sent_messages(&self) -> Vec<String> {
        self.state.lock().sent_messages.clone()
    }

    /// Writes attempted, including failed ones
    pub fn write_attempts(&self) -> usize {
        self.state.lock().write_attempts
    }

    /// SMS handshakes started (one text-mode switch per send)
    pub fn sms_attempts(&self) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|w| w.starts_with(b"AT+CMGS="))
            .count()
    }
}

impl ScriptState {
    fn answer(&mut self, bytes: &[u8]) {
        if let Some(framed) = bytes
            .strip_prefix(b"$")
            .and_then(|rest| rest.strip_suffix(b"\r\n"))
        {
            let command = String::from_utf8_lossy(framed).into_owned();
            let response = self
                .responses
                .get(&command)
                .cloned()
                .unwrap_or_else(|| DEFAULT_RESPONSE.to_string());

            self.pending.extend_from_slice(command.as_bytes());
            self.pending.extend_from_slice(b"\r\r\n");
            self.pending.extend_from_slice(response.as_bytes());
            self.commands.push(command);
        } else if bytes.starts_with(b"AT+CMGS=") {
            self.pending.extend_from_slice(SMS_PROMPT.as_bytes());
        } else if let Some(body) = bytes.strip_suffix(&[SMS_SUBMIT]) {
            self.sent_messages
                .push(String::from_utf8_lossy(body).into_owned());
            let ack = self.submit_ack.as_deref().unwrap_or(DEFAULT_SUBMIT_ACK);
            self.pending.extend_from_slice(ack.as_bytes());
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        state.write_attempts += 1;

        if state.fail_writes || (state.fail_sms_submit && bytes.last() == Some(&SMS_SUBMIT)) {
            return Err(FonaError::WriteError("Simulated error".to_string()));
        }

        state.writes.push(bytes.to_vec());
        if !state.muted {
            state.answer(bytes);
        }
        Ok(bytes.len())
    }

    async fn read(&mut self, _max_wait: Duration) -> Result<Bytes> {
        let mut state = self.state.lock();
        Ok(Bytes::from(std::mem::take(&mut state.pending)))
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.state.lock().pending.len())
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "ScriptedTransport"
    }
}

/// Timing short enough for tests on a real clock
pub fn fast_timing() -> ModemTiming {
    ModemTiming {
        settle_delay: Duration::from_millis(1),
        response_timeout: Duration::from_millis(5),
        poll_step: Duration::from_millis(1),
        battery_pre_delay: Duration::from_millis(1),
        read_timeout: Duration::from_millis(50),
    }
}

/// Configuration with no GPIO and fast timing
pub fn test_config() -> FonaConfig {
    FonaConfigBuilder::new()
        .without_gpio()
        .timing(fast_timing())
        .build()
}
