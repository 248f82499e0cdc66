//! AT command channel to the Fona modem
//!
//! [`AtChannel`] owns the transport and serializes every exchange behind a
//! single async lock. A multi-step exchange (the SMS handshake, list then
//! delete) holds the lock for its whole duration so nothing can interleave
//! with it on the wire.
//!
//! Public operations absorb faults: a command that fails on the wire is
//! logged and reported as an empty response, a failed status read comes
//! back as an error-state snapshot. With no transport attached every
//! operation is a safe no-op.

use bytes::BytesMut;
use parking_lot::Mutex as SyncMutex;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::battery::{BatteryCondition, BATTERY_MARKER};
use crate::command::{self, split_lines, split_lines_keep_blank};
use crate::config::{FonaConfig, ModemTiming, DEFAULT_UTC_OFFSET_HOURS};
use crate::error::{FonaError, Result};
use crate::gpio::{MessageWaitingQueue, PowerStatusPin, RingIndicator};
use crate::phone::clean_phone_number;
use crate::signal::{SignalStrength, SIGNAL_MARKER};
use crate::sms::{SmsMessage, LIST_MARKER};
use crate::transport::Transport;

/// Serialized access to the modem
pub struct AtChannel<T: Transport> {
    /// The only handle to the transport; `None` when no port is attached
    transport: Mutex<Option<T>>,
    /// Transport name captured at construction, for logging
    transport_name: Option<String>,
    /// Optional power status input
    power_pin: Option<SyncMutex<Box<dyn PowerStatusPin>>>,
    /// Ring indicator pin; when set, `initialize` enables RI on SMS
    ring_indicator_pin: Option<u8>,
    /// Pending "check for messages" markers
    messages_waiting: MessageWaitingQueue,
    timing: ModemTiming,
    utc_offset_hours: i32,
}

impl<T: Transport> AtChannel<T> {
    /// Create a channel over an optional transport
    pub fn new(transport: Option<T>, timing: ModemTiming, utc_offset_hours: i32) -> Self {
        let transport_name = transport.as_ref().map(|t| t.name().to_string());
        match &transport_name {
            Some(name) => info!(transport = %name, "AT channel attached"),
            None => warn!("AT channel created without a transport"),
        }

        Self {
            transport: Mutex::new(transport),
            transport_name,
            power_pin: None,
            ring_indicator_pin: None,
            messages_waiting: MessageWaitingQueue::default(),
            timing,
            utc_offset_hours,
        }
    }

    /// Create a channel using configured timing, offset and ring indicator
    pub fn from_config(transport: Option<T>, config: &FonaConfig) -> Self {
        let mut channel = Self::new(transport, config.timing.clone(), config.utc_offset_hours);
        if config.gpio.uses_gpio() {
            channel.ring_indicator_pin = config.gpio.ring_indicator_pin;
        }
        channel
    }

    /// Create a channel with no transport
    pub fn detached() -> Self {
        Self::new(None, ModemTiming::default(), DEFAULT_UTC_OFFSET_HOURS)
    }

    /// Read power state from `pin` instead of transport presence
    pub fn with_power_status_pin(mut self, pin: impl PowerStatusPin + 'static) -> Self {
        self.power_pin = Some(SyncMutex::new(Box::new(pin)));
        self
    }

    /// Enable ring-indicator-on-SMS during `initialize`
    pub fn with_ring_indicator_pin(mut self, pin: u8) -> Self {
        self.ring_indicator_pin = Some(pin);
        self
    }

    /// A transport was attached at construction
    pub fn has_transport(&self) -> bool {
        self.transport_name.is_some()
    }

    /// Name of the attached transport
    pub fn transport_name(&self) -> Option<&str> {
        self.transport_name.as_deref()
    }

    /// Timing in effect
    pub fn timing(&self) -> &ModemTiming {
        &self.timing
    }

    /// Hours added to modem-local time to reach UTC
    pub fn utc_offset_hours(&self) -> i32 {
        self.utc_offset_hours
    }

    /// Producer handle for the message-waiting queue
    pub fn ring_indicator(&self) -> RingIndicator {
        self.messages_waiting.ring_indicator(self.ring_indicator_pin)
    }

    // ===== Commands =====

    /// Send one AT command and return the response lines, echo removed
    ///
    /// Returns an empty list when no transport is attached or the exchange
    /// failed.
    pub async fn send_command(&self, command: &str) -> Vec<String> {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            debug!(command, "No transport; command skipped");
            return Vec::new();
        };

        match self.transact(transport, command).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!(command, code = e.error_code(), "AT command failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Bring the modem into a known state
    ///
    /// Numeric errors, text-mode SMS, then drains whatever the modem had
    /// queued. Enables ring-indicator-on-SMS when a ring indicator pin is
    /// configured.
    pub async fn initialize(&self) {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            warn!("No transport; skipping modem initialization");
            return;
        };

        if let Err(e) = self.initialize_locked(transport).await {
            warn!(code = e.error_code(), "Modem initialization failed: {}", e);
        }
    }

    async fn initialize_locked(&self, transport: &mut T) -> Result<()> {
        info!(transport = transport.name(), "Initializing modem");
        transport.flush().await?;

        for cmd in [
            command::ATTENTION,
            command::DISABLE_VERBOSE_ERRORS,
            command::TEXT_MODE,
        ] {
            let lines = self.transact(transport, cmd).await?;
            debug!(command = cmd, response = ?lines, "Init step");
        }

        let leftover = self.read_pending(transport).await?;
        if !leftover.trim().is_empty() {
            debug!(response = %leftover.trim(), "Drained modem output");
        }

        if let Some(pin) = self.ring_indicator_pin {
            let lines = self.transact(transport, command::RING_INDICATOR_ON_SMS).await?;
            debug!(pin, response = ?lines, "Ring indicator enabled");
        }

        Ok(())
    }

    /// Switch the modem to text-mode SMS
    pub async fn set_sms_mode(&self) -> Vec<String> {
        self.send_command(command::TEXT_MODE).await
    }

    /// Verbose error text (`AT+CMEE=2`)
    pub async fn enable_verbose_errors(&self) -> Vec<String> {
        self.send_command(command::ENABLE_VERBOSE_ERRORS).await
    }

    /// Numeric error codes (`AT+CMEE=0`)
    pub async fn disable_verbose_errors(&self) -> Vec<String> {
        self.send_command(command::DISABLE_VERBOSE_ERRORS).await
    }

    /// Current operator as reported by `AT+COPS?`
    pub async fn carrier(&self) -> Option<String> {
        self.first_line(command::CARRIER).await
    }

    /// Module identification from `ATI`
    pub async fn module_name(&self) -> Option<String> {
        self.first_line(command::MODULE_INFO).await
    }

    /// SIM card identifier from `AT+CCID`
    pub async fn sim_card_number(&self) -> Option<String> {
        self.first_line(command::SIM_CARD_ID).await
    }

    async fn first_line(&self, command: &str) -> Option<String> {
        self.send_command(command).await.into_iter().next()
    }

    // ===== SMS =====

    /// Send an SMS, returning whether the handshake completed
    ///
    /// Completion means every step was written; the final acknowledgement
    /// is logged but a modem-side `ERROR` does not fail the send.
    pub async fn send_message(&self, number: &str, text: &str) -> bool {
        match self.deliver(number, text).await {
            Ok(()) => true,
            Err(e) => {
                warn!(code = e.error_code(), "SMS not sent: {}", e);
                false
            }
        }
    }

    /// Validate and send an SMS, reporting why it failed
    pub async fn deliver(&self, number: &str, text: &str) -> Result<()> {
        let number =
            clean_phone_number(number).ok_or_else(|| FonaError::InvalidNumber(number.to_string()))?;
        let body = command::sms_body(text).ok_or(FonaError::EmptyMessage)?;

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(FonaError::TransportUnavailable)?;

        info!(number = %number, chars = text.len(), "Sending SMS");

        self.transact(transport, command::TEXT_MODE).await?;

        self.handshake_step(transport, command::HANDSHAKE_RESET, "reset")
            .await?;
        self.handshake_step(transport, command::send_sms(&number).as_bytes(), "CMGS")
            .await?;
        self.handshake_step(transport, command::HANDSHAKE_CR, "prompt")
            .await?;

        self.write_all(transport, &body).await?;
        self.poll_available(transport, self.timing.response_timeout)
            .await?;

        let ack = self.read_pending(transport).await?;
        let ack = ack.trim();
        if ack.contains("ERROR") {
            warn!(number = %number, ack, "Modem reported an error after submit");
        } else {
            debug!(number = %number, ack, "SMS submitted");
        }

        Ok(())
    }

    async fn handshake_step(&self, transport: &mut T, bytes: &[u8], step: &str) -> Result<()> {
        self.write_all(transport, bytes).await?;
        if !self
            .poll_available(transport, self.timing.response_timeout)
            .await?
        {
            debug!(step, "No response to handshake step");
        }
        let response = self.read_pending(transport).await?;
        trace!(step, response = %response.trim(), "Handshake step");
        Ok(())
    }

    /// Every message stored on the SIM
    ///
    /// Clears the message-waiting queue once the list has been read.
    pub async fn get_messages(&self) -> Vec<SmsMessage> {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return Vec::new();
        };

        match self.list_messages_locked(transport).await {
            Ok(messages) => {
                let cleared = self.messages_waiting.clear();
                debug!(count = messages.len(), cleared, "Listed messages");
                messages
            }
            Err(e) => {
                warn!(code = e.error_code(), "Listing messages failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn list_messages_locked(&self, transport: &mut T) -> Result<Vec<SmsMessage>> {
        self.transact(transport, command::TEXT_MODE).await?;
        // Blank lines stay: an empty SMS body is listed as one.
        let raw = self.exchange(transport, command::LIST_ALL_MESSAGES).await?;
        let lines = strip_echo(split_lines_keep_blank(&raw));
        Ok(parse_message_list(&lines, self.utc_offset_hours))
    }

    /// Delete one stored message
    pub async fn delete_message(&self, message_id: u32) -> bool {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return false;
        };

        match self
            .transact(transport, &command::delete_message(message_id))
            .await
        {
            Ok(lines) => {
                debug!(message_id, response = ?lines, "Deleted message");
                true
            }
            Err(e) => {
                warn!(message_id, code = e.error_code(), "Delete failed: {}", e);
                false
            }
        }
    }

    /// Delete every stored message, returning how many were deleted
    pub async fn delete_messages(&self) -> usize {
        let messages = self.get_messages().await;
        let mut deleted = 0;
        for id in messages.iter().filter_map(|m| m.message_id) {
            if self.delete_message(id).await {
                deleted += 1;
            }
        }
        if deleted > 0 {
            info!(deleted, "Deleted stored messages");
        }
        deleted
    }

    // ===== Status =====

    /// Read the battery
    ///
    /// Waits the configured pre-delay before querying; the modem reports
    /// stale charge readings right after other traffic.
    pub async fn get_current_battery_condition(&self) -> BatteryCondition {
        sleep(self.timing.battery_pre_delay).await;
        let lines = self.send_command(command::BATTERY_STATUS).await;
        let line = find_marker(&lines, BATTERY_MARKER);
        let condition = BatteryCondition::parse(line);
        debug!(
            percent = condition.battery_percent,
            voltage = condition.battery_voltage,
            error = condition.error_state,
            "Battery read"
        );
        condition
    }

    /// Read the signal quality
    pub async fn get_signal_strength(&self) -> SignalStrength {
        let lines = self.send_command(command::SIGNAL_QUALITY).await;
        let line = find_marker(&lines, SIGNAL_MARKER);
        let strength = SignalStrength::parse(line);
        debug!(
            rssi = strength.rssi,
            class = %strength.classify_strength(),
            error = strength.error_state,
            "Signal read"
        );
        strength
    }

    /// Modem power state
    ///
    /// Reads the power status pin when one is configured, otherwise reports
    /// whether a transport is attached.
    pub fn is_power_on(&self) -> bool {
        match &self.power_pin {
            Some(pin) => match pin.lock().is_high() {
                Ok(high) => high,
                Err(e) => {
                    warn!(code = e.error_code(), "Power status read failed: {}", e);
                    false
                }
            },
            None => self.has_transport(),
        }
    }

    /// Wait up to `timeout` for the modem to have output pending
    pub async fn wait_for_response(&self, timeout: Duration) -> bool {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return false;
        };
        match self.poll_available(transport, timeout).await {
            Ok(ready) => ready,
            Err(e) => {
                warn!(code = e.error_code(), "Polling for response failed: {}", e);
                false
            }
        }
    }

    /// A ring indicator pulse or poll is pending
    pub fn is_message_waiting(&self) -> bool {
        self.messages_waiting.is_message_waiting()
    }

    // ===== Wire =====

    async fn transact(&self, transport: &mut T, command: &str) -> Result<Vec<String>> {
        let raw = self.exchange(transport, command).await?;
        Ok(strip_echo(split_lines(&raw)))
    }

    /// Write a framed command and read the raw reply
    ///
    /// A modem that stays silent through the settle delay and the response
    /// timeout fails the exchange with `CommandTimeout`.
    async fn exchange(&self, transport: &mut T, command: &str) -> Result<String> {
        trace!(command, "CMD");
        self.write_all(transport, &command::frame_command(command))
            .await?;
        sleep(self.timing.settle_delay).await;

        if !self
            .poll_available(transport, self.timing.response_timeout)
            .await?
        {
            let waited = self.timing.settle_delay + self.timing.response_timeout;
            return Err(FonaError::CommandTimeout {
                duration_ms: waited.as_millis() as u64,
            });
        }

        let raw = self.read_pending(transport).await?;
        trace!(command, response = %raw.trim(), "RSP");
        Ok(raw)
    }

    async fn write_all(&self, transport: &mut T, bytes: &[u8]) -> Result<()> {
        let written = transport.write(bytes).await?;
        if written != bytes.len() {
            debug!(written, expected = bytes.len(), "Short write");
        }
        transport.flush().await
    }

    /// Read everything the modem has buffered
    async fn read_pending(&self, transport: &mut T) -> Result<String> {
        let deadline = Instant::now() + self.timing.read_timeout;
        let mut buf = BytesMut::new();

        while transport.bytes_available()? > 0 {
            let chunk = transport.read(self.timing.read_timeout).await?;
            if chunk.is_empty() {
                break;
            }
            buf.extend_from_slice(&chunk);
            if Instant::now() >= deadline {
                debug!(bytes = buf.len(), "Read deadline reached with data pending");
                break;
            }
        }

        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Poll until bytes are available or `timeout` elapses
    async fn poll_available(&self, transport: &mut T, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if transport.bytes_available()? > 0 {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.timing.poll_step).await;
        }
    }
}

impl<T: Transport> std::fmt::Debug for AtChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtChannel")
            .field("transport", &self.transport_name)
            .field("power_pin", &self.power_pin.is_some())
            .field("ring_indicator_pin", &self.ring_indicator_pin)
            .field("utc_offset_hours", &self.utc_offset_hours)
            .finish()
    }
}

/// Drop the command echo, the first line of every reply
fn strip_echo(mut lines: Vec<String>) -> Vec<String> {
    if !lines.is_empty() {
        lines.remove(0);
    }
    lines
}

fn find_marker<'a>(lines: &'a [String], marker: &str) -> Option<&'a str> {
    lines
        .iter()
        .find(|line| line.contains(marker))
        .map(String::as_str)
}

/// Pair each `+CMGL:` header with the line that follows it
fn parse_message_list(lines: &[String], utc_offset_hours: i32) -> Vec<SmsMessage> {
    let mut messages = Vec::new();
    let mut iter = lines.iter().peekable();

    while let Some(line) = iter.next() {
        if !line.starts_with(LIST_MARKER) {
            continue;
        }
        let body = match iter.peek() {
            Some(next) if !next.starts_with(LIST_MARKER) => {
                iter.next().map(String::as_str).unwrap_or_default()
            }
            _ => "",
        };
        messages.push(SmsMessage::parse(line, body, utc_offset_hours));
    }

    messages
}
