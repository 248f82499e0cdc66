//! AT command vocabulary and wire framing
//!
//! Every command is written as `$<command>\r\n`. The leading `$` is not
//! standard AT syntax, but the HangarBuddy Fona firmware expects it and it
//! must be sent byte-for-byte.

/// Attention / liveness check
pub const ATTENTION: &str = "AT";

/// Numeric error codes only; `AT+CMGS` misbehaves with verbose errors
pub const DISABLE_VERBOSE_ERRORS: &str = "AT+CMEE=0";

/// Verbose error text, for troubleshooting from the terminal
pub const ENABLE_VERBOSE_ERRORS: &str = "AT+CMEE=2";

/// Text-mode SMS
pub const TEXT_MODE: &str = "AT+CMGF=1";

/// Signal quality
pub const SIGNAL_QUALITY: &str = "AT+CSQ";

/// Battery charge
pub const BATTERY_STATUS: &str = "AT+CBC";

/// List every stored SMS
pub const LIST_ALL_MESSAGES: &str = "AT+CMGL=\"ALL\"";

/// Pulse the ring indicator on incoming SMS
pub const RING_INDICATOR_ON_SMS: &str = "AT+CFGRI=1";

/// Module identification
pub const MODULE_INFO: &str = "ATI";

/// SIM card identifier
pub const SIM_CARD_ID: &str = "AT+CCID";

/// Current operator
pub const CARRIER: &str = "AT+COPS?";

/// Ctrl-Z, submits an SMS body in text mode
pub const SMS_SUBMIT: u8 = 0x1A;

/// Escape, aborts an SMS body in text mode
pub const SMS_ABORT: u8 = 0x1B;

/// Line terminator written before `AT+CMGS`
pub const HANDSHAKE_RESET: &[u8] = b"\r\r\n";

/// Carriage return that ends the `AT+CMGS` line
pub const HANDSHAKE_CR: &[u8] = b"\r";

/// Frame a command for the wire
pub fn frame_command(command: &str) -> Vec<u8> {
    format!("${}\r\n", command).into_bytes()
}

/// `AT+CMGS="<number>"`, written without a terminator
pub fn send_sms(number: &str) -> String {
    format!("AT+CMGS=\"{}\"", number)
}

/// `AT+CMGD=<id>`
pub fn delete_message(message_id: u32) -> String {
    format!("AT+CMGD={}", message_id)
}

/// SMS body followed by the submit terminator
///
/// Control characters that would submit or abort the message early are
/// removed from the text. Returns `None` when nothing but whitespace is
/// left to send.
pub fn sms_body(text: &str) -> Option<Vec<u8>> {
    let mut body: Vec<u8> = text
        .bytes()
        .filter(|b| *b != SMS_SUBMIT && *b != SMS_ABORT)
        .collect();
    if body.iter().all(u8::is_ascii_whitespace) {
        return None;
    }
    body.push(SMS_SUBMIT);
    Some(body)
}

/// Split raw modem output into trimmed, non-empty lines
pub fn split_lines(raw: &str) -> Vec<String> {
    raw.split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split raw modem output into trimmed lines, keeping interior blank lines
///
/// Leading and trailing blank lines are dropped. A blank line inside a
/// message listing is an empty SMS body and must keep its position.
pub fn split_lines_keep_blank(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw.split('\n').map(str::trim).collect();
    let Some(first) = lines.iter().position(|line| !line.is_empty()) else {
        return Vec::new();
    };
    let last = lines.iter().rposition(|line| !line.is_empty()).unwrap_or(first);
    lines[first..=last].iter().map(|line| line.to_string()).collect()
}
