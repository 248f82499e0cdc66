//! Text-mode SMS records
//!
//! `AT+CMGL="ALL"` lists each stored message as two lines: a header
//!
//! ```text
//! +CMGL: 3,"REC UNREAD","+12065551234","","18/01/14,19:28:52-32"
//! ```
//!
//! followed by the message body. The timestamp is the modem's local time;
//! the trailing quarter-hour zone field is ignored and a configured hour
//! offset is applied instead.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::debug;

use crate::phone::clean_phone_number;

/// Marker identifying a message header in a list response
pub const LIST_MARKER: &str = "+CMGL:";

/// A message read from the SIM
#[derive(Debug, Clone, PartialEq)]
pub struct SmsMessage {
    /// Storage index used to delete the message
    pub message_id: Option<u32>,
    /// Sender exactly as reported by the modem
    pub sender_number: Option<String>,
    /// Storage status, e.g. `REC UNREAD`
    pub status: Option<String>,
    /// Message text
    pub body: String,
    /// Modem-local send time
    pub sent_time: Option<NaiveDateTime>,
    /// Wall-clock time the record was parsed
    pub received_time: DateTime<Utc>,
    /// Hours added to `sent_time` to reach UTC
    pub utc_offset_hours: i32,
    /// The header could not be parsed; nothing but `body` is reliable
    pub error_state: bool,
}

struct Header {
    message_id: u32,
    status: String,
    sender: String,
    sent_time: NaiveDateTime,
}

impl SmsMessage {
    /// Build a message from its header and body lines. Never fails; a
    /// malformed header sets `error_state`.
    pub fn parse(header: &str, body: &str, utc_offset_hours: i32) -> Self {
        let received_time = Utc::now();

        match parse_header(header) {
            Some(parsed) => Self {
                message_id: Some(parsed.message_id),
                sender_number: Some(parsed.sender),
                status: Some(parsed.status),
                body: body.to_string(),
                sent_time: Some(parsed.sent_time),
                received_time,
                utc_offset_hours,
                error_state: false,
            },
            None => {
                debug!(header, "Malformed SMS header");
                Self {
                    message_id: None,
                    sender_number: None,
                    status: None,
                    body: body.to_string(),
                    sent_time: None,
                    received_time,
                    utc_offset_hours,
                    error_state: true,
                }
            }
        }
    }

    /// Is the message valid?
    pub fn is_message_ok(&self) -> bool {
        !self.error_state
    }

    /// Normalized sender number, only for a valid message
    pub fn sender(&self) -> Option<String> {
        if !self.is_message_ok() {
            return None;
        }
        self.sender_number.as_deref().and_then(clean_phone_number)
    }

    /// Send time corrected to UTC
    pub fn sent_time_utc(&self) -> Option<DateTime<Utc>> {
        self.sent_time
            .map(|local| (local + Duration::hours(self.utc_offset_hours as i64)).and_utc())
    }

    /// Whole minutes between the message being sent and being read
    pub fn minutes_waiting(&self) -> Option<i64> {
        self.sent_time_utc()
            .map(|sent| (self.received_time - sent).num_minutes())
    }
}

fn parse_header(header: &str) -> Option<Header> {
    let fields: Vec<&str> = header.split(',').collect();
    if fields.len() < 6 {
        return None;
    }

    let message_id = fields[0].rsplit(':').next()?.trim().parse::<u32>().ok()?;
    let status = unquote(fields[1]);
    let sender = unquote(fields[2]);

    let date = parse_date(&unquote(fields[4]))?;
    let time = parse_time(&unquote(fields[5]))?;

    Some(Header {
        message_id,
        status,
        sender,
        sent_time: NaiveDateTime::new(date, time),
    })
}

fn unquote(field: &str) -> String {
    field.trim().replace('"', "")
}

/// `yy/MM/dd`
fn parse_date(text: &str) -> Option<NaiveDate> {
    let mut parts = text.split('/').map(|part| part.trim().parse::<u32>());
    let year = parts.next()?.ok()?;
    let month = parts.next()?.ok()?;
    let day = parts.next()?.ok()?;
    if parts.next().is_some() || year > 99 {
        return None;
    }
    NaiveDate::from_ymd_opt(2000 + year as i32, month, day)
}

/// `hh:mm:ss` with an optional `+zz`/`-zz` suffix
fn parse_time(text: &str) -> Option<NaiveTime> {
    let clock = text.split(['+', '-']).next()?;
    let mut parts = clock.split(':').map(|part| part.trim().parse::<u32>());
    let hour = parts.next()?.ok()?;
    let minute = parts.next()?.ok()?;
    let second = parts.next()?.ok()?;
    NaiveTime::from_hms_opt(hour, minute, second)
}
