//! Phone number normalization

/// Shortest number accepted as a destination
const MIN_DIGITS: usize = 7;

/// E.164 maximum
const MAX_DIGITS: usize = 15;

/// Normalize a phone number to the digits the modem expects.
///
/// Punctuation, spaces and a leading `+` are dropped. An 11-digit number
/// starting with the North American country code `1` is reduced to its
/// 10-digit national form so that numbers reported by the modem
/// (`+12065551234`) compare equal to configured ones (`206-555-1234`).
///
/// Returns `None` when fewer than 7 or more than 15 digits remain.
pub fn clean_phone_number(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();

    let national = if digits.len() == 11 && digits.starts_with('1') {
        &digits[1..]
    } else {
        digits.as_str()
    };

    if national.len() < MIN_DIGITS || national.len() > MAX_DIGITS {
        return None;
    }

    Some(national.to_string())
}
