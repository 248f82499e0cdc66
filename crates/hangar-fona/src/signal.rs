//! Signal quality reported by `AT+CSQ`

use serde::{Deserialize, Serialize};
use std::fmt;

/// Marker identifying the signal line in a response
pub const SIGNAL_MARKER: &str = "+CSQ:";

/// RSSI value the modem reports when the signal is not detectable
pub const RSSI_NOT_DETECTABLE: i32 = 99;

/// Upper RSSI bound (inclusive) for each class, checked in order
const STRENGTH_THRESHOLDS: [(i32, SignalClass); 5] = [
    (0, SignalClass::None),
    (4, SignalClass::Poor),
    (9, SignalClass::Marginal),
    (14, SignalClass::Ok),
    (19, SignalClass::Good),
];

/// Human meaning of an RSSI reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalClass {
    /// Reading failed or the modem could not measure the signal
    Unknown,
    /// No usable signal
    None,
    /// Poor
    Poor,
    /// Marginal
    Marginal,
    /// OK
    Ok,
    /// Good
    Good,
    /// Excellent
    Excellent,
}

impl fmt::Display for SignalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalClass::Unknown => write!(f, "Unknown"),
            SignalClass::None => write!(f, "None"),
            SignalClass::Poor => write!(f, "Poor"),
            SignalClass::Marginal => write!(f, "Marginal"),
            SignalClass::Ok => write!(f, "OK"),
            SignalClass::Good => write!(f, "Good"),
            SignalClass::Excellent => write!(f, "Excellent"),
        }
    }
}

/// Snapshot of the cellular signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalStrength {
    /// Received signal strength, modem scale 0-31
    pub rssi: i32,
    /// Channel bit error rate
    pub bit_error_rate: i32,
    /// The response could not be parsed
    pub error_state: bool,
}

impl SignalStrength {
    /// Parse a `+CSQ: <rssi>,<ber>` line. A missing or malformed line yields
    /// zeros with `error_state` set.
    pub fn parse(command_result: Option<&str>) -> Self {
        command_result
            .and_then(|line| {
                let (_, values) = line.split_once(':')?;
                let (rssi, ber) = values.split_once(',')?;
                Some(Self {
                    rssi: rssi.trim().parse().ok()?,
                    bit_error_rate: ber.trim().parse().ok()?,
                    error_state: false,
                })
            })
            .unwrap_or_else(Self::unavailable)
    }

    /// Zeroed snapshot used when no reading could be taken
    pub fn unavailable() -> Self {
        Self {
            rssi: 0,
            bit_error_rate: 0,
            error_state: true,
        }
    }

    /// Map the RSSI through the threshold table
    pub fn classify_strength(&self) -> SignalClass {
        if self.error_state || self.rssi == RSSI_NOT_DETECTABLE {
            return SignalClass::Unknown;
        }

        STRENGTH_THRESHOLDS
            .iter()
            .find(|(limit, _)| self.rssi <= *limit)
            .map(|(_, class)| *class)
            .unwrap_or(SignalClass::Excellent)
    }
}

impl Default for SignalStrength {
    fn default() -> Self {
        Self::unavailable()
    }
}
