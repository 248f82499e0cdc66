//! Battery status reported by `AT+CBC`
//!
//! The modem answers with a line of the form `+CBC: <bcs>,<bcl>,<voltage>`
//! where `bcs` is the charge state code, `bcl` the remaining charge in
//! percent and `voltage` a raw reading in tenths of the reported unit.

use serde::{Deserialize, Serialize};

/// Charge percentage at or below which the battery is not ok
pub const BATTERY_CRITICAL: u8 = 40;

/// Charge percentage at or below which the battery should be reported as low
pub const BATTERY_WARNING: u8 = 60;

/// Marker identifying the battery line in a response
pub const BATTERY_MARKER: &str = "CBC:";

/// Snapshot of the modem battery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryCondition {
    /// Charge state code reported by the modem
    pub charge_state: u8,
    /// Remaining charge, 0-100
    pub battery_percent: u8,
    /// Battery voltage (raw reading divided by 10)
    pub battery_voltage: f32,
    /// The response could not be parsed
    pub error_state: bool,
}

impl BatteryCondition {
    /// Parse a `+CBC:` response line. Never fails; a missing or malformed
    /// line produces a zeroed snapshot with `error_state` set.
    pub fn parse(command_result: Option<&str>) -> Self {
        command_result
            .and_then(Self::parse_fields)
            .unwrap_or_else(Self::unavailable)
    }

    /// Zeroed snapshot used when no reading could be taken
    pub fn unavailable() -> Self {
        Self {
            charge_state: 0,
            battery_percent: 0,
            battery_voltage: 0.0,
            error_state: true,
        }
    }

    fn parse_fields(line: &str) -> Option<Self> {
        let (_, values) = line.split_once(':')?;
        let mut fields = values.split(',').map(str::trim);

        let charge_state = fields.next()?.parse::<u8>().ok()?;
        let battery_percent = fields.next()?.parse::<u8>().ok()?;
        let raw_voltage = fields.next()?.parse::<f32>().ok()?;

        if battery_percent > 100 {
            return None;
        }

        Some(Self {
            charge_state,
            battery_percent,
            battery_voltage: raw_voltage / 10.0,
            error_state: false,
        })
    }

    /// Remaining charge in percent
    pub fn percent(&self) -> u8 {
        self.battery_percent
    }

    /// Battery voltage
    pub fn voltage(&self) -> f32 {
        self.battery_voltage
    }

    /// The reading is valid and the charge is above [`BATTERY_CRITICAL`]
    pub fn is_battery_ok(&self) -> bool {
        !self.error_state && self.battery_percent > BATTERY_CRITICAL
    }

    /// The reading is invalid or the charge is at or below [`BATTERY_WARNING`]
    pub fn is_battery_low(&self) -> bool {
        self.error_state || self.battery_percent <= BATTERY_WARNING
    }
}

impl Default for BatteryCondition {
    fn default() -> Self {
        Self::unavailable()
    }
}
