//! Configuration types for the Fona modem client
//!
//! This module provides configuration structures for the serial link, the
//! modem's GPIO lines, the manager's polling intervals and the AT channel's
//! timing. Everything has a default matching the HangarBuddy hardware, so an
//! empty TOML file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{FonaError, Result};

/// Default baud rate for the Fona serial link
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default serial device
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

/// Physical pin wired to the ring indicator (GPIO24)
pub const DEFAULT_RING_INDICATOR_PIN: u8 = 18;

/// Physical pin wired to the power status line (GPIO23)
pub const DEFAULT_POWER_STATUS_PIN: u8 = 16;

/// Hours added to the modem's local clock to reach UTC
pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

/// Send attempts given to an outbound message when the caller does not say
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 4;

/// Largest UTC offset accepted by [`FonaConfig::validate`]
pub const MAX_UTC_OFFSET_HOURS: i32 = 14;

/// Main configuration for the Fona modem client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FonaConfig {
    /// Serial link settings
    #[serde(default)]
    pub serial: SerialConfig,

    /// Power status and ring indicator pins
    #[serde(default)]
    pub gpio: GpioConfig,

    /// Offset applied to modem timestamps
    #[serde(default = "default_utc_offset")]
    pub utc_offset_hours: i32,

    /// Manager polling behavior
    #[serde(default)]
    pub manager: ManagerConfig,

    /// AT channel timing
    #[serde(default)]
    pub timing: ModemTiming,
}

fn default_utc_offset() -> i32 {
    DEFAULT_UTC_OFFSET_HOURS
}

impl Default for FonaConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            gpio: GpioConfig::default(),
            utc_offset_hours: DEFAULT_UTC_OFFSET_HOURS,
            manager: ManagerConfig::default(),
            timing: ModemTiming::default(),
        }
    }
}

impl FonaConfig {
    /// Parse a configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: FonaConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Reject values the hardware cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.serial.baud_rate == 0 {
            return Err(FonaError::InvalidConfig(
                "serial.baud_rate must be non-zero".to_string(),
            ));
        }
        if self.utc_offset_hours.abs() > MAX_UTC_OFFSET_HOURS {
            return Err(FonaError::InvalidConfig(format!(
                "utc_offset_hours {} is outside +/-{}",
                self.utc_offset_hours, MAX_UTC_OFFSET_HOURS
            )));
        }

        let intervals = [
            ("manager.battery_interval", self.manager.battery_interval),
            ("manager.signal_interval", self.manager.signal_interval),
            (
                "manager.message_poll_interval",
                self.manager.message_poll_interval,
            ),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(FonaError::InvalidConfig(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }
}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Path to serial port (e.g., /dev/ttyUSB0, /dev/serial0)
    #[serde(default = "default_serial_port")]
    pub port: PathBuf,

    /// Baud rate (default: 9600)
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

fn default_serial_port() -> PathBuf {
    PathBuf::from(DEFAULT_SERIAL_PORT)
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Digital lines between the host board and the modem
///
/// Pin numbers use physical board numbering. GPIO is only used when it is
/// enabled and both pins are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpioConfig {
    /// Set to false when the modem's status lines are not wired
    #[serde(default = "default_gpio_enabled")]
    pub enabled: bool,

    /// Level input that is high while the modem is powered
    #[serde(default = "default_power_status_pin")]
    pub power_status_pin: Option<u8>,

    /// Rising-edge input pulsed by the modem on an incoming SMS
    #[serde(default = "default_ring_indicator_pin")]
    pub ring_indicator_pin: Option<u8>,
}

fn default_gpio_enabled() -> bool {
    true
}

fn default_power_status_pin() -> Option<u8> {
    Some(DEFAULT_POWER_STATUS_PIN)
}

fn default_ring_indicator_pin() -> Option<u8> {
    Some(DEFAULT_RING_INDICATOR_PIN)
}

impl GpioConfig {
    /// Both lines are wired, so the ring indicator can be configured
    pub fn uses_gpio(&self) -> bool {
        self.enabled && self.power_status_pin.is_some() && self.ring_indicator_pin.is_some()
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            power_status_pin: default_power_status_pin(),
            ring_indicator_pin: default_ring_indicator_pin(),
        }
    }
}

/// Manager polling behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// How often a battery re-check is requested
    #[serde(with = "humantime_serde", default = "default_battery_interval")]
    pub battery_interval: Duration,

    /// How often a signal re-check is requested
    #[serde(with = "humantime_serde", default = "default_signal_interval")]
    pub signal_interval: Duration,

    /// Fallback poll for messages in case a ring indicator pulse is missed
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub message_poll_interval: Duration,

    /// Send attempts for messages queued without an explicit budget
    #[serde(default = "default_retries")]
    pub default_retries: u32,
}

fn default_battery_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_signal_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_retries() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            battery_interval: default_battery_interval(),
            signal_interval: default_signal_interval(),
            message_poll_interval: default_poll_interval(),
            default_retries: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// Waits used by the AT command channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModemTiming {
    /// Pause between writing a command and reading its response
    #[serde(with = "humantime_serde", default = "default_settle_delay")]
    pub settle_delay: Duration,

    /// Longest wait for the first byte of a handshake response
    #[serde(with = "humantime_serde", default = "default_response_timeout")]
    pub response_timeout: Duration,

    /// Poll step while waiting for a response
    #[serde(with = "humantime_serde", default = "default_poll_step")]
    pub poll_step: Duration,

    /// Settle time before asking the modem for battery status
    #[serde(with = "humantime_serde", default = "default_battery_pre_delay")]
    pub battery_pre_delay: Duration,

    /// Upper bound on one buffered read
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read_timeout: Duration,
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_response_timeout() -> Duration {
    Duration::from_secs(2)
}

fn default_poll_step() -> Duration {
    Duration::from_millis(500)
}

fn default_battery_pre_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(5)
}

impl Default for ModemTiming {
    fn default() -> Self {
        Self {
            settle_delay: default_settle_delay(),
            response_timeout: default_response_timeout(),
            poll_step: default_poll_step(),
            battery_pre_delay: default_battery_pre_delay(),
            read_timeout: default_read_timeout(),
        }
    }
}

/// Builder for FonaConfig
#[derive(Debug, Default)]
pub struct FonaConfigBuilder {
    config: FonaConfig,
}

impl FonaConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set serial port path
    pub fn serial_port(mut self, port: impl Into<PathBuf>) -> Self {
        self.config.serial.port = port.into();
        self
    }

    /// Set serial baud rate
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.serial.baud_rate = baud_rate;
        self
    }

    /// Set or clear both GPIO pins
    pub fn gpio_pins(mut self, power_status: Option<u8>, ring_indicator: Option<u8>) -> Self {
        self.config.gpio.power_status_pin = power_status;
        self.config.gpio.ring_indicator_pin = ring_indicator;
        self
    }

    /// Disable GPIO use entirely
    pub fn without_gpio(mut self) -> Self {
        self.config.gpio.enabled = false;
        self.gpio_pins(None, None)
    }

    /// Set the modem clock's offset from UTC, clamped to a real timezone
    pub fn utc_offset_hours(mut self, hours: i32) -> Self {
        self.config.utc_offset_hours = hours.clamp(-MAX_UTC_OFFSET_HOURS, MAX_UTC_OFFSET_HOURS);
        self
    }

    /// Set the default send budget for queued messages
    pub fn default_retries(mut self, retries: u32) -> Self {
        self.config.manager.default_retries = retries;
        self
    }

    /// Set the battery and signal poll intervals
    pub fn status_intervals(mut self, battery: Duration, signal: Duration) -> Self {
        self.config.manager.battery_interval = battery;
        self.config.manager.signal_interval = signal;
        self
    }

    /// Set the fallback message poll interval
    pub fn message_poll_interval(mut self, interval: Duration) -> Self {
        self.config.manager.message_poll_interval = interval;
        self
    }

    /// Replace the AT channel timing
    pub fn timing(mut self, timing: ModemTiming) -> Self {
        self.config.timing = timing;
        self
    }

    /// Build the configuration
    pub fn build(self) -> FonaConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
