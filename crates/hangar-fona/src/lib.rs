//! SMS modem client for the HangarBuddy pre-heater controller
//!
//! Drives an Adafruit Fona (SIM800-family) GSM modem over a serial line
//! with text-mode AT commands: send and list SMS, delete stored messages,
//! read battery and signal quality, and track whether a message is waiting.
//!
//! # Architecture
//!
//! 1. **Transport** - Byte pipe to the modem ([`Transport`], serial or scripted)
//! 2. **AT channel** - Framing, response parsing and the SMS handshake,
//!    serialized behind one lock ([`AtChannel`])
//! 3. **Manager** - Queues fed by timers and callers, drained by a single
//!    consumer ([`FonaManager`])
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // Cargo.toml: hangar-fona = { version = "0.1", features = ["serial"] }
//! use hangar_fona::{AtChannel, FonaConfig, FonaManager, SerialTransport};
//!
//! #[tokio::main]
//! async fn main() -> hangar_fona::Result<()> {
//!     let config = FonaConfig::load("hangar-buddy.toml")?;
//!     let transport = SerialTransport::open(&config.serial.port, config.serial.baud_rate)?;
//!
//!     let channel = AtChannel::from_config(Some(transport), &config);
//!     channel.initialize().await;
//!
//!     let manager = FonaManager::new(channel, config.manager.clone());
//!     manager.start().await;
//!
//!     manager.send_message("2065551234", "Heater is ON");
//!     loop {
//!         manager.update().await;
//!         tokio::time::sleep(std::time::Duration::from_secs(1)).await;
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - `serial` - Serial port transport (requires `libudev-dev` on Linux)

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Core
pub mod config;
pub mod error;
pub mod transport;

// Parsed modem data
pub mod battery;
pub mod phone;
pub mod signal;
pub mod sms;

// Modem access
pub mod channel;
pub mod command;
pub mod gpio;
pub mod manager;
pub mod scheduler;

// Testing utilities
pub mod test_utils;

pub use battery::{BatteryCondition, BATTERY_CRITICAL, BATTERY_WARNING};
pub use channel::AtChannel;
pub use config::{
    FonaConfig, FonaConfigBuilder, GpioConfig, ManagerConfig, ModemTiming, SerialConfig,
    DEFAULT_BAUD_RATE, DEFAULT_RETRY_ATTEMPTS, DEFAULT_SERIAL_PORT, DEFAULT_UTC_OFFSET_HOURS,
};
pub use error::{FonaError, Result};
pub use gpio::{
    watch_ring_indicator, MessageWaitingQueue, PowerStatusPin, RingIndicator, SysfsPin,
    WaitingMarker,
};
pub use manager::{FonaManager, OutboundMessageRequest, StatusTrigger};
pub use phone::clean_phone_number;
pub use scheduler::RecurringTask;
pub use signal::{SignalClass, SignalStrength};
pub use sms::SmsMessage;
pub use transport::Transport;

#[cfg(feature = "serial")]
pub use transport::SerialTransport;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
