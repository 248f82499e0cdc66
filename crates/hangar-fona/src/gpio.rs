//! Modem status lines: power status and ring indicator
//!
//! The ring indicator is pulsed by the modem when an SMS arrives. Whatever
//! GPIO library detects the rising edge calls [`RingIndicator::pulse`] from
//! its own callback context. That call is a `try_send` into a bounded
//! channel: it never blocks, never takes a lock and never touches the serial
//! transport. A periodic [`RingIndicator::poll`] covers missed pulses.
//!
//! ```text
//!  RI edge ──┐
//!            ├──▶ MessageWaitingQueue ──▶ is_message_waiting() / clear()
//!  60s poll ─┘
//! ```

use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{FonaError, Result};

/// Capacity of the message-waiting queue
pub const MESSAGE_WAITING_CAPACITY: usize = 32;

/// Why a message check was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingMarker {
    /// Fallback timer fired
    Poll,
    /// Rising edge on the ring indicator pin
    RingIndicator {
        /// Physical pin number, when known
        pin: Option<u8>,
    },
}

impl fmt::Display for WaitingMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitingMarker::Poll => write!(f, "POLL"),
            WaitingMarker::RingIndicator { pin: Some(pin) } => write!(f, "RI:{}", pin),
            WaitingMarker::RingIndicator { pin: None } => write!(f, "RI"),
        }
    }
}

/// Level input reporting whether the modem is powered
///
/// Implemented for any `FnMut() -> bool` so a GPIO read can be passed as a
/// closure.
pub trait PowerStatusPin: Send {
    /// True while the line is high
    fn is_high(&mut self) -> Result<bool>;
}

impl<F> PowerStatusPin for F
where
    F: FnMut() -> bool + Send,
{
    fn is_high(&mut self) -> Result<bool> {
        Ok(self())
    }
}

/// Root of the Linux sysfs GPIO tree
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Raspberry Pi header pin to BCM line number
///
/// Pins are configured by their physical position on the 40-pin header;
/// the kernel addresses them by BCM line. Power, ground and ID EEPROM pins
/// have no line.
pub fn board_to_bcm(physical_pin: u8) -> Option<u8> {
    let line = match physical_pin {
        3 => 2,
        5 => 3,
        7 => 4,
        8 => 14,
        10 => 15,
        11 => 17,
        12 => 18,
        13 => 27,
        15 => 22,
        16 => 23,
        18 => 24,
        19 => 10,
        21 => 9,
        22 => 25,
        23 => 11,
        24 => 8,
        26 => 7,
        29 => 5,
        31 => 6,
        32 => 12,
        33 => 13,
        35 => 19,
        36 => 16,
        37 => 26,
        38 => 20,
        40 => 21,
        _ => return None,
    };
    Some(line)
}

/// Input read through `/sys/class/gpio/gpioN/value`
///
/// The line must already be exported and configured as an input.
#[derive(Debug, Clone)]
pub struct SysfsPin {
    physical_pin: u8,
    value_path: PathBuf,
}

impl SysfsPin {
    /// Pin addressed by its physical header position
    pub fn from_board_pin(physical_pin: u8) -> Result<Self> {
        let line = board_to_bcm(physical_pin).ok_or_else(|| {
            FonaError::Gpio(format!("header pin {} is not a GPIO line", physical_pin))
        })?;
        let value_path = Path::new(SYSFS_GPIO_ROOT)
            .join(format!("gpio{}", line))
            .join("value");
        Ok(Self::at_path(physical_pin, value_path))
    }

    /// Pin whose value file lives at `value_path`
    pub fn at_path(physical_pin: u8, value_path: impl Into<PathBuf>) -> Self {
        Self {
            physical_pin,
            value_path: value_path.into(),
        }
    }

    /// Physical header position
    pub fn physical_pin(&self) -> u8 {
        self.physical_pin
    }

    /// Current level
    pub fn read(&self) -> Result<bool> {
        let value = std::fs::read_to_string(&self.value_path).map_err(|e| {
            FonaError::Gpio(format!("{}: {}", self.value_path.display(), e))
        })?;
        match value.trim() {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(FonaError::Gpio(format!(
                "unexpected value {:?} from {}",
                other,
                self.value_path.display()
            ))),
        }
    }
}

impl PowerStatusPin for SysfsPin {
    fn is_high(&mut self) -> Result<bool> {
        self.read()
    }
}

/// Sample `pin` every `period` and pulse `ring_indicator` on each rising edge
///
/// Must be called from within a tokio runtime. Read failures are logged
/// once and the watcher keeps sampling.
pub fn watch_ring_indicator(
    pin: SysfsPin,
    ring_indicator: RingIndicator,
    period: Duration,
) -> JoinHandle<()> {
    info!(pin = pin.physical_pin(), period = ?period, "Watching ring indicator");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        let mut last_high = false;
        let mut reported = false;

        loop {
            ticker.tick().await;
            match pin.read() {
                Ok(high) => {
                    if high && !last_high {
                        trace!(pin = pin.physical_pin(), "Ring indicator rising edge");
                        ring_indicator.pulse();
                    }
                    last_high = high;
                    reported = false;
                }
                Err(e) if !reported => {
                    warn!("Ring indicator read failed: {}", e);
                    reported = true;
                }
                Err(_) => {}
            }
        }
    })
}

/// FIFO of pending "check for messages" markers
#[derive(Debug)]
pub struct MessageWaitingQueue {
    tx: mpsc::Sender<WaitingMarker>,
    rx: Mutex<mpsc::Receiver<WaitingMarker>>,
}

impl MessageWaitingQueue {
    /// Create a queue holding at most `capacity` markers
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Producer handle for interrupt and timer contexts
    pub fn ring_indicator(&self, pin: Option<u8>) -> RingIndicator {
        RingIndicator {
            tx: self.tx.clone(),
            pin,
        }
    }

    /// At least one marker is pending
    pub fn is_message_waiting(&self) -> bool {
        !self.rx.lock().is_empty()
    }

    /// Drop every pending marker, returning how many were cleared
    pub fn clear(&self) -> usize {
        let mut rx = self.rx.lock();
        let mut cleared = 0;
        while let Ok(marker) = rx.try_recv() {
            trace!(%marker, "Cleared message-waiting marker");
            cleared += 1;
        }
        cleared
    }
}

impl Default for MessageWaitingQueue {
    fn default() -> Self {
        Self::new(MESSAGE_WAITING_CAPACITY)
    }
}

/// Cheap, cloneable producer for the message-waiting queue
#[derive(Debug, Clone)]
pub struct RingIndicator {
    tx: mpsc::Sender<WaitingMarker>,
    pin: Option<u8>,
}

impl RingIndicator {
    /// Record a rising edge on the ring indicator pin
    pub fn pulse(&self) {
        self.enqueue(WaitingMarker::RingIndicator { pin: self.pin });
    }

    /// Record a fallback poll
    pub fn poll(&self) {
        self.enqueue(WaitingMarker::Poll);
    }

    fn enqueue(&self, marker: WaitingMarker) {
        match self.tx.try_send(marker) {
            Ok(()) => {}
            // A full queue already guarantees a pending check.
            Err(TrySendError::Full(_)) => debug!(%marker, "Message-waiting queue full"),
            Err(TrySendError::Closed(_)) => debug!(%marker, "Message-waiting queue closed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_display() {
        assert_eq!(WaitingMarker::Poll.to_string(), "POLL");
        assert_eq!(
            WaitingMarker::RingIndicator { pin: Some(18) }.to_string(),
            "RI:18"
        );
    }

    #[test]
    fn test_pulse_and_clear() {
        let queue = MessageWaitingQueue::default();
        assert!(!queue.is_message_waiting());

        let ri = queue.ring_indicator(Some(18));
        ri.pulse();
        ri.poll();
        assert!(queue.is_message_waiting());

        assert_eq!(queue.clear(), 2);
        assert!(!queue.is_message_waiting());
    }

    #[test]
    fn test_full_queue_does_not_block() {
        let queue = MessageWaitingQueue::new(2);
        let ri = queue.ring_indicator(None);
        for _ in 0..10 {
            ri.pulse();
        }
        assert_eq!(queue.clear(), 2);
    }

    #[test]
    fn test_pulse_from_other_threads() {
        let queue = MessageWaitingQueue::default();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ri = queue.ring_indicator(Some(18));
                std::thread::spawn(move || ri.pulse())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.clear(), 4);
    }

    #[test]
    fn test_board_to_bcm() {
        assert_eq!(board_to_bcm(18), Some(24));
        assert_eq!(board_to_bcm(16), Some(23));
        assert_eq!(board_to_bcm(1), None);
        assert!(SysfsPin::from_board_pin(2).is_err());
    }

    fn value_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "hangar-fona-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_sysfs_pin_read() {
        let path = value_file("power", "1\n");
        let mut pin = SysfsPin::at_path(16, &path);
        assert!(pin.is_high().unwrap());

        std::fs::write(&path, "0\n").unwrap();
        assert!(!pin.is_high().unwrap());

        std::fs::write(&path, "x").unwrap();
        assert!(pin.read().is_err());
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(pin.read(), Err(FonaError::Gpio(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_ring_indicator_pulses_on_rising_edge() {
        let path = value_file("ri", "0");
        let queue = MessageWaitingQueue::default();
        let handle = watch_ring_indicator(
            SysfsPin::at_path(18, &path),
            queue.ring_indicator(Some(18)),
            Duration::from_millis(100),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!queue.is_message_waiting());

        std::fs::write(&path, "1").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(queue.clear(), 1);

        handle.abort();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_closure_power_pin() {
        let mut pin = || true;
        assert!(pin.is_high().unwrap());
    }
}
