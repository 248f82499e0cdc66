//! Queue-driven facade over the AT channel
//!
//! Producers (timers, the application loop, GPIO callbacks) never touch the
//! modem. They enqueue a [`StatusTrigger`] or an [`OutboundMessageRequest`]
//! and return immediately. [`FonaManager::update`] is the single consumer:
//! it drains whatever is queued, performs the modem I/O and refreshes the
//! cached snapshots.
//!
//! ```text
//!  battery timer ──┐
//!  signal timer  ──┼──▶ status queue ───┐
//!  request_status ─┘                    │
//!                                       ├──▶ update() ──▶ AtChannel
//!  send_message ───────▶ outbound queue ┘
//! ```
//!
//! Within one `update`, repeated battery or signal triggers collapse into a
//! single modem read, and each queued message gets exactly one attempt.
//! Messages that fail with a transport fault go to the back of the queue
//! until their retry budget is spent.

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use crate::battery::BatteryCondition;
use crate::channel::AtChannel;
use crate::config::ManagerConfig;
use crate::gpio::RingIndicator;
use crate::scheduler::RecurringTask;
use crate::signal::SignalStrength;
use crate::sms::SmsMessage;
use crate::transport::Transport;

/// Request to refresh one status snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTrigger {
    /// Re-read the battery
    CheckBattery,
    /// Re-read the signal strength
    CheckSignal,
}

/// SMS waiting to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessageRequest {
    /// Destination as given by the caller
    pub number: String,
    /// Message text
    pub text: String,
    /// Attempts remaining, including the next one
    pub retries_left: u32,
}

impl OutboundMessageRequest {
    /// Create a request; a budget of zero still gets one attempt
    pub fn new(number: impl Into<String>, text: impl Into<String>, retries: u32) -> Self {
        Self {
            number: number.into(),
            text: text.into(),
            retries_left: retries.max(1),
        }
    }
}

/// Receivers owned by the consumer side
struct DrainQueues {
    status: UnboundedReceiver<StatusTrigger>,
    outbound: UnboundedReceiver<OutboundMessageRequest>,
}

/// Snapshot that can come back in an error state
trait Snapshot {
    fn is_error(&self) -> bool;
}

impl Snapshot for BatteryCondition {
    fn is_error(&self) -> bool {
        self.error_state
    }
}

impl Snapshot for SignalStrength {
    fn is_error(&self) -> bool {
        self.error_state
    }
}

/// Drain-queue manager for the Fona modem
pub struct FonaManager<T: Transport> {
    channel: AtChannel<T>,
    config: ManagerConfig,

    status_tx: UnboundedSender<StatusTrigger>,
    outbound_tx: UnboundedSender<OutboundMessageRequest>,
    /// Held for the duration of `update`
    queues: tokio::sync::Mutex<DrainQueues>,

    battery: RwLock<Option<BatteryCondition>>,
    signal: RwLock<Option<SignalStrength>>,

    tasks: Mutex<Vec<RecurringTask>>,
}

impl<T: Transport> FonaManager<T> {
    /// Create a manager over `channel`. Nothing runs until [`start`](Self::start).
    pub fn new(channel: AtChannel<T>, config: ManagerConfig) -> Self {
        let (status_tx, status) = mpsc::unbounded_channel();
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        Self {
            channel,
            config,
            status_tx,
            outbound_tx,
            queues: tokio::sync::Mutex::new(DrainQueues { status, outbound }),
            battery: RwLock::new(None),
            signal: RwLock::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Take the first status readings and start the recurring timers
    ///
    /// Battery and signal checks are enqueued on their intervals; the
    /// message poll marks a message as possibly waiting. Calling `start`
    /// again is a no-op.
    pub async fn start(&self) {
        if !self.tasks.lock().is_empty() {
            debug!("Manager already started");
            return;
        }

        info!(
            battery = ?self.config.battery_interval,
            signal = ?self.config.signal_interval,
            poll = ?self.config.message_poll_interval,
            "Starting Fona manager"
        );

        self.refresh_battery().await;
        self.refresh_signal().await;

        let battery_tx = self.status_tx.clone();
        let signal_tx = self.status_tx.clone();
        let ring_indicator = self.channel.ring_indicator();

        let tasks = vec![
            RecurringTask::spawn("battery", self.config.battery_interval, move || {
                if battery_tx.send(StatusTrigger::CheckBattery).is_err() {
                    warn!(trigger = ?StatusTrigger::CheckBattery, "Status queue closed");
                }
            }),
            RecurringTask::spawn("signal", self.config.signal_interval, move || {
                if signal_tx.send(StatusTrigger::CheckSignal).is_err() {
                    warn!(trigger = ?StatusTrigger::CheckSignal, "Status queue closed");
                }
            }),
            RecurringTask::spawn("message-poll", self.config.message_poll_interval, move || {
                ring_indicator.poll();
            }),
        ];

        *self.tasks.lock() = tasks;
    }

    /// Stop the recurring timers
    pub fn stop(&self) {
        let stopped = std::mem::take(&mut *self.tasks.lock());
        if !stopped.is_empty() {
            info!(tasks = stopped.len(), "Stopping Fona manager");
        }
    }

    /// The underlying channel, for direct commands
    pub fn channel(&self) -> &AtChannel<T> {
        &self.channel
    }

    // ===== Producers =====

    /// Ask for a status refresh on the next `update`
    pub fn request_status(&self, trigger: StatusTrigger) {
        if self.status_tx.send(trigger).is_err() {
            warn!(?trigger, "Status queue closed");
        }
    }

    /// Queue an SMS with the default retry budget
    pub fn send_message(&self, number: &str, text: &str) {
        self.send_message_with_retries(number, text, self.config.default_retries);
    }

    /// Queue an SMS with an explicit retry budget
    pub fn send_message_with_retries(&self, number: &str, text: &str, retries: u32) {
        let request = OutboundMessageRequest::new(number, text, retries);
        debug!(number, retries = request.retries_left, "Queued SMS");
        self.enqueue(request);
    }

    fn enqueue(&self, request: OutboundMessageRequest) {
        if let Err(e) = self.outbound_tx.send(request) {
            warn!(number = %e.0.number, "Outbound queue closed; message dropped");
        }
    }

    /// Producer handle for ring indicator callbacks
    pub fn ring_indicator(&self) -> RingIndicator {
        self.channel.ring_indicator()
    }

    // ===== Consumer =====

    /// Drain queued status triggers then queued messages
    pub async fn update(&self) {
        let mut queues = self.queues.lock().await;
        self.process_status_updates(&mut queues).await;
        self.process_send_messages(&mut queues).await;
    }

    async fn process_status_updates(&self, queues: &mut DrainQueues) {
        let mut battery_checked = false;
        let mut signal_checked = false;

        for _ in 0..queues.status.len() {
            let Ok(trigger) = queues.status.try_recv() else {
                break;
            };
            match trigger {
                StatusTrigger::CheckBattery if !battery_checked => {
                    self.refresh_battery().await;
                    battery_checked = true;
                }
                StatusTrigger::CheckSignal if !signal_checked => {
                    self.refresh_signal().await;
                    signal_checked = true;
                }
                _ => debug!(?trigger, "Duplicate status trigger skipped"),
            }
        }
    }

    async fn process_send_messages(&self, queues: &mut DrainQueues) {
        let mut requeue = Vec::new();

        for _ in 0..queues.outbound.len() {
            let Ok(mut request) = queues.outbound.try_recv() else {
                break;
            };

            match self.channel.deliver(&request.number, &request.text).await {
                Ok(()) => info!(number = %request.number, "SMS sent"),
                Err(e) if !e.is_retriable() => {
                    warn!(number = %request.number, code = e.error_code(), "Dropping SMS: {}", e);
                }
                Err(e) => {
                    request.retries_left -= 1;
                    if request.retries_left > 0 {
                        warn!(
                            number = %request.number,
                            retries_left = request.retries_left,
                            "SMS failed, will retry: {}",
                            e
                        );
                        requeue.push(request);
                    } else {
                        warn!(number = %request.number, "SMS failed, retries exhausted: {}", e);
                    }
                }
            }
        }

        for request in requeue {
            self.enqueue(request);
        }
    }

    async fn refresh_battery(&self) {
        let condition = self.channel.get_current_battery_condition().await;
        if condition.is_battery_low() && !condition.error_state {
            warn!(percent = condition.battery_percent, "Modem battery low");
        }
        cache_snapshot(&self.battery, condition, "battery");
    }

    async fn refresh_signal(&self) {
        let strength = self.channel.get_signal_strength().await;
        cache_snapshot(&self.signal, strength, "signal");
    }

    // ===== Readers =====

    /// Last battery reading, if any
    pub fn battery_condition(&self) -> Option<BatteryCondition> {
        self.battery.read().clone()
    }

    /// Last signal reading, if any
    pub fn signal_strength(&self) -> Option<SignalStrength> {
        self.signal.read().clone()
    }

    /// Every message stored on the SIM
    pub async fn get_messages(&self) -> Vec<SmsMessage> {
        self.channel.get_messages().await
    }

    /// Delete one stored message
    pub async fn delete_message(&self, message_id: u32) -> bool {
        self.channel.delete_message(message_id).await
    }

    /// Delete every stored message, returning how many were deleted
    pub async fn delete_messages(&self) -> usize {
        self.channel.delete_messages().await
    }

    /// Modem power state
    pub fn is_power_on(&self) -> bool {
        self.channel.is_power_on()
    }

    /// A message may be waiting on the SIM
    pub fn is_message_waiting(&self) -> bool {
        self.channel.is_message_waiting()
    }
}

impl<T: Transport> Drop for FonaManager<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Store `fresh` unless it is an error reading replacing a good one
fn cache_snapshot<S: Snapshot>(slot: &RwLock<Option<S>>, fresh: S, kind: &str) {
    let mut cached = slot.write();
    let keep_previous = fresh.is_error() && cached.as_ref().is_some_and(|prev| !prev.is_error());
    if keep_previous {
        warn!(kind, "Status read failed; keeping last good reading");
    } else {
        *cached = Some(fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemTiming;
    use crate::test_utils::ScriptedTransport;
    use std::sync::Arc;
    use std::time::Duration;

    const BATTERY: &str = "+CBC: 0,87,4120\r\n\r\nOK\r\n";
    const SIGNAL: &str = "+CSQ: 17,0\r\n\r\nOK\r\n";

    fn manager(transport: ScriptedTransport) -> FonaManager<ScriptedTransport> {
        let channel = AtChannel::new(Some(transport), ModemTiming::default(), 8);
        FonaManager::new(channel, ManagerConfig::default())
    }

    #[test]
    fn test_zero_retries_gets_one_attempt() {
        assert_eq!(OutboundMessageRequest::new("1", "x", 0).retries_left, 1);
        assert_eq!(OutboundMessageRequest::new("1", "x", 4).retries_left, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_triggers_collapse() {
        let transport = ScriptedTransport::new()
            .respond("AT+CBC", BATTERY)
            .respond("AT+CSQ", SIGNAL);
        let manager = manager(transport.clone());

        for _ in 0..3 {
            manager.request_status(StatusTrigger::CheckBattery);
            manager.request_status(StatusTrigger::CheckSignal);
        }
        manager.update().await;

        assert_eq!(transport.command_count("AT+CBC"), 1);
        assert_eq!(transport.command_count("AT+CSQ"), 1);
        assert_eq!(manager.battery_condition().unwrap().battery_percent, 87);
        assert_eq!(manager.signal_strength().unwrap().rssi, 17);

        manager.update().await;
        assert_eq!(transport.command_count("AT+CBC"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshots_absent_before_first_read() {
        let manager = manager(ScriptedTransport::new());
        assert!(manager.battery_condition().is_none());
        assert!(manager.signal_strength().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_keeps_last_good_snapshot() {
        let transport = ScriptedTransport::new()
            .respond("AT+CBC", BATTERY)
            .respond("AT+CSQ", SIGNAL);
        let manager = manager(transport.clone());

        manager.request_status(StatusTrigger::CheckBattery);
        manager.request_status(StatusTrigger::CheckSignal);
        manager.update().await;

        transport.fail_writes(true);
        manager.request_status(StatusTrigger::CheckBattery);
        manager.request_status(StatusTrigger::CheckSignal);
        manager.update().await;

        let battery = manager.battery_condition().unwrap();
        assert!(!battery.error_state);
        assert_eq!(battery.battery_percent, 87);
        assert!(!manager.signal_strength().unwrap().error_state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_read_is_cached() {
        let transport = ScriptedTransport::new();
        transport.fail_writes(true);
        let manager = manager(transport);

        manager.request_status(StatusTrigger::CheckBattery);
        manager.update().await;

        assert!(manager.battery_condition().unwrap().error_state);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_sent_once() {
        let transport = ScriptedTransport::new();
        let manager = manager(transport.clone());

        manager.send_message("2065551234", "Heater ON");
        manager.update().await;
        manager.update().await;

        assert_eq!(transport.sent_messages(), vec!["Heater ON"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_after_budget() {
        let transport = ScriptedTransport::new();
        transport.fail_writes(true);
        let manager = manager(transport.clone());

        manager.send_message_with_retries("2065551234", "hi", 3);
        for _ in 0..5 {
            manager.update().await;
        }

        // Each attempt fails on its first write.
        assert_eq!(transport.write_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retry_budget_attempts_once() {
        let transport = ScriptedTransport::new();
        transport.fail_writes(true);
        let manager = manager(transport.clone());

        manager.send_message_with_retries("2065551234", "hi", 0);
        manager.update().await;
        manager.update().await;

        assert_eq!(transport.write_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failure() {
        let transport = ScriptedTransport::new();
        transport.fail_sms_submit(true);
        let manager = manager(transport.clone());

        manager.send_message("2065551234", "Heater OFF");
        manager.update().await;
        assert!(transport.sent_messages().is_empty());

        transport.fail_sms_submit(false);
        manager.update().await;
        assert_eq!(transport.sent_messages(), vec!["Heater OFF"]);
        assert_eq!(transport.sms_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_message_dropped_without_retry() {
        let transport = ScriptedTransport::new();
        let manager = manager(transport.clone());

        manager.send_message("555", "hi");
        manager.send_message("2065551234", "");
        manager.update().await;
        manager.update().await;

        assert_eq!(transport.write_attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_message_ahead_of_later_sends() {
        let transport = ScriptedTransport::new();
        transport.fail_sms_submit(true);
        let manager = manager(transport.clone());

        manager.send_message("2065551234", "first");
        manager.update().await;

        // Queued after the failed cycle finished, so it lines up behind.
        transport.fail_sms_submit(false);
        manager.send_message("2065551234", "second");
        manager.update().await;

        assert_eq!(transport.sent_messages(), vec!["first", "second"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_message_requeued_behind_sends_during_drain() {
        let transport = ScriptedTransport::new();
        transport.fail_sms_submit(true);
        let manager = Arc::new(manager(transport.clone()));

        manager.send_message("2065551234", "requeued");

        // Lands while the first attempt is still in the handshake.
        let producer = {
            let manager = manager.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                manager.send_message("2065551234", "newer");
            })
        };

        manager.update().await;
        producer.await.unwrap();
        assert!(transport.sent_messages().is_empty());
        assert_eq!(transport.sms_attempts(), 1);

        transport.fail_sms_submit(false);
        manager.update().await;
        assert_eq!(transport.sent_messages(), vec!["newer", "requeued"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_modem_retried() {
        let transport = ScriptedTransport::new();
        transport.mute(true);
        let manager = manager(transport.clone());

        manager.send_message_with_retries("2065551234", "Heater ON", 2);
        manager.update().await;
        assert!(transport.sent_messages().is_empty());
        assert_eq!(transport.sms_attempts(), 0);

        transport.mute(false);
        manager.update().await;
        assert_eq!(transport.sent_messages(), vec!["Heater ON"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let transport = ScriptedTransport::new();
        let manager = manager(transport.clone());

        for text in ["one", "two", "three"] {
            manager.send_message("2065551234", text);
        }
        manager.update().await;

        assert_eq!(transport.sent_messages(), vec!["one", "two", "three"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_reads_status_and_schedules_checks() {
        let transport = ScriptedTransport::new()
            .respond("AT+CBC", BATTERY)
            .respond("AT+CSQ", SIGNAL);
        let channel = AtChannel::new(Some(transport.clone()), ModemTiming::default(), 8);
        let config = ManagerConfig {
            battery_interval: Duration::from_secs(300),
            signal_interval: Duration::from_secs(60),
            message_poll_interval: Duration::from_secs(60),
            ..ManagerConfig::default()
        };
        let manager = FonaManager::new(channel, config);

        manager.start().await;
        assert!(manager.battery_condition().is_some());
        assert!(manager.signal_strength().is_some());
        assert_eq!(transport.command_count("AT+CSQ"), 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(manager.is_message_waiting());
        manager.update().await;
        assert_eq!(transport.command_count("AT+CSQ"), 2);
        assert_eq!(transport.command_count("AT+CBC"), 1);

        manager.stop();
    }
}
