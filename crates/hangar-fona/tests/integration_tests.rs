//! Integration tests for the Fona modem stack
//!
//! These drive the manager and channel through the public API against a
//! scripted modem:
//! - Configuration loading into a working channel
//! - Status refresh and message delivery through the drain cycle
//! - Incoming message handling end to end
//! - Concurrent producers against a single consumer

use hangar_fona::test_utils::{fast_timing, test_config, ScriptedTransport};
use hangar_fona::{
    AtChannel, FonaConfig, FonaError, FonaManager, ManagerConfig, SignalClass, StatusTrigger,
    VERSION,
};
use std::sync::Arc;
use std::time::Duration;

const BATTERY: &str = "+CBC: 0,55,3980\r\n\r\nOK\r\n";
const SIGNAL: &str = "+CSQ: 11,0\r\n\r\nOK\r\n";
const INBOX: &str = "+CMGL: 1,\"REC UNREAD\",\"+12065551234\",\"\",\"18/01/14,19:28:52-32\"\r\n\
Status\r\n\
+CMGL: 2,\"REC UNREAD\",\"+12065551234\",\"\",\"18/01/14,19:30:02-32\"\r\n\
ON 30\r\n\
\r\n\
OK\r\n";

fn modem() -> ScriptedTransport {
    ScriptedTransport::new()
        .respond("AT+CBC", BATTERY)
        .respond("AT+CSQ", SIGNAL)
        .respond("AT+CMGL=\"ALL\"", INBOX)
}

fn manager_for(transport: ScriptedTransport) -> FonaManager<ScriptedTransport> {
    let config = test_config();
    let channel = AtChannel::from_config(Some(transport), &config);
    FonaManager::new(channel, config.manager)
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_version() {
    assert!(!VERSION.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_config_file_drives_channel() {
    let config = FonaConfig::from_toml_str(
        r#"
        utc_offset_hours = 7

        [serial]
        port = "/dev/ttyAMA0"

        [gpio]
        power_status_pin = 16
        ring_indicator_pin = 18

        [timing]
        settle_delay = "100ms"
        "#,
    )
    .unwrap();

    let transport = ScriptedTransport::new();
    let channel = AtChannel::from_config(Some(transport.clone()), &config);
    assert_eq!(channel.utc_offset_hours(), 7);
    assert_eq!(channel.timing().settle_delay, Duration::from_millis(100));

    channel.initialize().await;
    assert_eq!(transport.command_count("AT+CFGRI=1"), 1);
}

#[test]
fn test_invalid_config_rejected() {
    let err = FonaConfig::from_toml_str("utc_offset_hours = 30").unwrap_err();
    assert!(matches!(err, FonaError::InvalidConfig(_)));

    let err = FonaConfig::from_toml_str("[serial]\nbaud_rate = \"fast\"").unwrap_err();
    assert!(matches!(err, FonaError::ConfigParse(_)));
}

// ============================================================================
// Drain cycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_status_and_message_in_one_update() {
    let transport = modem();
    let manager = manager_for(transport.clone());

    manager.request_status(StatusTrigger::CheckBattery);
    manager.request_status(StatusTrigger::CheckSignal);
    manager.send_message("+1 (206) 555-1234", "Heater ON for 30 minutes");
    manager.update().await;

    let battery = manager.battery_condition().unwrap();
    assert_eq!(battery.percent(), 55);
    assert!(battery.is_battery_ok());
    assert!(battery.is_battery_low());

    let signal = manager.signal_strength().unwrap();
    assert_eq!(signal.classify_strength(), SignalClass::Ok);

    assert_eq!(transport.sent_messages(), vec!["Heater ON for 30 minutes"]);
    assert!(transport
        .writes()
        .contains(&b"AT+CMGS=\"2065551234\"".to_vec()));

    // Status reads happen before any message is sent.
    let commands = transport.commands();
    let cbc = commands.iter().position(|c| c == "AT+CBC").unwrap();
    let cmgs_mode = commands.iter().rposition(|c| c == "AT+CMGF=1").unwrap();
    assert!(cbc < cmgs_mode);
}

#[tokio::test(start_paused = true)]
async fn test_transport_outage_then_recovery() {
    let transport = modem();
    let manager = manager_for(transport.clone());

    transport.fail_writes(true);
    manager.send_message("2065551234", "Heater OFF");
    manager.update().await;
    manager.update().await;
    assert!(transport.sent_messages().is_empty());

    transport.fail_writes(false);
    manager.update().await;
    assert_eq!(transport.sent_messages(), vec!["Heater OFF"]);

    manager.update().await;
    assert_eq!(transport.sent_messages().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detached_manager_is_safe() {
    let config = test_config();
    let channel: AtChannel<ScriptedTransport> = AtChannel::from_config(None, &config);
    let manager = FonaManager::new(channel, config.manager);

    assert!(!manager.is_power_on());
    manager.request_status(StatusTrigger::CheckBattery);
    manager.send_message("2065551234", "hello");
    manager.update().await;

    assert!(manager.battery_condition().unwrap().error_state);
    assert!(manager.get_messages().await.is_empty());
    assert_eq!(manager.delete_messages().await, 0);
}

// ============================================================================
// Incoming messages
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_ring_indicator_to_delete() {
    let transport = modem();
    let manager = manager_for(transport.clone());

    assert!(!manager.is_message_waiting());
    manager.ring_indicator().pulse();
    assert!(manager.is_message_waiting());

    let messages = manager.get_messages().await;
    assert!(!manager.is_message_waiting());
    assert_eq!(messages.len(), 2);

    let first = &messages[0];
    assert!(first.is_message_ok());
    assert_eq!(first.sender().as_deref(), Some("2065551234"));
    assert_eq!(first.body, "Status");
    assert_eq!(messages[1].body, "ON 30");

    assert_eq!(manager.delete_messages().await, 2);
    assert_eq!(transport.command_count("AT+CMGD=1"), 1);
    assert_eq!(transport.command_count("AT+CMGD=2"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_poll_timer_marks_message_waiting() {
    let transport = modem();
    let channel = AtChannel::new(Some(transport), fast_timing(), 8);
    let config = ManagerConfig {
        message_poll_interval: Duration::from_secs(60),
        ..ManagerConfig::default()
    };
    let manager = FonaManager::new(channel, config);

    manager.start().await;
    assert!(!manager.is_message_waiting());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(manager.is_message_waiting());

    manager.get_messages().await;
    assert!(!manager.is_message_waiting());
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_single_consumer() {
    let transport = modem();
    let manager = Arc::new(manager_for(transport.clone()));

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let manager = manager.clone();
            tokio::spawn(async move {
                for i in 0..5 {
                    manager.request_status(StatusTrigger::CheckSignal);
                    manager.send_message("2065551234", &format!("p{} m{}", p, i));
                    manager.ring_indicator().pulse();
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    let consumer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for _ in 0..10 {
                manager.update().await;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    for producer in producers {
        producer.await.unwrap();
    }
    consumer.await.unwrap();
    manager.update().await;

    let sent = transport.sent_messages();
    assert_eq!(sent.len(), 20);

    // Each producer's messages keep their order.
    for p in 0..4 {
        let own: Vec<_> = sent
            .iter()
            .filter(|m| m.starts_with(&format!("p{} ", p)))
            .cloned()
            .collect();
        let expected: Vec<_> = (0..5).map(|i| format!("p{} m{}", p, i)).collect();
        assert_eq!(own, expected);
    }

    assert!(manager.signal_strength().is_some());
    assert!(manager.is_message_waiting());
}
