//! HangarBuddy modem host
//!
//! Two modes:
//! - `run` - keep the modem serviced: read incoming SMS, refresh battery and
//!   signal, send queued messages
//! - `terminal` - type AT commands and see the modem's response

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hangar_fona::{
    watch_ring_indicator, AtChannel, BatteryCondition, FonaConfig, FonaManager, SerialTransport,
    SignalStrength, SysfsPin,
};

/// Sampling period for the ring indicator line
const RING_INDICATOR_SAMPLE: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "hangar-buddy")]
#[command(about = "SMS modem host for the HangarBuddy pre-heater controller")]
struct Args {
    /// Configuration file (TOML); built-in defaults when omitted
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(long, short)]
    port: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Service the modem until interrupted
    Run {
        /// Send a status SMS to this number at startup
        #[arg(long)]
        notify: Option<String>,

        /// Pause between loop iterations
        #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
        interval: Duration,
    },

    /// Interactive AT command terminal
    Terminal,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(log_filter(args.verbose))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &args.config {
        Some(path) => FonaConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => FonaConfig::default(),
    };
    if let Some(port) = args.port {
        config.serial.port = port;
    }

    let channel = open_channel(&config)?;

    match args.command {
        Command::Run { notify, interval } => run(channel, &config, notify, interval).await,
        Command::Terminal => terminal(channel).await,
    }
}

/// `RUST_LOG` when set, otherwise INFO or DEBUG per `--verbose`
fn log_filter(verbose: bool) -> EnvFilter {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Open the modem; a port that cannot be opened leaves the channel detached
fn open_channel(config: &FonaConfig) -> anyhow::Result<AtChannel<SerialTransport>> {
    let transport = match SerialTransport::open(&config.serial.port, config.serial.baud_rate) {
        Ok(transport) => Some(transport),
        Err(e) => {
            warn!("Modem unavailable: {}", e);
            None
        }
    };

    let mut channel = AtChannel::from_config(transport, config);

    if config.gpio.uses_gpio() {
        if let Some(pin) = config.gpio.power_status_pin {
            let pin = SysfsPin::from_board_pin(pin).context("power status pin")?;
            channel = channel.with_power_status_pin(pin);
        }
    } else {
        info!("Skipping GPIO; using transport presence for power status");
    }

    Ok(channel)
}

async fn run(
    channel: AtChannel<SerialTransport>,
    config: &FonaConfig,
    notify: Option<String>,
    interval: Duration,
) -> anyhow::Result<()> {
    channel.initialize().await;

    let manager = FonaManager::new(channel, config.manager.clone());
    if !manager.is_power_on() {
        bail!("Modem is not powered on");
    }

    let _ring_watch = match config.gpio.ring_indicator_pin {
        Some(pin) if config.gpio.uses_gpio() => Some(watch_ring_indicator(
            SysfsPin::from_board_pin(pin).context("ring indicator pin")?,
            manager.ring_indicator(),
            RING_INDICATOR_SAMPLE,
        )),
        _ => None,
    };

    manager.start().await;

    if let Some(module) = manager.channel().module_name().await {
        info!(module = %module, "Modem ready");
    }

    if let Some(number) = notify {
        let text = status_text(manager.battery_condition(), manager.signal_strength());
        manager.send_message(&number, &text);
    }

    let mut last_battery: Option<BatteryCondition> = None;
    let mut last_signal: Option<SignalStrength> = None;

    loop {
        if manager.is_message_waiting() {
            for message in manager.get_messages().await {
                info!(
                    sender = ?message.sender(),
                    sent = ?message.sent_time_utc(),
                    minutes_waiting = ?message.minutes_waiting(),
                    body = %message.body,
                    "Message received"
                );
                if let Some(id) = message.message_id {
                    manager.delete_message(id).await;
                }
            }
        }

        let battery = manager.battery_condition();
        if battery != last_battery {
            if let Some(b) = &battery {
                info!(
                    percent = b.percent(),
                    voltage = b.voltage(),
                    ok = b.is_battery_ok(),
                    "Battery"
                );
            }
            last_battery = battery;
        }

        let signal = manager.signal_strength();
        if signal != last_signal {
            if let Some(s) = &signal {
                info!(rssi = s.rssi, class = %s.classify_strength(), "Signal");
            }
            last_signal = signal;
        }

        manager.update().await;

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping");
                break;
            }
        }
    }

    manager.stop();
    Ok(())
}

fn status_text(battery: Option<BatteryCondition>, signal: Option<SignalStrength>) -> String {
    let battery = match battery {
        Some(b) if !b.error_state => format!("{}%", b.percent()),
        _ => "unknown".to_string(),
    };
    let signal = signal
        .map(|s| s.classify_strength().to_string())
        .unwrap_or_else(|| "Unknown".to_string());
    format!("HangarBuddy online. Battery {}, signal {}.", battery, signal)
}

async fn terminal(channel: AtChannel<SerialTransport>) -> anyhow::Result<()> {
    if !channel.has_transport() {
        bail!("No modem attached");
    }

    println!("Enter AT commands, 'quit' to exit.");
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let command = line.trim();
        if command.is_empty() {
            continue;
        }
        if command.eq_ignore_ascii_case("quit") {
            break;
        }

        debug!(command, "Terminal command");
        let response = channel.send_command(command).await;
        if response.is_empty() {
            warn!("No response.");
        }
        for line in response {
            println!("{}", line);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse_run() {
        let args = Args::try_parse_from([
            "hangar-buddy",
            "--port",
            "/dev/ttyAMA0",
            "run",
            "--notify",
            "2065551234",
            "--interval",
            "500ms",
        ])
        .unwrap();

        assert_eq!(args.port, Some(PathBuf::from("/dev/ttyAMA0")));
        match args.command {
            Command::Run { notify, interval } => {
                assert_eq!(notify.as_deref(), Some("2065551234"));
                assert_eq!(interval, Duration::from_millis(500));
            }
            Command::Terminal => panic!("expected run"),
        }
    }

    #[test]
    fn test_args_parse_terminal() {
        let args = Args::try_parse_from(["hangar-buddy", "-v", "terminal"]).unwrap();
        assert!(args.verbose);
        assert!(matches!(args.command, Command::Terminal));
    }

    #[test]
    fn test_log_filter_follows_verbose() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        use tracing::level_filters::LevelFilter;
        assert_eq!(log_filter(false).max_level_hint(), Some(LevelFilter::INFO));
        assert_eq!(log_filter(true).max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn test_status_text() {
        let battery = BatteryCondition::parse(Some("+CBC: 0,87,4120"));
        let signal = SignalStrength::parse(Some("+CSQ: 17,0"));
        assert_eq!(
            status_text(Some(battery), Some(signal)),
            "HangarBuddy online. Battery 87%, signal Good."
        );
        assert_eq!(
            status_text(None, None),
            "HangarBuddy online. Battery unknown, signal Unknown."
        );
    }
}
