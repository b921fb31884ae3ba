use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::{error, info};
use tokio::sync::mpsc::UnboundedReceiver;

use blelink::config::io::ConfigIO;
use blelink::config::types::DeviceProfile;
use blelink::device::codec::Command;
use blelink::device::scan::ScanController;
use blelink::device::session::SessionController;
use blelink::device::types::{PeripheralRef, ScanEvent, SessionEvent, SessionState};
use blelink::error::{AppRunError, ConfigError, SessionError};
use blelink::init_logging;
use blelink::transport::btle::{BtleDiscovery, BtleTransport};

#[derive(Parser, Debug)]
#[command(author, version)]
#[command(about = "Pairs with a BLE demo peripheral: discover devices, switch an output on, read the click counter.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run one timed discovery session and list every peripheral heard from
    Scan {
        /// Override the profile scan timeout, for example "30s" or "2m"
        #[arg(long, value_parser = humantime::parse_duration)]
        timeout: Option<Duration>,
    },

    /// Switch on one output of the peripheral at the given address
    On {
        /// Peripheral address as printed by scan
        address: String,

        /// Output selector, 1 up to the profile output range
        output: u8,
    },

    /// Read the click counter of the peripheral at the given address
    Clicks {
        /// Peripheral address as printed by scan
        address: String,
    },

    /// Print the effective device profile as JSON
    Profile {
        /// Also write the effective profile to the profile file, for editing
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("blelink ", env!("CARGO_PKG_VERSION")));

    let args = Args::parse();

    match run(args).await {
        Err(AppRunError::Config { source: ConfigError::CanNotLock { .. } }) => {
            // a second instance would fight over the adapter and the profile
            eprintln!("blelink has already been started");
            process::exit(2);
        },
        Err(err) => {
            error!("{}", err);
            Err(err)
        },
        Ok(()) => Ok(()),
    }
}

async fn run(args: Args) -> Result<(), AppRunError> {
    let mut config_io = ConfigIO::new_sync()?;
    let mut locker = config_io.locker()?;
    let _guard = locker.lock()?;

    let profile = config_io.read().await?;

    match args.command {
        CliCommand::Scan { timeout } => run_scan(&profile, timeout).await,
        CliCommand::On { address, output } => run_on(&profile, &address, output).await,
        CliCommand::Clicks { address } => run_clicks(&profile, &address).await,
        CliCommand::Profile { save } => run_profile(&config_io, &profile, save).await,
    }
}

async fn run_scan(profile: &DeviceProfile, timeout: Option<Duration>) -> Result<(), AppRunError> {
    let timeout = timeout.unwrap_or_else(|| profile.scan_timeout());
    let discovery = Arc::new(BtleDiscovery::new().await?);
    let (mut scan, mut events) = ScanController::new(discovery, timeout);

    scan.start().await?;
    println!("Scanning for {}...", humantime::format_duration(timeout));

    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Started => {},
            ScanEvent::Advertisement(peripheral) => {
                println!(
                    "{}  {}  {}",
                    peripheral.address,
                    peripheral.display_name.as_deref().unwrap_or("Unknown"),
                    format_signal(peripheral.rssi),
                );
            },
            ScanEvent::Stopped => break,
        }
    }

    Ok(())
}

fn format_signal(rssi: Option<i16>) -> String {
    match rssi {
        Some(rssi) => format!("{} dBm", rssi),
        None => String::from("-"),
    }
}

async fn run_on(profile: &DeviceProfile, address: &str, output: u8) -> Result<(), AppRunError> {
    let peripheral = discover_peripheral(profile, address).await?;

    let transport = Arc::new(BtleTransport::new().await?);
    let (session, mut events) = SessionController::new(transport, profile);

    let result = drive_output(&session, &mut events, peripheral, output).await;
    session.shutdown().await;
    result
}

async fn run_clicks(profile: &DeviceProfile, address: &str) -> Result<(), AppRunError> {
    let peripheral = discover_peripheral(profile, address).await?;

    let transport = Arc::new(BtleTransport::new().await?);
    let (session, mut events) = SessionController::new(transport, profile);

    let result = drive_telemetry(&session, &mut events, peripheral).await;
    session.shutdown().await;
    result
}

async fn run_profile(config_io: &ConfigIO, profile: &DeviceProfile, save: bool) -> Result<(), AppRunError> {
    let rendered = serde_json::to_string_pretty(profile).map_err(ConfigError::from)?;
    println!("{}", rendered);

    if save {
        config_io.save(profile.clone()).await?;
        info!("Profile saved");
    }

    Ok(())
}

/**
 * Scans until the requested address is heard from, then stops the scan and
 * keeps the advertisement. The registry is cleared when the scan stops, so the
 * advertisement itself is what gets handed to the session.
 */
async fn discover_peripheral(profile: &DeviceProfile, address: &str) -> Result<PeripheralRef, AppRunError> {
    let discovery = Arc::new(BtleDiscovery::new().await?);
    let (mut scan, mut events) = ScanController::new(discovery, profile.scan_timeout());

    scan.start().await?;

    let mut found = None;
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::Advertisement(peripheral) if peripheral.address == address => {
                found = Some(peripheral);
                scan.stop().await;
            },
            ScanEvent::Stopped => break,
            _ => {},
        }
    }

    found.ok_or_else(|| AppRunError::PeripheralNotFound { address: address.to_string() })
}

async fn drive_output(
    session: &SessionController,
    events: &mut UnboundedReceiver<SessionEvent>,
    peripheral: PeripheralRef,
    output: u8,
) -> Result<(), AppRunError> {
    session.connect(peripheral).await?;
    wait_for_ready(events).await?;

    session.send_command(Command::SetOutput(output)).await?;
    loop {
        match next_session_event(events).await? {
            SessionEvent::CommandIssued(_) => break,
            SessionEvent::Fault(fault) => return Err(AppRunError::Fault { fault }),
            _ => {},
        }
    }
    println!("Output {} switched on", output);

    session.disconnect().await?;
    Ok(())
}

async fn drive_telemetry(
    session: &SessionController,
    events: &mut UnboundedReceiver<SessionEvent>,
    peripheral: PeripheralRef,
) -> Result<(), AppRunError> {
    session.connect(peripheral).await?;
    wait_for_ready(events).await?;

    session.read_telemetry().await?;
    loop {
        match next_session_event(events).await? {
            SessionEvent::Telemetry(clicks) => {
                println!("{} clicks registered", clicks);
                break;
            },
            SessionEvent::Fault(fault) => return Err(AppRunError::Fault { fault }),
            _ => {},
        }
    }

    session.disconnect().await?;
    Ok(())
}

async fn wait_for_ready(events: &mut UnboundedReceiver<SessionEvent>) -> Result<(), AppRunError> {
    loop {
        match next_session_event(events).await? {
            SessionEvent::StateChanged(SessionState::Ready) => return Ok(()),
            SessionEvent::StateChanged(SessionState::Failed(kind)) => {
                return Err(AppRunError::LinkFailed { kind });
            },
            _ => {},
        }
    }
}

async fn next_session_event(events: &mut UnboundedReceiver<SessionEvent>) -> Result<SessionEvent, AppRunError> {
    match events.recv().await {
        Some(event) => Ok(event),
        None => Err(AppRunError::Session { source: SessionError::Closed }),
    }
}
