//! Example: Watching Live Cart Telemetry
//!
//! This example scans for a cart controller, connects to it, and prints
//! speed, range and battery as notifications arrive until Ctrl-C.
//!
//! Run with: `cargo run --example watch_cart -- [DEVICE_ADDRESS] [CONFIG_FILE]`
//!
//! Without an address the first discovered device is used. Set `RUST_LOG`
//! (for example `RUST_LOG=cartlink_core=debug`) to see the session's logs.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use cartlink_core::{BleTransport, ConfigFile, Error, SessionEvent, SessionFacade};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

/// How long to scan before picking a device.
const SCAN_DURATION: Duration = Duration::from_secs(8);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let wanted = args.get(1).cloned();
    let config = match args.get(2) {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let transport = BleTransport::new().await.context("opening Bluetooth adapter")?;
    let facade = SessionFacade::builder(Arc::new(transport))
        .session_config(config.session_config()?)
        .scan_config(config.scan.clone())
        .build()?;

    println!("Scanning for {}s...", SCAN_DURATION.as_secs());
    facade.start_scan().await?;
    tokio::time::sleep(SCAN_DURATION).await;
    facade.stop_scan().await?;

    let devices = facade.devices();
    for device in &devices {
        println!("  {}", device);
    }
    let target = match wanted {
        Some(id) => id,
        None => match devices.first() {
            Some(device) => device.id.clone(),
            None => bail!("no devices found"),
        },
    };

    println!("Connecting to {}...", target);
    let connection = match facade.connect(&target).await {
        Ok(connection) => connection,
        Err(e @ Error::ConnectTimeout { .. }) => {
            bail!("{} (status: {}; try again closer to the cart)", e, facade.status())
        }
        Err(e) => return Err(e.into()),
    };
    println!("Connected to {}", connection.device);
    for channel in &connection.degraded {
        println!("  warning: {} channel unavailable", channel);
    }

    let mut events = facade.events();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(SessionEvent::Reading { .. }) => {
                    let r = facade.readings();
                    println!(
                        "speed: {:>8}  range: {:>8}  battery: {:>8}",
                        r.speed().to_string(),
                        r.range().to_string(),
                        r.battery().to_string()
                    );
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(e) => {
                    eprintln!("event feed closed: {}", e);
                    break;
                }
            },
        }
    }

    println!("Disconnecting...");
    let teardown = facade.disconnect().await;
    println!("Done ({:?})", teardown);
    Ok(())
}
