//! JSAUX RGB Dock Daemon
//!
//! Keeps the lighting of a JSAUX RGB dock in sync with the state set over
//! D-Bus, restoring it whenever the dock is plugged back in.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use jsaux_rgbd::{
    dbus::init_dbus_service,
    dock::UpdateLoop,
    hotplug::start_listener,
    state::StateStore,
    usb::{probe_dock, ConnectionManager, RusbDiscovery, DOCK_PRODUCT_ID, DOCK_VENDOR_ID},
    Settings,
};

/// Default update loop interval in milliseconds
const DEFAULT_TICK_MS: u64 = 100;

/// JSAUX RGB Dock Daemon - lighting control for the JSAUX RGB dock
#[derive(Parser, Debug)]
#[command(name = "jsaux-rgbd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Settings file path (defaults to ~/.config/jsaux-rgb/settings.json)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Look for the dock once and exit
    #[arg(long)]
    probe: bool,

    /// Update loop interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.probe {
        return probe();
    }

    info!("JSAUX RGB Dock Daemon starting...");

    let settings = match &args.settings {
        Some(path) => Settings::load(path),
        None => Settings::load_default(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            warn!("Failed to load settings, using defaults: {}", e);
            Settings {
                settings_path: args.settings.clone().or_else(Settings::default_settings_path),
                ..Settings::default()
            }
        }
    };

    let store = StateStore::new(settings.to_desired_state());

    let discovery = match RusbDiscovery::new() {
        Ok(discovery) => discovery,
        Err(e) => {
            error!("Failed to initialize libusb: {}", e);
            return Err(e.into());
        }
    };

    let hotplug = start_listener();

    // Keep the connection alive for as long as the daemon runs
    let _dbus_connection = match init_dbus_service(store.clone()).await {
        Ok(conn) => {
            info!("D-Bus service initialized successfully");
            conn
        }
        Err(e) => {
            error!("Failed to initialize D-Bus service: {}", e);
            return Err(e.into());
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let update_loop = UpdateLoop::new(ConnectionManager::new(discovery), store, settings, hotplug)
        .with_interval(Duration::from_millis(args.tick_ms.max(1)));
    let mut loop_handle = tokio::spawn(update_loop.run(shutdown_rx));

    info!("JSAUX RGB Dock Daemon ready");

    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down...");
        }
        _ = terminate.recv() => {
            info!("Terminate received, shutting down...");
        }
        result = &mut loop_handle => {
            if let Err(e) = result {
                error!("Update loop panicked: {:?}", e);
            }
            return Ok(());
        }
    }

    // The loop turns the lights out before returning
    let _ = shutdown_tx.send(true);
    if let Err(e) = loop_handle.await {
        error!("Update loop panicked during shutdown: {:?}", e);
    }

    info!("JSAUX RGB Dock Daemon stopped");
    Ok(())
}

/// Look for the dock once and report the result
fn probe() -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Looking for JSAUX RGB dock {:04x}:{:04x}...",
        DOCK_VENDOR_ID, DOCK_PRODUCT_ID
    );

    match probe_dock() {
        Ok(true) => println!("Dock found and accessible."),
        Ok(false) => {
            println!("Dock not found.");
            println!("\nTroubleshooting:");
            println!("  - Ensure the dock is connected and powered");
            println!("  - Check that udev rules are installed");
        }
        Err(e) => println!("Dock found but not usable: {}", e),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["jsaux-rgbd"]);
        assert!(args.settings.is_none());
        assert!(!args.verbose);
        assert!(!args.probe);
        assert_eq!(args.tick_ms, 100);
    }

    #[test]
    fn test_args_settings_path() {
        let args = Args::parse_from(["jsaux-rgbd", "--settings", "/tmp/dock.json"]);
        assert_eq!(args.settings, Some(PathBuf::from("/tmp/dock.json")));
    }

    #[test]
    fn test_args_verbose_and_probe() {
        let args = Args::parse_from(["jsaux-rgbd", "-v", "--probe"]);
        assert!(args.verbose);
        assert!(args.probe);
    }

    #[test]
    fn test_args_tick() {
        let args = Args::parse_from(["jsaux-rgbd", "--tick-ms", "250"]);
        assert_eq!(args.tick_ms, 250);
    }
}
