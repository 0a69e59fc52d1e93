//! JSAUX RGB Dock Daemon Library
//!
//! Public API for testing and integration.

pub mod config;
pub mod dbus;
pub mod dock;
pub mod hotplug;
pub mod report;
pub mod state;
pub mod usb;

/// Re-export commonly used types
pub use config::{ConfigError, Persistence, Settings};
pub use dbus::{init_dbus_service, DockService, MenuState, DBUS_INTERFACE, DBUS_NAME, DBUS_PATH};
pub use dock::{TickOutcome, UpdateLoop, TICK_INTERVAL};
pub use hotplug::{start_listener, HotplugEvent, HotplugSignal};
pub use report::{encode, Report, REPORT_LEN};
pub use state::{DesiredState, Effect, Rgb, Snapshot, StateStore, ZONE_COUNT};
pub use usb::{
    probe_dock, ConnectionManager, ConnectionState, DockDiscovery, DockError, DockLink,
    RusbDiscovery, DOCK_PRODUCT_ID, DOCK_VENDOR_ID,
};
