//! USB hot-plug events for the RGB dock
//!
//! A udev monitor on the `usb` subsystem runs on its own thread and forwards
//! the dock's events into a bounded channel. The update loop drains that channel
//! without blocking once per tick.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;

use tokio::sync::mpsc;

use crate::usb::{DOCK_PRODUCT_ID, DOCK_VENDOR_ID};

/// udev subsystem to monitor
pub const HOTPLUG_SUBSYSTEM: &str = "usb";

/// Action that means a driver attached to the device
pub const ACTION_BIND: &str = "bind";

/// Action that means a driver detached from the device
pub const ACTION_UNBIND: &str = "unbind";

/// Capacity of the event channel
pub const HOTPLUG_CHANNEL_CAPACITY: usize = 32;

/// Upper bound on events drained per tick
pub const MAX_EVENTS_PER_TICK: usize = 16;

/// A udev event reduced to what the update loop needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub vendor_id: u16,
    pub product_id: u16,
    /// udev action, e.g. "add", "bind", "unbind", "remove"
    pub action: String,
}

impl HotplugEvent {
    pub fn new(vendor_id: u16, product_id: u16, action: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            action: action.into(),
        }
    }

    /// Event refers to the RGB dock
    pub fn is_dock(&self) -> bool {
        self.vendor_id == DOCK_VENDOR_ID && self.product_id == DOCK_PRODUCT_ID
    }

    /// The dock was bound and may now be available
    pub fn is_dock_bind(&self) -> bool {
        self.is_dock() && self.action == ACTION_BIND
    }

    /// The dock lost its driver
    pub fn is_dock_unbind(&self) -> bool {
        self.is_dock() && self.action == ACTION_UNBIND
    }
}

/// What the update loop should do after draining pending events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HotplugSignal {
    /// A matching bind was seen: reconnect and force a write
    pub bound: bool,
    /// A matching unbind was seen: drop the handle
    pub unbound: bool,
}

/// Drain up to `MAX_EVENTS_PER_TICK` queued events without blocking
pub fn drain_events(rx: &mut mpsc::Receiver<HotplugEvent>) -> HotplugSignal {
    let mut signal = HotplugSignal::default();

    for _ in 0..MAX_EVENTS_PER_TICK {
        let event = match rx.try_recv() {
            Ok(event) => event,
            Err(_) => break,
        };

        if event.is_dock_bind() {
            tracing::info!("RGB dock bound, forcing reconnect and refresh");
            signal.bound = true;
        } else if event.is_dock_unbind() {
            tracing::info!("RGB dock unbound");
            signal.unbound = true;
        } else {
            tracing::trace!(
                vendor_id = format!("0x{:04X}", event.vendor_id),
                product_id = format!("0x{:04X}", event.product_id),
                action = %event.action,
                "Ignoring hot-plug event"
            );
        }
    }

    signal
}

/// Parse udev's `PRODUCT` property (`"306f/1234/100"`, hex without padding)
pub fn parse_product(product: &str) -> Option<(u16, u16)> {
    let mut parts = product.split('/');
    let vendor = u16::from_str_radix(parts.next()?.trim(), 16).ok()?;
    let model = u16::from_str_radix(parts.next()?.trim(), 16).ok()?;
    Some((vendor, model))
}

/// Parse the `ID_VENDOR_ID`/`ID_MODEL_ID` pair (`"306f"`, `"1234"`)
pub fn parse_id_pair(vendor: &str, model: &str) -> Option<(u16, u16)> {
    let vendor = u16::from_str_radix(vendor.trim(), 16).ok()?;
    let model = u16::from_str_radix(model.trim(), 16).ok()?;
    Some((vendor, model))
}

/// Hand one event to the update loop from the listener thread.
///
/// Only dock events are forwarded, so a burst from the dock's own hub,
/// NIC or card reader cannot crowd the dock's bind out of the channel.
/// Dock events wait for room instead of being dropped. Returns false once
/// the receiving side is gone.
///
/// Must be called from a plain thread, never from inside the runtime.
pub fn forward_event(tx: &mpsc::Sender<HotplugEvent>, event: HotplugEvent) -> bool {
    if !event.is_dock() {
        return true;
    }

    tracing::debug!(action = %event.action, "Forwarding RGB dock hot-plug event");
    tx.blocking_send(event).is_ok()
}

// ============================================================================
// udev listener
// ============================================================================

#[cfg(all(target_os = "linux", feature = "hotplug"))]
mod listener {
    use super::*;
    use std::time::Duration;

    /// Idle wait between socket polls
    const POLL_INTERVAL: Duration = Duration::from_millis(50);

    fn ids(event: &udev::Event) -> Option<(u16, u16)> {
        let property = |name: &str| {
            event
                .property_value(name)
                .and_then(|v| v.to_str())
                .map(str::to_owned)
        };

        match (property("ID_VENDOR_ID"), property("ID_MODEL_ID")) {
            (Some(vendor), Some(model)) => parse_id_pair(&vendor, &model),
            _ => property("PRODUCT").and_then(|p| parse_product(&p)),
        }
    }

    fn to_hotplug_event(event: &udev::Event) -> Option<HotplugEvent> {
        let action = event.action()?.to_str()?.to_owned();
        let (vendor_id, product_id) = ids(event)?;
        Some(HotplugEvent::new(vendor_id, product_id, action))
    }

    pub fn spawn(tx: mpsc::Sender<HotplugEvent>) -> Result<std::thread::JoinHandle<()>, HotplugError> {
        // Fail early on the caller's thread if udev is unusable
        udev::MonitorBuilder::new()
            .and_then(|b| b.match_subsystem(HOTPLUG_SUBSYSTEM))
            .map_err(HotplugError::IoError)?;

        std::thread::Builder::new()
            .name("hotplug".into())
            .spawn(move || {
                let socket = match udev::MonitorBuilder::new()
                    .and_then(|b| b.match_subsystem(HOTPLUG_SUBSYSTEM))
                    .and_then(|b| b.listen())
                {
                    Ok(socket) => socket,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to open udev monitor");
                        return;
                    }
                };

                tracing::info!(subsystem = HOTPLUG_SUBSYSTEM, "Listening for USB hot-plug events");

                'listen: while !tx.is_closed() {
                    for event in socket.iter() {
                        let Some(event) = to_hotplug_event(&event) else {
                            continue;
                        };
                        if !forward_event(&tx, event) {
                            break 'listen;
                        }
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }

                tracing::debug!("Hot-plug listener stopped");
            })
            .map_err(HotplugError::IoError)
    }
}

/// Start the hot-plug listener, returning the receiving end for the loop.
///
/// When hot-plug support is unavailable the receiver never yields; the
/// update loop then relies on the liveness probe alone.
pub fn start_listener() -> mpsc::Receiver<HotplugEvent> {
    let (tx, rx) = mpsc::channel(HOTPLUG_CHANNEL_CAPACITY);

    #[cfg(all(target_os = "linux", feature = "hotplug"))]
    {
        if let Err(e) = listener::spawn(tx) {
            tracing::warn!(error = %e, "Hot-plug monitoring unavailable");
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "hotplug")))]
    {
        drop(tx);
        tracing::info!("Built without hot-plug support");
    }

    rx
}

/// Hot-plug error type
#[derive(Debug)]
pub enum HotplugError {
    /// udev socket or thread setup failed
    IoError(std::io::Error),
}

impl fmt::Display for HotplugError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotplugError::IoError(e) => write!(f, "udev error: {}", e),
        }
    }
}

impl std::error::Error for HotplugError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HotplugError::IoError(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_matching() {
        let bind = HotplugEvent::new(0x306F, 0x1234, "bind");
        assert!(bind.is_dock_bind());
        assert!(!bind.is_dock_unbind());

        let add = HotplugEvent::new(0x306F, 0x1234, "add");
        assert!(add.is_dock());
        assert!(!add.is_dock_bind());

        let other = HotplugEvent::new(0x046D, 0xC548, "bind");
        assert!(!other.is_dock_bind());
    }

    #[test]
    fn test_parse_product() {
        assert_eq!(parse_product("306f/1234/100"), Some((0x306F, 0x1234)));
        assert_eq!(parse_product("46d/c548/501"), Some((0x046D, 0xC548)));
        assert_eq!(parse_product("garbage"), None);
        assert_eq!(parse_product("306f"), None);
    }

    #[test]
    fn test_parse_id_pair() {
        assert_eq!(parse_id_pair("306f", "1234"), Some((0x306F, 0x1234)));
        assert_eq!(parse_id_pair("zz", "1234"), None);
    }

    #[tokio::test]
    async fn test_drain_flags_bind() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(HotplugEvent::new(0x046D, 0xC548, "bind")).await.unwrap();
        tx.send(HotplugEvent::new(0x306F, 0x1234, "add")).await.unwrap();
        tx.send(HotplugEvent::new(0x306F, 0x1234, "bind")).await.unwrap();

        let signal = drain_events(&mut rx);
        assert!(signal.bound);
        assert!(!signal.unbound);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drain_ignores_foreign_events() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(HotplugEvent::new(0x046D, 0xC548, "bind")).await.unwrap();
        tx.send(HotplugEvent::new(0x306F, 0x1234, "change")).await.unwrap();

        assert_eq!(drain_events(&mut rx), HotplugSignal::default());
    }

    #[tokio::test]
    async fn test_drain_is_bounded() {
        let (tx, mut rx) = mpsc::channel(64);
        for _ in 0..(MAX_EVENTS_PER_TICK + 4) {
            tx.send(HotplugEvent::new(0x046D, 0xC548, "add")).await.unwrap();
        }

        drain_events(&mut rx);

        let mut remaining = 0;
        while rx.try_recv().is_ok() {
            remaining += 1;
        }
        assert_eq!(remaining, 4);
    }

    #[test]
    fn test_drain_with_closed_channel() {
        let (tx, mut rx) = mpsc::channel::<HotplugEvent>(1);
        drop(tx);
        assert_eq!(drain_events(&mut rx), HotplugSignal::default());
    }

    #[test]
    fn test_forward_skips_foreign_devices() {
        let (tx, mut rx) = mpsc::channel(HOTPLUG_CHANNEL_CAPACITY);

        // A dock's own hub, NIC and card reader binding all at once
        for _ in 0..40 {
            assert!(forward_event(&tx, HotplugEvent::new(0x0BDA, 0x8153, "bind")));
        }
        assert!(forward_event(&tx, HotplugEvent::new(0x306F, 0x1234, "bind")));

        assert_eq!(rx.try_recv().unwrap(), HotplugEvent::new(0x306F, 0x1234, "bind"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_waits_for_room() {
        let (tx, mut rx) = mpsc::channel(1);
        assert!(forward_event(&tx, HotplugEvent::new(0x306F, 0x1234, "unbind")));

        let sender = std::thread::spawn(move || {
            forward_event(&tx, HotplugEvent::new(0x306F, 0x1234, "bind"))
        });

        assert_eq!(rx.blocking_recv().unwrap().action, "unbind");
        assert!(sender.join().unwrap());
        assert_eq!(rx.blocking_recv().unwrap().action, "bind");
    }

    #[test]
    fn test_forward_reports_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        assert!(!forward_event(&tx, HotplugEvent::new(0x306F, 0x1234, "bind")));
        // Foreign events never touch the channel
        assert!(forward_event(&tx, HotplugEvent::new(0x0BDA, 0x8153, "bind")));
    }

    #[tokio::test]
    async fn test_drain_flags_unbind() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(HotplugEvent::new(0x306F, 0x1234, "unbind")).await.unwrap();

        let signal = drain_events(&mut rx);
        assert!(signal.unbound);
        assert!(!signal.bound);
    }
}
