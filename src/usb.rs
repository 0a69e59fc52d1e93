//! USB connection management for the RGB dock
//!
//! Owns the only handle to the dock. Liveness is re-derived with a
//! zero-length control transfer on every check, because a dock that loses
//! power does not always produce an unbind event in time.
//!
//! All writes go out as HID SET_REPORT class requests on endpoint 0:
//! `bmRequestType=0x21, bRequest=0x09, wValue=0x0200, wIndex=0`.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::time::Duration;

use rusb::UsbContext;

// ============================================================================
// Constants
// ============================================================================

/// JSAUX dock vendor ID
pub const DOCK_VENDOR_ID: u16 = 0x306F;

/// JSAUX RGB dock product ID
pub const DOCK_PRODUCT_ID: u16 = 0x1234;

/// Configuration selected after opening the dock
pub const DOCK_CONFIGURATION: u8 = 1;

/// Discovery attempts per `connect()` call
pub const CONNECT_ATTEMPTS: u32 = 5;

/// Delay between discovery attempts
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Timeout for a single control transfer
pub const USB_TIMEOUT: Duration = Duration::from_millis(100);

/// Class request used for every write and liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

/// HID SET_REPORT, output report 0, interface 0
pub const SET_OUTPUT_REPORT: ControlRequest = ControlRequest {
    request_type: 0x21,
    request: 0x09,
    value: 0x0200,
    index: 0x0000,
};

// ============================================================================
// Transport traits
// ============================================================================

/// An opened dock
pub trait DockLink: Send {
    /// Select the device's default configuration
    fn configure(&mut self) -> Result<(), DockError>;

    /// Send a host-to-device control transfer
    fn control_out(&mut self, request: &ControlRequest, data: &[u8]) -> Result<usize, DockError>;
}

/// Finds and opens docks by vendor/product ID
pub trait DockDiscovery: Send {
    type Link: DockLink;

    /// Open the first matching device, or `Ok(None)` if none is attached
    fn open(&mut self, vendor_id: u16, product_id: u16) -> Result<Option<Self::Link>, DockError>;
}

// ============================================================================
// Connection manager
// ============================================================================

/// Connection state of the dock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connected,
}

/// Owns the dock handle and its reconnection policy
pub struct ConnectionManager<D: DockDiscovery> {
    discovery: D,
    link: Option<D::Link>,
    attempts: u32,
    retry_delay: Duration,
}

impl<D: DockDiscovery> ConnectionManager<D> {
    pub fn new(discovery: D) -> Self {
        Self {
            discovery,
            link: None,
            attempts: CONNECT_ATTEMPTS,
            retry_delay: CONNECT_RETRY_DELAY,
        }
    }

    /// Override the retry policy
    pub fn with_retry(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn state(&self) -> ConnectionState {
        if self.link.is_some() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Make sure the dock is connected, discovering it if needed.
    ///
    /// Returns immediately if the liveness probe passes. Otherwise tries
    /// discovery up to the configured number of attempts, sleeping between
    /// them. Returns false once every attempt has failed.
    pub async fn connect(&mut self) -> bool {
        if self.is_connected() {
            return true;
        }

        for attempt in 1..=self.attempts {
            match self.try_open() {
                Ok(true) => {
                    tracing::info!(
                        attempt,
                        vendor_id = format!("0x{:04X}", DOCK_VENDOR_ID),
                        product_id = format!("0x{:04X}", DOCK_PRODUCT_ID),
                        "RGB dock connected"
                    );
                    return true;
                }
                Ok(false) => {
                    tracing::debug!(attempt, "RGB dock not found");
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "Failed to open RGB dock");
                }
            }

            if attempt < self.attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        tracing::debug!(attempts = self.attempts, "Giving up on RGB dock until next tick");
        self.link = None;
        false
    }

    fn try_open(&mut self) -> Result<bool, DockError> {
        match self.discovery.open(DOCK_VENDOR_ID, DOCK_PRODUCT_ID)? {
            Some(mut link) => {
                link.configure()?;
                self.link = Some(link);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Probe the dock with a zero-length transfer.
    ///
    /// Any error drops the handle. Without a handle no probe is sent.
    pub fn is_connected(&mut self) -> bool {
        let Some(link) = self.link.as_mut() else {
            return false;
        };

        match link.control_out(&SET_OUTPUT_REPORT, &[]) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "RGB dock liveness probe failed");
                self.handle_disconnect();
                false
            }
        }
    }

    /// Send one report. No retry here; the update loop tries again next tick.
    pub fn transmit(&mut self, report: &[u8]) -> bool {
        let Some(link) = self.link.as_mut() else {
            tracing::debug!("Not connected, report not sent");
            return false;
        };

        match link.control_out(&SET_OUTPUT_REPORT, report) {
            Ok(written) => {
                tracing::trace!(written, "Report sent");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to send report to RGB dock");
                self.handle_disconnect();
                false
            }
        }
    }

    /// Release the handle. Safe to call when already disconnected.
    pub fn disconnect(&mut self) {
        if self.link.is_some() {
            tracing::info!("RGB dock released");
        }
        self.link = None;
    }

    fn handle_disconnect(&mut self) {
        if self.link.take().is_some() {
            tracing::warn!("RGB dock disconnected, will reconnect on the next tick");
        }
    }
}

// ============================================================================
// rusb implementation
// ============================================================================

/// Discovers docks through libusb
pub struct RusbDiscovery {
    context: rusb::Context,
}

impl RusbDiscovery {
    pub fn new() -> Result<Self, DockError> {
        Ok(Self {
            context: rusb::Context::new()?,
        })
    }
}

impl DockDiscovery for RusbDiscovery {
    type Link = RusbLink;

    fn open(&mut self, vendor_id: u16, product_id: u16) -> Result<Option<RusbLink>, DockError> {
        for device in self.context.devices()?.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    tracing::trace!(error = %e, "Skipping device without descriptor");
                    continue;
                }
            };

            if descriptor.vendor_id() != vendor_id || descriptor.product_id() != product_id {
                continue;
            }

            tracing::debug!(
                bus = device.bus_number(),
                address = device.address(),
                "Found RGB dock"
            );

            let handle = device.open()?;
            return Ok(Some(RusbLink { handle }));
        }

        Ok(None)
    }
}

/// An opened dock backed by a libusb handle
pub struct RusbLink {
    handle: rusb::DeviceHandle<rusb::Context>,
}

impl DockLink for RusbLink {
    fn configure(&mut self) -> Result<(), DockError> {
        // Re-selecting the active configuration resets the device's drivers
        if self.handle.active_configuration()? != DOCK_CONFIGURATION {
            self.handle.set_active_configuration(DOCK_CONFIGURATION)?;
        }
        Ok(())
    }

    fn control_out(&mut self, request: &ControlRequest, data: &[u8]) -> Result<usize, DockError> {
        let written = self.handle.write_control(
            request.request_type,
            request.request,
            request.value,
            request.index,
            data,
            USB_TIMEOUT,
        )?;
        Ok(written)
    }
}

/// Try to find the dock once, for `--probe`
pub fn probe_dock() -> Result<bool, DockError> {
    let mut discovery = RusbDiscovery::new()?;
    Ok(discovery.open(DOCK_VENDOR_ID, DOCK_PRODUCT_ID)?.is_some())
}

// ============================================================================
// Error Types
// ============================================================================

/// Dock communication error
#[derive(Debug)]
pub enum DockError {
    /// No dock with the expected IDs is attached
    DeviceNotFound,
    /// Permission denied opening the dock
    PermissionDenied,
    /// The dock went away mid-operation
    Disconnected,
    /// Transfer timed out
    Timeout,
    /// Any other libusb failure
    Usb(rusb::Error),
}

impl fmt::Display for DockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockError::DeviceNotFound => write!(f, "RGB dock not found"),
            DockError::PermissionDenied => write!(
                f,
                "Permission denied. Ensure udev rules grant access to {:04x}:{:04x}.",
                DOCK_VENDOR_ID, DOCK_PRODUCT_ID
            ),
            DockError::Disconnected => write!(f, "RGB dock disconnected"),
            DockError::Timeout => write!(f, "USB transfer timed out"),
            DockError::Usb(e) => write!(f, "USB error: {}", e),
        }
    }
}

impl std::error::Error for DockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockError::Usb(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusb::Error> for DockError {
    fn from(err: rusb::Error) -> Self {
        match err {
            rusb::Error::NotFound => DockError::DeviceNotFound,
            rusb::Error::Access => DockError::PermissionDenied,
            rusb::Error::NoDevice => DockError::Disconnected,
            rusb::Error::Timeout => DockError::Timeout,
            other => DockError::Usb(other),
        }
    }
}

// ============================================================================
// Test doubles
// ============================================================================


#[cfg(test)]
mod tests {
    use super::fake::FakeDiscovery;
    use super::*;

    #[test]
    fn test_device_ids() {
        assert_eq!(DOCK_VENDOR_ID, 0x306F);
        assert_eq!(DOCK_PRODUCT_ID, 0x1234);
    }

    #[test]
    fn test_set_report_request() {
        assert_eq!(SET_OUTPUT_REPORT.request_type, 0x21);
        assert_eq!(SET_OUTPUT_REPORT.request, 9);
        assert_eq!(SET_OUTPUT_REPORT.value, 0x0200);
        assert_eq!(SET_OUTPUT_REPORT.index, 0);
    }

    #[test]
    fn test_retry_policy() {
        assert_eq!(CONNECT_ATTEMPTS, 5);
        assert_eq!(CONNECT_RETRY_DELAY, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_present() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());

        assert!(manager.connect().await);
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(fake.bus().opens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_skips_discovery_when_alive() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());

        assert!(manager.connect().await);
        assert!(manager.connect().await);

        let bus = fake.bus();
        assert_eq!(bus.opens, 1);
        assert_eq!(bus.probes, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_gives_up_after_five_attempts() {
        let fake = FakeDiscovery::default();
        let mut manager = ConnectionManager::new(fake.clone());

        let start = tokio::time::Instant::now();
        assert!(!manager.connect().await);
        let elapsed = start.elapsed();

        assert_eq!(fake.bus().opens, 5);
        // Four pauses between five attempts
        assert!(elapsed >= Duration::from_secs(8));
        assert!(elapsed < Duration::from_secs(10));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configure_failure_counts_as_failed_attempt() {
        let fake = FakeDiscovery::with_dock();
        fake.bus().fail_configure = true;
        let mut manager = ConnectionManager::new(fake.clone());

        assert!(!manager.connect().await);
        assert_eq!(fake.bus().opens, 5);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_disconnects() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());
        assert!(manager.connect().await);

        fake.bus().present = false;
        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_is_connected_without_handle_sends_nothing() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());

        assert!(!manager.is_connected());
        assert_eq!(fake.bus().probes, 0);
        assert_eq!(fake.bus().opens, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_sends_report() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());
        assert!(manager.connect().await);

        let report = [0x16u8; 65];
        assert!(manager.transmit(&report));

        let bus = fake.bus();
        assert_eq!(bus.reports.len(), 1);
        assert_eq!(bus.reports[0].len(), 65);
        assert!(bus.requests.iter().all(|r| *r == SET_OUTPUT_REPORT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_failure_disconnects() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake.clone());
        assert!(manager.connect().await);

        fake.bus().fail_transfers = true;
        assert!(!manager.transmit(&[0u8; 65]));
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // No retry inside transmit
        fake.bus().fail_transfers = false;
        assert!(!manager.transmit(&[0u8; 65]));
        assert!(fake.bus().reports.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_is_idempotent() {
        let fake = FakeDiscovery::with_dock();
        let mut manager = ConnectionManager::new(fake);
        assert!(manager.connect().await);

        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_rusb_error_mapping() {
        assert!(matches!(DockError::from(rusb::Error::Access), DockError::PermissionDenied));
        assert!(matches!(DockError::from(rusb::Error::NoDevice), DockError::Disconnected));
        assert!(matches!(DockError::from(rusb::Error::Timeout), DockError::Timeout));
        assert!(matches!(DockError::from(rusb::Error::Pipe), DockError::Usb(rusb::Error::Pipe)));
    }
}
