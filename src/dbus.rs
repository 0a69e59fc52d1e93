//! D-Bus IPC server for the RGB dock daemon
//!
//! Implements the io.github.jsauxrgb.Dock interface used by the lighting UI.
//! Every method only touches the desired state store; the update loop picks
//! the change up on its next tick.
//!
//! ## Interface: io.github.jsauxrgb.Dock
//!
//! ### Methods:
//! - `GetMenuState() -> (b power, y effect, y speed, (yyy) colour, b connected)`
//! - `ChangeState(power: b)` - Light the dock or force it dark
//! - `ChangeEffect(effect: i)` - Select an effect by firmware code; unknown codes are ignored
//! - `ChangeBrightness(fraction: d)` - Scale colours by 0.0-1.0
//! - `ChangeSpeed(speed: i)` - Effect speed 1-4
//! - `ChangeColour(r: i, g: i, b: i)` - Colour for all zones
//!
//! ### Properties:
//! - `Connected`, `EffectName`, `SpeedName`, `DaemonVersion`

use zbus::{fdo, interface};

use crate::state::{speed_name, Effect, Rgb, StateStore};

/// D-Bus interface name
pub const DBUS_INTERFACE: &str = "io.github.jsauxrgb.Dock";

/// D-Bus object path
pub const DBUS_PATH: &str = "/io/github/jsauxrgb/Dock";

/// D-Bus bus name
pub const DBUS_NAME: &str = "io.github.jsauxrgb";

/// `GetMenuState` reply: power, effect code, speed, (r, g, b), connected
pub type MenuState = (bool, u8, u8, (u8, u8, u8), bool);

/// RGB dock D-Bus service
pub struct DockService {
    /// Desired lighting state
    store: StateStore,
    /// Daemon version
    version: String,
}

impl DockService {
    pub fn new(store: StateStore) -> Self {
        Self {
            store,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Current menu state as reported to the UI
    pub fn menu_state(&self) -> MenuState {
        let state = self.store.snapshot().state;
        let colour = state.colour();
        (
            state.power,
            state.effect.code(),
            state.speed,
            (colour.r, colour.g, colour.b),
            self.store.is_connected(),
        )
    }

    /// Apply an effect by firmware code. Unknown codes leave the store as is.
    fn apply_effect(&self, code: i32) -> bool {
        match u8::try_from(code).ok().and_then(Effect::from_code) {
            Some(effect) => {
                tracing::info!(effect = %effect, "ChangeEffect called");
                self.store.set_effect(effect);
                true
            }
            None => {
                tracing::warn!(effect = code, "Ignoring unknown effect code");
                false
            }
        }
    }
}

#[interface(name = "io.github.jsauxrgb.Dock")]
impl DockService {
    /// Get power, effect, speed, colour and connection status
    async fn get_menu_state(&self) -> fdo::Result<MenuState> {
        Ok(self.menu_state())
    }

    /// Turn the lighting on or off
    ///
    /// Off is shown as static black; the configured effect is kept.
    async fn change_state(&self, power: bool) -> fdo::Result<()> {
        tracing::info!(power, "ChangeState called");
        self.store.set_power(power);
        Ok(())
    }

    /// Select an effect by firmware code (1, 3, 4, 6, 8 or 10)
    ///
    /// Any other code is logged and ignored; the call still succeeds.
    async fn change_effect(&self, effect: i32) -> fdo::Result<()> {
        self.apply_effect(effect);
        Ok(())
    }

    /// Set colour brightness as a fraction, clamped to 0.0-1.0
    async fn change_brightness(&self, fraction: f64) -> fdo::Result<()> {
        tracing::info!(fraction, "ChangeBrightness called");
        self.store.set_brightness(fraction);
        Ok(())
    }

    /// Set effect speed, clamped to 1-4
    async fn change_speed(&self, speed: i32) -> fdo::Result<()> {
        tracing::info!(speed, "ChangeSpeed called");
        self.store.set_speed(i64::from(speed));
        Ok(())
    }

    /// Set the colour of every zone; channels are clamped to 0-255
    async fn change_colour(&self, r: i32, g: i32, b: i32) -> fdo::Result<()> {
        tracing::info!(r, g, b, "ChangeColour called");
        self.store
            .set_colour(Rgb::clamped(i64::from(r), i64::from(g), i64::from(b)));
        Ok(())
    }

    // =========================================================================
    // PROPERTIES
    // =========================================================================

    /// Whether the dock answered the last liveness probe
    #[zbus(property)]
    async fn connected(&self) -> bool {
        self.store.is_connected()
    }

    /// Name of the configured effect
    #[zbus(property)]
    async fn effect_name(&self) -> String {
        self.store.snapshot().state.effect.name().to_string()
    }

    /// Name of the configured speed
    #[zbus(property)]
    async fn speed_name(&self) -> String {
        speed_name(self.store.snapshot().state.speed).to_string()
    }

    /// Get daemon version
    #[zbus(property)]
    async fn daemon_version(&self) -> &str {
        &self.version
    }
}

/// Initialize and run the D-Bus service
///
/// Connects to the session bus, registers the service name, and exports
/// the interface at the object path.
///
/// # Returns
/// A `zbus::Connection` that should be kept alive for the service to run.
pub async fn init_dbus_service(store: StateStore) -> zbus::Result<zbus::Connection> {
    let service = DockService::new(store);

    let connection = zbus::connection::Builder::session()?
        .name(DBUS_NAME)?
        .serve_at(DBUS_PATH, service)?
        .build()
        .await?;

    tracing::info!(
        name = DBUS_NAME,
        path = DBUS_PATH,
        "D-Bus service registered"
    );

    Ok(connection)
}
