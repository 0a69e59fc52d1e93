//! Desired lighting state for the dock
//!
//! The store is the single place the D-Bus surface writes to. Every mutation
//! marks the state dirty, even when the value is unchanged: re-sending a
//! report is how the firmware restarts an effect (e.g. breathing from dark).
//!
//! SPDX-License-Identifier: GPL-3.0

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

// ============================================================================
// Constants
// ============================================================================

/// Number of independently colourable LED zones on the dock
pub const ZONE_COUNT: usize = 4;

/// Slowest effect speed
pub const MIN_SPEED: u8 = 1;

/// Fastest effect speed
pub const MAX_SPEED: u8 = 4;

// ============================================================================
// Effect
// ============================================================================

/// Lighting effect codes understood by the dock firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Effect {
    #[default]
    Static,
    Breathing,
    Wave,
    Smooth,
    Race,
    Stack,
}

impl Effect {
    /// All effects in menu order
    pub const ALL: [Effect; 6] = [
        Effect::Static,
        Effect::Breathing,
        Effect::Wave,
        Effect::Smooth,
        Effect::Race,
        Effect::Stack,
    ];

    /// Numeric code placed in the report
    pub fn code(self) -> u8 {
        match self {
            Effect::Static => 1,
            Effect::Breathing => 3,
            Effect::Wave => 4,
            Effect::Smooth => 6,
            Effect::Race => 8,
            Effect::Stack => 10,
        }
    }

    /// Look up an effect by its firmware code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|effect| effect.code() == code)
    }

    /// Human readable name
    pub fn name(self) -> &'static str {
        match self {
            Effect::Static => "Static",
            Effect::Breathing => "Breathing",
            Effect::Wave => "Wave",
            Effect::Smooth => "Smooth",
            Effect::Race => "Race",
            Effect::Stack => "Stack",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Human readable name for an effect speed
pub fn speed_name(speed: u8) -> &'static str {
    match speed {
        1 => "Normal",
        2 => "Medium",
        3 => "Fast",
        4 => "Turbo",
        _ => "Unknown",
    }
}

// ============================================================================
// Colour
// ============================================================================

/// One RGB triple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Build a colour from wide integers, clamping each channel into 0..=255
    pub fn clamped(r: i64, g: i64, b: i64) -> Self {
        let clamp = |c: i64| c.clamp(0, 255) as u8;
        Self::new(clamp(r), clamp(g), clamp(b))
    }

    /// Scale every channel by `brightness`, truncating toward zero
    pub fn scaled(self, brightness: f64) -> Self {
        let scale = |c: u8| (f64::from(c) * brightness).floor() as u8;
        Self::new(scale(self.r), scale(self.g), scale(self.b))
    }
}

/// Default colour used when nothing has been persisted yet (teal)
pub const DEFAULT_COLOUR: Rgb = Rgb::new(0, 255, 255);

// ============================================================================
// Desired state
// ============================================================================

/// The lighting configuration the dock should be showing
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredState {
    /// Lit or forced dark
    pub power: bool,
    pub effect: Effect,
    /// Always within `MIN_SPEED..=MAX_SPEED`
    pub speed: u8,
    /// Per-channel scaling in [0.0, 1.0]
    pub brightness: f64,
    /// Colour of each zone
    pub zones: [Rgb; ZONE_COUNT],
}

impl Default for DesiredState {
    fn default() -> Self {
        Self {
            power: true,
            effect: Effect::Static,
            speed: MIN_SPEED,
            brightness: 1.0,
            zones: [DEFAULT_COLOUR; ZONE_COUNT],
        }
    }
}

impl DesiredState {
    /// Colour reported to the UI; all zones are set in unison
    pub fn colour(&self) -> Rgb {
        self.zones[0]
    }
}

/// Clamp a requested speed into the supported range
pub fn clamp_speed(speed: i64) -> u8 {
    speed.clamp(i64::from(MIN_SPEED), i64::from(MAX_SPEED)) as u8
}

/// Clamp a requested brightness fraction into [0.0, 1.0]
pub fn clamp_brightness(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// A consistent copy of the store taken by the update loop
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: DesiredState,
    /// State changed since the last successful hardware write
    pub dirty: bool,
    /// Mutation counter at the time of the snapshot
    pub revision: u64,
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug)]
struct Inner {
    state: DesiredState,
    dirty: bool,
    revision: u64,
}

#[derive(Debug)]
struct Shared {
    inner: Mutex<Inner>,
    connected: AtomicBool,
}

/// Thread-safe desired state shared by the D-Bus service and the update loop
#[derive(Debug, Clone)]
pub struct StateStore {
    shared: Arc<Shared>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DesiredState::default())
    }
}

impl StateStore {
    /// Create a store seeded with `initial`. It starts dirty so the first
    /// tick pushes the seeded state to the dock.
    pub fn new(initial: DesiredState) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: initial,
                    dirty: true,
                    revision: 0,
                }),
                connected: AtomicBool::new(false),
            }),
        }
    }

    // Mutations are plain assignments, so a poisoned lock still holds whole values
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.shared
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mutate(&self, apply: impl FnOnce(&mut DesiredState)) {
        let mut inner = self.lock();
        apply(&mut inner.state);
        inner.dirty = true;
        inner.revision = inner.revision.wrapping_add(1);
    }

    pub fn set_power(&self, power: bool) {
        self.mutate(|state| state.power = power);
    }

    pub fn set_effect(&self, effect: Effect) {
        self.mutate(|state| state.effect = effect);
    }

    pub fn set_speed(&self, speed: i64) {
        let speed = clamp_speed(speed);
        self.mutate(|state| state.speed = speed);
    }

    pub fn set_brightness(&self, fraction: f64) {
        let brightness = clamp_brightness(fraction);
        self.mutate(|state| state.brightness = brightness);
    }

    /// Set every zone to the same colour
    pub fn set_colour(&self, colour: Rgb) {
        self.mutate(|state| state.zones = [colour; ZONE_COUNT]);
    }

    /// Copy of the current state with its dirty flag and revision
    pub fn snapshot(&self) -> Snapshot {
        let inner = self.lock();
        Snapshot {
            state: inner.state.clone(),
            dirty: inner.dirty,
            revision: inner.revision,
        }
    }

    /// Clear the dirty flag after a successful write of `revision`.
    ///
    /// Returns false (and leaves the flag set) if a mutation landed after
    /// the snapshot was taken.
    pub fn mark_clean(&self, revision: u64) -> bool {
        let mut inner = self.lock();
        if inner.revision == revision {
            inner.dirty = false;
            true
        } else {
            false
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Last connection state published by the update loop
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.shared.connected.store(connected, Ordering::Release);
    }
}
