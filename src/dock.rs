//! Update loop that keeps the dock in sync with the desired state
//!
//! One task owns the connection. Each tick it drains hot-plug events,
//! makes sure the dock is connected, and writes a fresh report when the
//! state is dirty or a re-attached dock needs restoring. Successful writes
//! are committed to the settings file.
//!
//! SPDX-License-Identifier: GPL-3.0

use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::config::Persistence;
use crate::hotplug::{drain_events, HotplugEvent};
use crate::report::encode;
use crate::state::{Effect, StateStore};
use crate::usb::{ConnectionManager, DockDiscovery};

/// Default interval between ticks
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing to write
    Idle,
    /// Report written and committed
    Written,
    /// Write needed but the dock was unreachable or the transfer failed
    Failed,
}

/// Reconciles the desired state with the dock
pub struct UpdateLoop<D: DockDiscovery, P: Persistence> {
    connection: ConnectionManager<D>,
    store: StateStore,
    persistence: P,
    hotplug: mpsc::Receiver<HotplugEvent>,
    interval: Duration,
}

impl<D: DockDiscovery, P: Persistence> UpdateLoop<D, P> {
    pub fn new(
        connection: ConnectionManager<D>,
        store: StateStore,
        persistence: P,
        hotplug: mpsc::Receiver<HotplugEvent>,
    ) -> Self {
        Self {
            connection,
            store,
            persistence,
            hotplug,
            interval: TICK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one reconciliation pass
    pub async fn tick(&mut self) -> TickOutcome {
        let signal = drain_events(&mut self.hotplug);
        if signal.unbound {
            self.connection.disconnect();
        }
        let force = signal.bound;

        let connected = self.connection.connect().await;
        self.store.set_connected(connected);

        let snapshot = self.store.snapshot();
        if !(force || snapshot.dirty) {
            return TickOutcome::Idle;
        }

        let report = encode(&snapshot.state);
        if !self.connection.transmit(&report) {
            self.store.set_connected(false);
            return TickOutcome::Failed;
        }

        tracing::debug!(
            effect = %snapshot.state.effect,
            speed = snapshot.state.speed,
            power = snapshot.state.power,
            forced = force,
            "Lighting state applied"
        );

        self.store.mark_clean(snapshot.revision);
        if let Err(e) = self.persistence.commit(&snapshot.state) {
            tracing::warn!(error = %e, "Failed to persist lighting state");
        }

        TickOutcome::Written
    }

    /// Tick until `shutdown` flips to true (or its sender goes away), then
    /// turn the lights out and return.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Update loop started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            // Only the connect retry delay is ever abandoned, never a transfer
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                _ = self.tick() => {}
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        self.lights_out().await;
    }

    /// Power the dock down on shutdown. Best effort, not persisted.
    pub async fn lights_out(&mut self) {
        tracing::info!("Turning off dock lighting");

        self.store.set_power(false);
        self.store.set_effect(Effect::Static);

        let state = self.store.snapshot().state;
        if self.connection.is_connected() && self.connection.transmit(&encode(&state)) {
            tracing::info!("Dock lighting off");
        } else {
            tracing::warn!("Dock unreachable, lighting left as is");
        }

        self.connection.disconnect();
        self.store.set_connected(false);
    }
}
