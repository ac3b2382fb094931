//! Pin lifecycle and map-synchronization engine.
//!
//! Turns clicks on an external map surface into persisted, addressed pins and
//! keeps the map's markers in step with the pin store. The map view, the
//! reverse geocoder, and the persistence surface are collaborator traits
//! supplied by the embedding host; nothing here renders tiles, owns sockets
//! beyond the geocoder call, or exposes a server surface.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{
    sync::{broadcast, mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use shared::domain::{Pin, PinId};
use storage::{KeyValueStore, PinStore};

pub mod config;
pub mod controller;
pub mod geocode;
pub mod hydrate;
pub mod map_view;
pub mod reconcile;

pub use config::{load_settings, Settings};
pub use controller::{LifecycleState, PinLifecycle};
pub use geocode::{NominatimGeocoder, ReverseGeocoder, ADDRESS_FETCH_FAILED, ADDRESS_NOT_FOUND};
pub use hydrate::{GateState, HydrationGate, HydrationWatch};
pub use map_view::{MapClick, MapView, MapViewProvider};
pub use reconcile::MarkerReconciler;

/// Commands the embedding host can dispatch into the session event loop.
#[derive(Debug)]
pub enum SessionCommand {
    SetRemarks(String),
    Submit,
    FocusPin(PinId),
    Shutdown,
}

/// Running pin session: owns the event-loop task that serializes every
/// lifecycle transition, and hands the host a command sender plus a watch on
/// the committed sequence.
pub struct MapSession {
    commands: mpsc::Sender<SessionCommand>,
    pins_rx: watch::Receiver<Vec<Pin>>,
    map: Arc<dyn MapView>,
    worker: JoinHandle<()>,
}

impl MapSession {
    /// Brings the component up. Suspends on the hydration gate first: the
    /// store read, map construction, click subscription, and marker rendering
    /// all wait until the host signals readiness.
    pub async fn start(
        mut hydration: HydrationWatch,
        kv: Arc<dyn KeyValueStore>,
        geocoder: Arc<dyn ReverseGeocoder>,
        map_provider: Arc<dyn MapViewProvider>,
        settings: Settings,
    ) -> Result<Self> {
        hydration.ready().await?;

        let store = PinStore::with_key(kv, settings.pins_key.clone());
        let pins = store.load().await;
        info!(count = pins.len(), "loaded persisted pins");

        let map = map_provider
            .build()
            .await
            .context("failed to build map view")?;

        let lifecycle = PinLifecycle::new(store, geocoder, pins);
        let pins_rx = lifecycle.subscribe();

        let reconciler = MarkerReconciler::new(map.clone());
        tokio::spawn(reconciler.run(lifecycle.subscribe()));

        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let clicks = map.clicks();
        let worker = tokio::spawn(run_event_loop(
            lifecycle,
            map.clone(),
            clicks,
            cmd_rx,
            settings.focus_zoom,
        ));

        Ok(Self {
            commands: cmd_tx,
            pins_rx,
            map,
            worker,
        })
    }

    pub fn pins(&self) -> Vec<Pin> {
        self.pins_rx.borrow().clone()
    }

    pub fn watch_pins(&self) -> watch::Receiver<Vec<Pin>> {
        self.pins_rx.clone()
    }

    pub async fn set_remarks(&self, remarks: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::SetRemarks(remarks.into())).await
    }

    pub async fn submit(&self) -> Result<()> {
        self.send(SessionCommand::Submit).await
    }

    /// Flies the map to the given pin at the configured zoom.
    pub async fn focus_pin(&self, id: PinId) -> Result<()> {
        self.send(SessionCommand::FocusPin(id)).await
    }

    async fn send(&self, cmd: SessionCommand) -> Result<()> {
        debug!(command = ?cmd, "queueing session command");
        self.commands
            .send(cmd)
            .await
            .map_err(|_| anyhow::anyhow!("session event loop is gone"))
    }

    /// Stops the event loop and disposes the map view.
    pub async fn shutdown(self) -> Result<()> {
        if self.commands.send(SessionCommand::Shutdown).await.is_err() {
            debug!("session event loop already stopped");
        }
        self.worker
            .await
            .context("session event loop panicked")?;
        self.map.dispose();
        Ok(())
    }
}

/// Single consumer of both map clicks and host commands. Awaiting a commit
/// inside this loop is what serializes transitions: events arriving while a
/// geocode is in flight queue up and are applied afterwards, in order.
async fn run_event_loop(
    mut lifecycle: PinLifecycle,
    map: Arc<dyn MapView>,
    mut clicks: broadcast::Receiver<MapClick>,
    mut commands: mpsc::Receiver<SessionCommand>,
    focus_zoom: f64,
) {
    let mut clicks_open = true;
    loop {
        tokio::select! {
            click = clicks.recv(), if clicks_open => match click {
                Ok(MapClick { lat, lng }) => lifecycle.handle_click(lat, lng),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Only the most recent click matters for the draft slot.
                    warn!(skipped, "behind on map clicks");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("map click stream closed");
                    clicks_open = false;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(SessionCommand::SetRemarks(remarks)) => lifecycle.set_remarks(remarks),
                Some(SessionCommand::Submit) => {
                    if lifecycle.submit().await.is_none() {
                        debug!("submit had no committable draft");
                    }
                }
                Some(SessionCommand::FocusPin(id)) => {
                    match lifecycle.pins().iter().find(|pin| pin.id == id) {
                        Some(pin) => map.fly_to(pin.lat, pin.lng, focus_zoom),
                        None => debug!(pin_id = id.0, "focus requested for unknown pin"),
                    }
                }
                Some(SessionCommand::Shutdown) | None => break,
            },
        }
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
