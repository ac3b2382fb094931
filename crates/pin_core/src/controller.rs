//! Pin lifecycle state machine: map click -> draft -> geocode -> committed pin.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use shared::domain::{validate_coordinates, DraftPin, Pin, PinId};
use storage::PinStore;

use crate::geocode::ReverseGeocoder;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Drafting,
    Committing,
}

/// Owns the draft slot and the committed pin sequence. All transitions run on
/// one logical task; the only suspension point is the geocode call inside
/// [`PinLifecycle::submit`].
pub struct PinLifecycle {
    store: PinStore,
    geocoder: Arc<dyn ReverseGeocoder>,
    pins: Vec<Pin>,
    draft: Option<DraftPin>,
    commit_in_flight: bool,
    last_id: i64,
    pins_tx: watch::Sender<Vec<Pin>>,
}

impl PinLifecycle {
    pub fn new(store: PinStore, geocoder: Arc<dyn ReverseGeocoder>, pins: Vec<Pin>) -> Self {
        let last_id = pins.iter().map(|pin| pin.id.0).max().unwrap_or(0);
        let (pins_tx, _) = watch::channel(pins.clone());
        Self {
            store,
            geocoder,
            pins,
            draft: None,
            commit_in_flight: false,
            last_id,
            pins_tx,
        }
    }

    /// Watch the committed sequence; fires once per commit.
    pub fn subscribe(&self) -> watch::Receiver<Vec<Pin>> {
        self.pins_tx.subscribe()
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn draft(&self) -> Option<&DraftPin> {
        self.draft.as_ref()
    }

    pub fn state(&self) -> LifecycleState {
        if self.commit_in_flight {
            LifecycleState::Committing
        } else if self.draft.is_some() {
            LifecycleState::Drafting
        } else {
            LifecycleState::Idle
        }
    }

    /// A click always stages a fresh draft with empty remarks. Any existing
    /// draft is discarded, never queued. Legal in every state: a click while
    /// a commit is in flight stages the next draft without touching the
    /// commit already underway.
    pub fn handle_click(&mut self, lat: f64, lng: f64) {
        if self.draft.is_some() {
            debug!(lat, lng, "map click replaces pending draft");
        }
        self.draft = Some(DraftPin::at(lat, lng));
    }

    /// Updates the draft's remarks; no-op when no draft exists.
    pub fn set_remarks(&mut self, remarks: impl Into<String>) {
        if let Some(draft) = &mut self.draft {
            draft.remarks = remarks.into();
        }
    }

    /// Commits the current draft: resolves its address, assigns an id,
    /// appends it to the store, and publishes the new sequence.
    ///
    /// Returns `None` without side effects when there is no draft, when a
    /// commit is already in flight, or when the draft's coordinates are
    /// invalid (the draft is retained in that case). Once committing, the
    /// operation always completes: geocode failures arrive as sentinel
    /// addresses and a failed snapshot write keeps the pin in memory.
    pub async fn submit(&mut self) -> Option<PinId> {
        if self.commit_in_flight {
            debug!("submit ignored; commit already in flight");
            return None;
        }
        let Some(draft) = self.draft.take() else {
            debug!("submit ignored; no draft");
            return None;
        };
        if let Err(err) = validate_coordinates(draft.lat, draft.lng) {
            warn!(error = %err, "submit ignored; keeping draft");
            self.draft = Some(draft);
            return None;
        }

        self.commit_in_flight = true;
        let address = self.geocoder.resolve_address(draft.lat, draft.lng).await;

        let pin = Pin {
            id: self.next_id(),
            lat: draft.lat,
            lng: draft.lng,
            remarks: draft.remarks,
            address,
        };

        match self.store.append(pin.clone(), self.pins.clone()).await {
            Ok(pins) => self.pins = pins,
            Err(err) => {
                // Local creation must succeed even when persistence is down.
                warn!(error = %err, "snapshot write failed; pin kept in memory");
                self.pins.push(pin.clone());
            }
        }
        self.commit_in_flight = false;

        self.pins_tx.send_replace(self.pins.clone());
        info!(pin_id = pin.id.0, lat = pin.lat, lng = pin.lng, "committed pin");
        Some(pin.id)
    }

    /// Millisecond timestamp, bumped past the previous id so commits landing
    /// in the same tick still get unique, monotonic ids.
    fn next_id(&mut self) -> PinId {
        let now = Utc::now().timestamp_millis();
        self.last_id = now.max(self.last_id + 1);
        PinId(self.last_id)
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
