//! Keeps the map view's marker set in 1:1 correspondence with the pin store.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::watch;

use shared::domain::{MarkerHandle, Pin, PinId};

use crate::map_view::MapView;

/// Diffs the committed sequence against an index of already-rendered pin ids
/// and creates markers only for new pins. Existing markers are never
/// destroyed or recreated: pins are immutable post-commit, so the marker from
/// creation time stays correct, and the index guarantees at most one marker
/// per pin id.
pub struct MarkerReconciler {
    map: Arc<dyn MapView>,
    rendered: HashMap<PinId, MarkerHandle>,
}

impl MarkerReconciler {
    pub fn new(map: Arc<dyn MapView>) -> Self {
        Self {
            map,
            rendered: HashMap::new(),
        }
    }

    pub fn sync(&mut self, pins: &[Pin]) {
        for pin in pins {
            if self.rendered.contains_key(&pin.id) {
                continue;
            }
            let handle = self.map.create_marker(pin.lat, pin.lng, &popup_html(pin));
            self.rendered.insert(pin.id, handle);
        }
    }

    pub fn rendered_count(&self) -> usize {
        self.rendered.len()
    }

    /// Applies `sync` to the current sequence and then on every change until
    /// the sender side goes away.
    pub async fn run(mut self, mut pins_rx: watch::Receiver<Vec<Pin>>) {
        let initial = pins_rx.borrow_and_update().clone();
        self.sync(&initial);

        while pins_rx.changed().await.is_ok() {
            let pins = pins_rx.borrow_and_update().clone();
            self.sync(&pins);
        }
    }
}

pub(crate) fn popup_html(pin: &Pin) -> String {
    format!(
        "<div><strong>{}</strong></div><div>{}</div>",
        pin.remarks, pin.address
    )
}

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod tests;
