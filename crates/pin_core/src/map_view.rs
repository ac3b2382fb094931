//! Collaborator traits for the external interactive map surface.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use shared::domain::MarkerHandle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapClick {
    pub lat: f64,
    pub lng: f64,
}

/// Opaque map rendering surface. The core never renders tiles or handles
/// projection; it only subscribes to clicks and places markers.
pub trait MapView: Send + Sync {
    fn clicks(&self) -> broadcast::Receiver<MapClick>;
    fn create_marker(&self, lat: f64, lng: f64, popup_html: &str) -> MarkerHandle;
    fn fly_to(&self, lat: f64, lng: f64, zoom: f64);
    fn dispose(&self);
}

/// Builds the map view. Construction is deferred behind the hydration gate,
/// so the provider is only invoked once the environment is interactive.
#[async_trait]
pub trait MapViewProvider: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn MapView>>;
}
