//! Reverse geocoding adapter: best-effort enrichment, never a hard failure.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::config::Settings;

/// Returned when the geocoder answered but had no usable display name.
pub const ADDRESS_NOT_FOUND: &str = "Address not found";
/// Returned when the geocoder request itself failed (network, status, parse).
pub const ADDRESS_FETCH_FAILED: &str = "Error fetching address";

/// Resolves a human-readable address for a coordinate pair.
///
/// Implementations must always return a string: geocoding failure degrades to
/// a sentinel and never blocks pin creation.
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn resolve_address(&self, lat: f64, lng: f64) -> String;
}

#[derive(Debug, Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// Nominatim-style reverse geocoding over HTTP GET with `lat`/`lon` query
/// parameters. No retries, no caching, no rate limiting.
pub struct NominatimGeocoder {
    client: Client,
    endpoint: Url,
}

impl NominatimGeocoder {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build geocoder http client")?;
        Ok(Self { client, endpoint })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(settings.geocode_endpoint_url()?, settings.geocode_timeout())
    }

    async fn fetch_display_name(&self, lat: f64, lng: f64) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[
                ("format", "json".to_string()),
                ("lat", lat.to_string()),
                ("lon", lng.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let body: ReverseResponse = response.json().await?;
        Ok(body.display_name)
    }
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    async fn resolve_address(&self, lat: f64, lng: f64) -> String {
        match self.fetch_display_name(lat, lng).await {
            Ok(Some(name)) if !name.trim().is_empty() => name,
            Ok(_) => ADDRESS_NOT_FOUND.to_string(),
            Err(err) => {
                tracing::warn!(lat, lng, error = %err, "reverse geocode failed");
                ADDRESS_FETCH_FAILED.to_string()
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/geocode_tests.rs"]
mod tests;
