use std::{fs, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use url::Url;

#[derive(Debug, Clone)]
pub struct Settings {
    pub geocode_endpoint: String,
    pub geocode_timeout_secs: u64,
    pub database_url: String,
    pub pins_key: String,
    pub focus_zoom: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            geocode_endpoint: "https://nominatim.openstreetmap.org/reverse".into(),
            geocode_timeout_secs: 10,
            database_url: "sqlite://./data/pins.db".into(),
            pins_key: "pins".into(),
            focus_zoom: 10.0,
        }
    }
}

impl Settings {
    pub fn geocode_endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.geocode_endpoint).with_context(|| {
            format!("invalid geocode endpoint '{}'", self.geocode_endpoint)
        })
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_secs(self.geocode_timeout_secs)
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    geocode_endpoint: Option<String>,
    geocode_timeout_secs: Option<u64>,
    database_url: Option<String>,
    pins_key: Option<String>,
    focus_zoom: Option<f64>,
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("pins.toml") {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.geocode_endpoint {
                settings.geocode_endpoint = v;
            }
            if let Some(v) = file_cfg.geocode_timeout_secs {
                settings.geocode_timeout_secs = v;
            }
            if let Some(v) = file_cfg.database_url {
                settings.database_url = v;
            }
            if let Some(v) = file_cfg.pins_key {
                settings.pins_key = v;
            }
            if let Some(v) = file_cfg.focus_zoom {
                settings.focus_zoom = v;
            }
        }
    }

    if let Ok(v) = std::env::var("PINS__GEOCODE_ENDPOINT") {
        settings.geocode_endpoint = v;
    }
    if let Ok(v) = std::env::var("PINS__GEOCODE_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.geocode_timeout_secs = parsed;
        }
    }
    if let Ok(v) = std::env::var("PINS__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Ok(v) = std::env::var("PINS__PINS_KEY") {
        settings.pins_key = v;
    }
    if let Ok(v) = std::env::var("PINS__FOCUS_ZOOM") {
        if let Ok(parsed) = v.parse::<f64>() {
            settings.focus_zoom = parsed;
        }
    }

    settings
}

/// Normalizes a bare file path into a `sqlite://` URL. Parent directories are
/// created by the storage layer when the pool opens.
pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite::memory:")
        || raw_database_url.starts_with("sqlite://")
        || raw_database_url.contains("://")
    {
        return raw_database_url.to_string();
    }

    if let Some(path) = raw_database_url.strip_prefix("sqlite:") {
        let path = path.replace('\\', "/");
        return format!("sqlite://{path}");
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}
