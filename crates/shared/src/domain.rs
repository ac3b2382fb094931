use serde::{Deserialize, Serialize};

use crate::error::CoordinateError;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(PinId);
id_newtype!(MarkerHandle);

/// A persisted, addressed map annotation. Immutable once committed; the
/// `address` is always resolved (a geocoder result or a sentinel) before a
/// pin is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub id: PinId,
    pub lat: f64,
    pub lng: f64,
    pub remarks: String,
    pub address: String,
}

/// An unsaved, in-progress pin. At most one exists at a time; a new map
/// click replaces the current one.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftPin {
    pub lat: f64,
    pub lng: f64,
    pub remarks: String,
}

impl DraftPin {
    pub fn at(lat: f64, lng: f64) -> Self {
        Self {
            lat,
            lng,
            remarks: String::new(),
        }
    }
}

pub fn validate_coordinates(lat: f64, lng: f64) -> Result<(), CoordinateError> {
    if !lat.is_finite() || !lng.is_finite() {
        return Err(CoordinateError::NotFinite);
    }
    if !(-90.0..=90.0).contains(&lat) {
        return Err(CoordinateError::LatitudeOutOfRange(lat));
    }
    if !(-180.0..=180.0).contains(&lng) {
        return Err(CoordinateError::LongitudeOutOfRange(lng));
    }
    Ok(())
}
