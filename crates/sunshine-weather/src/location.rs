//! Resolving which coordinates a sync should fetch weather for.

use crate::types::{Coordinates, LocationError};

/// Used whenever no explicit coordinates are stored (Bratislava).
pub const FALLBACK_COORDINATES: Coordinates = Coordinates {
    latitude: 48.14816,
    longitude: 17.10674,
};

/// How the coordinates of a sync were chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationSource {
    /// User-provided latitude/longitude
    Explicit,
    /// No stored coordinates; `query` is the named location that was configured.
    Fallback { query: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub coordinates: Coordinates,
    pub source: LocationSource,
}

pub trait LocationResolver: Send + Sync {
    fn resolve(&self) -> Result<ResolvedLocation, LocationError>;
}

/// Location preferences as stored by the user.
#[derive(Debug, Clone, Default)]
pub struct PreferredLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    name: String,
}

impl PreferredLocation {
    pub fn new(latitude: Option<f64>, longitude: Option<f64>, name: impl Into<String>) -> Self {
        Self {
            latitude,
            longitude,
            name: name.into(),
        }
    }
}

impl LocationResolver for PreferredLocation {
    fn resolve(&self) -> Result<ResolvedLocation, LocationError> {
        if let Some((lat, lon)) = self.latitude.zip(self.longitude) {
            return Ok(ResolvedLocation {
                coordinates: Coordinates::new(lat, lon)?,
                source: LocationSource::Explicit,
            });
        }

        // The named query is not geocoded; fallback coordinates are used regardless.
        let query = self.name.trim().to_string();
        tracing::debug!(
            "No explicit coordinates (location '{}'), using fallback {}",
            query,
            FALLBACK_COORDINATES
        );
        Ok(ResolvedLocation {
            coordinates: FALLBACK_COORDINATES,
            source: LocationSource::Fallback { query },
        })
    }
}
