//! Weather domain for Sunshine
//!
//! Forecast types, the Open-Meteo provider and location resolution.

pub mod location;
pub mod provider;
pub mod types;

pub use location::{
    LocationResolver, LocationSource, PreferredLocation, ResolvedLocation, FALLBACK_COORDINATES,
};
pub use provider::{OpenMeteoProvider, WeatherProvider};
pub use types::*;
