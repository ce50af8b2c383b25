//! Error types for forecast persistence, notifications and the sync pipeline.

use sunshine_weather::{LocationError, WeatherError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Corrupt forecast data: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Notification dispatch failed: {0}")]
    Dispatch(String),

    #[error("Failed to record notification: {0}")]
    State(#[from] StoreError),
}

/// Why a sync did not complete.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("A weather sync is already running")]
    AlreadyRunning,

    #[error("Weather sync cancelled")]
    Cancelled,

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("Weather provider error: {0}")]
    Provider(#[from] WeatherError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "Weather is already updating.",
            Self::Cancelled => "Weather update cancelled.",
            Self::Location(_) => "Your saved location is invalid. Check your settings.",
            Self::Provider(e) => e.user_message(),
            Self::Store(_) => "Unable to save weather data. Try restarting the app.",
        }
    }

    /// Whether a later sync may succeed without user action.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::AlreadyRunning | Self::Cancelled => true,
            Self::Provider(WeatherError::Network(_)) => true,
            Self::Provider(WeatherError::Api { status, .. }) => *status >= 500 || *status == 429,
            Self::Provider(WeatherError::Parse(_)) | Self::Location(_) | Self::Store(_) => false,
        }
    }
}
