//! Weather sync: resolve location, fetch, replace the snapshot, maybe notify.

use std::sync::Arc;

use chrono::Utc;
use sunshine_weather::{Coordinates, LocationResolver, LocationSource, WeatherProvider};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{StoreError, SyncError};
use crate::notify::NotificationGate;
use crate::store::ForecastStore;

/// Summary of a completed sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub coordinates: Coordinates,
    pub location_source: LocationSource,
    pub days_stored: usize,
    pub notified: bool,
}

/// Refreshes the local forecast snapshot from a [`WeatherProvider`].
///
/// At most one sync runs at a time. The exclusion covers the whole pipeline,
/// including persistence and the notification check, so two syncs never
/// interleave their writes. The guard moves into the blocking tail, so a
/// sync future dropped mid-write keeps the lock until the write finishes.
pub struct WeatherRefresher<P> {
    provider: P,
    location: Arc<dyn LocationResolver>,
    store: Arc<dyn ForecastStore>,
    gate: NotificationGate,
    in_flight: Arc<Mutex<()>>,
}

impl<P: WeatherProvider> WeatherRefresher<P> {
    pub fn new(
        provider: P,
        location: Arc<dyn LocationResolver>,
        store: Arc<dyn ForecastStore>,
        gate: NotificationGate,
    ) -> Self {
        Self {
            provider,
            location,
            store,
            gate,
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    /// Whether a sync is currently running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Run a sync, waiting for any in-flight sync to finish first.
    pub async fn sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            guard = Arc::clone(&self.in_flight).lock_owned() => guard,
        };
        self.run(cancel, guard).await
    }

    /// Run a sync unless one is already in flight.
    pub async fn try_sync(&self, cancel: &CancellationToken) -> Result<SyncReport, SyncError> {
        let guard = Arc::clone(&self.in_flight).try_lock_owned().map_err(|_| {
            tracing::warn!("Weather sync requested while another is running");
            SyncError::AlreadyRunning
        })?;
        self.run(cancel, guard).await
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        guard: OwnedMutexGuard<()>,
    ) -> Result<SyncReport, SyncError> {
        let result = self.refresh(cancel, guard).await;
        match &result {
            Ok(report) => tracing::info!(
                days = report.days_stored,
                notified = report.notified,
                "Weather sync complete"
            ),
            Err(e) => tracing::error!("Weather sync failed: {}", e),
        }
        result
    }

    async fn refresh(
        &self,
        cancel: &CancellationToken,
        guard: OwnedMutexGuard<()>,
    ) -> Result<SyncReport, SyncError> {
        let resolved = self.location.resolve()?;
        if let LocationSource::Fallback { query } = &resolved.source {
            tracing::info!(
                "No coordinates for '{}', using default {}",
                query,
                resolved.coordinates
            );
        }

        let forecast = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = self.provider.fetch(resolved.coordinates) => result?,
        };
        tracing::info!("Downloaded weather: {} days", forecast.len());

        // Persistence and the notification check run off the async workers.
        let store = Arc::clone(&self.store);
        let gate = self.gate.clone();
        let (days_stored, notified) = tokio::task::spawn_blocking(move || {
            let _held = guard;
            store.replace_all(&forecast)?;
            let notified = gate.maybe_notify(&forecast, Utc::now());
            Ok::<_, StoreError>((forecast.len(), notified))
        })
        .await
        .map_err(StoreError::from)??;

        Ok(SyncReport {
            coordinates: resolved.coordinates,
            location_source: resolved.source,
            days_stored,
            notified,
        })
    }
}
