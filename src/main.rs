use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sunshine_core::Config;
use sunshine_sync::{
    LogNotifier, NotificationGate, SqliteForecastStore, StoredNotificationState, WeatherRefresher,
};
use sunshine_weather::{OpenMeteoProvider, PreferredLocation, TemperatureUnit};
use tokio_util::sync::CancellationToken;

fn temperature_unit(unit: sunshine_core::TemperatureUnit) -> TemperatureUnit {
    match unit {
        sunshine_core::TemperatureUnit::Auto => TemperatureUnit::Auto,
        sunshine_core::TemperatureUnit::Celsius => TemperatureUnit::Celsius,
        sunshine_core::TemperatureUnit::Fahrenheit => TemperatureUnit::Fahrenheit,
    }
}

fn build_refresher(config: &Config) -> Result<WeatherRefresher<OpenMeteoProvider>> {
    let provider = OpenMeteoProvider::new(
        temperature_unit(config.weather.temperature_unit),
        Duration::from_secs(config.weather.request_timeout_secs),
    )
    .context("Failed to create weather client")?
    .with_base_url(config.weather.api_base_url.as_str())
    .with_forecast_days(config.weather.forecast_days);

    let location = PreferredLocation::new(
        config.location.latitude,
        config.location.longitude,
        config.location.name.as_str(),
    );

    let store = Arc::new(
        SqliteForecastStore::open(&config.storage.database_path).with_context(|| {
            format!(
                "Failed to open forecast database at {}",
                config.storage.database_path.display()
            )
        })?,
    );

    let gate = NotificationGate::new(
        Arc::new(StoredNotificationState::new(
            config.notifications.enabled,
            store.clone(),
        )),
        Arc::new(LogNotifier::new(store.clone())),
    );

    Ok(WeatherRefresher::new(provider, Arc::new(location), store, gate))
}

#[tokio::main]
async fn main() -> Result<()> {
    sunshine_core::init()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let (config, _) = Config::load_validated(config_path.as_deref())?;
    tracing::info!(
        database = %config.storage.database_path.display(),
        "Sunshine started"
    );

    let refresher = build_refresher(&config)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling weather sync");
            on_signal.cancel();
        }
    });

    match refresher.sync(&cancel).await {
        Ok(report) => {
            println!(
                "Stored {} forecast days for {}{}",
                report.days_stored,
                report.coordinates,
                if report.notified { " (notified)" } else { "" }
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            if e.is_transient() {
                tracing::warn!("Weather sync failed with a transient error, the next run may succeed");
            }
            Err(e.into())
        }
    }
}
