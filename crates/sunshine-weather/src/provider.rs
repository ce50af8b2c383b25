//! Forecast retrieval from the Open-Meteo daily API.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

use crate::types::{Coordinates, DayForecast, Forecast, TemperatureUnit, WeatherCondition, WeatherError};

const OPEN_METEO_API_BASE: &str = "https://api.open-meteo.com/v1";
const USER_AGENT: &str = "Sunshine/0.1.0";
const DAILY_FIELDS: &str =
    "weather_code,temperature_2m_max,temperature_2m_min,precipitation_probability_max,wind_speed_10m_max";
pub const DEFAULT_FORECAST_DAYS: u8 = 14;

/// Source of forecasts for a pair of coordinates.
pub trait WeatherProvider: Send + Sync {
    fn fetch(
        &self,
        coordinates: Coordinates,
    ) -> impl Future<Output = Result<Forecast, WeatherError>> + Send;
}

impl<P: WeatherProvider> WeatherProvider for Arc<P> {
    fn fetch(
        &self,
        coordinates: Coordinates,
    ) -> impl Future<Output = Result<Forecast, WeatherError>> + Send {
        (**self).fetch(coordinates)
    }
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    daily: DailyBlock,
}

#[derive(Debug, Deserialize)]
struct DailyBlock {
    time: Vec<NaiveDate>,
    weather_code: Vec<Option<i32>>,
    temperature_2m_max: Vec<Option<f64>>,
    temperature_2m_min: Vec<Option<f64>>,
    #[serde(default)]
    precipitation_probability_max: Vec<Option<f64>>,
    #[serde(default)]
    wind_speed_10m_max: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoError {
    reason: Option<String>,
}

impl DailyBlock {
    fn into_days(self) -> Result<Vec<DayForecast>, WeatherError> {
        let n = self.time.len();
        if self.weather_code.len() != n
            || self.temperature_2m_max.len() != n
            || self.temperature_2m_min.len() != n
        {
            return Err(WeatherError::Parse(format!(
                "daily arrays disagree in length (time has {} entries)",
                n
            )));
        }

        self.time
            .into_iter()
            .enumerate()
            .map(|(i, date)| {
                let code = self.weather_code[i]
                    .ok_or_else(|| WeatherError::Parse(format!("missing weather code for {}", date)))?;
                let high = self.temperature_2m_max[i]
                    .ok_or_else(|| WeatherError::Parse(format!("missing high for {}", date)))?;
                let low = self.temperature_2m_min[i]
                    .ok_or_else(|| WeatherError::Parse(format!("missing low for {}", date)))?;
                let precip = self
                    .precipitation_probability_max
                    .get(i)
                    .copied()
                    .flatten()
                    .unwrap_or(0.0);

                Ok(DayForecast {
                    date,
                    high,
                    low,
                    condition: WeatherCondition::from_wmo_code(code),
                    precipitation_chance: precip.round().clamp(0.0, 100.0) as u8,
                    wind_speed: self.wind_speed_10m_max.get(i).copied().flatten().unwrap_or(0.0),
                })
            })
            .collect()
    }
}

/// HTTP client for the Open-Meteo forecast endpoint.
#[derive(Debug, Clone)]
pub struct OpenMeteoProvider {
    client: Client,
    base_url: String,
    unit: TemperatureUnit,
    forecast_days: u8,
}

impl OpenMeteoProvider {
    pub fn new(unit: TemperatureUnit, timeout: Duration) -> Result<Self, WeatherError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: OPEN_METEO_API_BASE.to_string(),
            unit,
            forecast_days: DEFAULT_FORECAST_DAYS,
        })
    }

    /// Point the provider at another Open-Meteo compatible host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_forecast_days(mut self, days: u8) -> Self {
        self.forecast_days = days;
        self
    }

    fn query(&self, coordinates: Coordinates) -> Vec<(&'static str, String)> {
        let mut query = vec![
            ("latitude", coordinates.latitude.to_string()),
            ("longitude", coordinates.longitude.to_string()),
            ("daily", DAILY_FIELDS.to_string()),
            ("timezone", "auto".to_string()),
            ("forecast_days", self.forecast_days.to_string()),
        ];
        if self.unit.resolved() == TemperatureUnit::Fahrenheit {
            query.push(("temperature_unit", "fahrenheit".to_string()));
        }
        query
    }
}

impl WeatherProvider for OpenMeteoProvider {
    #[instrument(skip(self), level = "info")]
    async fn fetch(&self, coordinates: Coordinates) -> Result<Forecast, WeatherError> {
        let url = format!("{}/forecast", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&self.query(coordinates))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<OpenMeteoError>(&text)
                .ok()
                .and_then(|e| e.reason)
                .unwrap_or(text);
            tracing::warn!("Open-Meteo returned {}: {}", status, message);
            return Err(WeatherError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body: OpenMeteoResponse = response
            .json()
            .await
            .map_err(|e| WeatherError::Parse(format!("JSON parse error: {}", e)))?;

        let days = body.daily.into_days()?;
        tracing::debug!("Fetched {} forecast days", days.len());

        Ok(Forecast {
            coordinates,
            unit: self.unit.resolved(),
            days,
            fetched_at: Utc::now(),
        })
    }
}
