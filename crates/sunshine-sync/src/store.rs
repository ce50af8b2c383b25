//! SQLite-backed forecast snapshot.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use sunshine_weather::{Coordinates, DayForecast, Forecast, TemperatureUnit, WeatherCondition};

use crate::error::StoreError;

const LAST_NOTIFIED_KEY: &str = "last_notified_at";
const LAST_SYNC_KEY: &str = "last_sync_at";

/// Persistence for the current forecast snapshot.
///
/// `replace_all` must leave either the previous or the new snapshot, never a mix.
pub trait ForecastStore: Send + Sync {
    fn replace_all(&self, forecast: &Forecast) -> Result<(), StoreError>;

    /// The persisted snapshot, or `None` if nothing has been stored.
    fn load(&self) -> Result<Option<Forecast>, StoreError>;
}

/// SQLite store for the forecast snapshot and sync bookkeeping.
pub struct SqliteForecastStore {
    conn: Mutex<Connection>,
}

struct DayRow {
    date: String,
    high: f64,
    low: f64,
    condition: String,
    precipitation_chance: u8,
    wind_speed: f64,
    unit: String,
    latitude: f64,
    longitude: f64,
    fetched_at_ms: i64,
}

impl SqliteForecastStore {
    /// Open (or create) the store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        tracing::debug!("Opened forecast store at {}", path.display());
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    #[cfg(test)]
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecast_days (
                position INTEGER PRIMARY KEY,
                date TEXT NOT NULL,
                high REAL NOT NULL,
                low REAL NOT NULL,
                condition TEXT NOT NULL,
                precipitation_chance INTEGER NOT NULL,
                wind_speed REAL NOT NULL,
                unit TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                fetched_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Number of stored forecast days.
    pub fn day_count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn
                .lock()
                .query_row("SELECT COUNT(*) FROM forecast_days", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.day_count()? == 0)
    }

    /// When the user was last shown a weather notification.
    pub fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_timestamp(LAST_NOTIFIED_KEY)
    }

    pub fn record_notified(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.set_timestamp(LAST_NOTIFIED_KEY, at)
    }

    /// When the snapshot was last replaced.
    pub fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.get_timestamp(LAST_SYNC_KEY)
    }

    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        let value: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        value
            .map(|v| {
                v.parse::<i64>()
                    .ok()
                    .and_then(DateTime::from_timestamp_millis)
                    .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp for {}: {}", key, v)))
            })
            .transpose()
    }

    fn set_timestamp(&self, key: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, at.timestamp_millis().to_string()],
        )?;
        Ok(())
    }

    fn row_to_day(row: &DayRow) -> Result<DayForecast, StoreError> {
        let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d")
            .map_err(|e| StoreError::Corrupt(format!("bad date '{}': {}", row.date, e)))?;
        let condition = WeatherCondition::from_key(&row.condition)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown condition '{}'", row.condition)))?;

        Ok(DayForecast {
            date,
            high: row.high,
            low: row.low,
            condition,
            precipitation_chance: row.precipitation_chance,
            wind_speed: row.wind_speed,
        })
    }
}

impl ForecastStore for SqliteForecastStore {
    fn replace_all(&self, forecast: &Forecast) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM forecast_days", [])?;
        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO forecast_days
                (position, date, high, low, condition, precipitation_chance, wind_speed, unit, latitude, longitude, fetched_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
            )?;
            for (position, day) in forecast.days.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    day.date.format("%Y-%m-%d").to_string(),
                    day.high,
                    day.low,
                    day.condition.as_key(),
                    day.precipitation_chance,
                    day.wind_speed,
                    forecast.unit.as_key(),
                    forecast.coordinates.latitude,
                    forecast.coordinates.longitude,
                    forecast.fetched_at.timestamp_millis(),
                ])?;
            }
        }
        tx.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![LAST_SYNC_KEY, Utc::now().timestamp_millis().to_string()],
        )?;
        tx.commit()?;

        tracing::debug!("Replaced forecast snapshot with {} days", forecast.len());
        Ok(())
    }

    fn load(&self) -> Result<Option<Forecast>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT date, high, low, condition, precipitation_chance, wind_speed, unit, latitude, longitude, fetched_at
             FROM forecast_days ORDER BY position ASC",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok(DayRow {
                    date: row.get(0)?,
                    high: row.get(1)?,
                    low: row.get(2)?,
                    condition: row.get(3)?,
                    precipitation_chance: row.get(4)?,
                    wind_speed: row.get(5)?,
                    unit: row.get(6)?,
                    latitude: row.get(7)?,
                    longitude: row.get(8)?,
                    fetched_at_ms: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };

        let unit = TemperatureUnit::from_key(&first.unit)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown unit '{}'", first.unit)))?;
        let fetched_at = DateTime::from_timestamp_millis(first.fetched_at_ms)
            .ok_or_else(|| StoreError::Corrupt(format!("bad fetch time {}", first.fetched_at_ms)))?;
        let coordinates = Coordinates {
            latitude: first.latitude,
            longitude: first.longitude,
        };
        let days = rows
            .iter()
            .map(Self::row_to_day)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Forecast {
            coordinates,
            unit,
            days,
            fetched_at,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn day(date: &str, high: f64, condition: WeatherCondition) -> DayForecast {
        DayForecast {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            high,
            low: high - 8.0,
            condition,
            precipitation_chance: 40,
            wind_speed: 12.5,
        }
    }

    fn forecast(days: Vec<DayForecast>) -> Forecast {
        Forecast {
            coordinates: Coordinates {
                latitude: 48.14816,
                longitude: 17.10674,
            },
            unit: TemperatureUnit::Celsius,
            days,
            fetched_at: DateTime::from_timestamp_millis(1_717_200_000_000).unwrap(),
        }
    }

    #[test]
    fn test_empty_store_loads_none() {
        let store = SqliteForecastStore::in_memory().unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(store.is_empty().unwrap());
        assert!(store.last_sync_at().unwrap().is_none());
    }

    #[test]
    fn test_replace_and_load_preserves_order() {
        let store = SqliteForecastStore::in_memory().unwrap();
        let snapshot = forecast(vec![
            day("2024-06-01", 21.0, WeatherCondition::Rain),
            day("2024-06-02", 25.0, WeatherCondition::Clear),
            day("2024-06-03", 18.5, WeatherCondition::Thunderstorm),
        ]);

        store.replace_all(&snapshot).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert!(store.last_sync_at().unwrap().is_some());
    }

    #[test]
    fn test_replace_discards_previous_snapshot() {
        let store = SqliteForecastStore::in_memory().unwrap();
        store
            .replace_all(&forecast(vec![
                day("2024-06-01", 21.0, WeatherCondition::Rain),
                day("2024-06-02", 22.0, WeatherCondition::Rain),
                day("2024-06-03", 23.0, WeatherCondition::Rain),
            ]))
            .unwrap();

        let newer = forecast(vec![day("2024-06-05", 30.0, WeatherCondition::Clear)]);
        store.replace_all(&newer).unwrap();

        assert_eq!(store.day_count().unwrap(), 1);
        assert_eq!(store.load().unwrap().unwrap(), newer);
    }

    #[test]
    fn test_replace_with_empty_forecast_clears() {
        let store = SqliteForecastStore::in_memory().unwrap();
        store
            .replace_all(&forecast(vec![day("2024-06-01", 21.0, WeatherCondition::Fog)]))
            .unwrap();

        store.replace_all(&forecast(Vec::new())).unwrap();
        assert!(store.is_empty().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_failed_replace_keeps_previous_snapshot() {
        let store = SqliteForecastStore::in_memory().unwrap();
        let original = forecast(vec![
            day("2024-06-01", 21.0, WeatherCondition::Rain),
            day("2024-06-02", 22.0, WeatherCondition::Cloudy),
        ]);
        store.replace_all(&original).unwrap();

        store
            .conn
            .lock()
            .execute_batch(
                "CREATE TRIGGER reject_day BEFORE INSERT ON forecast_days
                 WHEN NEW.date = '2030-01-02'
                 BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
            )
            .unwrap();

        let broken = forecast(vec![
            day("2030-01-01", 5.0, WeatherCondition::Snow),
            day("2030-01-02", 6.0, WeatherCondition::Snow),
        ]);
        assert!(store.replace_all(&broken).is_err());

        assert_eq!(store.load().unwrap().unwrap(), original);
    }

    #[test]
    fn test_notification_timestamp_roundtrip() {
        let store = SqliteForecastStore::in_memory().unwrap();
        assert!(store.last_notified_at().unwrap().is_none());

        let at = DateTime::from_timestamp_millis(1_717_200_000_000).unwrap();
        store.record_notified(at).unwrap();
        assert_eq!(store.last_notified_at().unwrap(), Some(at));

        let later = at + Duration::hours(25);
        store.record_notified(later).unwrap();
        assert_eq!(store.last_notified_at().unwrap(), Some(later));
    }

    #[test]
    fn test_corrupt_condition_is_reported() {
        let store = SqliteForecastStore::in_memory().unwrap();
        store
            .replace_all(&forecast(vec![day("2024-06-01", 21.0, WeatherCondition::Rain)]))
            .unwrap();
        store
            .conn
            .lock()
            .execute("UPDATE forecast_days SET condition = 'hail'", [])
            .unwrap();

        assert!(matches!(store.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("weather.db");

        let store = SqliteForecastStore::open(&path).unwrap();
        store
            .replace_all(&forecast(vec![day("2024-06-01", 21.0, WeatherCondition::Rain)]))
            .unwrap();
        drop(store);

        let reopened = SqliteForecastStore::open(&path).unwrap();
        assert_eq!(reopened.day_count().unwrap(), 1);
    }
}
