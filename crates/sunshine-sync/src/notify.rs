//! Daily weather notification: the elapsed-time gate and its dispatchers.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sunshine_weather::{DayForecast, Forecast, TemperatureUnit};

use crate::error::{NotifyError, StoreError};
use crate::store::SqliteForecastStore;

const NOTIFICATION_TITLE: &str = "Sunshine";

/// Minimum spacing between two weather notifications.
pub fn notification_interval() -> Duration {
    Duration::hours(24)
}

/// `true` iff notifications are enabled and at least a day has passed.
pub fn should_notify(enabled: bool, elapsed_since_last: Duration) -> bool {
    enabled && elapsed_since_last >= notification_interval()
}

/// Time since the last notification. Never notified counts from the Unix epoch.
pub fn elapsed_since_last(last: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
    now - last.unwrap_or_default()
}

/// Read side of the user's notification preferences.
pub trait NotificationState: Send + Sync {
    fn notifications_enabled(&self) -> bool;
    fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

/// Shows a notification for one forecast day. Implementations record `at`,
/// the time the gate was evaluated, so the next evaluation sees it.
pub trait NotificationDispatcher: Send + Sync {
    fn notify(
        &self,
        day: &DayForecast,
        unit: TemperatureUnit,
        at: DateTime<Utc>,
    ) -> Result<(), NotifyError>;
}

/// Rendered notification text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContent {
    pub title: String,
    pub body: String,
}

impl NotificationContent {
    pub fn for_day(day: &DayForecast, unit: TemperatureUnit) -> Self {
        let symbol = unit.symbol();
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: format!(
                "Forecast: {} - High: {:.0}{} Low: {:.0}{}",
                day.condition.description(),
                day.high,
                symbol,
                day.low,
                symbol
            ),
        }
    }
}

/// Decides whether a fresh forecast warrants a notification and sends it.
#[derive(Clone)]
pub struct NotificationGate {
    state: Arc<dyn NotificationState>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl NotificationGate {
    pub fn new(state: Arc<dyn NotificationState>, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self { state, dispatcher }
    }

    /// Notify about the first day of `forecast` if the gate is open.
    /// Returns whether a notification was dispatched.
    pub fn maybe_notify(&self, forecast: &Forecast, now: DateTime<Utc>) -> bool {
        let Some(today) = forecast.first_day() else {
            tracing::debug!("Empty forecast, nothing to notify about");
            return false;
        };

        let last = match self.state.last_notified_at() {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("Could not read last notification time: {}", e);
                return false;
            }
        };

        let enabled = self.state.notifications_enabled();
        let elapsed = elapsed_since_last(last, now);
        if !should_notify(enabled, elapsed) {
            tracing::debug!(
                enabled,
                elapsed_minutes = elapsed.num_minutes(),
                "Skipping weather notification"
            );
            return false;
        }

        match self.dispatcher.notify(today, forecast.unit, now) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("Failed to dispatch weather notification: {}", e);
                false
            }
        }
    }
}

/// Notification preferences backed by the config flag and the store's
/// `sync_state` table.
pub struct StoredNotificationState {
    enabled: bool,
    store: Arc<SqliteForecastStore>,
}

impl StoredNotificationState {
    pub fn new(enabled: bool, store: Arc<SqliteForecastStore>) -> Self {
        Self { enabled, store }
    }
}

impl NotificationState for StoredNotificationState {
    fn notifications_enabled(&self) -> bool {
        self.enabled
    }

    fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.store.last_notified_at()
    }
}

/// Emits notifications as log events on the `sunshine::notification` target.
pub struct LogNotifier {
    store: Arc<SqliteForecastStore>,
}

impl LogNotifier {
    pub fn new(store: Arc<SqliteForecastStore>) -> Self {
        Self { store }
    }
}

impl NotificationDispatcher for LogNotifier {
    fn notify(
        &self,
        day: &DayForecast,
        unit: TemperatureUnit,
        at: DateTime<Utc>,
    ) -> Result<(), NotifyError> {
        let content = NotificationContent::for_day(day, unit);
        tracing::info!(
            target: "sunshine::notification",
            title = %content.title,
            date = %day.date,
            "{}",
            content.body
        );
        self.store.record_notified(at)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use parking_lot::Mutex;
    use sunshine_weather::{Coordinates, WeatherCondition};

    struct FixedState {
        enabled: bool,
        last: Option<DateTime<Utc>>,
    }

    impl NotificationState for FixedState {
        fn notifications_enabled(&self) -> bool {
            self.enabled
        }

        fn last_notified_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
            Ok(self.last)
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<DayForecast>>,
    }

    impl NotificationDispatcher for Recorder {
        fn notify(
            &self,
            day: &DayForecast,
            _unit: TemperatureUnit,
            _at: DateTime<Utc>,
        ) -> Result<(), NotifyError> {
            self.sent.lock().push(day.clone());
            Ok(())
        }
    }

    struct Failing;

    impl NotificationDispatcher for Failing {
        fn notify(
            &self,
            _day: &DayForecast,
            _unit: TemperatureUnit,
            _at: DateTime<Utc>,
        ) -> Result<(), NotifyError> {
            Err(NotifyError::Dispatch("no notification channel".into()))
        }
    }

    fn day(date: &str, high: f64, low: f64) -> DayForecast {
        DayForecast {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            high,
            low,
            condition: WeatherCondition::PartlyCloudy,
            precipitation_chance: 10,
            wind_speed: 5.0,
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
            fetched_at: Utc::now(),
        }
    }

    fn gate(enabled: bool, last: Option<DateTime<Utc>>) -> (NotificationGate, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let gate = NotificationGate::new(Arc::new(FixedState { enabled, last }), recorder.clone());
        (gate, recorder)
    }

    #[test]
    fn test_should_notify_boundaries() {
        let day = Duration::hours(24);
        assert!(should_notify(true, day));
        assert!(!should_notify(true, day - Duration::milliseconds(1)));
        assert!(should_notify(true, Duration::hours(25)));
        assert!(!should_notify(true, Duration::hours(1)));
        assert!(!should_notify(true, Duration::hours(-30)));
    }

    #[test]
    fn test_should_notify_requires_enabled() {
        for hours in [0, 1, 23, 24, 25, 1000] {
            let elapsed = Duration::hours(hours);
            assert!(!should_notify(false, elapsed));
            assert_eq!(should_notify(true, elapsed), hours >= 24);
        }
    }

    #[test]
    fn test_never_notified_counts_as_elapsed() {
        let now = Utc::now();
        assert!(should_notify(true, elapsed_since_last(None, now)));
    }

    #[test]
    fn test_gate_dispatches_first_day_after_a_day() {
        let now = Utc::now();
        let (gate, recorder) = gate(true, Some(now - Duration::hours(25)));
        let fc = forecast(vec![day("2024-06-01", 21.0, 12.0), day("2024-06-02", 19.0, 11.0)]);

        assert!(gate.maybe_notify(&fc, now));
        assert_eq!(recorder.sent.lock().as_slice(), &fc.days[..1]);
    }

    #[test]
    fn test_gate_closed_within_a_day() {
        let now = Utc::now();
        let (gate, recorder) = gate(true, Some(now - Duration::hours(1)));
        let fc = forecast(vec![day("2024-06-01", 21.0, 12.0)]);

        assert!(!gate.maybe_notify(&fc, now));
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_gate_closed_when_disabled() {
        let (gate, recorder) = gate(false, None);
        let fc = forecast(vec![day("2024-06-01", 21.0, 12.0)]);

        assert!(!gate.maybe_notify(&fc, Utc::now()));
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_gate_ignores_empty_forecast() {
        let (gate, recorder) = gate(true, None);
        assert!(!gate.maybe_notify(&forecast(Vec::new()), Utc::now()));
        assert!(recorder.sent.lock().is_empty());
    }

    #[test]
    fn test_dispatch_failure_reports_not_notified() {
        let gate = NotificationGate::new(
            Arc::new(FixedState {
                enabled: true,
                last: None,
            }),
            Arc::new(Failing),
        );
        let fc = forecast(vec![day("2024-06-01", 21.0, 12.0)]);
        assert!(!gate.maybe_notify(&fc, Utc::now()));
    }

    #[test]
    fn test_notification_content() {
        let content = NotificationContent::for_day(&day("2024-06-01", 21.4, 12.6), TemperatureUnit::Celsius);
        assert_eq!(content.title, "Sunshine");
        assert_eq!(content.body, "Forecast: Partly Cloudy - High: 21°C Low: 13°C");
    }

    #[test]
    fn test_log_notifier_records_time() {
        let store = Arc::new(SqliteForecastStore::in_memory().unwrap());
        let notifier = LogNotifier::new(store.clone());
        let state = StoredNotificationState::new(true, store.clone());

        assert!(state.last_notified_at().unwrap().is_none());
        notifier
            .notify(&day("2024-06-01", 21.0, 12.0), TemperatureUnit::Celsius, Utc::now())
            .unwrap();
        assert!(state.last_notified_at().unwrap().is_some());

        // A second sync right away stays quiet.
        let gate = NotificationGate::new(Arc::new(state), Arc::new(notifier));
        let fc = forecast(vec![day("2024-06-02", 20.0, 10.0)]);
        assert!(!gate.maybe_notify(&fc, Utc::now()));
    }

    #[test]
    fn test_recorded_time_matches_gate_evaluation() {
        let store = Arc::new(SqliteForecastStore::in_memory().unwrap());
        let gate = NotificationGate::new(
            Arc::new(StoredNotificationState::new(true, store.clone())),
            Arc::new(LogNotifier::new(store.clone())),
        );
        let evaluated_at = DateTime::from_timestamp_millis(1_717_200_000_000).unwrap();

        assert!(gate.maybe_notify(&forecast(vec![day("2024-06-01", 21.0, 12.0)]), evaluated_at));
        assert_eq!(store.last_notified_at().unwrap(), Some(evaluated_at));

        // One day later by the same clock the gate opens again.
        let next = evaluated_at + Duration::hours(24);
        assert!(gate.maybe_notify(&forecast(vec![day("2024-06-02", 20.0, 11.0)]), next));
        assert_eq!(store.last_notified_at().unwrap(), Some(next));
    }
}
