//! Forecast sync for Sunshine.
//!
//! Keeps a local SQLite snapshot of the forecast current and sends at most one
//! weather notification per day.

pub mod error;
pub mod notify;
pub mod refresher;
pub mod store;

pub use error::{NotifyError, StoreError, SyncError};
pub use notify::{
    should_notify, LogNotifier, NotificationContent, NotificationDispatcher, NotificationGate,
    NotificationState, StoredNotificationState,
};
pub use refresher::{SyncReport, WeatherRefresher};
pub use store::{ForecastStore, SqliteForecastStore};
