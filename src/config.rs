use std::path::PathBuf;

use chrono::FixedOffset;

/// Application-level constants
pub const APP_NAME: &str = "Pillwise";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Reference timezone offset in hours east of UTC.
///
/// All calendar-day keys and slot time-of-day matches are computed in this
/// fixed offset. Users in other timezones are out of scope.
pub const REFERENCE_UTC_OFFSET_HOURS: i32 = 8;

/// Maximum reminder rounds per dose record. A record that has consumed the
/// full budget is marked missed on its next evaluation.
pub const MAX_REMINDER_ROUNDS: u32 = 3;

/// Minimum gap between consecutive automatic reminders for the same record.
pub const REMINDER_COOLDOWN_MINUTES: i64 = 30;

/// Trigger engine evaluation cadence, in seconds.
pub const TICK_INTERVAL_SECS: u64 = 60;

/// The fixed reference timezone as a chrono offset.
pub fn reference_offset() -> FixedOffset {
    // REFERENCE_UTC_OFFSET_HOURS is a compile-time constant within ±24h,
    // so the conversion cannot fail.
    FixedOffset::east_opt(REFERENCE_UTC_OFFSET_HOURS * 3600)
        .expect("reference offset out of range")
}

/// Get the application data directory
/// ~/Pillwise/ on all platforms (user-visible, per design requirement)
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join(APP_NAME)
}

/// Default on-disk database location.
pub fn database_path() -> PathBuf {
    app_data_dir().join("pillwise.db")
}

/// Default tracing filter when RUST_LOG is not set.
pub fn default_log_filter() -> String {
    "info,pillwise=debug".to_string()
}
