//! Settings consumed by the sync workers
//!
//! This crate does not load configuration files itself; the host application deserializes
//! whatever it keeps on disk (the reference setup is a TOML file) into [`SyncSettings`] and
//! hands it over.

use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Deserialize;

fn default_interval_minutes() -> u64 { 1 }
fn default_window_days() -> i64 { 14 }

/// Per-activity sync tuning.
#[derive(Clone, Debug, Deserialize)]
pub struct SyncSettings {
    /// Glob patterns of subjects to leave alone entirely (no create, update or delete)
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Minutes between two scheduled passes
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,

    /// How far ahead of today a calendar pass looks
    #[serde(default = "default_window_days")]
    pub window_days: i64,

    /// The zone checkpoints are stamped in, and the zone the sink displays dates in
    pub timezone: Tz,
}

impl SyncSettings {
    pub fn new(timezone: Tz) -> Self {
        Self {
            ignore: Vec::new(),
            interval_minutes: default_interval_minutes(),
            window_days: default_window_days(),
            timezone,
        }
    }

    /// Whether `subject` matches one of the configured ignore patterns.
    ///
    /// Invalid patterns are reported once per call and never match (a typo in the config
    /// must not silently ignore every event).
    pub fn is_ignored(&self, subject: &str) -> bool {
        self.ignore.iter().any(|pattern| match glob::Pattern::new(pattern) {
            Ok(pattern) => pattern.matches(subject),
            Err(err) => {
                log::warn!("Invalid ignore pattern {:?}: {}", pattern, err);
                false
            }
        })
    }

    /// The calendar window of one pass: today at midnight in the configured zone, through
    /// `window_days` later.
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let today = Utc::now().with_timezone(&self.timezone).date_naive();
        let midnight = today.and_hms_opt(0, 0, 0).unwrap(/* midnight is always a valid time */);
        let from = match self.timezone.from_local_datetime(&midnight).earliest() {
            Some(t) => t.with_timezone(&Utc),
            // Midnight skipped by a DST transition; fall back to reading it as UTC
            None => Utc.from_utc_datetime(&midnight),
        };
        (from, from + Duration::days(self.window_days))
    }

    /// The current wall-clock time in the configured zone (what checkpoints are stamped with).
    pub fn now_in_zone(&self) -> DateTime<FixedOffset> {
        let now = Utc::now().with_timezone(&self.timezone);
        let offset = now.offset().fix();
        now.with_timezone(&offset)
    }
}
