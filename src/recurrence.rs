//! Expansion of recurring calendar series into discrete occurrences
//!
//! The host calendar store describes a recurring appointment as a single series (a start,
//! a pattern, an end date, and a list of per-occurrence exceptions). Syncing needs discrete
//! occurrences, so this module walks the pattern over a date window and yields one entry per
//! concrete occurrence, or a [tombstone](Expanded::Tombstone) where a single instance was
//! deleted from the series.
//!
//! Period lengths are fixed day counts (monthly = 30 days, yearly = 365 days), matching the
//! host's pattern walk rather than calendar-accurate month/year arithmetic. Exception
//! matching depends on landing on the same computed dates, so these constants must not be
//! "corrected" to real month lengths.

use std::convert::TryFrom;
use std::error::Error;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The supported recurrence patterns, as reported by the host store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl RecurrenceKind {
    /// The fixed step between two occurrences, in days.
    pub fn period_days(self) -> i64 {
        match self {
            RecurrenceKind::Daily => 1,
            RecurrenceKind::Weekly => 7,
            RecurrenceKind::Monthly => 30,
            RecurrenceKind::Yearly => 365,
        }
    }
}

/// The host reported a recurrence type code this crate does not know about.
///
/// This is a configuration problem, not a transient one: the series cannot be expanded at
/// all, so callers should give up on the series (and only on the series) right away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnknownRecurrenceKind(pub i32);

impl Display for UnknownRecurrenceKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "unknown recurrence type code {}", self.0)
    }
}
impl Error for UnknownRecurrenceKind {}

impl TryFrom<i32> for RecurrenceKind {
    type Error = UnknownRecurrenceKind;

    /// Map the host's numeric recurrence type to a pattern kind.
    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(RecurrenceKind::Daily),
            1 => Ok(RecurrenceKind::Weekly),
            2 => Ok(RecurrenceKind::Monthly),
            3 => Ok(RecurrenceKind::Yearly),
            other => Err(UnknownRecurrenceKind(other)),
        }
    }
}

/// One concrete instance of a recurring series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// When this particular instance was last modified in the host store
    pub last_modified: DateTime<Utc>,
}

/// A single instance of a series that deviates from the pattern: either deleted, or
/// replaced by a modified occurrence (moved, renamed...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Exception {
    /// The date the pattern would have put this occurrence on
    pub original_date: NaiveDate,
    pub deleted: bool,
    /// The occurrence that replaces the regular one (`None` when `deleted`)
    pub replacement: Option<Occurrence>,
}

/// A recurring series definition.
///
/// Invariant: `exceptions` is sorted ascending by `original_date`, with at most one
/// exception per date. [`Series::new`] sorts, so callers can pass them in any order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    kind: RecurrenceKind,
    exceptions: Vec<Exception>,
}

impl Series {
    pub fn new(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        kind: RecurrenceKind,
        mut exceptions: Vec<Exception>,
    ) -> Self {
        exceptions.sort_by_key(|e| e.original_date);
        Self { start, end, kind, exceptions }
    }

    pub fn start(&self) -> &DateTime<Utc> { &self.start }
    pub fn end(&self) -> &DateTime<Utc> { &self.end }
    pub fn kind(&self) -> RecurrenceKind { self.kind }
}

/// Resolves the concrete occurrence of a series on a given date.
///
/// This is the host-store side of the expansion: regular (non-exception) occurrences carry
/// their own start/end/last-modified, which only the store knows.
pub trait OccurrenceSource {
    fn occurrence_on(&self, date: NaiveDate) -> Result<Occurrence, OccurrenceLookupError>;
}

/// The host store could not produce an occurrence for a date the pattern computed.
///
/// This happens when the fixed day-count step drifts off the host's own walk (e.g. a
/// monthly series around a 31-day month). It is transient as far as one sync pass is
/// concerned: the occurrence is skipped and the pass continues.
#[derive(Clone, Debug)]
pub struct OccurrenceLookupError {
    pub date: NaiveDate,
    pub reason: String,
}

impl Display for OccurrenceLookupError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "no occurrence on {}: {}", self.date, self.reason)
    }
}
impl Error for OccurrenceLookupError {}

/// One element of an expansion.
#[derive(Clone, Debug, PartialEq)]
pub enum Expanded {
    /// A live occurrence within the window
    Occurrence { index: u32, occurrence: Occurrence },
    /// An occurrence that was deleted from the series. `date` is the start the pattern
    /// computed for it. Tombstones are meant for the deleted-items pass of a sync, not for
    /// the live one.
    Tombstone { index: u32, date: DateTime<Utc> },
}

/// Expand `series` over `[from, to]`, yielding occurrences lazily.
///
/// The window is clamped to the series bounds. When `modified_since` is set, only
/// occurrences modified at or after it are yielded; tombstones are always yielded (a
/// deletion has no modification time of its own).
pub fn expand<'a, L: OccurrenceSource>(
    series: &'a Series,
    lookup: &'a L,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    modified_since: Option<DateTime<Utc>>,
) -> Expansion<'a, L> {
    let from = if from < series.start { series.start } else { from };
    let to = if to > series.end { series.end } else { to };

    let period = series.kind.period_days();

    // First occurrence index at or after the clamped window start
    let days_ahead = (from - series.start).num_days();
    let index = if days_ahead <= 0 { 0 } else { (days_ahead + period - 1) / period };

    // Exceptions before the window can never match a computed date
    let exceptions = series
        .exceptions
        .iter()
        .filter(|e| e.original_date >= from.date_naive())
        .cloned()
        .collect();

    Expansion {
        lookup,
        exceptions,
        period,
        index,
        date: series.start + Duration::days(index * period),
        end_date: to.date_naive(),
        modified_since,
    }
}

/// Iterator over the occurrences of a series within a window. See [`expand`].
pub struct Expansion<'a, L: OccurrenceSource> {
    lookup: &'a L,
    /// Remaining exceptions, sorted ascending; the head is consumed when its date matches
    exceptions: Vec<Exception>,
    period: i64,
    index: i64,
    date: DateTime<Utc>,
    end_date: NaiveDate,
    modified_since: Option<DateTime<Utc>>,
}

impl<'a, L: OccurrenceSource> Iterator for Expansion<'a, L> {
    type Item = Expanded;

    fn next(&mut self) -> Option<Expanded> {
        loop {
            if self.date.date_naive() > self.end_date {
                return None;
            }

            let index = self.index as u32;
            let date = self.date;
            self.index += 1;
            self.date = self.date + Duration::days(self.period);

            let head_matches = self
                .exceptions
                .first()
                .map(|e| e.original_date == date.date_naive())
                .unwrap_or(false);
            let exception = if head_matches { Some(self.exceptions.remove(0)) } else { None };

            let occurrence = match exception {
                Some(e) if e.deleted => {
                    return Some(Expanded::Tombstone { index, date });
                }
                Some(e) => match e.replacement {
                    Some(occurrence) => occurrence,
                    // An exception that is neither deleted nor replaced should not exist;
                    // fall back to the regular occurrence
                    None => match self.lookup.occurrence_on(date.date_naive()) {
                        Ok(occurrence) => occurrence,
                        Err(err) => {
                            log::warn!("{}, skipping this occurrence", err);
                            continue;
                        }
                    },
                },
                None => match self.lookup.occurrence_on(date.date_naive()) {
                    Ok(occurrence) => occurrence,
                    Err(err) => {
                        log::warn!("{}, skipping this occurrence", err);
                        continue;
                    }
                },
            };

            if let Some(since) = self.modified_since {
                if occurrence.last_modified < since {
                    continue;
                }
            }

            return Some(Expanded::Occurrence { index, occurrence });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, HashSet};
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    /// An occurrence source that synthesizes regular occurrences from the series start,
    /// with configurable per-date modification times and lookup failures.
    struct FixedOccurrences {
        base: DateTime<Utc>,
        duration: Duration,
        last_modified: DateTime<Utc>,
        modified_on: HashMap<NaiveDate, DateTime<Utc>>,
        missing: HashSet<NaiveDate>,
    }

    impl FixedOccurrences {
        fn new(base: DateTime<Utc>) -> Self {
            Self {
                base,
                duration: Duration::hours(1),
                last_modified: base,
                modified_on: HashMap::new(),
                missing: HashSet::new(),
            }
        }
    }

    impl OccurrenceSource for FixedOccurrences {
        fn occurrence_on(&self, date: NaiveDate) -> Result<Occurrence, OccurrenceLookupError> {
            if self.missing.contains(&date) {
                return Err(OccurrenceLookupError {
                    date,
                    reason: "not found in the host store".to_string(),
                });
            }
            let start = Utc.from_utc_datetime(&date.and_time(self.base.time()));
            Ok(Occurrence {
                start,
                end: start + self.duration,
                last_modified: *self.modified_on.get(&date).unwrap_or(&self.last_modified),
            })
        }
    }

    fn starts(expanded: &[Expanded]) -> Vec<NaiveDate> {
        expanded
            .iter()
            .map(|e| match e {
                Expanded::Occurrence { occurrence, .. } => occurrence.start.date_naive(),
                Expanded::Tombstone { date, .. } => date.date_naive(),
            })
            .collect()
    }

    #[test]
    fn weekly_series_clamped_window() {
        // Series starts 2024-01-01, weekly, ends 2024-03-01. Window [01-10, 01-25]:
        // the first index at or after the window start is ceil(9/7) = 2, i.e. 01-15.
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 3, 1, 9), RecurrenceKind::Weekly, vec![]);
        let lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));

        let out: Vec<_> = expand(&series, &lookup, dt(2024, 1, 10, 0), dt(2024, 1, 25, 0), None).collect();

        assert_eq!(starts(&out), vec![date(2024, 1, 15), date(2024, 1, 22)]);
        let indices: Vec<u32> = out
            .iter()
            .map(|e| match e {
                Expanded::Occurrence { index, .. } => *index,
                Expanded::Tombstone { index, .. } => *index,
            })
            .collect();
        assert_eq!(indices, vec![2, 3]);
    }

    #[test]
    fn window_is_clamped_to_series_bounds() {
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 1, 10, 9), RecurrenceKind::Daily, vec![]);
        let lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));

        // Window much wider than the series: nothing before the start or after the end
        let out: Vec<_> = expand(&series, &lookup, dt(2023, 12, 1, 0), dt(2024, 2, 1, 0), None).collect();

        assert_eq!(out.len(), 10);
        assert_eq!(starts(&out).first(), Some(&date(2024, 1, 1)));
        assert_eq!(starts(&out).last(), Some(&date(2024, 1, 10)));
    }

    #[test]
    fn occurrences_step_by_exactly_one_period_without_duplicates() {
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 12, 31, 9), RecurrenceKind::Monthly, vec![]);
        let lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));

        let out: Vec<_> = expand(&series, &lookup, dt(2024, 1, 1, 0), dt(2024, 12, 31, 0), None).collect();

        let dates = starts(&out);
        for pair in dates.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::days(30));
        }
        let mut seen = HashSet::new();
        for e in &out {
            let index = match e {
                Expanded::Occurrence { index, .. } => *index,
                Expanded::Tombstone { index, .. } => *index,
            };
            assert!(seen.insert(index), "duplicate occurrence index {}", index);
        }
    }

    #[test]
    fn deleted_exception_yields_one_tombstone_and_no_occurrence() {
        let exceptions = vec![Exception {
            original_date: date(2024, 1, 8),
            deleted: true,
            replacement: None,
        }];
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 1, 31, 9), RecurrenceKind::Weekly, exceptions);
        let lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));

        let out: Vec<_> = expand(&series, &lookup, dt(2024, 1, 1, 0), dt(2024, 1, 31, 0), None).collect();

        let tombstones: Vec<_> = out
            .iter()
            .filter(|e| matches!(e, Expanded::Tombstone { .. }))
            .collect();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(
            tombstones[0],
            &Expanded::Tombstone { index: 1, date: dt(2024, 1, 8, 9) }
        );
        // No live occurrence on the deleted date
        let live: Vec<_> = out
            .iter()
            .filter_map(|e| match e {
                Expanded::Occurrence { occurrence, .. } => Some(occurrence.start.date_naive()),
                _ => None,
            })
            .collect();
        assert_eq!(live, vec![date(2024, 1, 1), date(2024, 1, 15), date(2024, 1, 22), date(2024, 1, 29)]);
    }

    #[test]
    fn replaced_exception_uses_the_replacement_occurrence() {
        // The occurrence of 01-08 was moved to 14:00 the next day
        let moved = Occurrence {
            start: dt(2024, 1, 9, 14),
            end: dt(2024, 1, 9, 15),
            last_modified: dt(2024, 1, 5, 0),
        };
        let exceptions = vec![Exception {
            original_date: date(2024, 1, 8),
            deleted: false,
            replacement: Some(moved.clone()),
        }];
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 1, 15, 9), RecurrenceKind::Weekly, exceptions);
        let lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));

        let out: Vec<_> = expand(&series, &lookup, dt(2024, 1, 1, 0), dt(2024, 1, 15, 0), None).collect();

        assert_eq!(
            out[1],
            Expanded::Occurrence { index: 1, occurrence: moved }
        );
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn modified_since_filters_live_occurrences_only() {
        let mut lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));
        lookup.last_modified = dt(2024, 1, 1, 0);
        // Only the occurrence of 01-03 has been touched recently
        lookup.modified_on.insert(date(2024, 1, 3), dt(2024, 2, 1, 0));

        let exceptions = vec![Exception {
            original_date: date(2024, 1, 4),
            deleted: true,
            replacement: None,
        }];
        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 1, 5, 9), RecurrenceKind::Daily, exceptions);

        let out: Vec<_> =
            expand(&series, &lookup, dt(2024, 1, 1, 0), dt(2024, 1, 5, 0), Some(dt(2024, 1, 15, 0))).collect();

        // The stale occurrences are dropped, the tombstone is kept
        assert_eq!(
            out,
            vec![
                Expanded::Occurrence {
                    index: 2,
                    occurrence: lookup.occurrence_on(date(2024, 1, 3)).unwrap()
                },
                Expanded::Tombstone { index: 3, date: dt(2024, 1, 4, 9) },
            ]
        );
    }

    #[test]
    fn failed_lookup_skips_the_occurrence_and_continues() {
        let mut lookup = FixedOccurrences::new(dt(2024, 1, 1, 9));
        lookup.missing.insert(date(2024, 1, 2));

        let series = Series::new(dt(2024, 1, 1, 9), dt(2024, 1, 3, 9), RecurrenceKind::Daily, vec![]);

        let out: Vec<_> = expand(&series, &lookup, dt(2024, 1, 1, 0), dt(2024, 1, 3, 0), None).collect();

        assert_eq!(starts(&out), vec![date(2024, 1, 1), date(2024, 1, 3)]);
    }

    #[test]
    fn unknown_recurrence_code_is_an_error() {
        assert_eq!(RecurrenceKind::try_from(1), Ok(RecurrenceKind::Weekly));
        assert_eq!(RecurrenceKind::try_from(12), Err(UnknownRecurrenceKind(12)));
    }
}
