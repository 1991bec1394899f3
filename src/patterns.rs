//! Pattern definitions and their deterministic generators.
//!
//! A definition is one parameterization of a pattern family:
//!
//! - **intraday**: a start/end hour window inside each trading day
//! - **monthly**: a day-of-month window repeated every month
//! - **annual**: a month/day to month/day window repeated every year
//!
//! The generators are side-effect free and enumerate the same candidate
//! grid on every call, so the batch job space is reproducible.

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

// ============================================================
// FAMILIES
// ============================================================

/// Structural shape of the recurring time window under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternFamily {
    Intraday,
    Monthly,
    Annual,
}

impl PatternFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternFamily::Intraday => "intraday",
            PatternFamily::Monthly => "monthly",
            PatternFamily::Annual => "annual",
        }
    }
}

impl std::fmt::Display for PatternFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// DEFINITIONS
// ============================================================

/// One parameterization of a pattern family.
///
/// Serializes untagged to a flat parameter object (the family travels
/// separately), e.g. `{"start_hour":9,"end_hour":17}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternDefinition {
    /// Buy at `start_hour:00`, sell at `end_hour:00` within each day.
    /// `end_hour == 24` means "through end of day" (23:59:59).
    Intraday { start_hour: u32, end_hour: u32 },
    /// Buy on `start_day` of each month, hold `window_days` calendar days.
    Monthly { start_day: u32, window_days: u32 },
    /// Buy on `start_month/start_day`, sell on `end_month/end_day` of the
    /// same year.
    Annual {
        start_month: u32,
        start_day: u32,
        end_month: u32,
        end_day: u32,
    },
}

/// Reference year for annual day-count purposes. A leap year, so Feb 29
/// windows are generated and skipped per-year at extraction time.
const REFERENCE_YEAR: i32 = 2000;

impl PatternDefinition {
    pub fn family(&self) -> PatternFamily {
        match self {
            PatternDefinition::Intraday { .. } => PatternFamily::Intraday,
            PatternDefinition::Monthly { .. } => PatternFamily::Monthly,
            PatternDefinition::Annual { .. } => PatternFamily::Annual,
        }
    }

    /// Family-specific parameter validity. Invalid definitions extract to
    /// an empty trade list; they are not an error.
    pub fn is_valid(&self) -> bool {
        match *self {
            PatternDefinition::Intraday {
                start_hour,
                end_hour,
            } => start_hour <= 23 && (1..=24).contains(&end_hour) && end_hour >= start_hour,
            PatternDefinition::Monthly {
                start_day,
                window_days,
            } => (1..=31).contains(&start_day) && window_days >= 1,
            PatternDefinition::Annual {
                start_month,
                start_day,
                end_month,
                end_day,
            } => {
                NaiveDate::from_ymd_opt(REFERENCE_YEAR, start_month, start_day).is_some()
                    && NaiveDate::from_ymd_opt(REFERENCE_YEAR, end_month, end_day).is_some()
            }
        }
    }

    /// Flat JSON parameter object, the persisted `params` payload.
    pub fn params_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("definition serializes to a map")
    }
}

// ============================================================
// GENERATORS
// ============================================================

/// Lookback horizons applied as the third axis of the job space.
pub const DEFAULT_LOOKBACK_YEARS: [u32; 4] = [5, 10, 15, 20];

/// All intraday windows of 1..=6 hours over the full trading day.
pub fn intraday_definitions() -> Vec<PatternDefinition> {
    intraday_definitions_spanning(0, 24)
}

/// Intraday windows of 1..=6 hours constrained to `[min_hour, max_hour]`
/// (inclusive end bound; `max_hour` may be 24).
pub fn intraday_definitions_spanning(min_hour: u32, max_hour: u32) -> Vec<PatternDefinition> {
    let mut defs = Vec::new();
    for duration in 1..=6u32 {
        if max_hour < min_hour + duration {
            continue;
        }
        for start_hour in min_hour..=(max_hour - duration) {
            defs.push(PatternDefinition::Intraday {
                start_hour,
                end_hour: start_hour + duration,
            });
        }
    }
    defs
}

/// Day-of-month windows: start day 1..=28, lengths 3/7/15, coarsely
/// filtered so the window can fit in a 31-day month. Per-month validity
/// is re-checked at extraction against each month's actual day count.
pub fn monthly_definitions() -> Vec<PatternDefinition> {
    let mut defs = Vec::new();
    for start_day in 1..=28u32 {
        for window_days in [3, 7, 15] {
            if start_day + window_days - 1 <= 31 {
                defs.push(PatternDefinition::Monthly {
                    start_day,
                    window_days,
                });
            }
        }
    }
    defs
}

/// Annual windows: every (month, day) start in the reference year, held
/// for 1..=26 whole weeks, kept only when the end date stays inside the
/// reference year.
pub fn annual_definitions() -> Vec<PatternDefinition> {
    let mut defs = Vec::new();
    for month in 1..=12u32 {
        for day in 1..=days_in_month(REFERENCE_YEAR, month) {
            let start = NaiveDate::from_ymd_opt(REFERENCE_YEAR, month, day)
                .expect("day bounded by days_in_month");
            for weeks in 1..=26u64 {
                let Some(end) = start.checked_add_days(Days::new(weeks * 7)) else {
                    continue;
                };
                if end.year() == REFERENCE_YEAR {
                    defs.push(PatternDefinition::Annual {
                        start_month: month,
                        start_day: day,
                        end_month: end.month(),
                        end_day: end.day(),
                    });
                }
            }
        }
    }
    defs
}

/// Number of days in (year, month).
pub(crate) fn days_in_month(year: i32, month: u32) -> u32 {
    (28..=31u32)
        .rev()
        .find(|&d| NaiveDate::from_ymd_opt(year, month, d).is_some())
        .expect("every month has at least 28 days")
}

// ============================================================
// TESTS
// ============================================================
