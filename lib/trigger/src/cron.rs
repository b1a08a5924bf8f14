//! Quartz-style cron expressions.
//!
//! Expressions have six or seven whitespace-separated fields:
//!
//! ```text
//! seconds minutes hours day-of-month month day-of-week [year]
//! ```
//!
//! Every field accepts `*`, single values, ranges (`a-b`), steps (`a/b`,
//! `a-b/c`, `*/b`) and comma lists. Months and days of week also accept
//! symbolic names (`JAN`, `MON`); days of week run Sunday=1 through
//! Saturday=7. Exactly one of day-of-month and day-of-week must be `?`,
//! since a date cannot be constrained by both at once.
//!
//! Evaluation is in UTC. The search for the next firing time is bounded;
//! an expression that never fires within roughly five years is reported
//! as unsatisfiable instead of looping forever.

use chrono::{DateTime, Datelike, Duration, NaiveDate, SubsecRound, Timelike, Utc};
use std::collections::BTreeSet;

use crate::error::ConfigurationError;

const MONTH_NAMES: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const DAY_OF_WEEK_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

const MIN_YEAR: u32 = 1970;
const MAX_YEAR: u32 = 2099;

/// Bound on the forward search, in days.
const SEARCH_HORIZON_DAYS: i64 = 1830;

/// The set of permitted values for one time field, as a bitmask.
///
/// All time fields fit in a `u64`; years are handled separately.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldSet {
    mask: u64,
    max: u32,
}

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value <= self.max && self.mask & (1 << value) != 0
    }

    /// Smallest permitted value `>= from`, if any.
    fn next_at_or_after(&self, from: u32) -> Option<u32> {
        (from..=self.max).find(|value| self.contains(*value))
    }
}

/// Which calendar-day constraint the expression uses. Parsing resolves
/// the `?` exclusivity rule into a single selector.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DaySelector {
    ByMonthDay(FieldSet),
    ByWeekday(FieldSet),
}

/// The optional seventh field.
#[derive(Debug, Clone, PartialEq, Eq)]
enum YearField {
    Any,
    Only(BTreeSet<i32>),
}

impl YearField {
    fn contains(&self, year: i32) -> bool {
        match self {
            Self::Any => true,
            Self::Only(years) => years.contains(&year),
        }
    }
}

/// A parsed cron expression, ready for evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    expression: String,
    seconds: FieldSet,
    minutes: FieldSet,
    hours: FieldSet,
    day: DaySelector,
    month: FieldSet,
    year: YearField,
}

impl CronExpression {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidCron`] describing the first
    /// offending field.
    pub fn parse(expression: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if !(6..=7).contains(&fields.len()) {
            return Err(invalid(format!(
                "expected 6 or 7 fields, got {}",
                fields.len()
            )));
        }

        let seconds = parse_field(fields[0], 0, 59, &[]).map_err(&invalid)?;
        let minutes = parse_field(fields[1], 0, 59, &[]).map_err(&invalid)?;
        let hours = parse_field(fields[2], 0, 23, &[]).map_err(&invalid)?;
        let month = parse_field(fields[4], 1, 12, &MONTH_NAMES).map_err(&invalid)?;

        let day = match (fields[3] == "?", fields[5] == "?") {
            (true, true) => {
                return Err(invalid(
                    "day-of-month and day-of-week cannot both be '?'".to_string(),
                ));
            }
            (false, false) => {
                return Err(invalid(
                    "exactly one of day-of-month and day-of-week must be '?'".to_string(),
                ));
            }
            (false, true) => {
                DaySelector::ByMonthDay(parse_field(fields[3], 1, 31, &[]).map_err(&invalid)?)
            }
            (true, false) => DaySelector::ByWeekday(
                parse_field(fields[5], 1, 7, &DAY_OF_WEEK_NAMES).map_err(&invalid)?,
            ),
        };

        let year = match fields.get(6) {
            None => YearField::Any,
            Some(&"*") => YearField::Any,
            Some(spec) => parse_year_field(spec).map_err(&invalid)?,
        };

        Ok(Self {
            expression: expression.to_string(),
            seconds,
            minutes,
            hours,
            day,
            month,
            year,
        })
    }

    /// The next firing time strictly after `from`, in UTC.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnsatisfiableCron`] when no firing
    /// time exists within the search horizon.
    pub fn next_after(&self, from: DateTime<Utc>) -> Result<DateTime<Utc>, ConfigurationError> {
        let unsatisfiable = || ConfigurationError::UnsatisfiableCron {
            expression: self.expression.clone(),
        };

        // Strictly after: start at the next whole second.
        let start = from.trunc_subsecs(0) + Duration::seconds(1);
        let horizon = start.date_naive() + Duration::days(SEARCH_HORIZON_DAYS);

        let mut date = start.date_naive();
        let mut hour = start.hour();
        let mut minute = start.minute();
        let mut second = start.second();

        loop {
            if date > horizon {
                return Err(unsatisfiable());
            }

            if !self.year.contains(date.year()) {
                date = NaiveDate::from_ymd_opt(date.year() + 1, 1, 1).ok_or_else(unsatisfiable)?;
                (hour, minute, second) = (0, 0, 0);
                continue;
            }
            if !self.month.contains(date.month()) {
                date = first_of_next_month(date).ok_or_else(unsatisfiable)?;
                (hour, minute, second) = (0, 0, 0);
                continue;
            }
            if !self.day_matches(date) {
                date = date.succ_opt().ok_or_else(unsatisfiable)?;
                (hour, minute, second) = (0, 0, 0);
                continue;
            }

            let Some(next_hour) = self.hours.next_at_or_after(hour) else {
                date = date.succ_opt().ok_or_else(unsatisfiable)?;
                (hour, minute, second) = (0, 0, 0);
                continue;
            };
            if next_hour != hour {
                hour = next_hour;
                minute = 0;
                second = 0;
            }

            let Some(next_minute) = self.minutes.next_at_or_after(minute) else {
                hour += 1;
                minute = 0;
                second = 0;
                continue;
            };
            if next_minute != minute {
                minute = next_minute;
                second = 0;
            }

            let Some(next_second) = self.seconds.next_at_or_after(second) else {
                minute += 1;
                second = 0;
                continue;
            };

            let result = date
                .and_hms_opt(hour, minute, next_second)
                .ok_or_else(unsatisfiable)?;
            return Ok(result.and_utc());
        }
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        match &self.day {
            DaySelector::ByMonthDay(days) => days.contains(date.day()),
            DaySelector::ByWeekday(days) => {
                days.contains(date.weekday().num_days_from_sunday() + 1)
            }
        }
    }
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

fn parse_field(spec: &str, min: u32, max: u32, names: &[&str]) -> Result<FieldSet, String> {
    let mut mask = 0u64;
    for part in spec.split(',') {
        for value in parse_part(part, min, max, names)? {
            mask |= 1 << value;
        }
    }
    Ok(FieldSet { mask, max })
}

fn parse_year_field(spec: &str) -> Result<YearField, String> {
    let mut years = BTreeSet::new();
    for part in spec.split(',') {
        for value in parse_part(part, MIN_YEAR, MAX_YEAR, &[])? {
            years.insert(value as i32);
        }
    }
    Ok(YearField::Only(years))
}

/// One comma-separated part: `*`, `a`, `a-b`, optionally with `/step`.
fn parse_part(part: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>, String> {
    let (range_spec, step) = match part.split_once('/') {
        Some((range_spec, step_spec)) => {
            let step: u32 = step_spec
                .parse()
                .map_err(|_| format!("invalid step '{step_spec}'"))?;
            if step == 0 {
                return Err("step must be positive".to_string());
            }
            (range_spec, step)
        }
        None => (part, 1),
    };

    let (start, end) = if range_spec == "*" {
        (min, max)
    } else if let Some((low, high)) = range_spec.split_once('-') {
        (
            parse_value(low, min, max, names)?,
            parse_value(high, min, max, names)?,
        )
    } else {
        let value = parse_value(range_spec, min, max, names)?;
        // "a/b" runs from a to the field maximum.
        if part.contains('/') { (value, max) } else { (value, value) }
    };

    if start > end {
        return Err(format!("range start {start} after end {end}"));
    }
    Ok((start..=end).step_by(step as usize).collect())
}

fn parse_value(token: &str, min: u32, max: u32, names: &[&str]) -> Result<u32, String> {
    if token.is_empty() {
        return Err("empty value".to_string());
    }

    let value = if let Ok(numeric) = token.parse::<u32>() {
        numeric
    } else {
        let upper = token.to_ascii_uppercase();
        let index = names
            .iter()
            .position(|name| *name == upper)
            .ok_or_else(|| format!("unrecognized value '{token}'"))?;
        min + index as u32
    };

    if value < min || value > max {
        return Err(format!("value {value} out of range {min}-{max}"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn next(expression: &str, from: DateTime<Utc>) -> DateTime<Utc> {
        CronExpression::parse(expression)
            .expect("parses")
            .next_after(from)
            .expect("fires")
    }

    #[test]
    fn every_second_of_minute_zero() {
        let from = utc(2023, 1, 21, 12, 35, 0);
        assert_eq!(next("0/1 0 * ? * * *", from), utc(2023, 1, 21, 13, 0, 0));
    }

    #[test]
    fn top_of_every_minute() {
        let from = utc(2023, 1, 21, 12, 35, 0);
        assert_eq!(next("0 * * ? * *", from), utc(2023, 1, 21, 12, 36, 0));
    }

    #[test]
    fn one_am_every_day() {
        let from = utc(2023, 7, 13, 22, 35, 0);
        assert_eq!(next("0 0 1 1/1 * ? *", from), utc(2023, 7, 14, 1, 0, 0));
    }

    #[test]
    fn result_is_strictly_after_an_exact_match() {
        let from = utc(2023, 1, 21, 12, 0, 0);
        assert_eq!(next("0 0 12 ? * *", from), utc(2023, 1, 22, 12, 0, 0));
    }

    #[test]
    fn subsecond_from_rounds_up_to_next_whole_second() {
        let from = utc(2023, 1, 21, 12, 35, 0) + Duration::milliseconds(500);
        assert_eq!(next("* * * ? * *", from), utc(2023, 1, 21, 12, 35, 1));
    }

    #[test]
    fn weekday_names_and_ranges() {
        // 2023-01-21 is a Saturday.
        let from = utc(2023, 1, 21, 10, 0, 0);
        assert_eq!(next("0 0 9 ? * MON-FRI", from), utc(2023, 1, 23, 9, 0, 0));
    }

    #[test]
    fn month_names() {
        let from = utc(2023, 1, 21, 10, 0, 0);
        assert_eq!(next("0 0 0 1 MAR ?", from), utc(2023, 3, 1, 0, 0, 0));
    }

    #[test]
    fn year_field_constrains_firing() {
        let from = utc(2023, 6, 1, 0, 0, 0);
        assert_eq!(next("0 0 0 1 1 ? 2026", from), utc(2026, 1, 1, 0, 0, 0));
    }

    #[test]
    fn comma_lists_and_steps() {
        let from = utc(2023, 1, 21, 12, 10, 0);
        assert_eq!(next("0 0,15,30,45 * ? * *", from), utc(2023, 1, 21, 12, 15, 0));
        assert_eq!(next("0 */20 * ? * *", from), utc(2023, 1, 21, 12, 20, 0));
        assert_eq!(next("0 */30 * ? * *", from), utc(2023, 1, 21, 12, 30, 0));
    }

    #[test]
    fn month_boundary_carry() {
        let from = utc(2023, 1, 31, 23, 59, 59);
        assert_eq!(next("0 0 0 1 * ?", from), utc(2023, 2, 1, 0, 0, 0));
    }

    #[test]
    fn february_31st_is_unsatisfiable() {
        let expression = CronExpression::parse("0 0 0 31 2 ?").expect("parses");
        let result = expression.next_after(utc(2023, 1, 1, 0, 0, 0));
        assert!(matches!(
            result,
            Err(ConfigurationError::UnsatisfiableCron { .. })
        ));
    }

    #[test]
    fn both_day_fields_unspecified_rejected() {
        let result = CronExpression::parse("0 0 0 ? * ?");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn neither_day_field_unspecified_rejected() {
        let result = CronExpression::parse("0 0 0 * * *");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn wrong_field_count_rejected() {
        for expression in ["* * *", "", "0 0 0 ? * * 2026 extra"] {
            assert!(
                matches!(
                    CronExpression::parse(expression),
                    Err(ConfigurationError::InvalidCron { .. })
                ),
                "{expression:?} should be rejected"
            );
        }
    }

    #[test]
    fn out_of_range_values_rejected() {
        for expression in ["60 0 0 ? * *", "0 0 24 ? * *", "0 0 0 32 * ?", "0 0 0 ? 13 *"] {
            assert!(
                matches!(
                    CronExpression::parse(expression),
                    Err(ConfigurationError::InvalidCron { .. })
                ),
                "{expression:?} should be rejected"
            );
        }
    }

    #[test]
    fn zero_step_rejected() {
        let result = CronExpression::parse("0/0 * * ? * *");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidCron { .. })
        ));
    }

    #[test]
    fn consecutive_firings_advance() {
        let expression = CronExpression::parse("30 0 * ? * *").expect("parses");
        let first = expression
            .next_after(utc(2023, 5, 1, 7, 59, 0))
            .expect("fires");
        assert_eq!(first, utc(2023, 5, 1, 8, 0, 30));
        let second = expression.next_after(first).expect("fires");
        assert_eq!(second, utc(2023, 5, 1, 9, 0, 30));
    }
}
