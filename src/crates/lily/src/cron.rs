//! Five-field cron expressions.
//!
//! Expressions are parsed once at trigger insertion (malformed input is
//! rejected there) and matched against wall-clock minutes computed in the
//! trigger's IANA timezone, not the host's. Supported field syntax: `*`,
//! integers, comma lists, hyphen ranges, and `*/N` intervals. Day-of-week
//! accepts 0-7 with both 0 and 7 meaning Sunday.

use crate::error::{LilyError, Result};
use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;
use std::str::FromStr;

/// One parsed cron field: the set of permitted values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    values: BTreeSet<u32>,
}

impl CronField {
    fn parse(field: &str, min: u32, max: u32) -> Result<Self> {
        let mut values = BTreeSet::new();

        for part in field.split(',') {
            if part.is_empty() {
                return Err(LilyError::Cron(format!("empty list item in '{}'", field)));
            }
            if part == "*" {
                values.extend(min..=max);
            } else if let Some(step) = part.strip_prefix("*/") {
                let step: u32 = step
                    .parse()
                    .map_err(|_| LilyError::Cron(format!("bad interval '{}'", part)))?;
                if step == 0 {
                    return Err(LilyError::Cron("interval step of zero".to_string()));
                }
                values.extend((min..=max).filter(|v| (v - min) % step == 0));
            } else if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo
                    .parse()
                    .map_err(|_| LilyError::Cron(format!("bad range '{}'", part)))?;
                let hi: u32 = hi
                    .parse()
                    .map_err(|_| LilyError::Cron(format!("bad range '{}'", part)))?;
                if lo > hi || lo < min || hi > max {
                    return Err(LilyError::Cron(format!(
                        "range '{}' outside {}-{}",
                        part, min, max
                    )));
                }
                values.extend(lo..=hi);
            } else {
                let v: u32 = part
                    .parse()
                    .map_err(|_| LilyError::Cron(format!("bad value '{}'", part)))?;
                if v < min || v > max {
                    return Err(LilyError::Cron(format!(
                        "value {} outside {}-{}",
                        v, min, max
                    )));
                }
                values.insert(v);
            }
        }

        Ok(Self { values })
    }

    fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }
}

/// A parsed five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week.
#[derive(Debug, Clone)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    day_of_month: CronField,
    month: CronField,
    day_of_week: CronField,
}

impl CronExpr {
    /// Parse an expression, rejecting anything that is not exactly five
    /// whitespace-separated fields of supported syntax.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(LilyError::Cron(format!(
                "expected 5 fields, got {} in '{}'",
                fields.len(),
                expr
            )));
        }

        let day_of_week = {
            // Accept 0-7; fold 7 onto 0 (both Sunday).
            let mut field = CronField::parse(fields[4], 0, 7)?;
            if field.values.remove(&7) {
                field.values.insert(0);
            }
            field
        };

        Ok(Self {
            minute: CronField::parse(fields[0], 0, 59)?,
            hour: CronField::parse(fields[1], 0, 23)?,
            day_of_month: CronField::parse(fields[2], 1, 31)?,
            month: CronField::parse(fields[3], 1, 12)?,
            day_of_week,
        })
    }

    /// Whether the expression covers the wall-clock minute of `now` in `tz`.
    pub fn matches(&self, now: DateTime<Utc>, tz: Tz) -> bool {
        let local = now.with_timezone(&tz);
        self.minute.contains(local.minute())
            && self.hour.contains(local.hour())
            && self.day_of_month.contains(local.day())
            && self.month.contains(local.month())
            && self
                .day_of_week
                .contains(local.weekday().num_days_from_sunday())
    }

    /// Next covered minute at or after `from`, scanning at most 366 days.
    pub fn next_fire(&self, from: DateTime<Utc>, tz: Tz) -> Option<DateTime<Utc>> {
        // Round up to a whole minute.
        let mut probe = if from.second() == 0 {
            from
        } else {
            from + Duration::seconds(60 - i64::from(from.second()))
        };
        let limit = from + Duration::days(366);
        while probe <= limit {
            if self.matches(probe, tz) {
                return Some(probe);
            }
            probe += Duration::minutes(1);
        }
        None
    }
}

/// Parse an IANA timezone name, defaulting empty input to UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.is_empty() {
        return Ok(Tz::UTC);
    }
    Tz::from_str(name).map_err(|_| LilyError::Cron(format!("unknown timezone '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_daily_expression() {
        let expr = CronExpr::parse("0 5 * * *").unwrap();
        assert!(expr.matches(at(2026, 3, 10, 5, 0), Tz::UTC));
        assert!(!expr.matches(at(2026, 3, 10, 5, 1), Tz::UTC));
        assert!(!expr.matches(at(2026, 3, 10, 6, 0), Tz::UTC));
    }

    #[test]
    fn test_interval_expression() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        for minute in [0, 15, 30, 45] {
            assert!(expr.matches(at(2026, 3, 10, 9, minute), Tz::UTC));
        }
        for minute in [1, 7, 14, 16, 44, 59] {
            assert!(!expr.matches(at(2026, 3, 10, 9, minute), Tz::UTC));
        }
    }

    #[test]
    fn test_weekday_range() {
        let expr = CronExpr::parse("0 9 * * 1-5").unwrap();
        // 2026-03-09 is a Monday, 2026-03-14 a Saturday.
        assert!(expr.matches(at(2026, 3, 9, 9, 0), Tz::UTC));
        assert!(expr.matches(at(2026, 3, 13, 9, 0), Tz::UTC));
        assert!(!expr.matches(at(2026, 3, 14, 9, 0), Tz::UTC));
        assert!(!expr.matches(at(2026, 3, 15, 9, 0), Tz::UTC));
    }

    #[test]
    fn test_sunday_aliases() {
        let with_zero = CronExpr::parse("0 0 * * 0").unwrap();
        let with_seven = CronExpr::parse("0 0 * * 7").unwrap();
        // 2026-03-15 is a Sunday.
        assert!(with_zero.matches(at(2026, 3, 15, 0, 0), Tz::UTC));
        assert!(with_seven.matches(at(2026, 3, 15, 0, 0), Tz::UTC));
    }

    #[test]
    fn test_comma_lists() {
        let expr = CronExpr::parse("0,30 8,18 * * *").unwrap();
        assert!(expr.matches(at(2026, 3, 10, 8, 30), Tz::UTC));
        assert!(expr.matches(at(2026, 3, 10, 18, 0), Tz::UTC));
        assert!(!expr.matches(at(2026, 3, 10, 12, 0), Tz::UTC));
    }

    #[test]
    fn test_timezone_is_respected() {
        let expr = CronExpr::parse("0 5 * * *").unwrap();
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        // 05:00 in Tokyo is 20:00 UTC the previous day.
        assert!(expr.matches(at(2026, 3, 9, 20, 0), tokyo));
        assert!(!expr.matches(at(2026, 3, 10, 5, 0), tokyo));
    }

    #[test]
    fn test_malformed_expressions_are_rejected() {
        for bad in [
            "",
            "* * * *",
            "* * * * * *",
            "60 * * * *",
            "* 24 * * *",
            "*/0 * * * *",
            "a * * * *",
            "5-1 * * * *",
        ] {
            assert!(CronExpr::parse(bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_next_fire_scans_forward() {
        let expr = CronExpr::parse("0 5 * * *").unwrap();
        let next = expr
            .next_fire(at(2026, 3, 10, 6, 0), Tz::UTC)
            .unwrap();
        assert_eq!(next, at(2026, 3, 11, 5, 0));
    }

    #[test]
    fn test_parse_timezone() {
        assert_eq!(parse_timezone("").unwrap(), Tz::UTC);
        assert!(parse_timezone("America/New_York").is_ok());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }
}
