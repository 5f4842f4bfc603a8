//! Recurrence calculator for standard 5-field cron expressions.
//!
//! Fields are `minute hour day-of-month month day-of-week`. Each field accepts
//! `*`, single values, `a-b` ranges, `/n` steps and comma lists. Months and
//! weekdays also accept three-letter names (`jan`, `mon`). Weekday `0` and `7`
//! both mean Sunday. When day-of-month and day-of-week are both restricted a
//! day matches if *either* matches (classic cron behaviour).
//!
//! Matching is done by the `cron` crate over a seconds-prefixed 6-field form.
//! Weekdays are rewritten to names because the crate numbers them 1-7 from
//! Sunday, and OR-ed day fields become two schedules whose earliest hit wins.
//!
//! Expressions are evaluated against wall-clock time in an IANA timezone:
//! local times that fall into a DST spring-forward gap are skipped, and a
//! repeated fall-back time resolves to its earliest instant.

use std::str::FromStr;

use chrono::{DateTime, Datelike, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

use crate::error::{Result, SchedulerError};

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Longest gap between two matches of a satisfiable expression (Feb 29
/// across a skipped leap year, e.g. 2096 → 2104).
const SEARCH_HORIZON_YEARS: i32 = 8;

struct FieldDef {
    name: &'static str,
    min: u32,
    max: u32,
}

const FIELDS: [FieldDef; 5] = [
    FieldDef { name: "minute", min: 0, max: 59 },
    FieldDef { name: "hour", min: 0, max: 23 },
    FieldDef { name: "day-of-month", min: 1, max: 31 },
    FieldDef { name: "month", min: 1, max: 12 },
    FieldDef { name: "day-of-week", min: 0, max: 7 },
];

/// A parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    /// One schedule, or two when both day fields are restricted.
    schedules: Vec<Schedule>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(SchedulerError::invalid_expression(
                expression,
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }
        for (text, def) in fields.iter().zip(FIELDS.iter()) {
            check_field(expression, text, def)?;
        }

        let (minute, hour, dom, month) = (fields[0], fields[1], fields[2], fields[3]);
        let month = month.to_ascii_uppercase();
        let dow = weekdays_as_names(expression, fields[4])?;

        let sources = if !dom.starts_with('*') && !fields[4].starts_with('*') {
            vec![
                format!("0 {minute} {hour} {dom} {month} *"),
                format!("0 {minute} {hour} * {month} {dow}"),
            ]
        } else {
            vec![format!("0 {minute} {hour} {dom} {month} {dow}")]
        };

        let schedules = sources
            .iter()
            .map(|src| {
                Schedule::from_str(src)
                    .map_err(|e| SchedulerError::invalid_expression(expression, e.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            expression: expression.to_string(),
            schedules,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire instant strictly after `from`, evaluated in `tz`.
    ///
    /// Returns `None` when nothing matches within the search horizon
    /// (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, tz: &Tz, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        // candidates are walked as naive wall-clock times, then mapped into tz
        let local = from.with_timezone(tz).naive_local();
        let start = Utc.from_utc_datetime(&local);
        let last_year = local.year() + SEARCH_HORIZON_YEARS;

        self.schedules
            .iter()
            .filter_map(|schedule| {
                schedule
                    .after(&start)
                    .take_while(|candidate| candidate.year() <= last_year)
                    .find_map(|candidate| resolve_local(tz, &candidate.naive_utc(), from))
            })
            .min()
    }
}

/// Parse an IANA timezone name. An empty name means UTC.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    if name.trim().is_empty() {
        return Ok(Tz::UTC);
    }
    name.trim()
        .parse::<Tz>()
        .map_err(|_| SchedulerError::InvalidTimezone(name.to_string()))
}

/// Next fire time of `expression` in `timezone` strictly after `from`.
pub fn next_fire_time(
    expression: &str,
    timezone: &str,
    from: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>> {
    let schedule = CronSchedule::parse(expression)?;
    let tz = parse_timezone(timezone)?;
    Ok(schedule.next_after(&tz, from))
}

/// Map a local wall-clock candidate to an instant later than `from`.
/// Gap times have no instant and yield `None`.
fn resolve_local(tz: &Tz, local: &NaiveDateTime, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(local) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)).filter(|t| *t > from),
        LocalResult::Ambiguous(earliest, latest) => {
            let earliest = earliest.with_timezone(&Utc);
            let latest = latest.with_timezone(&Utc);
            if earliest > from {
                Some(earliest)
            } else if latest > from {
                Some(latest)
            } else {
                None
            }
        }
        LocalResult::None => None,
    }
}

/// Lexical checks the crate does not make: list elements are non-empty,
/// steps are between 1 and the field span, numeric values are in range and
/// numeric ranges are ascending.
fn check_field(expression: &str, text: &str, def: &FieldDef) -> Result<()> {
    let invalid = |reason: String| SchedulerError::invalid_expression(expression, reason);

    for part in text.split(',') {
        if part.is_empty() {
            return Err(invalid(format!("empty list element in {} field", def.name)));
        }
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (part, None),
        };
        if let Some(step) = step {
            match step.parse::<u32>() {
                Ok(n) if (1..=def.max - def.min).contains(&n) => {}
                _ => {
                    return Err(invalid(format!(
                        "step '{step}' in {} field must be between 1 and {}",
                        def.name,
                        def.max - def.min
                    )))
                }
            }
        }
        if range == "*" {
            continue;
        }

        let (low, high) = match range.split_once('-') {
            Some((a, b)) => (a, Some(b)),
            None => (range, None),
        };
        let low = numeric_in_range(expression, low, def)?;
        let high = match high {
            Some(b) => numeric_in_range(expression, b, def)?,
            None => None,
        };
        if let (Some(low), Some(high)) = (low, high) {
            if low > high {
                return Err(invalid(format!(
                    "range {low}-{high} is reversed in {} field",
                    def.name
                )));
            }
        }
    }
    Ok(())
}

/// `Some(value)` for an in-range number, `None` for a name (left to the
/// crate), error for an out-of-range number.
fn numeric_in_range(expression: &str, token: &str, def: &FieldDef) -> Result<Option<u32>> {
    if !token.bytes().all(|b| b.is_ascii_digit()) || token.is_empty() {
        return Ok(None);
    }
    match token.parse::<u32>() {
        Ok(v) if (def.min..=def.max).contains(&v) => Ok(Some(v)),
        _ => Err(SchedulerError::invalid_expression(
            expression,
            format!(
                "{} value {token} out of range {}-{}",
                def.name, def.min, def.max
            ),
        )),
    }
}

/// Rewrite a day-of-week field as weekday names (`1-5` → `MON,TUE,...`).
fn weekdays_as_names(expression: &str, field: &str) -> Result<String> {
    let mut names: Vec<&str> = Vec::new();

    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => (range, step.parse::<usize>().ok()),
            None => (part, None),
        };
        let (low, high) = match range.split_once('-') {
            None if range == "*" => (0, 6),
            Some((a, b)) => (weekday_index(expression, a)?, weekday_index(expression, b)?),
            // `5/2` runs from 5 to the end of the week
            None if step.is_some() => (weekday_index(expression, range)?, 7),
            None => {
                let day = weekday_index(expression, range)?;
                (day, day)
            }
        };
        if low > high {
            return Err(SchedulerError::invalid_expression(
                expression,
                format!("day-of-week range {range} is reversed"),
            ));
        }
        for day in (low..=high).step_by(step.unwrap_or(1).max(1)) {
            let name = WEEKDAY_NAMES[day % 7];
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    Ok(names.join(","))
}

fn weekday_index(expression: &str, token: &str) -> Result<usize> {
    if let Ok(n) = token.parse::<usize>() {
        if n <= 7 {
            return Ok(n);
        }
    } else if let Some(i) = WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
    {
        return Ok(i);
    }
    Err(SchedulerError::invalid_expression(
        expression,
        format!("'{token}' is not a valid day-of-week value"),
    ))
}
