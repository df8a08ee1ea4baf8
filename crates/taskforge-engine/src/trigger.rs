//! Trigger evaluation — given a trigger spec and a reference time, compute
//! the next wall-clock instant the job should fire.
//!
//! Everything here is a pure function of its inputs; the random-window
//! variant takes its randomness through the caller's RNG. Calendar
//! arithmetic happens in naive local time and is resolved to an instant at
//! the end: a DST gap resolves to the earliest valid instant at or after
//! the nominal time, and of an ambiguous (repeated) time the earlier
//! occurrence wins.

use chrono::{
    DateTime, Datelike, Duration, Local, LocalResult, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Timelike,
};
use rand::{Rng, RngCore};

use taskforge_core::catalog::{parse_interval, TriggerSpec};
use taskforge_core::error::{ForgeError, Result};

/// Upper bound on the cron search: four years of minutes covers leap-day
/// expressions like `0 0 29 2 *`.
const MAX_SEARCH_DAYS: i64 = 366 * 4;

/// Parse-check a trigger spec without evaluating it. Called at
/// catalog-publish time so a bad expression rejects the snapshot.
pub fn validate(spec: &TriggerSpec) -> Result<()> {
    match spec {
        TriggerSpec::Cron { expression } => CronExpr::parse(expression).map(|_| ()),
        TriggerSpec::Interval { every } => parse_interval(every).map(|_| ()),
        _ => Ok(()),
    }
}

/// Next fire strictly after `after`, or `None` for "never".
///
/// `last_fire` is the wall time of the job's previous fire, when known;
/// interval triggers anchor on it and window triggers use it to fire at
/// most once per window.
pub fn next_fire(
    spec: &TriggerSpec,
    after: DateTime<Local>,
    last_fire: Option<DateTime<Local>>,
    rng: &mut dyn RngCore,
) -> Result<Option<DateTime<Local>>> {
    match spec {
        TriggerSpec::Cron { expression } => {
            let expr = CronExpr::parse(expression)?;
            Ok(expr.next_after(after))
        }
        TriggerSpec::Interval { every } => {
            let step = parse_interval(every)?;
            let next = last_fire.unwrap_or(after) + step;
            // Catch-up after a long pause collapses to a single fire.
            if next > after {
                Ok(Some(next))
            } else {
                Ok(Some(after + Duration::seconds(1)))
            }
        }
        TriggerSpec::RandomWindow { start, end } => {
            Ok(next_random_in_window(*start, *end, after, last_fire, rng))
        }
        TriggerSpec::Scheduled { at, .. } => Ok(next_daily(*at, after)),
        TriggerSpec::Weekly { days, at, .. } => Ok(next_weekly(days, *at, after)),
        TriggerSpec::Monthly { days, at, .. } => Ok(next_monthly(days, *at, after)),
        TriggerSpec::SpecificDate { at } => {
            Ok(resolve_local(*at).filter(|resolved| *resolved > after))
        }
    }
}

/// End of the window that the fire at `fire` belongs to, for triggers that
/// carry one. Bounds success-repeats.
pub fn window_end_for(spec: &TriggerSpec, fire: DateTime<Local>) -> Option<DateTime<Local>> {
    let end_time = spec.window_end()?;
    let candidate = resolve_local(fire.date_naive().and_time(end_time))?;
    if candidate >= fire {
        Some(candidate)
    } else {
        // Window crosses midnight; the end lands on the next day.
        resolve_local((fire.date_naive() + Duration::days(1)).and_time(end_time))
    }
}

fn next_daily(at: NaiveTime, after: DateTime<Local>) -> Option<DateTime<Local>> {
    let mut date = after.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(date.and_time(at)) {
            if candidate > after {
                return Some(candidate);
            }
        }
        date += Duration::days(1);
    }
    None
}

fn next_weekly(days: &[u32], at: NaiveTime, after: DateTime<Local>) -> Option<DateTime<Local>> {
    let mut date = after.date_naive();
    for _ in 0..15 {
        if days.contains(&date.weekday().num_days_from_monday()) {
            if let Some(candidate) = resolve_local(date.and_time(at)) {
                if candidate > after {
                    return Some(candidate);
                }
            }
        }
        date += Duration::days(1);
    }
    None
}

fn next_monthly(days: &[u32], at: NaiveTime, after: DateTime<Local>) -> Option<DateTime<Local>> {
    let mut date = after.date_naive();
    for _ in 0..MAX_SEARCH_DAYS {
        if days.contains(&date.day()) {
            if let Some(candidate) = resolve_local(date.and_time(at)) {
                if candidate > after {
                    return Some(candidate);
                }
            }
        }
        date += Duration::days(1);
    }
    None
}

fn next_random_in_window(
    start: NaiveTime,
    end: NaiveTime,
    after: DateTime<Local>,
    last_fire: Option<DateTime<Local>>,
    rng: &mut dyn RngCore,
) -> Option<DateTime<Local>> {
    let mut window_date = after.date_naive();
    let mut window = window_bounds(window_date, start, end)?;

    // Today's window is already over.
    if after >= window.1 {
        window_date += Duration::days(1);
        window = window_bounds(window_date, start, end)?;
    }

    // Fired in this window already: one fire per window.
    if let Some(last) = last_fire {
        if last >= window.0 && last <= window.1 {
            window_date += Duration::days(1);
            window = window_bounds(window_date, start, end)?;
        }
    }

    let (window_start, window_end) = window;
    let effective_start = window_start.max(after);
    let span = (window_end - effective_start).num_seconds().max(0);
    let offset = rng.gen_range(0..=span);
    Some(effective_start + Duration::seconds(offset))
}

/// `[start, end]` instants of the window anchored on `date`; an end at or
/// before the start rolls over midnight.
fn window_bounds(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
) -> Option<(DateTime<Local>, DateTime<Local>)> {
    let start_dt = resolve_local(date.and_time(start))?;
    let mut end_dt = resolve_local(date.and_time(end))?;
    if end_dt <= start_dt {
        end_dt = resolve_local((date + Duration::days(1)).and_time(end))?;
    }
    Some((start_dt, end_dt))
}

/// Naive local time → instant. Gap: earliest valid instant at or after.
/// Ambiguity: earlier occurrence.
fn resolve_local(naive: NaiveDateTime) -> Option<DateTime<Local>> {
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => {
            let mut probe = naive;
            for _ in 0..240 {
                probe += Duration::minutes(1);
                match Local.from_local_datetime(&probe) {
                    LocalResult::Single(t) => return Some(t),
                    LocalResult::Ambiguous(earlier, _) => return Some(earlier),
                    LocalResult::None => continue,
                }
            }
            None
        }
    }
}

/// A parsed five-field cron expression: minute, hour, day-of-month, month,
/// day-of-week. Day-of-week uses 0 or 7 = Sunday; when both day fields are
/// restricted a time matches if either does (classic cron semantics).
#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_star: bool,
    dow_star: bool,
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

impl CronExpr {
    pub fn parse(expression: &str) -> Result<Self> {
        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(ForgeError::Config(format!(
                "cron expression {expression:?} must have 5 fields (minute hour dom month dow)"
            )));
        }

        let minutes = parse_field(fields[0], 0, 59, &[])?;
        let hours = parse_field(fields[1], 0, 23, &[])?;
        let days_of_month = parse_field(fields[2], 1, 31, &[])?;
        let months = parse_field(fields[3], 1, 12, &MONTH_NAMES)?;
        let mut days_of_week = parse_field(fields[4], 0, 7, &DOW_NAMES)?;
        // 7 is an alias for Sunday.
        for day in days_of_week.iter_mut() {
            if *day == 7 {
                *day = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_star: fields[2] == "*",
            dow_star: fields[4] == "*",
        })
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        if !self.months.contains(&date.month()) {
            return false;
        }
        let dom_ok = self.days_of_month.contains(&date.day());
        let dow_ok = self
            .days_of_week
            .contains(&date.weekday().num_days_from_sunday());
        match (self.dom_star, self.dow_star) {
            (true, true) => true,
            (false, true) => dom_ok,
            (true, false) => dow_ok,
            (false, false) => dom_ok || dow_ok,
        }
    }

    /// Least instant strictly after `after` matching the mask, searching
    /// day-wise so sparse expressions stay cheap.
    pub fn next_after(&self, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let start = after.naive_local() + Duration::minutes(1);
        let start = start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(start);

        let mut date = start.date();
        for _ in 0..MAX_SEARCH_DAYS {
            if self.day_matches(date) {
                let from = if date == start.date() {
                    start.time()
                } else {
                    NaiveTime::MIN
                };
                for &hour in &self.hours {
                    if hour < from.hour() {
                        continue;
                    }
                    for &minute in &self.minutes {
                        if hour == from.hour() && minute < from.minute() {
                            continue;
                        }
                        let naive = date.and_time(NaiveTime::from_hms_opt(hour, minute, 0)?);
                        if let Some(candidate) = resolve_local(naive) {
                            if candidate > after {
                                return Some(candidate);
                            }
                        }
                    }
                }
            }
            date += Duration::days(1);
        }
        None
    }
}

/// Parse one cron field into its sorted value list. Supports `*`, `*/N`,
/// `a`, `a-b`, `a-b/N`, comma lists, and month/weekday names.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .ok()
                    .filter(|s| *s > 0)
                    .ok_or_else(|| ForgeError::Config(format!("invalid cron step in {part:?}")))?;
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(a, min, max, names)?,
                parse_value(b, min, max, names)?,
            )
        } else {
            let v = parse_value(range, min, max, names)?;
            (v, v)
        };

        if lo > hi {
            return Err(ForgeError::Config(format!(
                "invalid cron range {part:?}: {lo} > {hi}"
            )));
        }
        values.extend((lo..=hi).step_by(step as usize));
    }
    values.sort_unstable();
    values.dedup();
    if values.is_empty() {
        return Err(ForgeError::Config(format!("empty cron field {field:?}")));
    }
    Ok(values)
}

fn parse_value(text: &str, min: u32, max: u32, names: &[&str]) -> Result<u32> {
    let lowered = text.to_ascii_lowercase();
    if let Some(index) = names.iter().position(|n| *n == lowered) {
        // Name tables are 0-based for weekdays, 1-based for months.
        return Ok(index as u32 + if min == 1 { 1 } else { 0 });
    }
    let value: u32 = text
        .parse()
        .map_err(|_| ForgeError::Config(format!("invalid cron value {text:?}")))?;
    if value < min || value > max {
        return Err(ForgeError::Config(format!(
            "cron value {value} outside {min}..={max}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn eval(spec: &TriggerSpec, after: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut rng = StepRng::new(0, 1);
        next_fire(spec, after, None, &mut rng).unwrap()
    }

    #[test]
    fn cron_every_five_minutes() {
        let spec = TriggerSpec::Cron {
            expression: "*/5 * * * *".into(),
        };
        let next = eval(&spec, at(2026, 2, 22, 12, 4, 59)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 12, 5, 0));

        let next = eval(&spec, at(2026, 2, 22, 12, 5, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 22, 12, 10, 0));
    }

    #[test]
    fn cron_hour_rollover() {
        let spec = TriggerSpec::Cron {
            expression: "0 8 * * *".into(),
        };
        let next = eval(&spec, at(2026, 2, 22, 9, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 2, 23, 8, 0, 0));
    }

    #[test]
    fn cron_day_of_week_names() {
        // Sundays at 06:30. 2026-02-22 is a Sunday.
        let spec = TriggerSpec::Cron {
            expression: "30 6 * * sun".into(),
        };
        let next = eval(&spec, at(2026, 2, 22, 7, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 1, 6, 30, 0));
    }

    #[test]
    fn cron_dom_dow_union() {
        // Classic semantics: when both day fields are restricted, either
        // may match. 2026-03-02 is a Monday, 2026-03-15 the 15th.
        let spec = TriggerSpec::Cron {
            expression: "0 0 15 * mon".into(),
        };
        let next = eval(&spec, at(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 2, 0, 0, 0));
        // From mid-month the dom side (the 15th) comes before the next
        // Monday (the 16th).
        let next = eval(&spec, at(2026, 3, 13, 12, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 15, 0, 0, 0));
    }

    #[test]
    fn cron_ranges_and_steps() {
        let values = parse_field("10-20/5", 0, 59, &[]).unwrap();
        assert_eq!(values, vec![10, 15, 20]);
        let values = parse_field("1,3,5", 0, 59, &[]).unwrap();
        assert_eq!(values, vec![1, 3, 5]);
        assert!(parse_field("61", 0, 59, &[]).is_err());
        assert!(parse_field("*/0", 0, 59, &[]).is_err());
    }

    #[test]
    fn cron_leap_day() {
        let spec = TriggerSpec::Cron {
            expression: "0 12 29 2 *".into(),
        };
        let next = eval(&spec, at(2026, 3, 1, 0, 0, 0)).unwrap();
        assert_eq!(next, at(2028, 2, 29, 12, 0, 0));
    }

    #[test]
    fn cron_is_monotone_and_pure() {
        let spec = TriggerSpec::Cron {
            expression: "17 3 * * *".into(),
        };
        let t0 = at(2026, 5, 1, 0, 0, 0);
        let a = eval(&spec, t0).unwrap();
        let b = eval(&spec, t0).unwrap();
        assert_eq!(a, b);
        let later = eval(&spec, a).unwrap();
        assert!(later > a);
    }

    #[test]
    fn interval_first_fire_is_one_interval_away() {
        let spec = TriggerSpec::Interval { every: "5m".into() };
        let t0 = at(2026, 2, 22, 12, 0, 0);
        assert_eq!(eval(&spec, t0).unwrap(), t0 + Duration::minutes(5));
    }

    #[test]
    fn interval_anchors_on_last_fire() {
        let spec = TriggerSpec::Interval { every: "30m".into() };
        let last = at(2026, 2, 22, 12, 0, 0);
        let now = at(2026, 2, 22, 12, 10, 0);
        let mut rng = StepRng::new(0, 1);
        let next = next_fire(&spec, now, Some(last), &mut rng).unwrap().unwrap();
        assert_eq!(next, at(2026, 2, 22, 12, 30, 0));
    }

    #[test]
    fn interval_catchup_collapses_to_one_fire() {
        let spec = TriggerSpec::Interval { every: "5m".into() };
        let last = at(2026, 2, 22, 6, 0, 0);
        let now = at(2026, 2, 22, 12, 0, 0);
        let mut rng = StepRng::new(0, 1);
        let next = next_fire(&spec, now, Some(last), &mut rng).unwrap().unwrap();
        assert!(next > now);
        assert!(next <= now + Duration::seconds(1));
    }

    #[test]
    fn random_fire_lands_inside_window() {
        let spec = TriggerSpec::RandomWindow {
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        };
        let now = at(2026, 2, 22, 12, 0, 0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let next = next_fire(&spec, now, None, &mut rng).unwrap().unwrap();
            assert!(next >= at(2026, 2, 22, 14, 0, 0));
            assert!(next <= at(2026, 2, 22, 16, 0, 0));
        }
    }

    #[test]
    fn random_mid_window_starts_from_now() {
        let spec = TriggerSpec::RandomWindow {
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        };
        let now = at(2026, 2, 22, 15, 0, 0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let next = next_fire(&spec, now, None, &mut rng).unwrap().unwrap();
            assert!(next >= now);
            assert!(next <= at(2026, 2, 22, 16, 0, 0));
        }
    }

    #[test]
    fn random_fires_once_per_window() {
        let spec = TriggerSpec::RandomWindow {
            start: NaiveTime::from_hms_opt(14, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
        };
        let now = at(2026, 2, 22, 15, 0, 0);
        let fired = at(2026, 2, 22, 14, 30, 0);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let next = next_fire(&spec, now, Some(fired), &mut rng)
            .unwrap()
            .unwrap();
        // Already fired today, so the next pick is in tomorrow's window.
        assert!(next >= at(2026, 2, 23, 14, 0, 0));
        assert!(next <= at(2026, 2, 23, 16, 0, 0));
    }

    #[test]
    fn scheduled_daily_rolls_to_tomorrow() {
        let spec = TriggerSpec::Scheduled {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: None,
        };
        assert_eq!(
            eval(&spec, at(2026, 2, 22, 8, 0, 0)).unwrap(),
            at(2026, 2, 22, 9, 0, 0)
        );
        assert_eq!(
            eval(&spec, at(2026, 2, 22, 9, 0, 0)).unwrap(),
            at(2026, 2, 23, 9, 0, 0)
        );
    }

    #[test]
    fn weekly_picks_next_matching_day() {
        // Monday (0) and Friday (4) at 08:00; 2026-02-22 is a Sunday.
        let spec = TriggerSpec::Weekly {
            days: vec![0, 4],
            at: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            window_end: None,
        };
        assert_eq!(
            eval(&spec, at(2026, 2, 22, 12, 0, 0)).unwrap(),
            at(2026, 2, 23, 8, 0, 0)
        );
        assert_eq!(
            eval(&spec, at(2026, 2, 23, 9, 0, 0)).unwrap(),
            at(2026, 2, 27, 8, 0, 0)
        );
    }

    #[test]
    fn monthly_skips_short_months() {
        let spec = TriggerSpec::Monthly {
            days: vec![31],
            at: NaiveTime::from_hms_opt(0, 30, 0).unwrap(),
            window_end: None,
        };
        // After Jan 31, February has no 31st; the next is March 31.
        let next = eval(&spec, at(2026, 1, 31, 1, 0, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 31, 0, 30, 0));
    }

    #[test]
    fn specific_date_in_past_never_fires() {
        let spec = TriggerSpec::SpecificDate {
            at: NaiveDate::from_ymd_opt(2026, 1, 1)
                .unwrap()
                .and_hms_opt(12, 0, 0)
                .unwrap(),
        };
        assert!(eval(&spec, at(2026, 2, 1, 0, 0, 0)).is_none());
        assert_eq!(
            eval(&spec, at(2025, 12, 31, 0, 0, 0)).unwrap(),
            at(2026, 1, 1, 12, 0, 0)
        );
    }

    #[test]
    fn window_end_rolls_over_midnight() {
        let spec = TriggerSpec::Scheduled {
            at: NaiveTime::from_hms_opt(23, 0, 0).unwrap(),
            window_end: Some(NaiveTime::from_hms_opt(1, 0, 0).unwrap()),
        };
        let fire = at(2026, 2, 22, 23, 0, 0);
        assert_eq!(window_end_for(&spec, fire).unwrap(), at(2026, 2, 23, 1, 0, 0));

        let spec = TriggerSpec::Scheduled {
            at: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            window_end: Some(NaiveTime::from_hms_opt(9, 30, 0).unwrap()),
        };
        let fire = at(2026, 2, 22, 9, 0, 0);
        assert_eq!(
            window_end_for(&spec, fire).unwrap(),
            at(2026, 2, 22, 9, 30, 0)
        );
    }

    #[test]
    fn validate_rejects_bad_expressions() {
        assert!(validate(&TriggerSpec::Cron {
            expression: "bad".into()
        })
        .is_err());
        assert!(validate(&TriggerSpec::Interval {
            every: "never".into()
        })
        .is_err());
        assert!(validate(&TriggerSpec::Cron {
            expression: "*/15 8-18 * * mon-fri".into()
        })
        .is_ok());
    }
}
