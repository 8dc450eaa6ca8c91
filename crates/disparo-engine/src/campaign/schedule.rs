//! Schedule gate - decides whether a campaign may send right now
//!
//! All checks run in the campaign's own timezone. Windows are half-open
//! `[start, end)`, expressed as minutes since local midnight so that an
//! end of "24:00" covers the rest of the day.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use disparo_common::types::{DaySchedule, ScheduleSpec};

/// How far ahead the gate searches for the next open window
const SCAN_HORIZON_DAYS: i64 = 14;

/// Outcome of a gate evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Sending is allowed right now
    Open,
    /// Sending is not allowed; `next_open_at` is None when no window
    /// opens within the scan horizon
    Closed {
        next_open_at: Option<DateTime<Utc>>,
    },
}

/// Evaluate a schedule at an instant
pub fn evaluate(spec: &ScheduleSpec, now: DateTime<Utc>) -> GateDecision {
    let tz = resolve_tz(spec);
    let local = now.with_timezone(&tz);

    if is_open_local(spec, local.date_naive(), minutes_of_day(&local)) {
        GateDecision::Open
    } else {
        GateDecision::Closed {
            next_open_at: next_open_at(spec, now),
        }
    }
}

/// Find the next instant the schedule opens, scanning up to the
/// horizon. Returns None when every candidate day is blocked.
pub fn next_open_at(spec: &ScheduleSpec, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let tz = resolve_tz(spec);
    let local_now = now.with_timezone(&tz);
    let now_minutes = minutes_of_day(&local_now);

    for offset in 0..=SCAN_HORIZON_DAYS {
        let date = local_now.date_naive() + Duration::days(offset);

        if !day_accepts_sends(spec, date) {
            continue;
        }

        let day = match day_for_date(spec, date) {
            Some(d) => d,
            None => continue,
        };

        let mut starts: Vec<u32> = day
            .windows
            .iter()
            .filter_map(|w| {
                let start = parse_hhmm(&w.start)?;
                let end = parse_hhmm(&w.end)?;
                if start >= end {
                    return None;
                }
                // Today's windows must still lie ahead
                if offset == 0 && start <= now_minutes {
                    return None;
                }
                Some(start)
            })
            .collect();
        starts.sort_unstable();

        for start in starts {
            if let Some(instant) = local_instant(&tz, date, start) {
                return Some(instant);
            }
        }
    }

    None
}

/// Local hour of day in the given timezone, for greeting selection
pub fn local_hour(timezone: &str, now: DateTime<Utc>) -> u32 {
    now.with_timezone(&parse_tz(timezone)).hour()
}

/// First instant of the next local day. Used to wait out exhausted
/// daily send caps, which reset at local midnight.
pub fn next_local_midnight(timezone: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    let tz = parse_tz(timezone);
    let tomorrow = now.with_timezone(&tz).date_naive() + Duration::days(1);
    local_instant(&tz, tomorrow, 0).unwrap_or_else(|| now + Duration::days(1))
}

/// Check a schedule before it is stored. Returns a human-readable
/// problem description on the first defect found.
pub fn validate(spec: &ScheduleSpec) -> Result<(), String> {
    if spec.timezone.parse::<Tz>().is_err() {
        return Err(format!("unknown timezone: {}", spec.timezone));
    }

    if spec.days.len() != 7 {
        return Err(format!(
            "schedule must define exactly 7 days (Monday first), got {}",
            spec.days.len()
        ));
    }

    for (idx, day) in spec.days.iter().enumerate() {
        for w in &day.windows {
            let start = parse_hhmm(&w.start)
                .ok_or_else(|| format!("day {}: bad window start {:?}", idx, w.start))?;
            let end = parse_hhmm(&w.end)
                .ok_or_else(|| format!("day {}: bad window end {:?}", idx, w.end))?;
            if start >= end {
                return Err(format!(
                    "day {}: window {}-{} must start before it ends",
                    idx, w.start, w.end
                ));
            }
        }
    }

    Ok(())
}

fn parse_tz(timezone: &str) -> Tz {
    // Timezones are validated when the schedule is stored
    timezone.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

fn resolve_tz(spec: &ScheduleSpec) -> Tz {
    parse_tz(&spec.timezone)
}

fn minutes_of_day<T: Timelike>(t: &T) -> u32 {
    t.hour() * 60 + t.minute()
}

/// Whether the date itself allows sending (holiday and weekend rules)
fn day_accepts_sends(spec: &ScheduleSpec, date: chrono::NaiveDate) -> bool {
    if spec.skip_holidays && spec.holidays.contains(&date) {
        return false;
    }

    let weekday = date.weekday();
    if spec.skip_weekends
        && (weekday == chrono::Weekday::Sat || weekday == chrono::Weekday::Sun)
    {
        return false;
    }

    true
}

fn day_for_date(spec: &ScheduleSpec, date: chrono::NaiveDate) -> Option<&DaySchedule> {
    let idx = date.weekday().num_days_from_monday() as usize;
    let day = spec.days.get(idx)?;
    if day.enabled {
        Some(day)
    } else {
        None
    }
}

fn is_open_local(spec: &ScheduleSpec, date: chrono::NaiveDate, minutes: u32) -> bool {
    if !day_accepts_sends(spec, date) {
        return false;
    }

    let day = match day_for_date(spec, date) {
        Some(d) => d,
        None => return false,
    };

    day.windows.iter().any(|w| {
        match (parse_hhmm(&w.start), parse_hhmm(&w.end)) {
            (Some(start), Some(end)) => start <= minutes && minutes < end,
            _ => false,
        }
    })
}

/// Parse "HH:MM" into minutes since midnight. "24:00" is accepted as a
/// day-end marker (1440); malformed strings yield None.
fn parse_hhmm(s: &str) -> Option<u32> {
    let (hh, mm) = s.split_once(':')?;
    let hh: u32 = hh.parse().ok()?;
    let mm: u32 = mm.parse().ok()?;

    if hh == 24 && mm == 0 {
        return Some(1440);
    }
    if hh > 23 || mm > 59 {
        return None;
    }
    Some(hh * 60 + mm)
}

/// Map a local date and minute to a UTC instant. Ambiguous local times
/// (clocks rolled back) take the earlier reading; nonexistent ones
/// (clocks rolled forward) shift an hour later.
fn local_instant(tz: &Tz, date: chrono::NaiveDate, minutes: u32) -> Option<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(minutes / 60, minutes % 60, 0)?;
    let naive = date.and_time(time);

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
                LocalResult::Ambiguous(earlier, _) => Some(earlier.with_timezone(&Utc)),
                LocalResult::None => None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use disparo_common::types::TimeWindow;
    use pretty_assertions::assert_eq;

    fn window(start: &str, end: &str) -> TimeWindow {
        TimeWindow {
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    /// Mon-Fri 09:00-12:00 and 14:00-18:00 in Sao Paulo
    fn business_hours() -> ScheduleSpec {
        let weekday = DaySchedule {
            enabled: true,
            windows: vec![window("09:00", "12:00"), window("14:00", "18:00")],
        };
        let weekend = DaySchedule {
            enabled: false,
            windows: vec![],
        };
        ScheduleSpec {
            timezone: "America/Sao_Paulo".to_string(),
            days: vec![
                weekday.clone(),
                weekday.clone(),
                weekday.clone(),
                weekday.clone(),
                weekday,
                weekend.clone(),
                weekend,
            ],
            holidays: vec![],
            skip_weekends: true,
            skip_holidays: true,
        }
    }

    fn sao_paulo(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> DateTime<Utc> {
        chrono_tz::America::Sao_Paulo
            .with_ymd_and_hms(y, m, d, hh, mm, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn open_inside_morning_window() {
        // Monday 2026-03-02
        let now = sao_paulo(2026, 3, 2, 11, 59);
        assert_eq!(evaluate(&business_hours(), now), GateDecision::Open);
    }

    #[test]
    fn window_end_is_exclusive() {
        // Exactly 12:00 is outside; the next window opens at 14:00
        let now = sao_paulo(2026, 3, 2, 12, 0);
        let decision = evaluate(&business_hours(), now);

        assert_eq!(
            decision,
            GateDecision::Closed {
                next_open_at: Some(sao_paulo(2026, 3, 2, 14, 0)),
            }
        );
    }

    #[test]
    fn friday_evening_rolls_to_monday() {
        // Friday 2026-03-06 18:30
        let now = sao_paulo(2026, 3, 6, 18, 30);
        let decision = evaluate(&business_hours(), now);

        assert_eq!(
            decision,
            GateDecision::Closed {
                next_open_at: Some(sao_paulo(2026, 3, 9, 9, 0)),
            }
        );
    }

    #[test]
    fn holiday_blocks_the_whole_day() {
        let mut spec = business_hours();
        spec.holidays = vec![chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()];

        // Monday 10:00 would otherwise be open
        let now = sao_paulo(2026, 3, 2, 10, 0);
        let decision = evaluate(&spec, now);

        assert_eq!(
            decision,
            GateDecision::Closed {
                next_open_at: Some(sao_paulo(2026, 3, 3, 9, 0)),
            }
        );
    }

    #[test]
    fn holiday_ignored_when_skip_holidays_off() {
        let mut spec = business_hours();
        spec.skip_holidays = false;
        spec.holidays = vec![chrono::NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()];

        let now = sao_paulo(2026, 3, 2, 10, 0);
        assert_eq!(evaluate(&spec, now), GateDecision::Open);
    }

    #[test]
    fn skip_weekends_overrides_enabled_day() {
        let mut spec = business_hours();
        // Saturday marked enabled, but skip_weekends wins
        spec.days[5] = DaySchedule {
            enabled: true,
            windows: vec![window("09:00", "18:00")],
        };

        // Saturday 2026-03-07 10:00
        let now = sao_paulo(2026, 3, 7, 10, 0);
        let decision = evaluate(&spec, now);

        assert_eq!(
            decision,
            GateDecision::Closed {
                next_open_at: Some(sao_paulo(2026, 3, 9, 9, 0)),
            }
        );
    }

    #[test]
    fn day_end_marker_keeps_late_window_open() {
        let mut spec = business_hours();
        spec.days[0].windows = vec![window("22:00", "24:00")];

        let now = sao_paulo(2026, 3, 2, 23, 30);
        assert_eq!(evaluate(&spec, now), GateDecision::Open);
    }

    #[test]
    fn fully_disabled_schedule_has_no_upcoming_window() {
        let mut spec = business_hours();
        for day in &mut spec.days {
            day.enabled = false;
        }

        let now = sao_paulo(2026, 3, 2, 10, 0);
        assert_eq!(
            evaluate(&spec, now),
            GateDecision::Closed { next_open_at: None }
        );
    }

    #[test]
    fn malformed_window_is_never_open() {
        let mut spec = business_hours();
        spec.days[0].windows = vec![window("9am", "noon")];

        let now = sao_paulo(2026, 3, 2, 10, 0);
        let decision = evaluate(&spec, now);
        // Tuesday morning is the next valid window
        assert_eq!(
            decision,
            GateDecision::Closed {
                next_open_at: Some(sao_paulo(2026, 3, 3, 9, 0)),
            }
        );
    }

    #[test]
    fn parses_day_end_and_rejects_out_of_range() {
        assert_eq!(parse_hhmm("24:00"), Some(1440));
        assert_eq!(parse_hhmm("09:30"), Some(570));
        assert_eq!(parse_hhmm("24:01"), None);
        assert_eq!(parse_hhmm("25:00"), None);
        assert_eq!(parse_hhmm("12:60"), None);
        assert_eq!(parse_hhmm("nope"), None);
    }

    #[test]
    fn local_hour_follows_the_timezone() {
        // 14:00 UTC is 11:00 in Sao Paulo (UTC-3)
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap();
        assert_eq!(local_hour("America/Sao_Paulo", now), 11);
        assert_eq!(local_hour("UTC", now), 14);
        // Unknown zones fall back to UTC
        assert_eq!(local_hour("Mars/Olympus", now), 14);
    }

    #[test]
    fn next_local_midnight_lands_on_the_next_day() {
        let now = sao_paulo(2026, 3, 2, 23, 50);
        let midnight = next_local_midnight("America/Sao_Paulo", now);
        let local = midnight.with_timezone(&chrono_tz::America::Sao_Paulo);

        assert_eq!(local.hour(), 0);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.date_naive(), chrono::NaiveDate::from_ymd_opt(2026, 3, 3).unwrap());
    }

    #[test]
    fn validate_accepts_business_hours() {
        assert_eq!(validate(&business_hours()), Ok(()));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let mut spec = business_hours();
        spec.timezone = "Mars/Olympus".to_string();
        let err = validate(&spec).unwrap_err();
        assert!(err.contains("timezone"), "{}", err);
    }

    #[test]
    fn validate_rejects_wrong_day_count() {
        let mut spec = business_hours();
        spec.days.pop();
        let err = validate(&spec).unwrap_err();
        assert!(err.contains("7 days"), "{}", err);
    }

    #[test]
    fn validate_rejects_inverted_and_malformed_windows() {
        let mut spec = business_hours();
        spec.days[0].windows = vec![window("18:00", "09:00")];
        assert!(validate(&spec).is_err());

        spec.days[0].windows = vec![window("9am", "noon")];
        assert!(validate(&spec).is_err());

        // Zero-length windows can never open
        spec.days[0].windows = vec![window("09:00", "09:00")];
        assert!(validate(&spec).is_err());
    }

    #[test]
    fn dst_gap_shifts_start_forward() {
        // New York springs forward on 2026-03-08: 02:00 does not exist
        let sunday = DaySchedule {
            enabled: true,
            windows: vec![window("02:00", "06:00")],
        };
        let off = DaySchedule {
            enabled: false,
            windows: vec![],
        };
        let spec = ScheduleSpec {
            timezone: "America/New_York".to_string(),
            days: vec![
                off.clone(),
                off.clone(),
                off.clone(),
                off.clone(),
                off.clone(),
                off,
                sunday,
            ],
            holidays: vec![],
            skip_weekends: false,
            skip_holidays: false,
        };

        let now = chrono_tz::America::New_York
            .with_ymd_and_hms(2026, 3, 8, 1, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        let next = next_open_at(&spec, now).unwrap();

        let local = next.with_timezone(&chrono_tz::America::New_York);
        assert_eq!(local.hour(), 3);
        assert_eq!(local.date_naive().day(), 8);
    }
}
