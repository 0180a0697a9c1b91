//! Recurrence calculation.
//!
//! `next_due` is a pure function from a schedule spec, a timezone, and a
//! reference instant to the next due instant (or none). All date arithmetic
//! happens on the wall clock of the reminder's timezone before the result is
//! converted back to UTC, so firing stays wall-clock-correct regardless of
//! the evaluating process's local timezone.
//!
//! This module is the only producer of `Reminder::next_due_at`; the one-off
//! snooze deferral lives here too.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::model::{ScheduleSpec, ScheduleType};

/// Upper bound on date steps while skipping excluded dates. A schedule whose
/// next two years are entirely excluded yields none.
const MAX_DATE_SCAN: u32 = 732;

/// Compute the next due instant for `spec` strictly after `reference`.
///
/// `prior_occurrence` feeds interval schedules; `occurrence_count` enforces
/// the max-occurrence bound. Identical inputs always produce identical
/// output.
pub fn next_due(
    spec: &ScheduleSpec,
    tz: Tz,
    reference: DateTime<Utc>,
    prior_occurrence: Option<DateTime<Utc>>,
    occurrence_count: u32,
) -> Option<DateTime<Utc>> {
    if let Some(max) = spec.max_occurrences {
        if occurrence_count >= max {
            return None;
        }
    }

    let local_now = reference.with_timezone(&tz).naive_local();
    let tod = time_of_day(spec);

    let candidate = match spec.schedule_type {
        ScheduleType::Once => next_once(spec, local_now, tod),
        ScheduleType::Daily => next_scan(spec, local_now, tod, |_| true),
        ScheduleType::Weekly => {
            let days = sorted_weekdays(spec);
            if days.is_empty() {
                return None;
            }
            next_scan(spec, local_now, tod, |date| {
                days.contains(&(date.weekday().num_days_from_monday() as u8))
            })
        }
        ScheduleType::Monthly => next_monthly(spec, local_now, tod),
        ScheduleType::Yearly => next_yearly(spec, local_now, tod),
        ScheduleType::Interval => next_interval(spec, tz, local_now, tod, prior_occurrence),
        // Cron evaluation is intentionally unsupported.
        ScheduleType::Custom => None,
    }?;

    if past_end(spec, candidate.date()) {
        return None;
    }
    resolve_local(tz, candidate)
}

/// One-time deferred next-fire used by the snooze acknowledgment action.
/// The underlying recurrence spec is untouched; the normal cadence resumes
/// after the deferred delivery.
pub fn snooze_until(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(minutes.max(1))
}

fn next_once(spec: &ScheduleSpec, local_now: NaiveDateTime, tod: NaiveTime) -> Option<NaiveDateTime> {
    // A once schedule without a start date never fires.
    let date = spec.start_date?;
    if spec.excluded_dates.contains(&date) {
        return None;
    }
    let candidate = date.and_time(tod);
    (candidate > local_now).then_some(candidate)
}

/// Day-stepping scan shared by daily and weekly schedules: the earliest date
/// on or after the floor whose wall-clock instant is still in the future,
/// the date matches `accepts`, and the date is not excluded.
fn next_scan(
    spec: &ScheduleSpec,
    local_now: NaiveDateTime,
    tod: NaiveTime,
    accepts: impl Fn(NaiveDate) -> bool,
) -> Option<NaiveDateTime> {
    let mut date = floor_date(spec, local_now.date());
    for _ in 0..MAX_DATE_SCAN {
        if past_end(spec, date) {
            return None;
        }
        let candidate = date.and_time(tod);
        if accepts(date) && candidate > local_now && !spec.excluded_dates.contains(&date) {
            return Some(candidate);
        }
        date = date.succ_opt()?;
    }
    None
}

fn next_monthly(spec: &ScheduleSpec, local_now: NaiveDateTime, tod: NaiveTime) -> Option<NaiveDateTime> {
    let dom = spec.day_of_month?;
    let floor = floor_date(spec, local_now.date());
    let (mut year, mut month) = (floor.year(), floor.month());
    for _ in 0..48 {
        // A target day past the end of the month clamps to its last day.
        let day = dom.min(days_in_month(year, month)?);
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        if past_end(spec, date) {
            return None;
        }
        let candidate = date.and_time(tod);
        if date >= floor && candidate > local_now && !spec.excluded_dates.contains(&date) {
            return Some(candidate);
        }
        (year, month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    }
    None
}

fn next_yearly(spec: &ScheduleSpec, local_now: NaiveDateTime, tod: NaiveTime) -> Option<NaiveDateTime> {
    // Month and day come from the start date.
    let start = spec.start_date?;
    let floor = floor_date(spec, local_now.date());
    for offset in 0..8 {
        let year = floor.year() + offset;
        let day = start.day().min(days_in_month(year, start.month())?);
        let date = NaiveDate::from_ymd_opt(year, start.month(), day)?;
        if past_end(spec, date) {
            return None;
        }
        let candidate = date.and_time(tod);
        if date >= floor && candidate > local_now && !spec.excluded_dates.contains(&date) {
            return Some(candidate);
        }
    }
    None
}

fn next_interval(
    spec: &ScheduleSpec,
    tz: Tz,
    local_now: NaiveDateTime,
    tod: NaiveTime,
    prior_occurrence: Option<DateTime<Utc>>,
) -> Option<NaiveDateTime> {
    let step = i64::from(spec.interval_days?.max(1));
    let mut date = match prior_occurrence {
        // N days after the prior occurrence, even if that is already due.
        Some(prior) => prior
            .with_timezone(&tz)
            .date_naive()
            .checked_add_signed(Duration::days(step))?,
        None => {
            let today = floor_date(spec, local_now.date());
            if today.and_time(tod) > local_now && !spec.excluded_dates.contains(&today) {
                return Some(today.and_time(tod));
            }
            today.checked_add_signed(Duration::days(step))?
        }
    };
    for _ in 0..120 {
        if past_end(spec, date) {
            return None;
        }
        if !spec.excluded_dates.contains(&date) {
            return Some(date.and_time(tod));
        }
        date = date.checked_add_signed(Duration::days(step))?;
    }
    None
}

/// Map a local wall-clock instant to UTC. Ambiguous times (clocks rolled
/// back) take the earliest mapping; nonexistent times (clocks rolled
/// forward) shift an hour later.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> Option<DateTime<Utc>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(earliest, _) => Some(earliest.with_timezone(&Utc)),
        LocalResult::None => {
            let shifted = naive.checked_add_signed(Duration::hours(1))?;
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => {
                    Some(dt.with_timezone(&Utc))
                }
                LocalResult::None => None,
            }
        }
    }
}

/// Parse "HH:mm"; unparsable or absent times fall back to midnight.
fn time_of_day(spec: &ScheduleSpec) -> NaiveTime {
    spec.time_of_day
        .as_deref()
        .and_then(parse_hhmm)
        .unwrap_or(NaiveTime::MIN)
}

pub(crate) fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn sorted_weekdays(spec: &ScheduleSpec) -> Vec<u8> {
    let mut days: Vec<u8> = spec.weekdays.iter().copied().filter(|d| *d < 7).collect();
    days.sort_unstable();
    days.dedup();
    days
}

fn floor_date(spec: &ScheduleSpec, today: NaiveDate) -> NaiveDate {
    match spec.start_date {
        Some(start) if start > today => start,
        _ => today,
    }
}

fn past_end(spec: &ScheduleSpec, date: NaiveDate) -> bool {
    matches!(spec.end_date, Some(end) if date > end)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    Some(next.signed_duration_since(first).num_days() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ScheduleSpec;
    use chrono_tz::Europe::Berlin;
    use chrono_tz::Tz;
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn date(y: i32, mo: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, mo, d).unwrap()
    }

    #[test]
    fn daily_passed_today_fires_tomorrow() {
        let spec = ScheduleSpec::daily("08:00");
        // 2024-01-01 08:30 UTC, evaluated in UTC.
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 8, 30), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 8, 0));
    }

    #[test]
    fn daily_still_future_fires_today() {
        let spec = ScheduleSpec::daily("08:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 7, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 8, 0));
    }

    #[test]
    fn daily_respects_reminder_timezone() {
        let spec = ScheduleSpec::daily("08:00");
        // 2024-06-01 23:30 UTC is already 2024-06-02 01:30 in Berlin (CEST),
        // so the next 08:00 Berlin is June 2nd, 06:00 UTC.
        let next = next_due(&spec, Berlin, utc(2024, 6, 1, 23, 30), None, 0).unwrap();
        assert_eq!(next, utc(2024, 6, 2, 6, 0));
    }

    #[test]
    fn weekly_picks_next_listed_weekday() {
        // Mon + Wed at 09:00; reference is Tuesday 2024-01-02 10:00.
        let spec = ScheduleSpec::weekly(vec![0, 2], "09:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 2, 10, 0), None, 0).unwrap();
        // Wednesday 2024-01-03 09:00, same week.
        assert_eq!(next, utc(2024, 1, 3, 9, 0));
    }

    #[test]
    fn weekly_wraps_to_next_week() {
        // Monday only; reference is Friday 2024-01-05.
        let spec = ScheduleSpec::weekly(vec![0], "09:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 5, 12, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 8, 9, 0));
    }

    #[test]
    fn weekly_today_counts_if_time_not_passed() {
        // Tuesday in the set, reference Tuesday 08:00 before the 09:00 slot.
        let spec = ScheduleSpec::weekly(vec![1], "09:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 2, 8, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 2, 9, 0));
    }

    #[test]
    fn weekly_empty_set_never_fires() {
        let spec = ScheduleSpec::weekly(vec![], "09:00");
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 2, 8, 0), None, 0).is_none());
    }

    #[test]
    fn monthly_day_31_clamps_in_february() {
        let spec = ScheduleSpec::monthly(31, "10:00");
        // Reference: Feb 1st 2024 (leap year).
        let next = next_due(&spec, Tz::UTC, utc(2024, 2, 1, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 2, 29, 10, 0));
        // Non-leap year clamps to the 28th.
        let next = next_due(&spec, Tz::UTC, utc(2025, 2, 1, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2025, 2, 28, 10, 0));
    }

    #[test]
    fn monthly_rolls_to_next_month_when_passed() {
        let spec = ScheduleSpec::monthly(15, "10:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 20, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 2, 15, 10, 0));
    }

    #[test]
    fn yearly_advances_past_this_years_instant() {
        let spec = ScheduleSpec {
            schedule_type: ScheduleType::Yearly,
            time_of_day: Some("12:00".to_string()),
            start_date: Some(date(2020, 3, 15)),
            ..ScheduleSpec::daily("12:00")
        };
        let next = next_due(&spec, Tz::UTC, utc(2024, 3, 16, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2025, 3, 15, 12, 0));
    }

    #[test]
    fn once_fires_only_while_future() {
        let spec = ScheduleSpec::once(date(2024, 5, 1), "09:00");
        let next = next_due(&spec, Tz::UTC, utc(2024, 4, 30, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 5, 1, 9, 0));
        assert!(next_due(&spec, Tz::UTC, utc(2024, 5, 1, 9, 30), None, 0).is_none());
    }

    #[test]
    fn once_without_start_date_never_fires() {
        let spec = ScheduleSpec {
            start_date: None,
            ..ScheduleSpec::once(date(2024, 5, 1), "09:00")
        };
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 1, 0, 0), None, 0).is_none());
    }

    #[test]
    fn interval_counts_from_prior_occurrence() {
        let spec = ScheduleSpec {
            schedule_type: ScheduleType::Interval,
            interval_days: Some(3),
            ..ScheduleSpec::daily("07:00")
        };
        let prior = utc(2024, 1, 10, 7, 0);
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 10, 7, 5), Some(prior), 1).unwrap();
        assert_eq!(next, utc(2024, 1, 13, 7, 0));
    }

    #[test]
    fn interval_without_prior_uses_today_or_n_days_out() {
        let spec = ScheduleSpec {
            schedule_type: ScheduleType::Interval,
            interval_days: Some(5),
            ..ScheduleSpec::daily("07:00")
        };
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 6, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 1, 7, 0));
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 8, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 6, 7, 0));
    }

    #[test]
    fn custom_returns_none() {
        let spec = ScheduleSpec {
            schedule_type: ScheduleType::Custom,
            expression: Some("*/5 * * * *".to_string()),
            ..ScheduleSpec::daily("07:00")
        };
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 1, 0, 0), None, 0).is_none());
    }

    #[test]
    fn max_occurrences_forces_none() {
        let spec = ScheduleSpec {
            max_occurrences: Some(3),
            ..ScheduleSpec::daily("08:00")
        };
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 1, 0, 0), None, 3).is_none());
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 1, 0, 0), None, 2).is_some());
    }

    #[test]
    fn end_date_forces_none() {
        let spec = ScheduleSpec {
            end_date: Some(date(2024, 1, 3)),
            ..ScheduleSpec::daily("08:00")
        };
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 3, 9, 0), None, 0).is_none());
        assert!(next_due(&spec, Tz::UTC, utc(2024, 1, 3, 7, 0), None, 0).is_some());
    }

    #[test]
    fn excluded_dates_skip_to_following_occurrence() {
        let spec = ScheduleSpec {
            excluded_dates: vec![date(2024, 1, 2)],
            ..ScheduleSpec::daily("08:00")
        };
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 9, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 1, 3, 8, 0));
    }

    #[test]
    fn start_date_acts_as_lower_bound() {
        let spec = ScheduleSpec {
            start_date: Some(date(2024, 2, 10)),
            ..ScheduleSpec::daily("08:00")
        };
        let next = next_due(&spec, Tz::UTC, utc(2024, 1, 1, 0, 0), None, 0).unwrap();
        assert_eq!(next, utc(2024, 2, 10, 8, 0));
    }

    #[test]
    fn spring_forward_gap_rolls_an_hour_later() {
        // Berlin skips 02:00-03:00 on 2024-03-31.
        let spec = ScheduleSpec::daily("02:30");
        let next = next_due(&spec, Berlin, utc(2024, 3, 30, 23, 0), None, 0).unwrap();
        // 02:30 local does not exist; 03:30 CEST = 01:30 UTC.
        assert_eq!(next, utc(2024, 3, 31, 1, 30));
    }

    #[test]
    fn fall_back_ambiguity_takes_earliest() {
        // Berlin repeats 02:00-03:00 on 2024-10-27.
        let spec = ScheduleSpec::daily("02:30");
        let next = next_due(&spec, Berlin, utc(2024, 10, 26, 23, 0), None, 0).unwrap();
        // Earliest mapping is CEST (UTC+2): 00:30 UTC.
        assert_eq!(next, utc(2024, 10, 27, 0, 30));
    }

    proptest! {
        #[test]
        fn next_due_is_idempotent(
            hour in 0u32..24,
            minute in 0u32..60,
            day_offset in 0i64..365,
            count in 0u32..5,
        ) {
            let spec = ScheduleSpec {
                max_occurrences: Some(10),
                ..ScheduleSpec::daily(&format!("{hour:02}:{minute:02}"))
            };
            let reference = utc(2024, 1, 1, 0, 0) + Duration::days(day_offset);
            let a = next_due(&spec, Berlin, reference, None, count);
            let b = next_due(&spec, Berlin, reference, None, count);
            prop_assert_eq!(a, b);
            if let Some(next) = a {
                prop_assert!(next > reference);
            }
        }

        #[test]
        fn weekly_result_lands_on_listed_weekday(
            day_a in 0u8..7,
            day_b in 0u8..7,
            day_offset in 0i64..60,
        ) {
            let spec = ScheduleSpec::weekly(vec![day_a, day_b], "09:00");
            let reference = utc(2024, 1, 1, 0, 0) + Duration::days(day_offset);
            if let Some(next) = next_due(&spec, Tz::UTC, reference, None, 0) {
                let wd = next.weekday().num_days_from_monday() as u8;
                prop_assert!(wd == day_a || wd == day_b);
            }
        }
    }
}
