//! Pure trigger-time arithmetic. No clocks are read here; callers pass
//! `now` and the idle signals in.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// When the user became idle.
///
/// The idle clock starts `grace` after the later of the last finished
/// generation and the last time the app went to the background. A user
/// message newer than that base point means the user is active again and
/// there is no idle start (`None`). With neither base signal recorded
/// there is nothing to measure from, which is also `None`.
pub fn idle_start(
    last_conversation_done_at: Option<DateTime<Utc>>,
    last_app_backgrounded_at: Option<DateTime<Utc>>,
    last_user_message_at: Option<DateTime<Utc>>,
    grace: Duration,
) -> Option<DateTime<Utc>> {
    let base = last_conversation_done_at.max(last_app_backgrounded_at)?;
    if last_user_message_at.is_some_and(|user| user > base) {
        return None;
    }
    Some(base + grace)
}

/// Earliest time the assistant may fire, or `None` while the user is not
/// idle.
pub fn next_trigger(
    last_triggered_at: Option<DateTime<Utc>>,
    idle_start: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
    quiet_hours: Option<(NaiveTime, NaiveTime)>,
    tz: Tz,
) -> Option<DateTime<Utc>> {
    let idle = idle_start?;
    let mut candidate = (idle + interval).max(now);
    if let Some(last) = last_triggered_at {
        candidate = candidate.max(last + interval);
    }
    Some(match quiet_hours {
        Some((start, end)) => shift_past_quiet_hours(candidate, start, end, tz),
        None => candidate,
    })
}

/// Move `candidate` to the end of the quiet window if it falls inside it.
///
/// The window is `[start, end)` in `tz` local time and wraps midnight when
/// `start > end`. `start == end` is an empty window.
pub fn shift_past_quiet_hours(
    candidate: DateTime<Utc>,
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
) -> DateTime<Utc> {
    if start == end {
        return candidate;
    }
    let local = candidate.with_timezone(&tz);
    let time = local.time();
    let date = local.date_naive();

    let end_date = if start < end {
        (time >= start && time < end).then_some(date)
    } else if time >= start {
        date.succ_opt()
    } else if time < end {
        Some(date)
    } else {
        None
    };

    match end_date {
        Some(day) => local_to_utc(tz, day, end).unwrap_or(candidate),
        None => candidate,
    }
}

/// Resolve a local wall-clock time, stepping forward out of a DST gap.
fn local_to_utc(tz: Tz, day: NaiveDate, time: NaiveTime) -> Option<DateTime<Utc>> {
    let naive = day.and_time(time);
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn wrapping_window_moves_late_evening_to_next_morning() {
        let shifted = shift_past_quiet_hours(at(23, 30), hm(22, 0), hm(6, 0), chrono_tz::UTC);
        assert_eq!(shifted, Utc.with_ymd_and_hms(2026, 3, 11, 6, 0, 0).unwrap());
    }

    #[test]
    fn wrapping_window_moves_early_morning_to_same_day() {
        let shifted = shift_past_quiet_hours(at(2, 15), hm(22, 0), hm(6, 0), chrono_tz::UTC);
        assert_eq!(shifted, at(6, 0));
    }

    #[test]
    fn time_outside_window_is_unchanged() {
        let shifted = shift_past_quiet_hours(at(10, 0), hm(22, 0), hm(6, 0), chrono_tz::UTC);
        assert_eq!(shifted, at(10, 0));
        // Window end is exclusive.
        let shifted = shift_past_quiet_hours(at(6, 0), hm(22, 0), hm(6, 0), chrono_tz::UTC);
        assert_eq!(shifted, at(6, 0));
    }

    #[test]
    fn daytime_window_and_timezone() {
        // 12:30 UTC is 13:30 in Berlin (CET), inside 13:00-15:00 local.
        let berlin: Tz = "Europe/Berlin".parse().unwrap();
        let shifted = shift_past_quiet_hours(at(12, 30), hm(13, 0), hm(15, 0), berlin);
        assert_eq!(shifted, at(14, 0));
    }

    #[test]
    fn next_trigger_takes_the_latest_candidate() {
        let interval = Duration::minutes(60);
        let idle = Some(at(8, 0));
        let now = at(8, 30);

        let next = next_trigger(None, idle, interval, now, None, chrono_tz::UTC);
        assert_eq!(next, Some(at(9, 0)));

        let next = next_trigger(Some(at(8, 45)), idle, interval, now, None, chrono_tz::UTC);
        assert_eq!(next, Some(at(9, 45)));

        let next = next_trigger(None, idle, interval, at(11, 0), None, chrono_tz::UTC);
        assert_eq!(next, Some(at(11, 0)));

        assert_eq!(next_trigger(None, None, interval, now, None, chrono_tz::UTC), None);
    }

    #[test]
    fn next_trigger_respects_quiet_hours() {
        let next = next_trigger(
            None,
            Some(at(22, 0)),
            Duration::minutes(30),
            at(22, 10),
            Some((hm(22, 0), hm(6, 0))),
            chrono_tz::UTC,
        );
        assert_eq!(next, Some(Utc.with_ymd_and_hms(2026, 3, 11, 6, 0, 0).unwrap()));
    }

    #[test]
    fn idle_starts_after_grace() {
        let grace = Duration::seconds(60);
        assert_eq!(
            idle_start(Some(at(9, 0)), Some(at(9, 30)), Some(at(8, 0)), grace),
            Some(at(9, 31))
        );
        assert_eq!(idle_start(None, None, None, grace), None);
    }

    fn stamp() -> impl Strategy<Value = DateTime<Utc>> {
        (0i64..10_000_000).prop_map(|s| Utc.timestamp_opt(1_700_000_000 + s, 0).unwrap())
    }

    proptest! {
        #[test]
        fn newer_user_message_means_never_idle(
            done in proptest::option::of(stamp()),
            backgrounded in proptest::option::of(stamp()),
            user in stamp(),
            grace in 0i64..3600,
        ) {
            let base = done.max(backgrounded);
            let result = idle_start(done, backgrounded, Some(user), Duration::seconds(grace));
            match base {
                Some(base) if user > base => prop_assert_eq!(result, None),
                Some(base) => prop_assert_eq!(result, Some(base + Duration::seconds(grace))),
                None => prop_assert_eq!(result, None),
            }
        }

        #[test]
        fn shifted_time_is_never_earlier_or_inside_window(
            t in stamp(),
            start_min in 0u32..1440,
            end_min in 0u32..1440,
        ) {
            let start = NaiveTime::from_hms_opt(start_min / 60, start_min % 60, 0).unwrap();
            let end = NaiveTime::from_hms_opt(end_min / 60, end_min % 60, 0).unwrap();
            let shifted = shift_past_quiet_hours(t, start, end, chrono_tz::UTC);
            prop_assert!(shifted >= t);
            let time = shifted.time();
            let inside = if start < end {
                time >= start && time < end
            } else if start > end {
                time >= start || time < end
            } else {
                false
            };
            prop_assert!(!inside);
        }
    }
}
