//! Billable-day calculation for rentals.
//!
//! A rental is billed per calendar day between pickup and return. Same-day
//! rentals are always one day. Across dates, the return day is billed as an
//! extra day unless the return happens at exactly the pickup clock time or
//! exactly at midnight, both of which close the previous day.
//!
//! The count is not monotone in the return time: a return at 10:00 bills one
//! day fewer than a return at 00:01 the same day.

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RentalDaysError {
    #[error("rental ends at {end} before it starts at {start}")]
    EndBeforeStart {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
    #[error("rental spans {0} days which exceeds the supported range")]
    OutOfRange(i64),
}

/// Billable days between two zoned instants.
///
/// `end` is projected onto `start`'s timezone so that clock times compare on
/// the same wall clock.
pub fn calculate_rental_days<Tz: TimeZone>(
    start: &DateTime<Tz>,
    end: &DateTime<Tz>,
) -> Result<u32, RentalDaysError> {
    let end_local = end.with_timezone(&start.timezone());
    calculate_rental_days_naive(start.naive_local(), end_local.naive_local())
}

/// Billable days between two wall-clock timestamps.
pub fn calculate_rental_days_naive(
    start: NaiveDateTime,
    end: NaiveDateTime,
) -> Result<u32, RentalDaysError> {
    if end < start {
        return Err(RentalDaysError::EndBeforeStart { start, end });
    }

    let date_delta = (end.date() - start.date()).num_days();
    if date_delta == 0 {
        return Ok(1);
    }

    let closes_previous_day = end.time() == start.time() || end.time() == NaiveTime::MIN;
    let days = date_delta + i64::from(!closes_previous_day);

    u32::try_from(days).map_err(|_| RentalDaysError::OutOfRange(days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, FixedOffset, NaiveDate};
    use proptest::prelude::*;

    fn at(date: &str, time: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(&format!("{date} {time}"), "%Y-%m-%d %H:%M")
            .expect("valid test timestamp")
    }

    fn days(start: NaiveDateTime, end: NaiveDateTime) -> u32 {
        calculate_rental_days_naive(start, end).expect("valid period")
    }

    #[test]
    fn documented_cases() {
        let cases = [
            (("2024-09-08", "10:00"), ("2024-09-10", "10:00"), 2),
            (("2024-09-08", "10:00"), ("2024-09-10", "10:01"), 3),
            (("2024-09-08", "23:00"), ("2024-09-09", "01:00"), 2),
            (("2024-09-08", "10:00"), ("2024-09-10", "00:00"), 2),
            (("2024-09-08", "10:00"), ("2024-09-10", "00:01"), 3),
            (("2024-09-08", "08:00"), ("2024-09-08", "20:00"), 1),
        ];
        for ((start_date, start_time), (end_date, end_time), expected) in cases {
            assert_eq!(
                days(at(start_date, start_time), at(end_date, end_time)),
                expected,
                "{start_date}T{start_time} -> {end_date}T{end_time}"
            );
        }
    }

    #[test]
    fn earlier_clock_time_still_bills_the_return_day() {
        assert_eq!(days(at("2024-09-08", "10:00"), at("2024-09-10", "09:59")), 3);
    }

    #[test]
    fn midnight_pickup_and_return() {
        assert_eq!(days(at("2024-09-08", "00:00"), at("2024-09-10", "00:00")), 2);
        assert_eq!(days(at("2024-09-08", "00:00"), at("2024-09-10", "00:01")), 3);
    }

    #[test]
    fn late_pickup_returned_at_the_same_time() {
        assert_eq!(days(at("2024-09-08", "23:00"), at("2024-09-09", "23:00")), 1);
        assert_eq!(days(at("2024-09-08", "23:00"), at("2024-09-09", "23:30")), 2);
    }

    #[test]
    fn same_day_is_one_day() {
        assert_eq!(days(at("2024-09-08", "00:00"), at("2024-09-08", "23:59")), 1);
        assert_eq!(days(at("2024-09-08", "10:00"), at("2024-09-08", "10:00")), 1);
    }

    #[test]
    fn reversed_period_is_rejected() {
        let start = at("2024-09-10", "10:00");
        let end = at("2024-09-08", "10:00");
        assert_eq!(
            calculate_rental_days_naive(start, end),
            Err(RentalDaysError::EndBeforeStart { start, end })
        );
    }

    #[test]
    fn end_is_projected_onto_start_timezone() {
        let cet = FixedOffset::east_opt(2 * 3600).expect("valid offset");
        let start = cet
            .with_ymd_and_hms(2024, 9, 8, 10, 0, 0)
            .single()
            .expect("unambiguous");
        // 08:00 UTC is 10:00 in the start's zone.
        let end = chrono::Utc
            .with_ymd_and_hms(2024, 9, 10, 8, 0, 0)
            .single()
            .expect("unambiguous")
            .with_timezone(&FixedOffset::east_opt(0).expect("valid offset"));
        assert_eq!(calculate_rental_days(&start, &end), Ok(2));
    }

    proptest! {
        #[test]
        fn same_date_always_one_day(day in 0u32..365, a in 0u32..86_400, b in 0u32..86_400) {
            let date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date") + Duration::days(i64::from(day));
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            let start = date.and_hms_opt(lo / 3600, (lo / 60) % 60, lo % 60).expect("valid time");
            let end = date.and_hms_opt(hi / 3600, (hi / 60) % 60, hi % 60).expect("valid time");
            prop_assert_eq!(calculate_rental_days_naive(start, end), Ok(1));
        }

        #[test]
        fn across_dates_bills_delta_or_one_more(start_min in 0i64..100_000, len in 1i64..50_000) {
            let start = at("2024-01-01", "00:00") + Duration::minutes(start_min);
            let end = start + Duration::minutes(len);
            let delta = (end.date() - start.date()).num_days();
            prop_assume!(delta > 0);
            let billed = i64::from(days(start, end));
            prop_assert!(billed == delta || billed == delta + 1);
        }
    }
}
