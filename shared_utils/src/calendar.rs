//! Trading-calendar date math.
//!
//! Exchange-traded instruments only produce day aggregates on weekdays;
//! continuous markets produce them every day. Gap reporting works on the
//! same weekday calendar so that weekends never show up as "missing".

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, Weekday};

/// True for Monday through Friday.
pub fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// All calendar days in `[start, end]`, ascending. Empty when `start > end`.
pub fn calendar_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        let Some(next) = current.succ_opt() else {
            break;
        };
        current = next;
    }
    days
}

/// Weekdays in `[start, end]`, ascending. Empty when `start > end`.
pub fn business_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    calendar_days(start, end)
        .into_iter()
        .filter(|d| is_weekday(*d))
        .collect()
}

/// Weekdays in `[start, end]` that are not in `present`.
pub fn missing_business_days(
    start: NaiveDate,
    end: NaiveDate,
    present: &BTreeSet<NaiveDate>,
) -> Vec<NaiveDate> {
    business_days(start, end)
        .into_iter()
        .filter(|d| !present.contains(d))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn business_days_skip_weekends() {
        // 2024-01-02 is a Tuesday; the 6th/7th are the weekend.
        let days = business_days(d(2024, 1, 2), d(2024, 1, 9));
        assert_eq!(
            days,
            vec![
                d(2024, 1, 2),
                d(2024, 1, 3),
                d(2024, 1, 4),
                d(2024, 1, 5),
                d(2024, 1, 8),
                d(2024, 1, 9),
            ]
        );
    }

    #[test]
    fn reversed_range_is_empty() {
        assert!(business_days(d(2024, 1, 9), d(2024, 1, 2)).is_empty());
        assert!(calendar_days(d(2024, 1, 9), d(2024, 1, 2)).is_empty());
    }

    #[test]
    fn missing_days_exclude_weekends() {
        // Present on Jan 2, 3, 5, 8, 9 -> only Jan 4 is reported missing.
        let present: BTreeSet<NaiveDate> = [
            d(2024, 1, 2),
            d(2024, 1, 3),
            d(2024, 1, 5),
            d(2024, 1, 8),
            d(2024, 1, 9),
        ]
        .into_iter()
        .collect();

        let gaps = missing_business_days(d(2024, 1, 2), d(2024, 1, 9), &present);
        assert_eq!(gaps, vec![d(2024, 1, 4)]);
    }

    #[test]
    fn single_day_range() {
        assert_eq!(calendar_days(d(2024, 1, 6), d(2024, 1, 6)), vec![d(2024, 1, 6)]);
        assert!(business_days(d(2024, 1, 6), d(2024, 1, 6)).is_empty());
    }
}
