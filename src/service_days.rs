use chrono::{Datelike, Days, NaiveDate, Weekday};

pub const MONDAY: u8 = 1 << 0;
pub const TUESDAY: u8 = 1 << 1;
pub const WEDNESDAY: u8 = 1 << 2;
pub const THURSDAY: u8 = 1 << 3;
pub const FRIDAY: u8 = 1 << 4;
pub const SATURDAY: u8 = 1 << 5;
pub const SUNDAY: u8 = 1 << 6;
pub const ALL_WEEK: u8 = MONDAY | TUESDAY | WEDNESDAY | THURSDAY | FRIDAY | SATURDAY | SUNDAY;

/// The active-days bitmask covers this many days past the reference date.
const WINDOW_DAYS: u64 = 64;

// Offset between Julian day numbers and chrono's days-from-CE
// (JDN 2440588 = 1970-01-01 = day 719163 from CE).
const JDN_TO_CE: i64 = 1_721_425;

/// Converts a Julian day number (the transit feed's date encoding) to a date.
pub fn from_julian_day(jdn: u32) -> Option<NaiveDate> {
    let days_from_ce = i64::from(jdn) - JDN_TO_CE;
    NaiveDate::from_num_days_from_ce_opt(i32::try_from(days_from_ce).ok()?)
}

pub fn dow_bit(weekday: Weekday) -> u8 {
    1 << weekday.num_days_from_monday()
}

/// Bitmask of active service days: bit `k` is set iff day `k` after
/// `reference` lies within `[start, end]` and its weekday is in `dow_mask`.
pub fn service_days(start: NaiveDate, end: NaiveDate, reference: NaiveDate, dow_mask: u8) -> u64 {
    let mut days = 0u64;
    for k in 0..WINDOW_DAYS {
        let Some(date) = reference.checked_add_days(Days::new(k)) else {
            break;
        };
        if date > end {
            break;
        }
        if date < start {
            continue;
        }
        if dow_mask & dow_bit(date.weekday()) != 0 {
            days |= 1 << k;
        }
    }
    days
}

fn day_bit(start: NaiveDate, end: NaiveDate, reference: NaiveDate, date: NaiveDate) -> Option<u64> {
    if date < start || date > end {
        return None;
    }
    let k = (date - reference).num_days();
    if !(0..WINDOW_DAYS as i64).contains(&k) {
        return None;
    }
    Some(1u64 << k)
}

/// Clears the bit for `date`; a no-op when the date is outside `[start, end]`
/// or outside the bitmask window.
pub fn remove_day(
    mask: u64,
    start: NaiveDate,
    end: NaiveDate,
    reference: NaiveDate,
    date: NaiveDate,
) -> u64 {
    match day_bit(start, end, reference, date) {
        Some(bit) => mask & !bit,
        None => mask,
    }
}

/// Sets the bit for `date`; a no-op under the same conditions as [`remove_day`].
pub fn add_day(
    mask: u64,
    start: NaiveDate,
    end: NaiveDate,
    reference: NaiveDate,
    date: NaiveDate,
) -> u64 {
    match day_bit(start, end, reference, date) {
        Some(bit) => mask | bit,
        None => mask,
    }
}

/// Days between the service start and end dates.
pub fn end_day_offset(start: NaiveDate, end: NaiveDate) -> u32 {
    (end - start).num_days().max(0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn julian_day_conversion() {
        assert_eq!(from_julian_day(2_440_588), Some(d(1970, 1, 1)));
        assert_eq!(from_julian_day(2_458_850), Some(d(2020, 1, 1)));
    }

    #[test]
    fn weekday_window() {
        // One week of Mon-Fri service starting on a Wednesday reference.
        let start = d(2020, 1, 1); // Wednesday
        let end = d(2020, 1, 7);
        let mask = service_days(start, end, start, MONDAY | TUESDAY | WEDNESDAY | THURSDAY | FRIDAY);
        // Wed Thu Fri set, Sat Sun clear, Mon Tue set.
        assert_eq!(mask, 0b1100111);
    }

    #[test]
    fn excluded_date_clears_one_bit() {
        let start = d(2020, 6, 1);
        let end = d(2020, 6, 7);
        let mask = service_days(start, end, start, ALL_WEEK);
        assert_eq!(mask, 0b1111111);
        let mask = remove_day(mask, start, end, start, d(2020, 6, 4));
        assert_eq!(mask, 0b1110111);
    }

    #[test]
    fn remove_then_add_round_trips() {
        let start = d(2020, 6, 1);
        let end = d(2020, 6, 30);
        let reference = d(2020, 6, 1);
        let mask = service_days(start, end, reference, ALL_WEEK);

        let date = d(2020, 6, 10);
        let removed = remove_day(mask, start, end, reference, date);
        assert_ne!(removed, mask);
        assert_eq!(add_day(removed, start, end, reference, date), mask);
    }

    #[test]
    fn out_of_range_dates_are_no_ops() {
        let start = d(2020, 6, 1);
        let end = d(2020, 6, 7);
        let reference = start;
        let mask = service_days(start, end, reference, ALL_WEEK);

        assert_eq!(remove_day(mask, start, end, reference, d(2020, 5, 31)), mask);
        assert_eq!(remove_day(mask, start, end, reference, d(2020, 6, 8)), mask);
        assert_eq!(add_day(mask, start, end, reference, d(2021, 1, 1)), mask);
    }

    #[test]
    fn window_caps_at_sixty_four_days() {
        let start = d(2020, 1, 1);
        let end = d(2021, 1, 1);
        let mask = service_days(start, end, start, ALL_WEEK);
        assert_eq!(mask, u64::MAX);

        // A date past the window cannot be added even though it is in range.
        assert_eq!(add_day(0, start, end, start, d(2020, 6, 1)), 0);
    }

    #[test]
    fn no_bits_before_late_start() {
        // Reference precedes the service start; leading bits stay clear.
        let reference = d(2020, 6, 1);
        let start = d(2020, 6, 3);
        let end = d(2020, 6, 5);
        let mask = service_days(start, end, reference, ALL_WEEK);
        assert_eq!(mask, 0b11100);
    }

    #[test]
    fn no_bit_past_the_service_end() {
        let start = d(2020, 6, 1);
        let end = d(2020, 6, 10);
        let mask = service_days(start, end, start, ALL_WEEK);
        let end_day = end_day_offset(start, end);
        assert_eq!(mask >> (end_day + 1), 0);
        assert_ne!(mask & (1 << end_day), 0);
    }

    #[test]
    fn end_day_offset_spans() {
        assert_eq!(end_day_offset(d(2020, 1, 1), d(2020, 12, 31)), 365); // leap year
        assert_eq!(end_day_offset(d(2020, 6, 1), d(2020, 6, 1)), 0);
        assert_eq!(end_day_offset(d(2020, 6, 7), d(2020, 6, 1)), 0);
    }
}
