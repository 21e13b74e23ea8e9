//! Civil calendar derivation from epoch seconds.
//!
//! The wall clock itself is owned by the platform (NTP on the hub); this
//! module only turns epoch seconds into the `{year, month, day}` triple the
//! rotation policy keys its file paths on.

pub const SECONDS_PER_MINUTE: u32 = 60;
pub const SECONDS_PER_HOUR: u32 = 3600;
pub const SECONDS_PER_DAY: u32 = 86_400;

/// Days in each month of a non-leap year.
const DAYS_IN_MONTH: [u32; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Calendar date used to key rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Date {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl Date {
    /// Two-digit year used in the on-card directory scheme.
    pub const fn year2(&self) -> u8 {
        (self.year % 100) as u8
    }
}

pub const fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Derive the civil date for an epoch timestamp, after applying the caller's
/// fixed UTC offset. Offsets that would move the clock before the epoch
/// clamp to 1970-01-01.
pub fn date_from_epoch(epoch_secs: u32, tz_offset_secs: i32) -> Date {
    let local = (i64::from(epoch_secs) + i64::from(tz_offset_secs)).max(0) as u64;
    let mut days_remaining = (local / u64::from(SECONDS_PER_DAY)) as u32;

    let mut year: u16 = 1970;
    loop {
        let days_in_year = if is_leap_year(year) { 366 } else { 365 };
        if days_remaining < days_in_year {
            break;
        }
        days_remaining -= days_in_year;
        year += 1;
    }

    let mut month: u8 = 1;
    for (m, &base_days) in DAYS_IN_MONTH.iter().enumerate() {
        let mut days_in_month = base_days;
        if m == 1 && is_leap_year(year) {
            days_in_month = 29;
        }
        if days_remaining < days_in_month {
            break;
        }
        days_remaining -= days_in_month;
        month += 1;
    }

    Date {
        year,
        month,
        // days_remaining is 0-based
        day: (days_remaining + 1) as u8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_start() {
        let date = date_from_epoch(0, 0);
        assert_eq!(
            date,
            Date {
                year: 1970,
                month: 1,
                day: 1
            }
        );
    }

    #[test]
    fn test_known_date() {
        // 2025-12-30 00:00:00 UTC
        let date = date_from_epoch(1_766_966_400, 0);
        assert_eq!(
            date,
            Date {
                year: 2025,
                month: 12,
                day: 30
            }
        );
    }

    #[test]
    fn test_leap_day() {
        // 2024-02-29 12:00:00 UTC
        let date = date_from_epoch(1_709_208_000, 0);
        assert_eq!(
            date,
            Date {
                year: 2024,
                month: 2,
                day: 29
            }
        );
    }

    #[test]
    fn test_offset_crosses_midnight() {
        // 2025-06-01 23:30:00 UTC, +1h offset lands on June 2nd
        let base = 1_748_820_600;
        assert_eq!(date_from_epoch(base, 0).day, 1);
        assert_eq!(date_from_epoch(base, 3600).day, 2);
    }

    #[test]
    fn test_negative_offset_clamps_at_epoch() {
        let date = date_from_epoch(60, -86_400);
        assert_eq!(date.year, 1970);
        assert_eq!(date.month, 1);
        assert_eq!(date.day, 1);
    }

    #[test]
    fn test_year2() {
        let date = Date {
            year: 2025,
            month: 8,
            day: 7,
        };
        assert_eq!(date.year2(), 25);
    }
}
