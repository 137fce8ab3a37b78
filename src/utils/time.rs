//! Day boundaries in a user's timezone
//!
//! Timezones are IANA names (`America/Denver`) or fixed UTC offsets
//! (`+02:00`, `-0500`, `UTC`).

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// A user's timezone as stored on their profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserTimezone {
    Named(Tz),
    Fixed(FixedOffset),
}

impl UserTimezone {
    /// IANA names first, then fixed offsets, then UTC
    pub fn parse(timezone: &str) -> Self {
        match timezone.trim().parse::<Tz>() {
            Ok(named) => Self::Named(named),
            Err(_) => Self::Fixed(parse_utc_offset(timezone)),
        }
    }

    /// The local date at `instant`
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        match self {
            Self::Named(tz) => instant.with_timezone(tz).date_naive(),
            Self::Fixed(offset) => instant.with_timezone(offset).date_naive(),
        }
    }

    /// `[start, end)` of the local day containing `now`, in UTC
    ///
    /// Days across a DST change are 23 or 25 hours long.
    pub fn day_bounds(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let date = self.local_date(now);
        let start = self.start_of(date).unwrap_or(now);
        let end = date
            .succ_opt()
            .and_then(|next| self.start_of(next))
            .unwrap_or(start + Duration::days(1));
        (start, end)
    }

    fn start_of(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        match self {
            Self::Named(tz) => first_instant(tz, date),
            Self::Fixed(offset) => first_instant(offset, date),
        }
    }
}

/// First instant of `date` in `zone`
fn first_instant<Z: TimeZone>(zone: &Z, date: NaiveDate) -> Option<DateTime<Utc>> {
    // Midnight itself can fall into a DST gap
    (0..3)
        .find_map(|hour| {
            let local = date.and_hms_opt(hour, 0, 0)?;
            zone.from_local_datetime(&local).earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a fixed UTC offset, falling back to UTC when it is unusable
pub fn parse_utc_offset(timezone: &str) -> FixedOffset {
    let tz = timezone.trim();
    let utc = Utc.fix();

    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return utc;
    }

    let (sign, rest) = match tz.as_bytes()[0] {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => {
            warn!("Unrecognised timezone {:?}, using UTC", timezone);
            return utc;
        }
    };

    let digits: String = rest.chars().filter(|c| *c != ':').collect();
    let parsed = match digits.len() {
        _ if !digits.chars().all(|c| c.is_ascii_digit()) => None,
        1 | 2 => digits.parse::<i32>().ok().map(|h| (h, 0)),
        4 => digits[..2]
            .parse::<i32>()
            .ok()
            .zip(digits[2..].parse::<i32>().ok()),
        _ => None,
    };

    match parsed {
        Some((hours, minutes)) if hours <= 14 && minutes < 60 => {
            FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).unwrap_or(utc)
        }
        _ => {
            warn!("Unrecognised timezone {:?}, using UTC", timezone);
            utc
        }
    }
}

/// Today's bounds for a stored timezone string
pub fn today_bounds(timezone: &str) -> (DateTime<Utc>, DateTime<Utc>) {
    UserTimezone::parse(timezone).day_bounds(Utc::now())
}
