//! Market-hours and expiry gating for the NSE cash session.
//!
//! All functions take the current instant as an argument so cycles can be
//! driven off an injected clock.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Asia::Kolkata;

/// Session open, exchange local time.
const SESSION_OPEN: NaiveTime = NaiveTime::from_hms_opt(9, 15, 0).unwrap();

/// Session close, exchange local time.
const SESSION_CLOSE: NaiveTime = NaiveTime::from_hms_opt(15, 30, 0).unwrap();

/// Weekly index expiry weekday.
const EXPIRY_WEEKDAY: Weekday = Weekday::Tue;

/// Whether the exchange is in its regular session at `now`.
pub fn is_market_open(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Kolkata);
    let weekday = local.weekday();
    if weekday == Weekday::Sat || weekday == Weekday::Sun {
        return false;
    }
    let time = local.time();
    time >= SESSION_OPEN && time <= SESSION_CLOSE
}

/// Today's date in exchange local time.
pub fn trading_date(now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&Kolkata).date_naive()
}

/// Whether `now` falls on the weekly expiry weekday.
pub fn is_expiry_day(now: DateTime<Utc>) -> bool {
    trading_date(now).weekday() == EXPIRY_WEEKDAY
}

/// Nearest weekly expiry not yet past. An expiry date stays selectable until
/// the session close on that day, then rolls to the following week.
pub fn nearest_weekly_expiry(now: DateTime<Utc>) -> NaiveDate {
    let local = now.with_timezone(&Kolkata);
    let today = local.date_naive();

    let days_ahead = (EXPIRY_WEEKDAY.num_days_from_monday() as i64
        - today.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);

    if days_ahead == 0 && local.time() > SESSION_CLOSE {
        today + chrono::Duration::days(7)
    } else {
        today + chrono::Duration::days(days_ahead)
    }
}

/// Pick the soonest broker-listed expiry that is still live at `now`,
/// falling back to the computed weekly expiry when the list is empty.
pub fn select_expiry(dates: &[NaiveDate], now: DateTime<Utc>) -> NaiveDate {
    let local = now.with_timezone(&Kolkata);
    let today = local.date_naive();

    dates
        .iter()
        .copied()
        .filter(|d| *d > today || (*d == today && local.time() <= SESSION_CLOSE))
        .min()
        .unwrap_or_else(|| nearest_weekly_expiry(now))
}
