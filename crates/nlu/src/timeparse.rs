//! Natural-language time phrases
//!
//! Deterministic parsing of the reminder vocabulary: "kal", "aaj", "parso",
//! "7 baje", "tomorrow 7 pm", with a fallback of now + 1 hour. The caller
//! passes `now` explicitly so tests freeze both the clock and the timezone.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::transliterate::transliterate;

static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})(?::(\d{2}))?\s*(am|pm|baje|o'?clock)?\b").unwrap());

/// Default reminder hour when only a day is given (10:00 shop-opening).
const DEFAULT_HOUR: u32 = 10;

/// Parse a spoken time phrase into a UTC instant.
///
/// Rules, applied in order:
/// - day offset: "parso"/"day after" = +2, "kal"/"tomorrow" = +1,
///   "aaj"/"today" = +0 (a clock time with no day word also means today)
/// - clock time: "7 baje", "7 pm", "19:30"; a bare "baje" hour of 1-7 is
///   taken as evening (shop hours), 8-11 as morning
/// - a resulting instant already in the past rolls forward one day
/// - nothing parseable at all falls back to now + 1 hour
pub fn parse_when(text: &str, tz: Tz, now: DateTime<Utc>) -> DateTime<Utc> {
    let text = transliterate(text).to_lowercase();
    let local_now = now.with_timezone(&tz);

    // token match, not substring: "nikal" must not read as "kal"
    let has_token = |w: &str| text.split_whitespace().any(|t| t == w);
    let day_offset = if has_token("parso") || text.contains("day after") {
        Some(2)
    } else if has_token("kal") || has_token("tomorrow") {
        Some(1)
    } else if has_token("aaj") || has_token("today") {
        Some(0)
    } else {
        None
    };

    let clock = parse_clock(&text);

    if day_offset.is_none() && clock.is_none() {
        return now + Duration::hours(1);
    }

    let date = local_now.date_naive() + Duration::days(day_offset.unwrap_or(0));
    let time = clock.unwrap_or_else(|| NaiveTime::from_hms_opt(DEFAULT_HOUR, 0, 0).unwrap());

    let naive = date.and_time(time);
    let mut local = match tz.from_local_datetime(&naive).earliest() {
        Some(dt) => dt,
        None => return now + Duration::hours(1),
    };

    // "7 baje" said at 8pm means tomorrow evening
    if local <= local_now {
        local += Duration::days(1);
    }

    local.with_timezone(&Utc)
}

fn parse_clock(text: &str) -> Option<NaiveTime> {
    for caps in TIME_RE.captures_iter(text) {
        let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
        if hour > 23 {
            continue;
        }
        let minute: u32 = caps
            .get(2)
            .map(|m| m.as_str().parse().unwrap_or(0))
            .unwrap_or(0);
        if minute > 59 {
            continue;
        }

        let marker = caps.get(3).map(|m| m.as_str().to_lowercase());
        let hour = match marker.as_deref() {
            Some("pm") => {
                if hour < 12 {
                    hour + 12
                } else {
                    hour
                }
            }
            Some("am") => {
                if hour == 12 {
                    0
                } else {
                    hour
                }
            }
            Some("baje") | Some("oclock") | Some("o'clock") => {
                // bare hours under 8 are evening in a shop's day
                if (1..=7).contains(&hour) {
                    hour + 12
                } else {
                    hour
                }
            }
            _ => {
                // bare number without marker: only accept 24h-looking values
                if caps.get(2).is_none() {
                    continue;
                }
                hour
            }
        };

        return NaiveTime::from_hms_opt(hour, minute, 0);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    fn fixed_now() -> DateTime<Utc> {
        // 2024-03-15 09:30 IST = 04:00 UTC
        Utc.with_ymd_and_hms(2024, 3, 15, 4, 0, 0).unwrap()
    }

    fn ist() -> Tz {
        chrono_tz::Asia::Kolkata
    }

    #[test]
    fn kal_defaults_to_morning() {
        let t = parse_when("kal yaad dilana", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!(local.date_naive().to_string(), "2024-03-16");
        assert_eq!(local.hour(), 10);
    }

    #[test]
    fn saat_baje_is_evening() {
        let t = parse_when("aaj 7 baje", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!(local.date_naive().to_string(), "2024-03-15");
        assert_eq!(local.hour(), 19);
    }

    #[test]
    fn tomorrow_seven_pm() {
        let t = parse_when("tomorrow 7 pm", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!(local.date_naive().to_string(), "2024-03-16");
        assert_eq!(local.hour(), 19);
    }

    #[test]
    fn past_time_rolls_forward() {
        // 8 am already passed at 9:30 local
        let t = parse_when("aaj 8 baje", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!(local.date_naive().to_string(), "2024-03-16");
        assert_eq!(local.hour(), 8);
    }

    #[test]
    fn parso_is_day_after() {
        let t = parse_when("parso", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!(local.date_naive().to_string(), "2024-03-17");
    }

    #[test]
    fn fallback_is_one_hour() {
        let t = parse_when("jab time mile", ist(), fixed_now());
        assert_eq!(t, fixed_now() + Duration::hours(1));
    }

    #[test]
    fn explicit_24h_clock() {
        let t = parse_when("kal 19:30", ist(), fixed_now());
        let local = t.with_timezone(&ist());
        assert_eq!((local.hour(), local.minute()), (19, 30));
    }

    #[test]
    fn deterministic_given_frozen_clock() {
        let a = parse_when("kal 7 baje", ist(), fixed_now());
        let b = parse_when("kal 7 baje", ist(), fixed_now());
        assert_eq!(a, b);
    }
}
