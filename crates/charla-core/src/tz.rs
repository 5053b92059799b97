//! Fixed-offset timezone resolution.
//!
//! Timezones are carried as offset strings ("UTC", "+02:00", "-05:30")
//! and resolved with precedence client → channel → process default.

use chrono::{DateTime, FixedOffset, Utc};

/// Parse an offset string. Returns `None` for anything unrecognised.
pub fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz.is_empty() {
        return None;
    }
    if tz.eq_ignore_ascii_case("utc") || tz == "Z" || tz == "+00:00" {
        return FixedOffset::east_opt(0);
    }

    let (sign, rest) = match tz.as_bytes()[0] {
        b'+' => (1i32, &tz[1..]),
        b'-' => (-1i32, &tz[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

/// Resolve with precedence: client, then channel, then the
/// process-wide default, then UTC.
pub fn resolve(
    client_tz: Option<&str>,
    channel_tz: Option<&str>,
    default_tz: &str,
) -> FixedOffset {
    client_tz
        .and_then(parse_offset)
        .or_else(|| channel_tz.and_then(parse_offset))
        .or_else(|| parse_offset(default_tz))
        .unwrap_or_else(|| FixedOffset::east_opt(0).unwrap())
}

/// Local wall-clock time for `now` in the given offset.
pub fn local_now(offset: FixedOffset, now: DateTime<Utc>) -> DateTime<FixedOffset> {
    now.with_timezone(&offset)
}

/// Human day-moment bucket for the dynamic prompt block.
pub fn day_moment(hour: u32) -> &'static str {
    match hour {
        0..=5 => "madrugada",
        6..=11 => "morning",
        12..=19 => "afternoon",
        _ => "evening",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_common_forms() {
        assert_eq!(parse_offset("UTC").unwrap().local_minus_utc(), 0);
        assert_eq!(parse_offset("+02:00").unwrap().local_minus_utc(), 7200);
        assert_eq!(parse_offset("-05:30").unwrap().local_minus_utc(), -(5 * 3600 + 1800));
        assert!(parse_offset("Europe/Madrid").is_none());
        assert!(parse_offset("+15:00").is_none());
    }

    #[test]
    fn precedence_client_first() {
        let offset = resolve(Some("+01:00"), Some("-03:00"), "UTC");
        assert_eq!(offset.local_minus_utc(), 3600);
        let offset = resolve(None, Some("-03:00"), "UTC");
        assert_eq!(offset.local_minus_utc(), -3 * 3600);
        let offset = resolve(None, None, "UTC");
        assert_eq!(offset.local_minus_utc(), 0);
    }

    #[test]
    fn local_hour_shifts() {
        let now = "2026-08-01T23:30:00Z".parse::<DateTime<Utc>>().unwrap();
        let local = local_now(parse_offset("+02:00").unwrap(), now);
        assert_eq!(local.hour(), 1);
    }
}
