use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Events without an explicit timezone display in the platform's home zone.
pub const DEFAULT_APP_TIMEZONE: &str = "America/Mexico_City";

/// Best-effort timezone resolver. An unknown or missing IANA name falls back
/// to the app default, then UTC, rather than failing the caller.
pub fn target_timezone(tz_name: Option<&str>) -> Tz {
    if let Some(name) = tz_name
        && let Ok(tz) = name.parse::<Tz>()
    {
        return tz;
    }

    DEFAULT_APP_TIMEZONE.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

/// Wall-clock HH:MM in the event's timezone, as stamped on chat and question
/// envelopes.
pub fn now_hhmm(tz_name: Option<&str>) -> String {
    Utc::now()
        .with_timezone(&target_timezone(tz_name))
        .format("%H:%M")
        .to_string()
}

/// Durable timestamps are stored UTC and converted for display only here.
pub fn format_local(at: DateTime<Utc>, tz_name: Option<&str>) -> String {
    at.with_timezone(&target_timezone(tz_name))
        .format("%Y-%m-%d %H:%M")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unknown_timezone_falls_back() {
        assert_eq!(
            target_timezone(Some("Atlantis/Lost")),
            target_timezone(None)
        );
    }

    #[test]
    fn format_local_converts_from_utc() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 18, 0, 0).unwrap();
        assert_eq!(format_local(at, Some("UTC")), "2026-03-01 18:00");
        // Mexico City is UTC-6 outside DST.
        assert_eq!(
            format_local(at, Some("America/Mexico_City")),
            "2026-03-01 12:00"
        );
    }
}
