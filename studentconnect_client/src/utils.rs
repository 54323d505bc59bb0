use chrono::{DateTime, NaiveDateTime, Utc};

/// Renders a backend timestamp as `YYYY-MM-DD HH:MM` (UTC).
///
/// The backend emits naive ISO timestamps (`2024-03-01T10:00:00.123000`);
/// RFC 3339 with an offset is accepted too. Anything else is returned as-is.
pub fn display_timestamp(raw: &str) -> String {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc).format("%Y-%m-%d %H:%M").to_string();
    }
    match NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => naive.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}
