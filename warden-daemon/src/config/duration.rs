//! Human-readable durations for delays and timeouts ("250ms", "5s", "2m").

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

const SECOND_MS: u64 = 1000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;

/// Parse a duration such as `"100ms"`, `"10s"`, `"5m"`, `"1h"` or `"1d"`.
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Empty duration string".to_string());
    }

    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (num_str, unit) = s.split_at(split);

    let num: u64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", s))?;

    let unit_ms = match unit.trim().to_lowercase().as_str() {
        "ms" => 1,
        "" | "s" => SECOND_MS,
        "m" => MINUTE_MS,
        "h" => HOUR_MS,
        "d" => DAY_MS,
        other => return Err(format!("Unknown duration unit: {}", other)),
    };

    num.checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("Duration value too large: {}", s))
}

/// Format using the largest unit that divides the duration evenly.
pub fn format_duration(duration: &Duration) -> String {
    let millis = duration.as_millis() as u64;
    if millis == 0 {
        return "0s".to_string();
    }

    for (unit_ms, suffix) in [(DAY_MS, "d"), (HOUR_MS, "h"), (MINUTE_MS, "m"), (SECOND_MS, "s")] {
        if millis.is_multiple_of(unit_ms) {
            return format!("{}{}", millis / unit_ms, suffix);
        }
    }
    format!("{}ms", millis)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

/// Deserialize from either a duration string or a bare number of seconds.
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

pub fn serialize_duration<S>(
    duration: &Duration,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_duration(duration))
}
