//! Duration parsing for cache expiration settings
//!
//! Accepted forms: integer seconds (`900`), TimeSpan text (`00:15:00`,
//! `1.00:00:00`, `00:00:00.500`) and humanized text (`15m`, `30s`, `1h 30m`).

use serde::{de, Deserializer, Serializer};
use std::fmt;
use std::time::Duration;

use crate::error::{AppConfigError, Result};

pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AppConfigError::invalid_argument("Empty duration"));
    }

    if let Ok(seconds) = input.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }

    if input.contains(':') {
        return parse_timespan(input);
    }

    humantime::parse_duration(input)
        .map_err(|e| AppConfigError::invalid_argument(format!("Invalid duration '{}': {}", input, e)))
}

/// `[d.]hh:mm[:ss[.fraction]]`
fn parse_timespan(input: &str) -> Result<Duration> {
    let invalid = || AppConfigError::invalid_argument(format!("Invalid TimeSpan '{}'", input));

    let (days, clock) = match input.split_once('.') {
        Some((days, rest)) if rest.contains(':') && !days.contains(':') => {
            (days.parse::<u64>().map_err(|_| invalid())?, rest)
        }
        _ => (0, input),
    };

    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return Err(invalid());
    }

    let hours = parts[0].parse::<u64>().map_err(|_| invalid())?;
    let minutes = parts[1].parse::<u64>().map_err(|_| invalid())?;
    let seconds = match parts.get(2) {
        Some(s) => s.parse::<f64>().map_err(|_| invalid())?,
        None => 0.0,
    };
    if minutes >= 60 || !(0.0..60.0).contains(&seconds) {
        return Err(invalid());
    }

    let whole = days * 86_400 + hours * 3_600 + minutes * 60;
    Ok(Duration::from_secs(whole) + Duration::from_secs_f64(seconds))
}

/// Render a duration as TimeSpan text
pub fn format_timespan(duration: Duration) -> String {
    let total = duration.as_secs();
    let (days, rem) = (total / 86_400, total % 86_400);
    let clock = format!("{:02}:{:02}:{:02}", rem / 3_600, (rem % 3_600) / 60, rem % 60);
    if days > 0 {
        format!("{}.{}", days, clock)
    } else {
        clock
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    struct DurationVisitor;

    impl de::Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("seconds, a TimeSpan like 00:15:00, or a duration like 15m")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Duration, E> {
            Ok(Duration::from_secs(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_secs)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Duration, E> {
            Duration::try_from_secs_f64(v).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }
    }

    deserializer.deserialize_any(DurationVisitor)
}

pub fn serialize<S>(duration: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_timespan(*duration))
}
