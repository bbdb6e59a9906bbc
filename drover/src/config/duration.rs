//! Duration values for retention settings.
//!
//! A bare integer is read as a number of hours. Explicit values carry one of
//! the suffixes `ns`, `us`, `ms`, `s`, `m`, `h`, `d`, or use the ISO-8601
//! `P[nD][T[nH][nM][n[.f]S]]` form. Values are written back in a canonical
//! form that uses the largest unit representing the value exactly, so
//! `parse(format(d)) == d` for every duration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const SECS_PER_MINUTE: u64 = 60;
const SECS_PER_HOUR: u64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: u64 = 24 * SECS_PER_HOUR;

/// A configuration duration whose unit defaults to hours.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ConfigDuration(Duration);

impl ConfigDuration {
    pub const fn from_hours(hours: u64) -> Self {
        Self(Duration::from_secs(hours * SECS_PER_HOUR))
    }

    pub const fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub const fn as_duration(&self) -> Duration {
        self.0
    }
}

impl From<Duration> for ConfigDuration {
    fn from(value: Duration) -> Self {
        Self(value)
    }
}

impl From<ConfigDuration> for Duration {
    fn from(value: ConfigDuration) -> Self {
        value.0
    }
}

impl FromStr for ConfigDuration {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_duration(s).map(Self)
    }
}

impl fmt::Display for ConfigDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_duration(self.0))
    }
}

/// Parse a duration, reading bare integers as hours.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    if input.starts_with(['P', 'p']) {
        return parse_iso8601(input);
    }

    let split = input
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(input.len());
    let (digits, unit) = input.split_at(split);
    if digits.is_empty() {
        return Err(format!("`{input}` does not start with a number"));
    }
    let amount: u64 = digits
        .parse()
        .map_err(|_| format!("`{digits}` is out of range"))?;

    let overflow = || format!("`{input}` overflows");
    let duration = match unit.trim() {
        "" | "h" => Duration::from_secs(amount.checked_mul(SECS_PER_HOUR).ok_or_else(overflow)?),
        "d" => Duration::from_secs(amount.checked_mul(SECS_PER_DAY).ok_or_else(overflow)?),
        "m" => Duration::from_secs(amount.checked_mul(SECS_PER_MINUTE).ok_or_else(overflow)?),
        "s" => Duration::from_secs(amount),
        "ms" => Duration::from_millis(amount),
        "us" => Duration::from_micros(amount),
        "ns" => Duration::from_nanos(amount),
        other => return Err(format!("unknown duration unit `{other}`")),
    };
    Ok(duration)
}

fn parse_iso8601(input: &str) -> Result<Duration, String> {
    let body = &input[1..];
    let (date_part, time_part) = match body.find(['T', 't']) {
        Some(idx) => (&body[..idx], Some(&body[idx + 1..])),
        None => (body, None),
    };

    let mut total = Duration::ZERO;
    let mut matched = false;
    let bad = || format!("`{input}` is not an ISO-8601 duration");
    let overflow = || format!("`{input}` overflows");

    if !date_part.is_empty() {
        let days = date_part
            .strip_suffix(['D', 'd'])
            .ok_or_else(bad)?
            .parse::<u64>()
            .map_err(|_| bad())?;
        total += Duration::from_secs(days.checked_mul(SECS_PER_DAY).ok_or_else(overflow)?);
        matched = true;
    }

    if let Some(mut rest) = time_part {
        if rest.is_empty() {
            return Err(bad());
        }
        while !rest.is_empty() {
            let split = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(bad)?;
            let (number, tail) = rest.split_at(split);
            let mut chars = tail.chars();
            let designator = chars.next().ok_or_else(bad)?.to_ascii_uppercase();
            rest = chars.as_str();

            let component = match designator {
                'H' | 'M' => {
                    let value: u64 = number.parse().map_err(|_| bad())?;
                    let unit = if designator == 'H' {
                        SECS_PER_HOUR
                    } else {
                        SECS_PER_MINUTE
                    };
                    Duration::from_secs(value.checked_mul(unit).ok_or_else(overflow)?)
                }
                'S' => parse_fractional_seconds(number).ok_or_else(bad)?,
                _ => return Err(bad()),
            };
            total = total.checked_add(component).ok_or_else(overflow)?;
            matched = true;
        }
    }

    if !matched {
        return Err(bad());
    }
    Ok(total)
}

fn parse_fractional_seconds(number: &str) -> Option<Duration> {
    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() || fraction.len() > 9 {
        return None;
    }
    let secs: u64 = whole.parse().ok()?;
    let nanos = if fraction.is_empty() {
        0
    } else {
        let scale = 10u32.pow(9 - fraction.len() as u32);
        fraction.parse::<u32>().ok()? * scale
    };
    Some(Duration::new(secs, nanos))
}

/// Render a duration in its canonical form.
pub fn format_duration(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        let secs = duration.as_secs();
        return match secs {
            0 => "0s".to_string(),
            s if s % SECS_PER_DAY == 0 => format!("{}d", s / SECS_PER_DAY),
            s if s % SECS_PER_HOUR == 0 => format!("{}h", s / SECS_PER_HOUR),
            s if s % SECS_PER_MINUTE == 0 => format!("{}m", s / SECS_PER_MINUTE),
            s => format!("{s}s"),
        };
    }

    let nanos = duration.as_nanos();
    if nanos % 1_000_000 == 0 {
        format!("{}ms", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!("{}us", nanos / 1_000)
    } else {
        format!("{nanos}ns")
    }
}

impl Serialize for ConfigDuration {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format_duration(self.0))
    }
}

impl<'de> Deserialize<'de> for ConfigDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl Visitor<'_> for DurationVisitor {
            type Value = ConfigDuration;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a number of hours or a unit-suffixed duration string")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                v.checked_mul(SECS_PER_HOUR)
                    .map(|secs| ConfigDuration(Duration::from_secs(secs)))
                    .ok_or_else(|| E::custom(format!("{v} hours overflows")))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                let hours = u64::try_from(v)
                    .map_err(|_| E::custom(format!("duration must not be negative, got {v}")))?;
                self.visit_u64(hours)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                parse_duration(v).map(ConfigDuration).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}
