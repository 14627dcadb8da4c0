use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string in the format "250ms", "30s", "10m", "5h".
///
/// Supported units:
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
///
/// A bare number is read as seconds.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let split_at = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (value_str, unit) = s.split_at(split_at);

    let value = match u64::from_str(value_str) {
        Ok(v) => v,
        Err(_) => {
            return Err(format!(
                "Invalid numeric value in duration: '{}'",
                value_str
            ))
        }
    };

    let secs_per_unit = match unit {
        "ms" => return Ok(Duration::from_millis(value)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 60 * 60,
        _ => {
            return Err(format!(
                "Unknown duration unit: '{}'. Use 'ms', 's', 'm', or 'h'.",
                unit
            ))
        }
    };

    value
        .checked_mul(secs_per_unit)
        .map(Duration::from_secs)
        .ok_or_else(|| format!("Duration out of range: '{}'", s))
}
