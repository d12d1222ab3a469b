use std::str::FromStr;
use tokio::time::Duration;

/// Parses a duration string such as "500ms", "30s", "1.5s", "10m" or "1m30s".
///
/// A duration is one or more `<number><unit>` components, summed. Numbers may
/// carry a decimal fraction. Supported units:
/// - `ns` for nanoseconds
/// - `us` or `µs` for microseconds
/// - `ms` for milliseconds
/// - `s` for seconds
/// - `m` for minutes
/// - `h` for hours
/// - `d` for days
///
/// Values that do not fit in a `Duration` are rejected.
pub fn parse_duration_string(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration string cannot be empty".to_string());
    }

    let mut total_nanos: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(unit_len);

        let nanos = component_nanos(number, unit)?;
        total_nanos = total_nanos
            .checked_add(nanos)
            .ok_or_else(|| too_large(s))?;
        rest = tail;
    }

    let secs = u64::try_from(total_nanos / NANOS_PER_SEC).map_err(|_| too_large(s))?;
    Ok(Duration::new(secs, (total_nanos % NANOS_PER_SEC) as u32))
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Fraction digits past this add nothing at nanosecond resolution.
const MAX_FRACTION_DIGITS: usize = 18;

fn unit_nanos(unit: &str) -> Option<u128> {
    match unit {
        "ns" => Some(1),
        "us" | "µs" => Some(1_000),
        "ms" => Some(1_000_000),
        "s" => Some(NANOS_PER_SEC),
        "m" => Some(60 * NANOS_PER_SEC),
        "h" => Some(60 * 60 * NANOS_PER_SEC),
        "d" => Some(24 * 60 * 60 * NANOS_PER_SEC),
        _ => None,
    }
}

fn component_nanos(number: &str, unit: &str) -> Result<u128, String> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid_number(number));
    }
    let per_unit = unit_nanos(unit).ok_or_else(|| {
        format!(
            "Unknown duration unit: '{}'. Use 'ns', 'us', 'ms', 's', 'm', 'h', or 'd'.",
            unit
        )
    })?;

    let whole_value = if whole.is_empty() {
        0
    } else {
        u64::from_str(whole).map_err(|_| invalid_number(number))?
    };
    let mut nanos = u128::from(whole_value)
        .checked_mul(per_unit)
        .ok_or_else(|| invalid_number(number))?;

    if !fraction.is_empty() {
        if !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid_number(number));
        }
        let digits = &fraction[..fraction.len().min(MAX_FRACTION_DIGITS)];
        let scale = 10u128.pow(digits.len() as u32);
        let fraction_value = u128::from_str(digits).map_err(|_| invalid_number(number))?;
        nanos += fraction_value * per_unit / scale;
    }

    Ok(nanos)
}

fn invalid_number(number: &str) -> String {
    format!("Invalid numeric value in duration: '{}'", number)
}

fn too_large(s: &str) -> String {
    format!("Duration '{}' is too large", s)
}

/// Parses a comma-separated header string with support for escaped commas.
///
/// Use `\,` to include a literal comma in a header value.
/// Example: "Connection:keep-alive,Keep-Alive:timeout=5\,max=200"
pub fn parse_headers_with_escapes(headers_str: &str) -> Vec<String> {
    let mut headers = Vec::new();
    let mut current_header = String::new();
    let mut chars = headers_str.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' => {
                if chars.peek() == Some(&',') {
                    current_header.push(',');
                    chars.next();
                } else {
                    current_header.push('\\');
                }
            }
            ',' => {
                if !current_header.trim().is_empty() {
                    headers.push(current_header.clone());
                }
                current_header.clear();
            }
            _ => {
                current_header.push(ch);
            }
        }
    }

    if !current_header.trim().is_empty() {
        headers.push(current_header);
    }

    headers
}

/// Splits a `Key:Value` header pair on the first colon, trimming both sides.
///
/// Returns `None` when there is no colon or the key is empty.
pub fn split_header_pair(pair: &str) -> Option<(String, String)> {
    let (name, value) = pair.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}
