//! Client-requested update period
//!
//! Clients pass the period as a duration string in the request path, using
//! the familiar `300ms` / `5s` / `1m30s` / `1.5h` notation. Anything that
//! fails to parse, or parses negative, means "no artificial rate limit".
//! Values above [`MAX_UPDATE_PERIOD`] are capped.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::protocol::MAX_UPDATE_PERIOD;

/// One `<number><unit>` component of a duration string
static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([0-9]*)(?:\.([0-9]*))?(ns|us|µs|μs|ms|s|m|h)").unwrap()
});

/// Most fractional digits honoured per component
const MAX_FRACTION_DIGITS: usize = 18;

/// Errors that can occur while parsing a duration string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeriodError {
    /// The input is empty or not a sequence of `<number><unit>` components
    #[error("invalid duration: {0:?}")]
    Invalid(String),

    /// The value does not fit in a signed 64-bit nanosecond count
    #[error("duration out of range: {0:?}")]
    Overflow(String),
}

fn unit_nanos(unit: &str) -> u128 {
    match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        _ => 3_600 * 1_000_000_000,
    }
}

/// Parse a duration string into signed nanoseconds
///
/// Accepts an optional sign followed by one or more components such as
/// `1h`, `2.5m`, `300ms`. A bare `0` is also accepted.
pub fn parse_duration(input: &str) -> Result<i64, PeriodError> {
    let invalid = || PeriodError::Invalid(input.to_string());

    let (negative, body) = match input.as_bytes().first() {
        Some(b'-') => (true, &input[1..]),
        Some(b'+') => (false, &input[1..]),
        _ => (false, input),
    };

    if body == "0" {
        return Ok(0);
    }
    if body.is_empty() {
        return Err(invalid());
    }

    let mut total: u128 = 0;
    let mut expected_start = 0;
    for caps in COMPONENT.captures_iter(body) {
        let whole = caps.get(0).ok_or_else(invalid)?;
        if whole.start() != expected_start {
            return Err(invalid());
        }
        expected_start = whole.end();

        let int_digits = caps.get(1).map_or("", |m| m.as_str());
        let frac_digits = caps.get(2).map_or("", |m| m.as_str());
        if int_digits.is_empty() && frac_digits.is_empty() {
            return Err(invalid());
        }
        let unit = unit_nanos(&caps[3]);

        let whole_part: u128 = if int_digits.is_empty() {
            0
        } else {
            int_digits
                .parse::<u128>()
                .map_err(|_| PeriodError::Overflow(input.to_string()))?
        };

        let mut fraction: u128 = 0;
        let mut scale: u128 = 1;
        for digit in frac_digits.bytes().take(MAX_FRACTION_DIGITS) {
            fraction = fraction * 10 + u128::from(digit - b'0');
            scale *= 10;
        }

        total = whole_part
            .checked_mul(unit)
            .and_then(|n| n.checked_add(fraction * unit / scale))
            .and_then(|n| total.checked_add(n))
            .ok_or_else(|| PeriodError::Overflow(input.to_string()))?;
    }

    if expected_start != body.len() {
        return Err(invalid());
    }

    let limit = if negative {
        i64::MAX as u128 + 1
    } else {
        i64::MAX as u128
    };
    if total > limit {
        return Err(PeriodError::Overflow(input.to_string()));
    }

    let signed = if negative {
        -(total as i128)
    } else {
        total as i128
    };
    Ok(signed as i64)
}

/// Cap a period to [`MAX_UPDATE_PERIOD`]
pub fn clamp(period: Duration) -> Duration {
    period.min(MAX_UPDATE_PERIOD)
}

/// Resolve the update period for a request parameter
///
/// Missing, unparsable, and negative values all yield zero.
pub fn update_period(param: Option<&str>) -> Duration {
    let Some(raw) = param.filter(|s| !s.is_empty()) else {
        return Duration::ZERO;
    };

    match parse_duration(raw) {
        Ok(nanos) if nanos > 0 => clamp(Duration::from_nanos(nanos as u64)),
        Ok(_) => Duration::ZERO,
        Err(e) => {
            tracing::debug!(error = %e, "ignoring update period");
            Duration::ZERO
        }
    }
}
