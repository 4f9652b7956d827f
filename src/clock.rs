//! Wall-clock arithmetic on `"HH:MM"` strings.
//!
//! Everything inside the engine works on minutes since midnight; these helpers
//! are the only place strings are parsed or produced. A day ends at `24:00` and
//! nothing rolls over into the next one.

use crate::engine::EngineError;
use crate::model::{Min, Span, END_OF_DAY};

/// Parse `"H:MM"` / `"HH:MM"` into minutes since midnight. `"24:00"` is accepted
/// as the end-of-day boundary.
pub fn to_minutes(hhmm: &str) -> Result<Min, EngineError> {
    let bad = || EngineError::Validation(format!("invalid time {hhmm:?}, expected HH:MM"));

    let (h, m) = hhmm.trim().split_once(':').ok_or_else(bad)?;
    if h.is_empty() || h.len() > 2 || m.len() != 2 {
        return Err(bad());
    }
    if !h.bytes().chain(m.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let hours: Min = h.parse().map_err(|_| bad())?;
    let minutes: Min = m.parse().map_err(|_| bad())?;
    if minutes >= 60 {
        return Err(bad());
    }
    let total = hours * 60 + minutes;
    if total > END_OF_DAY {
        return Err(bad());
    }
    Ok(total)
}

/// Zero-padded `HH:MM`.
pub fn format_minutes(minutes: Min) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// `start + delta` in minutes, rejecting anything past the end of the day.
pub fn checked_end(start: Min, delta: Min) -> Result<Min, EngineError> {
    start
        .checked_add(delta)
        .filter(|end| *end <= END_OF_DAY)
        .ok_or_else(|| {
            EngineError::Validation(format!(
                "{} + {delta} min runs past midnight",
                format_minutes(start)
            ))
        })
}

pub fn add_minutes(hhmm: &str, delta: Min) -> Result<String, EngineError> {
    let start = to_minutes(hhmm)?;
    checked_end(start, delta).map(format_minutes)
}

/// Parse a `[start, end)` pair, rejecting empty or inverted ranges.
pub fn parse_span(start: &str, end: &str) -> Result<Span, EngineError> {
    let s = to_minutes(start)?;
    let e = to_minutes(end)?;
    if s >= e {
        return Err(EngineError::Validation(format!(
            "start {start} must be before end {end}"
        )));
    }
    Ok(Span::new(s, e))
}

/// Half-open overlap of two wall-clock ranges. Touching ranges do not overlap.
pub fn overlaps(start_a: &str, end_a: &str, start_b: &str, end_b: &str) -> Result<bool, EngineError> {
    let (sa, ea) = (to_minutes(start_a)?, to_minutes(end_a)?);
    let (sb, eb) = (to_minutes(start_b)?, to_minutes(end_b)?);
    Ok(sa < eb && ea > sb)
}
