use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    chrono::Utc::now().timestamp_millis()
}

/// Refuse `span` if anything live on the technician's day overlaps it.
/// `moving` is a booking being rescheduled, which never conflicts with itself.
pub(crate) fn check_no_conflict(
    schedule: &Schedule,
    date: NaiveDate,
    span: &Span,
    moving: Option<Ulid>,
) -> Result<(), EngineError> {
    match schedule
        .overlapping(date, span)
        .find(|i| Some(i.id) != moving)
    {
        Some(existing) => Err(EngineError::Conflict {
            technician_id: schedule.technician_id,
            with: existing.id,
        }),
        None => Ok(()),
    }
}

pub(crate) fn validate_duration(duration: Min) -> Result<(), EngineError> {
    if duration == 0 {
        return Err(EngineError::Validation("duration must be positive".into()));
    }
    if duration > MAX_DURATION_MIN {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

/// Trimmed required text.
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> Result<String, EngineError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    if trimmed.chars().count() > max {
        return Err(EngineError::Validation(format!("{field} longer than {max} characters")));
    }
    Ok(trimmed.to_string())
}

/// Trimmed optional text; blank collapses to `None`.
pub(crate) fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, EngineError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) if v.chars().count() > max => Err(EngineError::Validation(format!(
            "{field} longer than {max} characters"
        ))),
        Some(v) => Ok(Some(v.to_string())),
    }
}

pub(crate) fn validate_price(field: &str, price: i64) -> Result<(), EngineError> {
    if price < 0 {
        return Err(EngineError::Validation(format!("{field} must not be negative")));
    }
    if price > MAX_PRICE {
        return Err(EngineError::LimitExceeded("price too high"));
    }
    Ok(())
}

/// Service price plus every additional price.
pub(crate) fn total_for(price: i64, extras: &[PricedItem]) -> Result<i64, EngineError> {
    extras
        .iter()
        .try_fold(price, |sum, item| sum.checked_add(item.price))
        .ok_or(EngineError::LimitExceeded("booking total too large"))
}

/// `total * percent / 100`, rounded half up.
pub(crate) fn deposit_for(total: i64, percent: u32) -> Result<i64, EngineError> {
    total
        .checked_mul(i64::from(percent))
        .and_then(|scaled| scaled.checked_add(50))
        .map(|scaled| scaled / 100)
        .ok_or(EngineError::LimitExceeded("booking total too large"))
}
