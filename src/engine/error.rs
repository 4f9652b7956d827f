use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed or missing input. Never worth retrying as-is.
    Validation(String),
    /// The technician is already taken for part of the requested interval.
    Conflict { technician_id: Ulid, with: Ulid },
    NotFound(Ulid),
    CodeNotFound(String),
    InvalidState {
        id: Ulid,
        status: BookingStatus,
        action: &'static str,
    },
    PaymentDeclined(Ulid),
    HasBookings(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short machine label, used for metrics and by callers mapping to status codes.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => "validation",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotFound(_) | EngineError::CodeNotFound(_) => "not_found",
            EngineError::InvalidState { .. } | EngineError::HasBookings(_) => "invalid_state",
            EngineError::PaymentDeclined(_) => "payment_declined",
            EngineError::WalError(_) => "infrastructure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::Conflict { technician_id, with } => {
                write!(f, "technician {technician_id} is not free: overlaps {with}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::CodeNotFound(code) => write!(f, "no booking with code {code}"),
            EngineError::InvalidState { id, status, action } => {
                write!(f, "cannot {action} booking {id}: it is {status}")
            }
            EngineError::PaymentDeclined(id) => write!(f, "payment for booking {id} was not verified"),
            EngineError::HasBookings(id) => {
                write!(f, "cannot delete technician {id}: bookings reference it")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_transition() {
        let id = Ulid::new();
        let err = EngineError::InvalidState {
            id,
            status: BookingStatus::Cancelled,
            action: "verify payment for",
        };
        assert_eq!(
            err.to_string(),
            format!("cannot verify payment for booking {id}: it is cancelled")
        );
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn kinds_follow_taxonomy() {
        let id = Ulid::new();
        assert_eq!(EngineError::Validation("x".into()).kind(), "validation");
        assert_eq!(EngineError::Conflict { technician_id: id, with: id }.kind(), "conflict");
        assert_eq!(EngineError::CodeNotFound("AB".into()).kind(), "not_found");
        assert_eq!(EngineError::WalError("disk".into()).kind(), "infrastructure");
    }
}
