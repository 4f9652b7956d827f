use crate::model::Min;

/// Soft cap, checked without a lock.
pub const MAX_TECHNICIANS: usize = 500;
pub const MAX_NAME_LEN: usize = 120;
pub const MAX_PHONE_LEN: usize = 32;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_SPECIALTIES: usize = 32;
pub const MAX_ADDITIONAL_SERVICES: usize = 16;
pub const MAX_TIERS_PER_SERVICE: usize = 8;
pub const MAX_PAYMENT_METHOD_LEN: usize = 64;

/// Longest bookable service.
pub const MAX_DURATION_MIN: Min = 8 * 60;

/// Attempts at drawing an unused booking code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 8;

pub const MAX_RATING: f32 = 5.0;

/// Highest price accepted for a tier or additional service.
pub const MAX_PRICE: i64 = 1_000_000_000_000;

/// Longest a booking may stay unpaid before expiry.
pub const MAX_PENDING_TTL_SECS: u64 = 7 * 24 * 60 * 60;
