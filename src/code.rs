//! Booking codes customers read out over the phone or type into a lookup box.
//!
//! A code is the configured prefix followed by twelve Crockford base32
//! characters cut from a fresh ULID: six from the low end of the timestamp and
//! six from the random part. The alphabet has no I, L, O or U. Generation is
//! not trusted for uniqueness; the store's code index rejects duplicates.

use ulid::Ulid;

use crate::model::Ms;

const TIME_CHARS: std::ops::Range<usize> = 4..10;
const RANDOM_CHARS: std::ops::Range<usize> = 10..16;

pub fn generate(prefix: &str) -> String {
    let ulid = Ulid::new().to_string();
    format!("{prefix}{}{}", &ulid[TIME_CHARS], &ulid[RANDOM_CHARS])
}

/// Normalise user input: trim, uppercase, and map the look-alikes Crockford
/// decoding treats as digits. The prefix is matched with the same mapping so
/// `M0` finds codes issued under `MO`.
pub fn normalize(input: &str, prefix: &str) -> String {
    let upper = input.trim().to_ascii_uppercase();
    let prefix = prefix.to_ascii_uppercase();
    let mapped = fold_lookalikes(&upper);
    match mapped.strip_prefix(fold_lookalikes(&prefix).as_str()) {
        Some(body) => format!("{prefix}{body}"),
        None => upper,
    }
}

fn fold_lookalikes(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'O' => '0',
            'I' | 'L' => '1',
            other => other,
        })
        .collect()
}

/// Cosmetic QR payload printed on the confirmation screen.
pub fn qr_payload(code: &str, created_at: Ms) -> String {
    format!("{code}-{created_at}")
}
