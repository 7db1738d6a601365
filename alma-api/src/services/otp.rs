use chrono::{DateTime, Duration, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use rand::rngs::OsRng;
use rand::Rng;

use alma_shared::errors::{AppError, AppResult, ErrorCode};

use crate::models::NewOtp;
use crate::schema::otps;

pub const OTP_TTL_MINUTES: i64 = 10;
pub const LOGIN_PURPOSE: &str = "login";

/// Oldest creation time a passcode may have and still verify.
pub fn expiry_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::minutes(OTP_TTL_MINUTES)
}

/// 6 decimal digits from the OS RNG. A guessable code here is an account
/// takeover, so this never falls back to a weaker source.
pub fn generate_passcode() -> String {
    format!("{:06}", OsRng.gen_range(0..1_000_000))
}

/// Issues a fresh passcode for `email`+`purpose` and returns it.
///
/// Aged-out rows for the address are deleted first (opportunistic GC), and any
/// still-live code is marked consumed so that at most one code can verify at a
/// time, even across reissues.
pub fn issue_passcode(conn: &mut PgConnection, email: &str, purpose: &str) -> AppResult<String> {
    let cutoff = expiry_cutoff(Utc::now());

    diesel::delete(
        otps::table
            .filter(otps::email.eq(email))
            .filter(otps::purpose.eq(purpose))
            .filter(otps::created_at.lt(cutoff)),
    )
    .execute(conn)?;

    diesel::update(
        otps::table
            .filter(otps::email.eq(email))
            .filter(otps::purpose.eq(purpose))
            .filter(otps::consumed.eq(false)),
    )
    .set(otps::consumed.eq(true))
    .execute(conn)?;

    let code = generate_passcode();
    let new_otp = NewOtp {
        email: email.to_string(),
        code: code.clone(),
        purpose: purpose.to_string(),
    };
    diesel::insert_into(otps::table).values(&new_otp).execute(conn)?;

    Ok(code)
}

/// Marks the matching unconsumed, unexpired passcode as used.
///
/// Consumption is a single conditional UPDATE, so two racing verify calls on
/// the same code see exactly one row affected between them. Wrong, expired,
/// and already-used codes all answer the same way.
pub fn consume_passcode(
    conn: &mut PgConnection,
    email: &str,
    purpose: &str,
    code: &str,
) -> AppResult<()> {
    let cutoff = expiry_cutoff(Utc::now());

    let updated = diesel::update(
        otps::table
            .filter(otps::email.eq(email))
            .filter(otps::purpose.eq(purpose))
            .filter(otps::code.eq(code))
            .filter(otps::consumed.eq(false))
            .filter(otps::created_at.gt(cutoff)),
    )
    .set(otps::consumed.eq(true))
    .execute(conn)?;

    if updated == 0 {
        return Err(AppError::new(ErrorCode::InvalidCode, "invalid or expired code"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passcodes_are_six_decimal_digits() {
        for _ in 0..100 {
            let code = generate_passcode();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn expiry_window_is_ten_minutes() {
        let now = Utc::now();
        let cutoff = expiry_cutoff(now);

        let just_inside = now - Duration::seconds(OTP_TTL_MINUTES * 60 - 1);
        let just_outside = now - Duration::seconds(OTP_TTL_MINUTES * 60 + 1);

        assert!(just_inside > cutoff);
        assert!(just_outside < cutoff);
    }
}
