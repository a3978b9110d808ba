use std::{collections::HashMap, fmt, str::FromStr};

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use thiserror::Error;

use crate::errors::AppError;

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let pwd_hash = Argon2::default()
        .hash_password(password.as_bytes(), &SaltString::generate(&mut OsRng))
        .map_err(|e| {
            log::error!("Failed to hash password: {}", e);
            AppError::PasswordError(e.to_string())
        })?
        .to_string();
    Ok(pwd_hash)
}

/// Checks `provided` against a stored argon2 PHC string.
///
/// A malformed stored hash counts as a mismatch.
pub fn verify_password(provided: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(provided.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            log::warn!("Stored password hash is malformed: {}", e);
            false
        }
    }
}

/// An amount of money in cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Money(pub i64);

impl Money {
    /// Largest amount a form may enter: one billion.
    pub const MAX: Money = Money(100_000_000_000);
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount")]
pub struct ParseMoneyError;

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Accepts `12`, `12.5` and `12.50`, up to `Money::MAX`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (whole, frac) = match s.split_once('.') {
            Some((whole, frac)) => (whole, Some(frac)),
            None => (s, None),
        };
        if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseMoneyError);
        }
        let cents = match frac {
            None => 0,
            Some(frac) => {
                if frac.is_empty() || frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(ParseMoneyError);
                }
                let value: i64 = frac.parse().map_err(|_| ParseMoneyError)?;
                if frac.len() == 1 {
                    value * 10
                } else {
                    value
                }
            }
        };
        let whole: i64 = whole.parse().map_err(|_| ParseMoneyError)?;
        whole
            .checked_mul(100)
            .and_then(|v| v.checked_add(cents))
            .map(Money)
            .filter(|amount| *amount <= Money::MAX)
            .ok_or(ParseMoneyError)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Tera filter rendering an integer amount of cents, e.g. `{{ listing.starting_price | money }}`.
pub fn money_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    let cents = value
        .as_i64()
        .ok_or_else(|| tera::Error::msg(format!("money filter expects an integer, got {}", value)))?;
    Ok(tera::Value::String(Money(cents).to_string()))
}
