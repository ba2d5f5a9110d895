//! Decimal amount parsing for refund-claim intake, where amounts arrive as human-readable
//! strings (`"12.50"`) rather than the atomic-integer strings used on the payment wire.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;

static CLEAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9.\-]").unwrap());
static MAX: LazyLock<Decimal> = LazyLock::new(|| Decimal::from_str("999999999").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MoneyAmountError {
    #[error("amount is not a valid decimal number")]
    InvalidFormat,
    #[error("amount must be positive")]
    Negative,
    #[error("amount is out of the supported range")]
    OutOfRange,
}

/// A validated positive decimal amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoneyAmount(pub Decimal);

impl FromStr for MoneyAmount {
    type Err = MoneyAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let cleaned = CLEAN.replace_all(s.trim(), "");
        let value = Decimal::from_str(&cleaned).map_err(|_| MoneyAmountError::InvalidFormat)?;
        if value.is_sign_negative() {
            return Err(MoneyAmountError::Negative);
        }
        if value > *MAX {
            return Err(MoneyAmountError::OutOfRange);
        }
        Ok(MoneyAmount(value))
    }
}

impl std::fmt::Display for MoneyAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimal() {
        let amount: MoneyAmount = "12.50".parse().unwrap();
        assert_eq!(amount.to_string(), "12.5");
    }

    #[test]
    fn rejects_negative() {
        assert_eq!("-1".parse::<MoneyAmount>(), Err(MoneyAmountError::Negative));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!("abc".parse::<MoneyAmount>(), Err(MoneyAmountError::InvalidFormat));
    }
}
