//! Local transfer amount checks.
//!
//! Advisory only: the server remains the authority on balances and limits, so
//! an amount that passes here can still be refused.

use thiserror::Error;
use wallet_proto::amount::parse_amount;

/// Per-transfer ceiling enforced before anything is sent.
pub const DEFAULT_TRANSFER_LIMIT: f64 = 1000.0;

/// Reasons a transfer amount is refused locally.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    /// Not a finite positive number
    #[error("invalid amount {input:?}: expected a positive number")]
    InvalidAmount {
        /// What the user typed
        input: String,
    },

    /// Above the transfer ceiling
    #[error("amount {amount} exceeds the transfer limit of {limit}")]
    LimitExceeded {
        /// Parsed amount
        amount: f64,
        /// Ceiling in force
        limit: f64,
    },
}

/// Parse `input` and check it against `limit`.
///
/// A leading currency glyph and surrounding whitespace are accepted. The limit
/// itself is allowed.
pub fn validate_amount(input: &str, limit: f64) -> Result<f64, AmountError> {
    let amount = parse_amount(input)
        .filter(|amount| *amount > 0.0)
        .ok_or_else(|| AmountError::InvalidAmount { input: input.to_string() })?;

    if amount > limit {
        return Err(AmountError::LimitExceeded { amount, limit });
    }

    Ok(amount)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn over_limit_is_refused() {
        assert_eq!(
            validate_amount("1500", DEFAULT_TRANSFER_LIMIT),
            Err(AmountError::LimitExceeded { amount: 1500.0, limit: 1000.0 })
        );
    }

    #[test]
    fn negative_is_invalid() {
        assert_eq!(
            validate_amount("-5", DEFAULT_TRANSFER_LIMIT),
            Err(AmountError::InvalidAmount { input: "-5".to_string() })
        );
    }

    #[test]
    fn just_under_limit_passes() {
        assert_eq!(validate_amount("999.99", DEFAULT_TRANSFER_LIMIT), Ok(999.99));
    }

    #[test]
    fn limit_itself_passes() {
        assert_eq!(validate_amount("1000", DEFAULT_TRANSFER_LIMIT), Ok(1000.0));
    }

    #[test]
    fn zero_and_garbage_are_invalid() {
        for input in ["0", "0.00", "", "ten", "12abc", "NaN", "inf", "₹"] {
            assert!(
                matches!(validate_amount(input, 1000.0), Err(AmountError::InvalidAmount { .. })),
                "{input:?} should be invalid"
            );
        }
    }

    #[test]
    fn glyph_and_padding_are_accepted() {
        assert_eq!(validate_amount(" ₹25.50 ", 1000.0), Ok(25.5));
    }

    proptest! {
        #[test]
        fn accepted_amounts_are_in_range(cents in 1u64..200_000) {
            let input = format!("{}.{:02}", cents / 100, cents % 100);
            match validate_amount(&input, DEFAULT_TRANSFER_LIMIT) {
                Ok(amount) => prop_assert!(amount > 0.0 && amount <= DEFAULT_TRANSFER_LIMIT),
                Err(AmountError::LimitExceeded { amount, .. }) => {
                    prop_assert!(amount > DEFAULT_TRANSFER_LIMIT);
                },
                Err(err) => prop_assert!(false, "unexpected {err:?}"),
            }
        }
    }
}
