//! Amount helpers.

use rust_decimal::Decimal;

use crate::{Result, SagaError};

/// Reject zero and negative amounts.
pub fn ensure_positive(amount: Decimal) -> Result<Decimal> {
    if amount > Decimal::ZERO {
        Ok(amount)
    } else {
        Err(SagaError::InvalidAmount { amount })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_positive() {
        assert!(ensure_positive(Decimal::from(10)).is_ok());
        assert!(ensure_positive(Decimal::ZERO).is_err());
        assert!(ensure_positive(Decimal::from(-1)).is_err());
    }
}
