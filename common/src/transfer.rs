//! Transfer request consumed by the transfer engine.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AccountId, LedgerError, Result};

/// A request to move `amount` from one account to another.
///
/// Account existence and currency agreement are the caller's precondition;
/// the engine only rejects requests that can never be valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Account debited by the transfer.
    pub from_account_id: AccountId,
    /// Account credited by the transfer.
    pub to_account_id: AccountId,
    /// Magnitude of money moved. Always positive.
    pub amount: Decimal,
}

impl TransferRequest {
    /// Create a new transfer request.
    pub fn new(from_account_id: AccountId, to_account_id: AccountId, amount: Decimal) -> Self {
        Self {
            from_account_id,
            to_account_id,
            amount,
        }
    }

    /// The same movement in the opposite direction.
    pub fn reversed(&self) -> Self {
        Self {
            from_account_id: self.to_account_id,
            to_account_id: self.from_account_id,
            amount: self.amount,
        }
    }

    /// Reject requests that violate the transfer contract.
    pub fn validate(&self) -> Result<()> {
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidTransfer(format!(
                "amount must be positive, got {}",
                self.amount
            )));
        }

        if self.from_account_id == self.to_account_id {
            return Err(LedgerError::InvalidTransfer(format!(
                "source and destination are both account {}",
                self.from_account_id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(from: i64, to: i64, amount: i64) -> TransferRequest {
        TransferRequest::new(AccountId::new(from), AccountId::new(to), Decimal::from(amount))
    }

    #[test]
    fn test_valid_request() {
        assert!(request(1, 2, 10).validate().is_ok());
    }

    #[test]
    fn test_non_positive_amount_rejected() {
        assert!(matches!(
            request(1, 2, 0).validate(),
            Err(LedgerError::InvalidTransfer(_))
        ));
        assert!(matches!(
            request(1, 2, -5).validate(),
            Err(LedgerError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn test_self_transfer_rejected() {
        assert!(matches!(
            request(4, 4, 10).validate(),
            Err(LedgerError::InvalidTransfer(_))
        ));
    }

    #[test]
    fn test_reversed() {
        let reversed = request(1, 2, 10).reversed();
        assert_eq!(reversed.from_account_id, AccountId::new(2));
        assert_eq!(reversed.to_account_id, AccountId::new(1));
        assert_eq!(reversed.amount, Decimal::from(10));
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{"from_account_id":1,"to_account_id":2,"amount":"12.50"}"#;
        let request: TransferRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.amount, Decimal::new(1250, 2));
    }
}
