//! Optional transfer preconditions.

use moneta_common::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::account::Account;

/// Business checks the orchestrator may enforce inside the unit of work.
///
/// Both are off by default: the balance mutator itself never rejects a
/// delta, and callers are expected to have matched currencies already.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPolicy {
    /// Reject a transfer that leaves the source balance negative.
    pub require_sufficient_funds: bool,
    /// Reject a transfer between accounts of different currencies.
    pub require_matching_currency: bool,
}

impl TransferPolicy {
    /// No checks.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Every check enabled.
    pub fn strict() -> Self {
        Self {
            require_sufficient_funds: true,
            require_matching_currency: true,
        }
    }

    /// Check post-mutation account state. Called while both row locks are
    /// held, so the balances seen here are the ones that will commit.
    pub fn check(&self, from: &Account, to: &Account) -> Result<()> {
        if self.require_matching_currency && from.currency != to.currency {
            return Err(LedgerError::CurrencyMismatch {
                from: from.currency.to_string(),
                to: to.currency.to_string(),
            });
        }

        if self.require_sufficient_funds && from.balance < Decimal::ZERO {
            return Err(LedgerError::InsufficientFunds {
                account_id: from.id,
                balance: from.balance,
            });
        }

        Ok(())
    }
}
