//! Balance mutator input.

use moneta_common::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Add a signed `amount` to one account's balance.
///
/// Applied by the store as one atomic read-and-write under the account's
/// row lock. No business rules are checked here: a debit may take the
/// balance below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAccountBalanceParams {
    pub account_id: AccountId,
    pub amount: Decimal,
}

impl AddAccountBalanceParams {
    /// Create params for a balance adjustment.
    pub fn new(account_id: AccountId, amount: Decimal) -> Self {
        Self { account_id, amount }
    }
}
