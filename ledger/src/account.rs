//! Account rows.

use chrono::{DateTime, Utc};
use moneta_common::{AccountId, Currency};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A ledger account.
///
/// `balance` is the materialized running total of the account's entries.
/// It only changes through the balance mutator inside a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique account identifier.
    pub id: AccountId,
    /// Owner name.
    pub owner: String,
    /// Current balance.
    pub balance: Decimal,
    /// Account currency.
    pub currency: Currency,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
}

/// Input for creating an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccountParams {
    pub owner: String,
    pub balance: Decimal,
    pub currency: Currency,
}

impl CreateAccountParams {
    /// Create params for a new account.
    pub fn new(owner: impl Into<String>, balance: Decimal, currency: Currency) -> Self {
        Self {
            owner: owner.into(),
            balance,
            currency,
        }
    }
}
