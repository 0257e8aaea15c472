//! Entry rows: one account's side of a transfer.

use chrono::{DateTime, Utc};
use moneta_common::{AccountId, EntryId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an entry, derived from the sign of its amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money left the account (negative amount).
    Debit,
    /// Money arrived in the account (positive amount).
    Credit,
}

/// An immutable signed ledger line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Unique entry ID.
    pub id: EntryId,
    /// Account affected.
    pub account_id: AccountId,
    /// Signed amount: positive credits, negative debits.
    pub amount: Decimal,
    /// When this entry was created.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Debit or credit, by sign.
    pub fn entry_type(&self) -> EntryType {
        if self.amount.is_sign_negative() {
            EntryType::Debit
        } else {
            EntryType::Credit
        }
    }
}

/// Input for creating an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub account_id: AccountId,
    pub amount: Decimal,
}

impl CreateEntryParams {
    /// Entry taking `amount` out of `account_id`.
    pub fn debit(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            account_id,
            amount: -amount,
        }
    }

    /// Entry putting `amount` into `account_id`.
    pub fn credit(account_id: AccountId, amount: Decimal) -> Self {
        Self { account_id, amount }
    }
}

/// True when the entries sum to zero, i.e. every debit has its credit.
pub fn is_balanced<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> bool {
    entries
        .into_iter()
        .map(|e| e.amount)
        .sum::<Decimal>()
        .is_zero()
}
