//! Ledger store abstraction.
//!
//! A [`LedgerStore`] hands out [`LedgerTx`] handles. A handle owns one open
//! transaction and is the only way to reach the row primitives, so every
//! write happens inside a transaction scope. [`execute_atomically`] drives
//! a unit of work through begin, commit and rollback.
//!
//! Two backends are provided:
//! - [`postgres::PgLedgerStore`] over a PostgreSQL pool
//! - [`memory::MemoryLedgerStore`], an in-process store with row locks

pub mod executor;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use moneta_common::{AccountId, EntryId, Result, TransferId};
use serde::{Deserialize, Serialize};

use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

pub use executor::{execute_atomically, UnitOfWork};
pub use memory::{MemoryLedgerStore, MemoryLedgerTx};
pub use postgres::{PgLedgerStore, PgLedgerTx};

/// Pagination for list queries, ordered by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub fn new(limit: i64, offset: i64) -> Self {
        Self { limit, offset }
    }

    /// Everything, for audits and tests.
    pub fn all() -> Self {
        Self {
            limit: i64::MAX,
            offset: 0,
        }
    }
}

/// Transfers between two accounts, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFilter {
    pub account_a: AccountId,
    pub account_b: AccountId,
}

impl TransferFilter {
    pub fn between(account_a: AccountId, account_b: AccountId) -> Self {
        Self {
            account_a,
            account_b,
        }
    }

    pub(crate) fn matches(&self, transfer: &Transfer) -> bool {
        (transfer.from_account_id == self.account_a && transfer.to_account_id == self.account_b)
            || (transfer.from_account_id == self.account_b
                && transfer.to_account_id == self.account_a)
    }
}

/// Transactional handle to the ledger's row primitives.
///
/// Dropping a handle without calling [`commit`](LedgerTx::commit) rolls the
/// transaction back.
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert an account.
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account>;

    /// Read an account without locking it.
    async fn get_account(&mut self, id: AccountId) -> Result<Account>;

    /// Read an account and hold its row lock until the transaction ends.
    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// The balance mutator: add a signed delta to an account in one atomic
    /// statement and return the updated row. Holds the row lock until the
    /// transaction ends.
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account>;

    /// Insert an entry.
    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry>;

    /// Read an entry.
    async fn get_entry(&mut self, id: EntryId) -> Result<Entry>;

    /// Entries of one account.
    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    /// All entries of the ledger.
    async fn list_all_entries(&mut self, page: Page) -> Result<Vec<Entry>>;

    /// Insert a transfer.
    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer>;

    /// Read a transfer.
    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer>;

    /// Transfers between two accounts, in either direction.
    async fn list_transfers(&mut self, filter: TransferFilter, page: Page)
        -> Result<Vec<Transfer>>;

    /// Make every write of this transaction visible.
    async fn commit(self) -> Result<()>;

    /// Discard every write of this transaction.
    async fn rollback(self) -> Result<()>;
}

/// A transactional ledger store.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Handle type for one open transaction.
    type Tx: LedgerTx + 'static;

    /// Begin a transaction.
    async fn begin(&self) -> Result<Self::Tx>;
}
