//! In-process ledger store.
//!
//! Behaves like the PostgreSQL schema under READ COMMITTED: committed rows
//! live in shared tables, a transaction buffers its own writes and sees
//! them, and every account it mutates stays row-locked until commit or
//! rollback. Commit publishes the buffered rows in one critical section.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moneta_common::{constants, now, AccountId, EntryId, LedgerError, Result, TransferId};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::{trace, warn};

use super::{LedgerStore, LedgerTx, Page, TransferFilter};
use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::config::LedgerConfig;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

#[derive(Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, Entry>,
    transfers: BTreeMap<TransferId, Transfer>,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: DashMap<AccountId, Arc<RowLock<()>>>,
    account_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    lock_wait_timeout: Duration,
}

impl Shared {
    fn committed_account(&self, id: AccountId) -> Option<Account> {
        self.tables.lock().accounts.get(&id).cloned()
    }
}

/// Sequences hand out ids outside transactions, so rolled-back inserts
/// leave gaps and ids are never reused.
fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::Relaxed) + 1
}

fn paginate<T>(rows: impl Iterator<Item = T>, page: Page) -> Vec<T> {
    let offset = usize::try_from(page.offset.max(0)).unwrap_or(usize::MAX);
    let limit = usize::try_from(page.limit.max(0)).unwrap_or(usize::MAX);
    rows.skip(offset).take(limit).collect()
}

fn foreign_key_violation(constraint: &str, account_id: AccountId) -> LedgerError {
    LedgerError::ConstraintViolation {
        constraint: constraint.to_string(),
        message: format!("account {account_id} does not exist"),
    }
}

/// In-process store with row-level locking.
#[derive(Clone)]
pub struct MemoryLedgerStore {
    shared: Arc<Shared>,
}

impl MemoryLedgerStore {
    /// Create an empty store with the default lock wait timeout.
    pub fn new() -> Self {
        Self::with_lock_wait_timeout(constants::LOCK_WAIT_TIMEOUT)
    }

    /// Create an empty store whose row-lock waits give up after `timeout`.
    pub fn with_lock_wait_timeout(timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                account_seq: AtomicI64::new(0),
                entry_seq: AtomicI64::new(0),
                transfer_seq: AtomicI64::new(0),
                lock_wait_timeout: timeout,
            }),
        }
    }

    /// Create an empty store using the configured lock wait timeout.
    pub fn from_config(config: &LedgerConfig) -> Self {
        Self::with_lock_wait_timeout(config.lock_wait_timeout)
    }

    /// Committed state of an account.
    pub fn committed_account(&self, id: AccountId) -> Option<Account> {
        self.shared.committed_account(id)
    }

    /// Number of committed entries.
    pub fn entry_count(&self) -> usize {
        self.shared.tables.lock().entries.len()
    }

    /// Number of committed transfers.
    pub fn transfer_count(&self) -> usize {
        self.shared.tables.lock().transfers.len()
    }

    /// Sum of all committed balances.
    pub fn total_balance(&self) -> Decimal {
        self.shared
            .tables
            .lock()
            .accounts
            .values()
            .map(|a| a.balance)
            .sum()
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<MemoryLedgerTx> {
        Ok(MemoryLedgerTx {
            shared: Arc::clone(&self.shared),
            row_guards: HashMap::new(),
            accounts: HashMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        })
    }
}

/// One open transaction on a [`MemoryLedgerStore`].
///
/// Every account in `accounts` is row-locked by this transaction, so its
/// buffered copy is authoritative until commit.
pub struct MemoryLedgerTx {
    shared: Arc<Shared>,
    row_guards: HashMap<AccountId, OwnedMutexGuard<()>>,
    accounts: HashMap<AccountId, Account>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryLedgerTx {
    fn visible_account(&self, id: AccountId) -> Option<Account> {
        match self.accounts.get(&id) {
            Some(account) => Some(account.clone()),
            None => self.shared.committed_account(id),
        }
    }

    fn require_account(&self, id: AccountId) -> Result<Account> {
        self.visible_account(id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {id}")))
    }

    /// Take the row lock of `id`, waiting at most the lock wait timeout.
    async fn lock_row(&mut self, id: AccountId) -> Result<()> {
        if self.row_guards.contains_key(&id) {
            return Ok(());
        }

        let row_lock = Arc::clone(self.shared.row_locks.entry(id).or_default().value());

        match tokio::time::timeout(self.shared.lock_wait_timeout, row_lock.lock_owned()).await {
            Ok(guard) => {
                trace!(account_id = %id, "Row lock acquired");
                self.row_guards.insert(id, guard);
                Ok(())
            }
            Err(_) => {
                warn!(account_id = %id, "Row lock wait timed out");
                Err(LedgerError::LockWaitTimeout(format!(
                    "account {id} still locked after {}ms",
                    self.shared.lock_wait_timeout.as_millis()
                )))
            }
        }
    }

    /// Lock `id` and return its current row. The row is re-read after the
    /// lock is granted since the previous holder may have changed it.
    async fn lock_account(&mut self, id: AccountId) -> Result<Account> {
        self.require_account(id)?;
        self.lock_row(id).await?;
        self.require_account(id)
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        let account = Account {
            id: AccountId::new(next_id(&self.shared.account_seq)),
            owner: params.owner,
            balance: params.balance,
            currency: params.currency,
            created_at: now(),
        };

        self.lock_row(account.id).await?;
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        self.require_account(id)
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.lock_account(id).await
    }

    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        let mut account = self.lock_account(params.account_id).await?;
        account.balance += params.amount;
        self.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        if self.visible_account(params.account_id).is_none() {
            return Err(foreign_key_violation(
                "entries_account_id_fkey",
                params.account_id,
            ));
        }

        let entry = Entry {
            id: EntryId::new(next_id(&self.shared.entry_seq)),
            account_id: params.account_id,
            amount: params.amount,
            created_at: now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }

        self.shared
            .tables
            .lock()
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("entry {id}")))
    }

    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let mut rows: Vec<Entry> = {
            let tables = self.shared.tables.lock();
            tables
                .entries
                .values()
                .filter(|e| e.account_id == account_id)
                .cloned()
                .collect()
        };
        rows.extend(
            self.entries
                .iter()
                .filter(|e| e.account_id == account_id)
                .cloned(),
        );
        rows.sort_by_key(|e| e.id);

        Ok(paginate(rows.into_iter(), page))
    }

    async fn list_all_entries(&mut self, page: Page) -> Result<Vec<Entry>> {
        let mut rows: Vec<Entry> = self.shared.tables.lock().entries.values().cloned().collect();
        rows.extend(self.entries.iter().cloned());
        rows.sort_by_key(|e| e.id);

        Ok(paginate(rows.into_iter(), page))
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        if params.amount <= Decimal::ZERO {
            return Err(LedgerError::ConstraintViolation {
                constraint: "transfers_amount_check".to_string(),
                message: format!("amount {} is not positive", params.amount),
            });
        }
        if self.visible_account(params.from_account_id).is_none() {
            return Err(foreign_key_violation(
                "transfers_from_account_id_fkey",
                params.from_account_id,
            ));
        }
        if self.visible_account(params.to_account_id).is_none() {
            return Err(foreign_key_violation(
                "transfers_to_account_id_fkey",
                params.to_account_id,
            ));
        }

        let transfer = Transfer {
            id: TransferId::new(next_id(&self.shared.transfer_seq)),
            from_account_id: params.from_account_id,
            to_account_id: params.to_account_id,
            amount: params.amount,
            created_at: now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }

        self.shared
            .tables
            .lock()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transfer {id}")))
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        let mut rows: Vec<Transfer> = {
            let tables = self.shared.tables.lock();
            tables
                .transfers
                .values()
                .filter(|t| filter.matches(t))
                .cloned()
                .collect()
        };
        rows.extend(self.transfers.iter().filter(|t| filter.matches(t)).cloned());
        rows.sort_by_key(|t| t.id);

        Ok(paginate(rows.into_iter(), page))
    }

    async fn commit(self) -> Result<()> {
        let MemoryLedgerTx {
            shared,
            row_guards,
            accounts,
            entries,
            transfers,
        } = self;

        {
            let mut tables = shared.tables.lock();
            tables.accounts.extend(accounts);
            tables
                .entries
                .extend(entries.into_iter().map(|e| (e.id, e)));
            tables
                .transfers
                .extend(transfers.into_iter().map(|t| (t.id, t)));
        }

        // Row locks are released only once the new rows are visible.
        drop(row_guards);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        trace!(
            locked_rows = self.row_guards.len(),
            discarded_entries = self.entries.len(),
            "Rolling back in-memory transaction"
        );
        Ok(())
    }
}
