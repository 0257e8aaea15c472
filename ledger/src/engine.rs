//! Transfer orchestrator.

use std::sync::Arc;
use std::time::Duration;

use moneta_common::{constants, AccountId, EntryId, Result, TransferId, TransferRequest};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::account::{Account, CreateAccountParams};
use crate::config::LedgerConfig;
use crate::entry::{is_balanced, CreateEntryParams, Entry};
use crate::lock_order::balance_legs;
use crate::metrics::{SharedTransferMetrics, TransferMetrics};
use crate::policy::TransferPolicy;
use crate::store::{execute_atomically, LedgerStore, LedgerTx, Page, TransferFilter};
use crate::transfer::{CreateTransferParams, Transfer, TransferResult};

/// Moves funds between accounts, one transaction per transfer.
///
/// The engine holds no locks of its own. Mutual exclusion comes from the
/// store's row locks, taken in the order given by [`balance_legs`].
pub struct TransferEngine<S: LedgerStore> {
    store: S,
    policy: TransferPolicy,
    unit_of_work_timeout: Duration,
    metrics: SharedTransferMetrics,
}

impl<S: LedgerStore> TransferEngine<S> {
    /// Create an engine with the default policy and timeout.
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: TransferPolicy::default(),
            unit_of_work_timeout: constants::UNIT_OF_WORK_TIMEOUT,
            metrics: Arc::new(TransferMetrics::new()),
        }
    }

    /// Create an engine using the configured policy and timeout.
    pub fn with_config(store: S, config: &LedgerConfig) -> Self {
        Self::new(store)
            .with_policy(config.policy)
            .with_timeout(config.unit_of_work_timeout)
    }

    /// Replace the transfer policy.
    pub fn with_policy(mut self, policy: TransferPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the unit-of-work deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.unit_of_work_timeout = timeout;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn policy(&self) -> TransferPolicy {
        self.policy
    }

    pub fn metrics(&self) -> SharedTransferMetrics {
        Arc::clone(&self.metrics)
    }

    /// Move `request.amount` from one account to another.
    ///
    /// Creates the transfer row, the debit entry and the credit entry, then
    /// applies both balance deltas smallest account id first. Any failure
    /// rolls all of it back. Retryable errors are returned to the caller
    /// unchanged.
    #[instrument(
        skip(self),
        fields(
            from_account_id = %request.from_account_id,
            to_account_id = %request.to_account_id,
            amount = %request.amount,
        )
    )]
    pub async fn transfer(&self, request: TransferRequest) -> Result<TransferResult> {
        self.metrics.transfer_attempted();

        if let Err(err) = request.validate() {
            self.metrics.transfer_rejected();
            warn!(error = %err, "Transfer rejected");
            return Err(err);
        }

        let policy = self.policy;
        let in_flight = self.metrics.transfer_started();

        let outcome = execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(transfer_in_tx(tx, request, policy))
        })
        .await;

        match &outcome {
            Ok(result) => {
                in_flight.committed();
                info!(transfer_id = %result.transfer.id, "Transfer committed");
            }
            Err(err) => {
                in_flight.rolled_back(err.is_retryable());
                warn!(
                    error = %err,
                    code = err.error_code(),
                    retryable = err.is_retryable(),
                    "Transfer failed"
                );
            }
        }

        outcome
    }

    /// Open an account.
    #[instrument(skip(self, params), fields(owner = %params.owner))]
    pub async fn create_account(&self, params: CreateAccountParams) -> Result<Account> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.create_account(params).await })
        })
        .await
    }

    pub async fn get_account(&self, id: AccountId) -> Result<Account> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.get_account(id).await })
        })
        .await
    }

    pub async fn get_entry(&self, id: EntryId) -> Result<Entry> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.get_entry(id).await })
        })
        .await
    }

    pub async fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.get_transfer(id).await })
        })
        .await
    }

    /// Entries of one account, oldest first.
    pub async fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.list_entries(account_id, page).await })
        })
        .await
    }

    /// Transfers between two accounts in either direction, oldest first.
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        execute_atomically(&self.store, self.unit_of_work_timeout, move |tx| {
            Box::pin(async move { tx.list_transfers(filter, page).await })
        })
        .await
    }

    /// Verify ledger integrity: every debit entry has its credit, so all
    /// entry amounts sum to zero.
    ///
    /// This is a ledger-wide check only. Opening balances are not recorded
    /// as entries, so an account's balance is not reconciled against the
    /// sum of its own entries here.
    #[instrument(skip(self))]
    pub async fn verify_integrity(&self) -> Result<bool> {
        let entries = execute_atomically(&self.store, self.unit_of_work_timeout, |tx| {
            Box::pin(async move { tx.list_all_entries(Page::all()).await })
        })
        .await?;

        let balanced = is_balanced(&entries);
        if !balanced {
            let drift: Decimal = entries.iter().map(|e| e.amount).sum();
            warn!(entries = entries.len(), %drift, "Ledger entries do not sum to zero");
        }
        Ok(balanced)
    }
}

/// The transfer unit of work. Step order is fixed: transfer row, debit
/// entry, credit entry, then the two balance mutations in lock order.
async fn transfer_in_tx<T: LedgerTx>(
    tx: &mut T,
    request: TransferRequest,
    policy: TransferPolicy,
) -> Result<TransferResult> {
    let transfer = tx
        .create_transfer(CreateTransferParams::from(request))
        .await?;

    let from_entry = tx
        .create_entry(CreateEntryParams::debit(
            request.from_account_id,
            request.amount,
        ))
        .await?;

    let to_entry = tx
        .create_entry(CreateEntryParams::credit(
            request.to_account_id,
            request.amount,
        ))
        .await?;

    let (first, second) = balance_legs(&request);
    let first_account = tx.add_account_balance(first.into()).await?;
    let second_account = tx.add_account_balance(second.into()).await?;

    let (from_account, to_account) = if first.account_id == request.from_account_id {
        (first_account, second_account)
    } else {
        (second_account, first_account)
    };

    policy.check(&from_account, &to_account)?;

    Ok(TransferResult {
        transfer,
        from_account,
        to_account,
        from_entry,
        to_entry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLedgerStore;
    use moneta_common::{Currency, LedgerError};

    async fn engine_with_accounts(
        a_balance: i64,
        b_balance: i64,
    ) -> (TransferEngine<MemoryLedgerStore>, AccountId, AccountId) {
        let engine = TransferEngine::new(MemoryLedgerStore::new());
        let a = engine
            .create_account(CreateAccountParams::new(
                "alice",
                Decimal::from(a_balance),
                Currency::usd(),
            ))
            .await
            .unwrap();
        let b = engine
            .create_account(CreateAccountParams::new(
                "bob",
                Decimal::from(b_balance),
                Currency::usd(),
            ))
            .await
            .unwrap();
        (engine, a.id, b.id)
    }

    #[tokio::test]
    async fn test_transfer_result() {
        let (engine, a, b) = engine_with_accounts(100, 0).await;

        let result = engine
            .transfer(TransferRequest::new(a, b, Decimal::from(40)))
            .await
            .unwrap();

        assert_eq!(result.transfer.amount, Decimal::from(40));
        assert_eq!(result.from_entry.amount, Decimal::from(-40));
        assert_eq!(result.to_entry.amount, Decimal::from(40));
        assert_eq!(result.from_account.id, a);
        assert_eq!(result.from_account.balance, Decimal::from(60));
        assert_eq!(result.to_account.id, b);
        assert_eq!(result.to_account.balance, Decimal::from(40));
    }

    #[tokio::test]
    async fn test_reverse_transfer_maps_accounts_back() {
        let (engine, a, b) = engine_with_accounts(100, 100).await;

        // b > a, so the credit leg is applied first.
        let result = engine
            .transfer(TransferRequest::new(b, a, Decimal::from(25)))
            .await
            .unwrap();

        assert_eq!(result.from_account.id, b);
        assert_eq!(result.from_account.balance, Decimal::from(75));
        assert_eq!(result.to_account.id, a);
        assert_eq!(result.to_account.balance, Decimal::from(125));
        assert_eq!(result.from_entry.account_id, b);
        assert_eq!(result.to_entry.account_id, a);
    }

    #[tokio::test]
    async fn test_invalid_request_opens_no_transaction() {
        let (engine, a, b) = engine_with_accounts(100, 0).await;

        let err = engine
            .transfer(TransferRequest::new(a, a, Decimal::from(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer(_)));

        let err = engine
            .transfer(TransferRequest::new(a, b, Decimal::ZERO))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransfer(_)));

        let snapshot = engine.metrics().snapshot();
        assert_eq!(snapshot.attempted, 2);
        assert_eq!(snapshot.rejected, 2);
        assert_eq!(snapshot.rolled_back, 0);
        assert_eq!(engine.store().transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_verify_integrity() {
        let (engine, a, b) = engine_with_accounts(100, 0).await;

        // Opening balances have no entries and are outside the check.
        assert!(engine.list_entries(a, Page::all()).await.unwrap().is_empty());
        assert!(engine.verify_integrity().await.unwrap());

        for _ in 0..3 {
            engine
                .transfer(TransferRequest::new(a, b, Decimal::new(1050, 2)))
                .await
                .unwrap();
        }
        assert!(engine.verify_integrity().await.unwrap());
    }

    #[tokio::test]
    async fn test_lookups() {
        let (engine, a, b) = engine_with_accounts(100, 0).await;
        let result = engine
            .transfer(TransferRequest::new(a, b, Decimal::from(5)))
            .await
            .unwrap();

        assert_eq!(
            engine.get_transfer(result.transfer.id).await.unwrap(),
            result.transfer
        );
        assert_eq!(
            engine.get_entry(result.to_entry.id).await.unwrap(),
            result.to_entry
        );
        assert_eq!(
            engine.list_entries(a, Page::all()).await.unwrap(),
            vec![result.from_entry.clone()]
        );
        assert_eq!(
            engine
                .list_transfers(TransferFilter::between(b, a), Page::all())
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(matches!(
            engine.get_account(AccountId::new(404)).await,
            Err(LedgerError::NotFound(_))
        ));
    }
}
