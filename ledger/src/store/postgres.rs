//! PostgreSQL ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx error | SQLSTATE | LedgerError |
//! |------------|----------|-------------|
//! | Database | `23502`, `23503`, `23505`, `23514` | `ConstraintViolation` |
//! | Database | `40001`, `40P01` | `SerializationFailure` |
//! | Database | `55P03` | `LockWaitTimeout` |
//! | Database | `57014` | `Timeout` |
//! | Database | any other | `DatabaseError` |
//! | RowNotFound | N/A | `NotFound` |
//! | PoolTimedOut | N/A | `Timeout` |
//! | Other | N/A | `DatabaseError` |
//!
//! Every transaction runs at READ COMMITTED with a local `lock_timeout`, so
//! a blocked balance update fails with `55P03` instead of waiting forever.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moneta_common::{as_pg_interval, AccountId, Currency, EntryId, LedgerError, Result, TransferId};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::{debug, info, instrument};

use super::{LedgerStore, LedgerTx, Page, TransferFilter};
use crate::account::{Account, CreateAccountParams};
use crate::balance::AddAccountBalanceParams;
use crate::config::LedgerConfig;
use crate::entry::{CreateEntryParams, Entry};
use crate::transfer::{CreateTransferParams, Transfer};

/// Map a SQLSTATE code onto the ledger error taxonomy.
pub fn classify_sqlstate(code: &str, constraint: Option<&str>, message: String) -> LedgerError {
    match code {
        "23502" | "23503" | "23505" | "23514" => LedgerError::ConstraintViolation {
            constraint: constraint.unwrap_or(code).to_string(),
            message,
        },
        "40001" | "40P01" => LedgerError::SerializationFailure(message),
        "55P03" => LedgerError::LockWaitTimeout(message),
        "57014" => LedgerError::Timeout(message),
        _ => LedgerError::DatabaseError(format!("[{code}] {message}")),
    }
}

/// Map SQLx errors to LedgerError.
pub fn map_db_error(err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code() {
                Some(code) => classify_sqlstate(code.as_ref(), db_err.constraint(), message),
                None => LedgerError::DatabaseError(message),
            }
        }
        sqlx::Error::RowNotFound => LedgerError::NotFound("row not found".to_string()),
        sqlx::Error::PoolTimedOut => {
            LedgerError::Timeout("timed out acquiring a database connection".to_string())
        }
        other => LedgerError::DatabaseError(other.to_string()),
    }
}

fn not_found(kind: &str, id: impl std::fmt::Display) -> LedgerError {
    LedgerError::NotFound(format!("{kind} {id}"))
}

// SQLx row types

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    owner: String,
    balance: Decimal,
    currency: String,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: AccountId::new(row.id),
            owner: row.owner,
            balance: row.balance,
            currency: Currency::new(row.currency),
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    account_id: i64,
    amount: Decimal,
    created_at: DateTime<Utc>,
}

impl From<EntryRow> for Entry {
    fn from(row: EntryRow) -> Self {
        Self {
            id: EntryId::new(row.id),
            account_id: AccountId::new(row.account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TransferRow {
    id: i64,
    from_account_id: i64,
    to_account_id: i64,
    amount: Decimal,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Self {
            id: TransferId::new(row.id),
            from_account_id: AccountId::new(row.from_account_id),
            to_account_id: AccountId::new(row.to_account_id),
            amount: row.amount,
            created_at: row.created_at,
        }
    }
}

const ACCOUNT_COLUMNS: &str = "id, owner, balance, currency, created_at";
const ENTRY_COLUMNS: &str = "id, account_id, amount, created_at";
const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, created_at";

/// PostgreSQL-backed ledger store.
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_wait_timeout: Duration,
}

impl PgLedgerStore {
    /// Open a connection pool from configuration.
    #[instrument(skip(config), fields(max_connections = config.pool.max_connections))]
    pub async fn connect(config: &LedgerConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.pool.max_connections)
            .acquire_timeout(config.pool.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map_err(map_db_error)?;

        info!("Connected to ledger database");
        Ok(Self::from_pool(pool, config.lock_wait_timeout))
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool, lock_wait_timeout: Duration) -> Self {
        Self {
            pool,
            lock_wait_timeout,
        }
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::DatabaseError(format!("migration failed: {e}")))?;
        info!("Ledger schema up to date");
        Ok(())
    }

    /// Check that the database answers.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_db_error)?;
        Ok(())
    }

    /// The underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx> {
        let mut tx = self.pool.begin().await.map_err(map_db_error)?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(as_pg_interval(self.lock_wait_timeout))
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        Ok(PgLedgerTx { tx })
    }
}

/// One open PostgreSQL transaction. Dropping it rolls back.
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn create_account(&mut self, params: CreateAccountParams) -> Result<Account> {
        let sql = format!(
            "INSERT INTO accounts (owner, balance, currency) VALUES ($1, $2, $3) RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: AccountRow = sqlx::query_as(&sql)
            .bind(&params.owner)
            .bind(params.balance)
            .bind(params.currency.code())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(row.into())
    }

    async fn get_account(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.map(Account::from).ok_or_else(|| not_found("account", id))
    }

    async fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1 FOR NO KEY UPDATE");
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.map(Account::from).ok_or_else(|| not_found("account", id))
    }

    #[instrument(skip(self), fields(account_id = %params.account_id, amount = %params.amount))]
    async fn add_account_balance(&mut self, params: AddAccountBalanceParams) -> Result<Account> {
        // Read and write in one statement: the row lock is taken before
        // `balance` is read, so concurrent deltas serialize.
        let sql = format!(
            "UPDATE accounts SET balance = balance + $1 WHERE id = $2 RETURNING {ACCOUNT_COLUMNS}"
        );
        let row: Option<AccountRow> = sqlx::query_as(&sql)
            .bind(params.amount)
            .bind(params.account_id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;

        let account = row
            .map(Account::from)
            .ok_or_else(|| not_found("account", params.account_id))?;
        debug!(balance = %account.balance, "Balance updated");
        Ok(account)
    }

    async fn create_entry(&mut self, params: CreateEntryParams) -> Result<Entry> {
        let sql = format!(
            "INSERT INTO entries (account_id, amount) VALUES ($1, $2) RETURNING {ENTRY_COLUMNS}"
        );
        let row: EntryRow = sqlx::query_as(&sql)
            .bind(params.account_id.get())
            .bind(params.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(row.into())
    }

    async fn get_entry(&mut self, id: EntryId) -> Result<Entry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = $1");
        let row: Option<EntryRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.map(Entry::from).ok_or_else(|| not_found("entry", id))
    }

    async fn list_entries(&mut self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        let sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM entries WHERE account_id = $1 ORDER BY id LIMIT $2 OFFSET $3"
        );
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(account_id.get())
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn list_all_entries(&mut self, page: Page) -> Result<Vec<Entry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM entries ORDER BY id LIMIT $1 OFFSET $2");
        let rows: Vec<EntryRow> = sqlx::query_as(&sql)
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().map(Entry::from).collect())
    }

    async fn create_transfer(&mut self, params: CreateTransferParams) -> Result<Transfer> {
        let sql = format!(
            "INSERT INTO transfers (from_account_id, to_account_id, amount) VALUES ($1, $2, $3) RETURNING {TRANSFER_COLUMNS}"
        );
        let row: TransferRow = sqlx::query_as(&sql)
            .bind(params.from_account_id.get())
            .bind(params.to_account_id.get())
            .bind(params.amount)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(row.into())
    }

    async fn get_transfer(&mut self, id: TransferId) -> Result<Transfer> {
        let sql = format!("SELECT {TRANSFER_COLUMNS} FROM transfers WHERE id = $1");
        let row: Option<TransferRow> = sqlx::query_as(&sql)
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        row.map(Transfer::from).ok_or_else(|| not_found("transfer", id))
    }

    async fn list_transfers(
        &mut self,
        filter: TransferFilter,
        page: Page,
    ) -> Result<Vec<Transfer>> {
        let sql = format!(
            "SELECT {TRANSFER_COLUMNS} FROM transfers \
             WHERE (from_account_id = $1 AND to_account_id = $2) \
                OR (from_account_id = $2 AND to_account_id = $1) \
             ORDER BY id LIMIT $3 OFFSET $4"
        );
        let rows: Vec<TransferRow> = sqlx::query_as(&sql)
            .bind(filter.account_a.get())
            .bind(filter.account_b.get())
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(map_db_error)?;
        Ok(rows.into_iter().map(Transfer::from).collect())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(map_db_error)
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await.map_err(map_db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(code: &str) -> LedgerError {
        classify_sqlstate(code, None, "boom".to_string())
    }

    #[test]
    fn test_constraint_codes() {
        for code in ["23502", "23503", "23505", "23514"] {
            assert!(
                matches!(classify(code), LedgerError::ConstraintViolation { .. }),
                "{code}"
            );
        }

        let err = classify_sqlstate(
            "23503",
            Some("entries_account_id_fkey"),
            "violates foreign key".to_string(),
        );
        assert!(matches!(
            err,
            LedgerError::ConstraintViolation { ref constraint, .. }
                if constraint == "entries_account_id_fkey"
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_contention_codes_are_retryable() {
        assert!(matches!(classify("40001"), LedgerError::SerializationFailure(_)));
        assert!(matches!(classify("40P01"), LedgerError::SerializationFailure(_)));
        assert!(matches!(classify("55P03"), LedgerError::LockWaitTimeout(_)));
        assert!(matches!(classify("57014"), LedgerError::Timeout(_)));

        for code in ["40001", "40P01", "55P03", "57014"] {
            assert!(classify(code).is_retryable(), "{code}");
        }
    }

    #[test]
    fn test_unknown_code_is_database_error() {
        let err = classify("08006");
        assert!(matches!(err, LedgerError::DatabaseError(ref m) if m.contains("08006")));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_database_errors() {
        assert!(matches!(
            map_db_error(sqlx::Error::RowNotFound),
            LedgerError::NotFound(_)
        ));
        assert!(map_db_error(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(matches!(
            map_db_error(sqlx::Error::PoolClosed),
            LedgerError::DatabaseError(_)
        ));
    }
}
