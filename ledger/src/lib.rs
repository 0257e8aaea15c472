//! Moneta ledger.
//!
//! Transactional transfer engine over a pluggable ledger store. A transfer
//! writes one transfer row, two balancing entries and two balance updates
//! in a single transaction, taking account row locks in a global order.

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod entry;
pub mod lock_order;
pub mod metrics;
pub mod policy;
pub mod store;
pub mod transfer;

pub use account::{Account, CreateAccountParams};
pub use balance::AddAccountBalanceParams;
pub use config::{LedgerConfig, PoolConfig};
pub use engine::TransferEngine;
pub use entry::{CreateEntryParams, Entry, EntryType};
pub use lock_order::{balance_legs, ordered_pair, BalanceLeg};
pub use metrics::{
    InFlightTransfer, SharedTransferMetrics, TransferMetrics, TransferMetricsSnapshot,
};
pub use policy::TransferPolicy;
pub use store::{
    execute_atomically, LedgerStore, LedgerTx, MemoryLedgerStore, MemoryLedgerTx, Page,
    PgLedgerStore, PgLedgerTx, TransferFilter, UnitOfWork,
};
pub use transfer::{CreateTransferParams, Transfer, TransferResult};
