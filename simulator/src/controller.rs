//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use moneta_common::{AccountId, Currency, LedgerError, TransferRequest};
use moneta_ledger::{CreateAccountParams, LedgerStore, TransferEngine, TransferMetricsSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{Attempt, MetricsSummary};
use crate::scenario::Scenario;

/// Run parameters.
#[derive(Debug, Clone)]
pub struct SimulationSettings {
    pub accounts: usize,
    pub transfers: usize,
    pub concurrency: usize,
    pub amount: Decimal,
    pub initial_balance: Decimal,
    pub scenario: Scenario,
    pub max_retries: u32,
    pub seed: Option<u64>,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Scenario,
    pub elapsed_ms: u64,
    pub metrics: MetricsSummary,
    pub engine: TransferMetricsSnapshot,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub conserved: bool,
    pub integrity_ok: bool,
}

impl SimulationReport {
    /// Money was neither created nor destroyed and the entries balance.
    pub fn is_consistent(&self) -> bool {
        self.conserved && self.integrity_ok
    }
}

/// Drives a transfer workload against one engine.
pub struct SimulationController<S: LedgerStore> {
    engine: Arc<TransferEngine<S>>,
    settings: SimulationSettings,
    rng: StdRng,
    accounts: Vec<AccountId>,
}

impl<S: LedgerStore + 'static> SimulationController<S> {
    /// Create a new simulation controller.
    pub fn new(engine: TransferEngine<S>, settings: SimulationSettings) -> Self {
        let rng = match settings.seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        Self {
            engine: Arc::new(engine),
            settings,
            rng,
            accounts: Vec::new(),
        }
    }

    /// Open the simulated accounts.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(
            accounts = self.settings.accounts,
            initial_balance = %self.settings.initial_balance,
            "Opening accounts"
        );

        for i in 0..self.settings.accounts {
            let account = self
                .engine
                .create_account(CreateAccountParams::new(
                    format!("sim-{i}"),
                    self.settings.initial_balance,
                    Currency::usd(),
                ))
                .await?;
            self.accounts.push(account.id);
        }

        Ok(())
    }

    /// Run the workload and check the ledger afterwards.
    pub async fn run(&mut self) -> anyhow::Result<SimulationReport> {
        let requests = self.settings.scenario.plan(
            &self.accounts,
            self.settings.transfers,
            self.settings.amount,
            &mut self.rng,
        )?;

        let balance_before = self.total_balance().await?;
        info!(
            scenario = ?self.settings.scenario,
            transfers = requests.len(),
            concurrency = self.settings.concurrency,
            "Running scenario"
        );

        let start = Instant::now();
        let max_retries = self.settings.max_retries;

        let engine = &self.engine;
        let attempts: Vec<Attempt> = stream::iter(requests)
            .map(|request| async move {
                let started = Instant::now();
                let (outcome, retries) = submit_with_retry(engine, request, max_retries).await;
                if let Err(err) = &outcome {
                    warn!(error = %err, retries, "Transfer abandoned");
                }
                Attempt {
                    latency_ms: started.elapsed().as_millis() as u64,
                    retries,
                    committed: outcome.is_ok(),
                }
            })
            .buffer_unordered(self.settings.concurrency.max(1))
            .collect()
            .await;

        let elapsed = start.elapsed();
        let balance_after = self.total_balance().await?;
        let integrity_ok = self.engine.verify_integrity().await?;

        let report = SimulationReport {
            scenario: self.settings.scenario,
            elapsed_ms: elapsed.as_millis() as u64,
            metrics: MetricsSummary::from_attempts(&attempts, elapsed),
            engine: self.engine.metrics().snapshot(),
            balance_before,
            balance_after,
            conserved: balance_before == balance_after,
            integrity_ok,
        };

        info!(
            successful = report.metrics.successful,
            failed = report.metrics.failed,
            retries = report.metrics.retries,
            conserved = report.conserved,
            integrity_ok = report.integrity_ok,
            "Scenario finished"
        );

        Ok(report)
    }

    /// Accounts opened by [`initialize`](Self::initialize).
    pub fn accounts(&self) -> &[AccountId] {
        &self.accounts
    }

    async fn total_balance(&self) -> anyhow::Result<Decimal> {
        let mut total = Decimal::ZERO;
        for id in &self.accounts {
            total += self.engine.get_account(*id).await?.balance;
        }
        Ok(total)
    }
}

/// Submit one transfer, re-issuing it after retryable errors.
///
/// Backoff is the error's suggested delay doubled per attempt, with up to
/// 50% random jitter.
async fn submit_with_retry<S: LedgerStore>(
    engine: &TransferEngine<S>,
    request: TransferRequest,
    max_retries: u32,
) -> (Result<(), LedgerError>, u32) {
    let mut retries = 0;

    loop {
        match engine.transfer(request).await {
            Ok(_) => return (Ok(()), retries),
            Err(err) if err.is_retryable() && retries < max_retries => {
                let delay = backoff(&err, retries);
                debug!(error = %err, retries, delay_ms = delay.as_millis() as u64, "Retrying transfer");
                retries += 1;
                tokio::time::sleep(delay).await;
            }
            Err(err) => return (Err(err), retries),
        }
    }
}

fn backoff(err: &LedgerError, attempt: u32) -> Duration {
    let base = err.retry_after_ms().unwrap_or(10);
    let scaled = base.saturating_mul(1 << attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=scaled / 2);
    Duration::from_millis(scaled + jitter)
}
