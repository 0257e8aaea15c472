//! Moneta Simulator
//!
//! Fires concurrent transfers at the ledger and checks that no money was
//! created or destroyed.

use std::time::Duration;

use clap::Parser;
use moneta_ledger::{LedgerConfig, LedgerStore, MemoryLedgerStore, PgLedgerStore, TransferEngine};
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod scenario;

use controller::{SimulationController, SimulationSettings};
use scenario::Scenario;

/// Moneta Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent transfer load generator for the Moneta ledger")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "4")]
    accounts: usize,

    /// Number of transfers to submit
    #[arg(short, long, default_value = "1000")]
    transfers: usize,

    /// Transfers in flight at once
    #[arg(short, long, default_value = "32")]
    concurrency: usize,

    /// Amount moved by each transfer
    #[arg(long, default_value = "10")]
    amount: Decimal,

    /// Opening balance of every account
    #[arg(long, default_value = "100000")]
    initial_balance: Decimal,

    /// Workload shape
    #[arg(short, long, value_enum, default_value = "ping-pong")]
    scenario: Scenario,

    /// Retries per transfer after retryable errors
    #[arg(long, default_value = "5")]
    max_retries: u32,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// PostgreSQL URL; falls back to DATABASE_URL, then DB_SOURCE
    #[arg(long, env = "MONETA_SIM_DATABASE_URL")]
    database_url: Option<String>,

    /// Use the in-process store even when a database URL is configured
    #[arg(long)]
    in_process: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json_report: bool,
}

impl Args {
    /// The database to run against and where its URL came from, or `None`
    /// for the in-process store.
    fn database_url<F>(&self, lookup: F) -> Option<(String, &'static str)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.in_process {
            return None;
        }

        self.database_url
            .clone()
            .map(|url| (url, "--database-url"))
            .or_else(|| lookup("DATABASE_URL").map(|url| (url, "DATABASE_URL")))
            .or_else(|| lookup("DB_SOURCE").map(|url| (url, "DB_SOURCE")))
    }

    fn settings(&self) -> SimulationSettings {
        SimulationSettings {
            accounts: self.accounts,
            transfers: self.transfers,
            concurrency: self.concurrency,
            amount: self.amount,
            initial_balance: self.initial_balance,
            scenario: self.scenario,
            max_retries: self.max_retries,
            seed: self.seed,
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    let mut config = LedgerConfig::from_env();
    config.validate()?;

    let consistent = match args.database_url(|key| std::env::var(key).ok()) {
        Some((url, source)) => {
            config.database_url = url;
            let store = PgLedgerStore::connect(&config).await?;
            store.migrate().await?;
            info!(source, "Using PostgreSQL store");
            simulate(store, &config, &args).await?
        }
        None => {
            info!("Using in-process store");
            simulate(MemoryLedgerStore::from_config(&config), &config, &args).await?
        }
    };

    if !consistent {
        error!("Ledger inconsistent after simulation");
        std::process::exit(1);
    }

    Ok(())
}

async fn simulate<S: LedgerStore + 'static>(
    store: S,
    config: &LedgerConfig,
    args: &Args,
) -> anyhow::Result<bool> {
    let engine = TransferEngine::with_config(store, config);
    let mut controller = SimulationController::new(engine, args.settings());

    controller.initialize().await?;
    let report = controller.run().await?;

    if args.json_report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let m = &report.metrics;
        info!("Simulation complete in {:?}", Duration::from_millis(report.elapsed_ms));
        info!("Transfers: {} ok, {} failed, {} retries", m.successful, m.failed, m.retries);
        info!("Throughput: {:.1}/s", m.throughput_per_sec);
        info!(
            "Latency: avg {}ms, p50 {}ms, p95 {}ms, p99 {}ms",
            m.average_latency_ms, m.p50_latency_ms, m.p95_latency_ms, m.p99_latency_ms
        );
        info!(
            "Balance before {} after {} (conserved: {}), entries balanced: {}",
            report.balance_before, report.balance_after, report.conserved, report.integrity_ok
        );
    }

    Ok(report.is_consistent())
}
