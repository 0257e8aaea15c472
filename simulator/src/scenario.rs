//! Transfer workloads.

use clap::ValueEnum;
use moneta_common::{AccountId, TransferRequest};
use rand::Rng;
use rust_decimal::Decimal;
use serde::Serialize;

/// Shape of the generated transfer stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scenario {
    /// Alternate A→B and B→A between the first two accounts. Every
    /// transfer contends on the same pair of rows in both directions.
    PingPong,
    /// Every other account pays the first one.
    FanIn,
    /// Uniformly random distinct pairs.
    Random,
}

impl Scenario {
    /// Build `count` transfer requests over `accounts`.
    pub fn plan<R: Rng>(
        self,
        accounts: &[AccountId],
        count: usize,
        amount: Decimal,
        rng: &mut R,
    ) -> anyhow::Result<Vec<TransferRequest>> {
        if accounts.len() < 2 {
            anyhow::bail!("scenario {self:?} needs at least two accounts");
        }

        let requests = match self {
            Scenario::PingPong => (0..count)
                .map(|i| {
                    let (from, to) = if i % 2 == 0 { (0, 1) } else { (1, 0) };
                    TransferRequest::new(accounts[from], accounts[to], amount)
                })
                .collect(),
            Scenario::FanIn => (0..count)
                .map(|i| {
                    let from = 1 + i % (accounts.len() - 1);
                    TransferRequest::new(accounts[from], accounts[0], amount)
                })
                .collect(),
            Scenario::Random => (0..count)
                .map(|_| {
                    let from = rng.gen_range(0..accounts.len());
                    let mut to = rng.gen_range(0..accounts.len() - 1);
                    if to >= from {
                        to += 1;
                    }
                    TransferRequest::new(accounts[from], accounts[to], amount)
                })
                .collect(),
        };

        Ok(requests)
    }
}
