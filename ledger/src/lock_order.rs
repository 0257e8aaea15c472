//! Global lock-acquisition order for account rows.
//!
//! Every transfer mutates its two accounts smallest id first, whatever the
//! direction of the transfer. With one total order shared by all
//! transactions, a chain of lock waits can never close into a cycle.

use moneta_common::{AccountId, TransferRequest};
use rust_decimal::Decimal;

use crate::balance::AddAccountBalanceParams;

/// Return the two values smallest first.
pub fn ordered_pair<T: Ord>(a: T, b: T) -> (T, T) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// One balance mutation of a transfer.
///
/// Ordered by `account_id` first, so [`ordered_pair`] on two legs of the
/// same transfer yields lock order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct BalanceLeg {
    pub account_id: AccountId,
    pub delta: Decimal,
}

impl From<BalanceLeg> for AddAccountBalanceParams {
    fn from(leg: BalanceLeg) -> Self {
        AddAccountBalanceParams::new(leg.account_id, leg.delta)
    }
}

/// The two balance mutations of `request`, in lock-acquisition order.
pub fn balance_legs(request: &TransferRequest) -> (BalanceLeg, BalanceLeg) {
    let debit = BalanceLeg {
        account_id: request.from_account_id,
        delta: -request.amount,
    };
    let credit = BalanceLeg {
        account_id: request.to_account_id,
        delta: request.amount,
    };

    ordered_pair(debit, credit)
}
