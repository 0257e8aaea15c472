//! Identifier types for ledger rows.
//!
//! All three row kinds are keyed by store-assigned 64-bit integers. The
//! newtypes keep an entry id from being passed where an account id is
//! expected; `Ord` on [`AccountId`] is the global lock-acquisition order.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw database id.
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            /// Get the raw database id.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

row_id!(
    /// Identifier of an account row.
    AccountId
);

row_id!(
    /// Identifier of an entry row.
    EntryId
);

row_id!(
    /// Identifier of a transfer row.
    TransferId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_id_ordering() {
        assert!(AccountId::new(3) < AccountId::new(7));
        assert_eq!(AccountId::new(7).max(AccountId::new(3)), AccountId::new(7));
    }

    #[test]
    fn test_id_serializes_as_plain_integer() {
        let json = serde_json::to_string(&TransferId::new(42)).unwrap();
        assert_eq!(json, "42");

        let id: EntryId = serde_json::from_str("17").unwrap();
        assert_eq!(id.get(), 17);
    }
}
