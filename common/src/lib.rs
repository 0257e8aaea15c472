//! Moneta Common Types
//!
//! Shared types used across the Moneta ledger: row identifiers, currency
//! codes, the transfer request consumed by the transfer engine, and the
//! error taxonomy every store backend reports through.

pub mod identifiers;
pub mod monetary;
pub mod transfer;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use transfer::*;
pub use error::*;
pub use time::*;
