//! Time utilities and timing defaults for the ledger.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Timing defaults shared by the store backends and the engine.
pub mod constants {
    use super::Duration;

    /// How long a transaction waits for another transaction's row lock.
    pub const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Deadline for a whole unit of work, begin to commit.
    pub const UNIT_OF_WORK_TIMEOUT: Duration = Duration::from_secs(30);

    /// How long to wait for a pooled database connection.
    pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default connection pool size.
    pub const MAX_CONNECTIONS: u32 = 10;
}

/// Row creation timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Render a duration as a PostgreSQL interval literal in milliseconds.
///
/// Rounds up to at least `1ms`: PostgreSQL reads a zero `lock_timeout` or
/// `statement_timeout` as "wait forever".
pub fn as_pg_interval(duration: Duration) -> String {
    let millis = duration.as_micros().div_ceil(1000).max(1);
    format!("{millis}ms")
}
