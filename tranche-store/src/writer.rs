use std::thread;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::warn;

use crate::{StoreError, StoreResult};

/// Retries granted after the first attempt when the store reports
/// contention (4 attempts total).
const BUSY_RETRIES: u32 = 3;

/// Linear backoff step between attempts: 50ms, 100ms, 150ms.
const BACKOFF_STEP: Duration = Duration::from_millis(50);

/// Run `op` inside an exclusive write transaction.
///
/// The exclusive behavior acquires the database's single writer lock before
/// `op` performs any read, which is what makes read-modify-write on the
/// sequence counters safe across connections. On `Ok` the transaction
/// commits; on any `Err` it rolls back in full, sequence increments
/// included.
///
/// An attempt that fails with [`StoreError::Busy`] is re-run from scratch
/// (its effects were rolled back) up to [`BUSY_RETRIES`] times with linear
/// backoff; exhaustion surfaces `Busy` to the caller. Every other error
/// propagates immediately after rollback.
pub(crate) fn run_write<T, F>(conn: &mut Connection, mut op: F) -> StoreResult<T>
where
    F: FnMut(&Transaction<'_>) -> StoreResult<T>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match write_once(conn, &mut op) {
            Err(StoreError::Busy) if attempt <= BUSY_RETRIES => {
                warn!(attempt, "write transaction contended, backing off");
                thread::sleep(BACKOFF_STEP * attempt);
            }
            other => return other,
        }
    }
}

fn write_once<T, F>(conn: &mut Connection, op: &mut F) -> StoreResult<T>
where
    F: FnMut(&Transaction<'_>) -> StoreResult<T>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Exclusive)?;
    // An early return here drops `tx`, whose default drop behavior is
    // rollback.
    let value = op(&tx)?;
    tx.commit()?;
    Ok(value)
}
