use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::debug;

use crate::{StoreError, StoreResult};

/// Static configuration for one identifier sequence: which record table it
/// serves and how its numeric values render into public identifiers.
///
/// Not persisted and not user-editable; the known set lives in [`SEQUENCES`].
#[derive(Clone, Copy, Debug)]
pub struct SequenceDef {
    pub name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    pub prefix: &'static str,
    pub width: usize,
}

/// Sequence backing credit line identifiers (`CL001`, `CL002`, ...).
pub const CREDIT_LINES_SEQ: SequenceDef = SequenceDef {
    name: "credit_lines",
    table: "credit_lines",
    id_column: "id",
    prefix: "CL",
    width: 3,
};

/// Sequence backing fixed advance identifiers (`FV0001`, `FV0002`, ...).
pub const FIXED_ADVANCES_SEQ: SequenceDef = SequenceDef {
    name: "fixed_advances",
    table: "fixed_advances",
    id_column: "id",
    prefix: "FV",
    width: 4,
};

pub const SEQUENCES: [SequenceDef; 2] = [CREDIT_LINES_SEQ, FIXED_ADVANCES_SEQ];

pub(crate) fn lookup(name: &str) -> StoreResult<SequenceDef> {
    SEQUENCES
        .iter()
        .copied()
        .find(|def| def.name == name)
        .ok_or_else(|| StoreError::UnknownSequence(name.to_string()))
}

/// Render `value` as `prefix` followed by the decimal value zero-padded to
/// at least `width` digits. Width is a minimum, never a cap: once values
/// outgrow it the identifier simply gets longer (`CL`, 3, 1000 → `CL1000`).
pub fn format_id(prefix: &str, width: usize, value: u64) -> String {
    format!("{prefix}{value:0width$}")
}

/// Make sure a counter row exists for `def`, seeding it from legacy record
/// identifiers on first contact. Idempotent; an existing row is never
/// touched. Must run inside the coordinator's exclusive transaction.
pub(crate) fn ensure(tx: &Transaction<'_>, def: &SequenceDef) -> StoreResult<()> {
    let existing: Option<i64> = tx
        .query_row(
            "SELECT last_value FROM id_sequences WHERE name = ?1",
            [def.name],
            |row| row.get(0),
        )
        .optional()?;
    if existing.is_some() {
        return Ok(());
    }
    let seed = bootstrap_value(tx, def)?;
    tx.execute(
        "INSERT OR IGNORE INTO id_sequences (name, last_value) VALUES (?1, ?2)",
        params![def.name, seed as i64],
    )?;
    debug!(sequence = def.name, seed, "seeded identifier sequence");
    Ok(())
}

/// Derive a starting value from identifiers created before the sequence
/// table existed: the highest numeric suffix among ids carrying this
/// sequence's prefix, or 0 for a fresh store. Ids that do not match the
/// prefix or whose suffix is not a number are skipped, not errors.
///
/// Only consulted while no counter row exists; once a row is present the
/// scan never runs again, so later edits to record ids cannot move the
/// counter.
fn bootstrap_value(tx: &Transaction<'_>, def: &SequenceDef) -> StoreResult<u64> {
    let sql = format!("SELECT {} FROM {}", def.id_column, def.table);
    let mut stmt = tx.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut max = 0u64;
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        if let Some(value) = parse_suffix(&id, def.prefix) {
            max = max.max(value);
        }
    }
    Ok(max)
}

fn parse_suffix(id: &str, prefix: &str) -> Option<u64> {
    id.strip_prefix(prefix)?.parse().ok()
}

/// Atomically advance the counter and return the new value. The UPDATE must
/// affect exactly one row; zero rows means `ensure` never ran, which is an
/// invariant violation rather than a silent no-op.
pub(crate) fn increment(tx: &Transaction<'_>, def: &SequenceDef) -> StoreResult<u64> {
    let affected = tx.execute(
        "UPDATE id_sequences SET last_value = last_value + 1 WHERE name = ?1",
        [def.name],
    )?;
    if affected != 1 {
        return Err(StoreError::SequenceNotInitialized(def.name.to_string()));
    }
    // Re-read under the same write lock; no in-process cache of the counter
    // is ever trusted across calls.
    let value: i64 = tx.query_row(
        "SELECT last_value FROM id_sequences WHERE name = ?1",
        [def.name],
        |row| row.get(0),
    )?;
    Ok(value as u64)
}

/// Diagnostic read of the counter, 0 if no row exists yet. Uses an ordinary
/// non-exclusive read and may trail a concurrent allocation; only the
/// coordinator's increment is authoritative.
pub(crate) fn current_value(conn: &Connection, def: &SequenceDef) -> StoreResult<u64> {
    let value: Option<i64> = conn
        .query_row(
            "SELECT last_value FROM id_sequences WHERE name = ?1",
            [def.name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.unwrap_or(0) as u64)
}
