use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use rusqlite::{params, Connection, Row, Transaction};
use tracing::{debug, info};
use tranche_core::{
    Bank, Commitment, CreditLine, Currency, FixedAdvance, NewCreditLine, NewFixedAdvance,
    SettingKey,
};

use crate::sequence::{self, CREDIT_LINES_SEQ, FIXED_ADVANCES_SEQ};
use crate::writer;
use crate::{StoreError, StoreResult};

pub(crate) const REGISTER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS banks (
    bank_key TEXT PRIMARY KEY,
    bank_name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credit_lines (
    id TEXT PRIMARY KEY,
    bank_key TEXT NOT NULL,
    description TEXT,
    currency TEXT NOT NULL CHECK(currency IN ('CHF', 'EUR')),
    amount INTEGER NOT NULL CHECK(amount > 0),
    committed TEXT NOT NULL CHECK(committed IN ('Yes', 'No')),
    start_date TEXT NOT NULL,
    end_date TEXT,
    note TEXT,
    FOREIGN KEY (bank_key) REFERENCES banks(bank_key)
);

CREATE TABLE IF NOT EXISTS fixed_advances (
    id TEXT PRIMARY KEY,
    bank TEXT NOT NULL,
    credit_line_id TEXT NOT NULL,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    continuation_date TEXT NOT NULL,
    currency TEXT NOT NULL CHECK(currency IN ('CHF', 'EUR')),
    amount_original INTEGER NOT NULL CHECK(amount_original > 0),
    interest_amount REAL NOT NULL CHECK(interest_amount >= 0),
    FOREIGN KEY (credit_line_id) REFERENCES credit_lines(id)
);

CREATE TABLE IF NOT EXISTS id_sequences (
    name TEXT PRIMARY KEY,
    last_value INTEGER NOT NULL CHECK(last_value >= 0)
);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed register of banks, credit lines and fixed advances.
///
/// The handle owns a path, not a connection; every operation opens its own
/// connection, so a `FacilityStore` can be cloned across threads and each
/// caller still goes through the database's own locking.
#[derive(Clone, Debug)]
pub struct FacilityStore {
    path: PathBuf,
    busy_timeout: Duration,
}

impl FacilityStore {
    /// Open the register at `path`, creating the file and schema if needed.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self {
            path: path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        store.initialize_schema()?;
        Ok(store)
    }

    /// Override the per-attempt lock-wait timeout (default 5s). Mostly
    /// useful in tests that provoke contention on purpose.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn initialize_schema(&self) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(REGISTER_SCHEMA)?;
        info!(path = %self.path.display(), "register schema initialized");
        Ok(())
    }

    fn connect(&self) -> StoreResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    // ── Identifier allocation ──

    /// Allocate the next identifier for `sequence_name` and run `insert_fn`
    /// with it, all inside one exclusive write transaction.
    ///
    /// The transaction ensures the counter row exists (bootstrapping it
    /// from legacy record ids on first contact), increments it, formats the
    /// identifier and hands it to `insert_fn`. Commit only happens if
    /// `insert_fn` succeeds; on any failure the whole unit rolls back, so
    /// the counter never advances for a record that was not persisted.
    ///
    /// Worst-case latency is bounded: four lock-wait attempts at the
    /// configured busy timeout plus 300ms of accumulated backoff. When the
    /// budget is exhausted while another writer still holds the lock the
    /// call fails with [`StoreError::Busy`].
    pub fn allocate_and_insert<F>(&self, sequence_name: &str, mut insert_fn: F) -> StoreResult<String>
    where
        F: FnMut(&Transaction<'_>, &str) -> StoreResult<()>,
    {
        let def = sequence::lookup(sequence_name)?;
        let mut conn = self.connect()?;
        writer::run_write(&mut conn, |tx| {
            sequence::ensure(tx, &def)?;
            let value = sequence::increment(tx, &def)?;
            let id = sequence::format_id(def.prefix, def.width, value);
            insert_fn(tx, &id)?;
            debug!(sequence = def.name, id = %id, "allocated identifier");
            Ok(id)
        })
    }

    /// Last issued value of a sequence, 0 if nothing was issued yet.
    /// Diagnostic read; may trail a concurrent allocation.
    pub fn sequence_value(&self, sequence_name: &str) -> StoreResult<u64> {
        let def = sequence::lookup(sequence_name)?;
        let conn = self.connect()?;
        sequence::current_value(&conn, &def)
    }

    // ── Banks ──

    pub fn upsert_bank(&self, bank: &Bank) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO banks (bank_key, bank_name) VALUES (?1, ?2)
             ON CONFLICT(bank_key) DO UPDATE SET bank_name = excluded.bank_name",
            params![bank.key, bank.name],
        )?;
        Ok(())
    }

    pub fn banks(&self) -> StoreResult<Vec<Bank>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT bank_key, bank_name FROM banks ORDER BY bank_name")?;
        let mut rows = stmt.query([])?;
        let mut banks = Vec::new();
        while let Some(row) = rows.next()? {
            banks.push(Bank {
                key: row.get(0)?,
                name: row.get(1)?,
            });
        }
        Ok(banks)
    }

    pub fn bank(&self, key: &str) -> StoreResult<Option<Bank>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT bank_key, bank_name FROM banks WHERE bank_key = ?1")?;
        let mut rows = stmt.query([key])?;
        match rows.next()? {
            Some(row) => Ok(Some(Bank {
                key: row.get(0)?,
                name: row.get(1)?,
            })),
            None => Ok(None),
        }
    }

    pub fn delete_bank(&self, key: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM banks WHERE bank_key = ?1", [key])?;
        Ok(())
    }

    // ── Credit lines ──

    /// Insert a credit line under a freshly allocated `CL...` identifier
    /// and return that identifier.
    pub fn create_credit_line(&self, line: &NewCreditLine) -> StoreResult<String> {
        self.allocate_and_insert(CREDIT_LINES_SEQ.name, |tx, id| {
            tx.execute(
                "INSERT INTO credit_lines
                     (id, bank_key, description, currency, amount, committed, start_date, end_date, note)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    line.bank_key,
                    line.description,
                    line.currency.as_str(),
                    line.amount,
                    line.committed.as_str(),
                    line.start_date.to_string(),
                    line.end_date.map(|d| d.to_string()),
                    line.note,
                ],
            )?;
            Ok(())
        })
    }

    pub fn credit_lines(&self) -> StoreResult<Vec<CreditLine>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT cl.id, cl.bank_key, b.bank_name, cl.description, cl.currency, cl.amount,
                    cl.committed, cl.start_date, cl.end_date, cl.note
             FROM credit_lines cl
             LEFT JOIN banks b ON cl.bank_key = b.bank_key
             ORDER BY cl.id",
        )?;
        let mut rows = stmt.query([])?;
        let mut lines = Vec::new();
        while let Some(row) = rows.next()? {
            lines.push(row_to_credit_line(row)?);
        }
        Ok(lines)
    }

    pub fn credit_line(&self, id: &str) -> StoreResult<Option<CreditLine>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT cl.id, cl.bank_key, b.bank_name, cl.description, cl.currency, cl.amount,
                    cl.committed, cl.start_date, cl.end_date, cl.note
             FROM credit_lines cl
             LEFT JOIN banks b ON cl.bank_key = b.bank_key
             WHERE cl.id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_credit_line(row)?)),
            None => Ok(None),
        }
    }

    pub fn update_credit_line(&self, id: &str, line: &NewCreditLine) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE credit_lines SET bank_key = ?1, description = ?2, currency = ?3, amount = ?4,
                 committed = ?5, start_date = ?6, end_date = ?7, note = ?8
             WHERE id = ?9",
            params![
                line.bank_key,
                line.description,
                line.currency.as_str(),
                line.amount,
                line.committed.as_str(),
                line.start_date.to_string(),
                line.end_date.map(|d| d.to_string()),
                line.note,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_credit_line(&self, id: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM credit_lines WHERE id = ?1", [id])?;
        Ok(())
    }

    // ── Fixed advances ──

    /// Insert a fixed advance under a freshly allocated `FV...` identifier
    /// and return that identifier.
    pub fn create_advance(&self, advance: &NewFixedAdvance) -> StoreResult<String> {
        self.allocate_and_insert(FIXED_ADVANCES_SEQ.name, |tx, id| {
            tx.execute(
                "INSERT INTO fixed_advances
                     (id, bank, credit_line_id, start_date, end_date, continuation_date,
                      currency, amount_original, interest_amount)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    id,
                    advance.bank,
                    advance.credit_line_id,
                    advance.start_date.to_string(),
                    advance.end_date.to_string(),
                    advance.continuation_date.to_string(),
                    advance.currency.as_str(),
                    advance.amount_original,
                    advance.interest_amount,
                ],
            )?;
            Ok(())
        })
    }

    pub fn advances(&self) -> StoreResult<Vec<FixedAdvance>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT fa.id, fa.bank, fa.credit_line_id, cl.description, fa.start_date, fa.end_date,
                    fa.continuation_date, fa.currency, fa.amount_original, fa.interest_amount
             FROM fixed_advances fa
             LEFT JOIN credit_lines cl ON fa.credit_line_id = cl.id
             ORDER BY fa.start_date DESC, fa.id DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut advances = Vec::new();
        while let Some(row) = rows.next()? {
            advances.push(row_to_advance(row)?);
        }
        Ok(advances)
    }

    pub fn advance(&self, id: &str) -> StoreResult<Option<FixedAdvance>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT fa.id, fa.bank, fa.credit_line_id, cl.description, fa.start_date, fa.end_date,
                    fa.continuation_date, fa.currency, fa.amount_original, fa.interest_amount
             FROM fixed_advances fa
             LEFT JOIN credit_lines cl ON fa.credit_line_id = cl.id
             WHERE fa.id = ?1",
        )?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_advance(row)?)),
            None => Ok(None),
        }
    }

    pub fn update_advance(&self, id: &str, advance: &NewFixedAdvance) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE fixed_advances SET bank = ?1, credit_line_id = ?2, start_date = ?3,
                 end_date = ?4, continuation_date = ?5, currency = ?6, amount_original = ?7,
                 interest_amount = ?8
             WHERE id = ?9",
            params![
                advance.bank,
                advance.credit_line_id,
                advance.start_date.to_string(),
                advance.end_date.to_string(),
                advance.continuation_date.to_string(),
                advance.currency.as_str(),
                advance.amount_original,
                advance.interest_amount,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn delete_advance(&self, id: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute("DELETE FROM fixed_advances WHERE id = ?1", [id])?;
        Ok(())
    }

    // ── Settings ──

    /// All settings, with defaults filled in for keys that were never
    /// written. Rows whose key is no longer in the known set are ignored.
    pub fn settings(&self) -> StoreResult<HashMap<SettingKey, String>> {
        let conn = self.connect()?;
        let mut settings: HashMap<SettingKey, String> = SettingKey::ALL
            .into_iter()
            .map(|key| (key, key.default_value().to_string()))
            .collect();
        let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            if let Ok(known) = key.parse::<SettingKey>() {
                settings.insert(known, row.get(1)?);
            }
        }
        Ok(settings)
    }

    pub fn set_setting(&self, key: SettingKey, value: &str) -> StoreResult<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key.as_str(), value],
        )?;
        Ok(())
    }
}

fn parse_date(text: &str) -> StoreResult<NaiveDate> {
    NaiveDate::from_str(text).map_err(|err| StoreError::Corrupt(format!("invalid date {text}: {err}")))
}

fn parse_opt_date(text: Option<String>) -> StoreResult<Option<NaiveDate>> {
    text.as_deref().map(parse_date).transpose()
}

fn row_to_credit_line(row: &Row<'_>) -> StoreResult<CreditLine> {
    let currency_str: String = row.get(4)?;
    let committed_str: String = row.get(6)?;
    let start_date: String = row.get(7)?;
    let end_date: Option<String> = row.get(8)?;
    Ok(CreditLine {
        id: row.get(0)?,
        bank_key: row.get(1)?,
        bank_name: row.get(2)?,
        description: row.get(3)?,
        currency: Currency::from_str(&currency_str).map_err(StoreError::Corrupt)?,
        amount: row.get(5)?,
        committed: Commitment::from_str(&committed_str).map_err(StoreError::Corrupt)?,
        start_date: parse_date(&start_date)?,
        end_date: parse_opt_date(end_date)?,
        note: row.get(9)?,
    })
}

fn row_to_advance(row: &Row<'_>) -> StoreResult<FixedAdvance> {
    let start_date: String = row.get(4)?;
    let end_date: String = row.get(5)?;
    let continuation_date: String = row.get(6)?;
    let currency_str: String = row.get(7)?;
    Ok(FixedAdvance {
        id: row.get(0)?,
        bank: row.get(1)?,
        credit_line_id: row.get(2)?,
        cl_description: row.get(3)?,
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        continuation_date: parse_date(&continuation_date)?,
        currency: Currency::from_str(&currency_str).map_err(StoreError::Corrupt)?,
        amount_original: row.get(8)?,
        interest_amount: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_line() -> NewCreditLine {
        NewCreditLine {
            bank_key: "B001".into(),
            description: Some("Revolving facility".into()),
            currency: Currency::Chf,
            amount: 80_000_000,
            committed: Commitment::Yes,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
            note: None,
        }
    }

    fn sample_advance(credit_line_id: &str) -> NewFixedAdvance {
        NewFixedAdvance {
            bank: "Bank 1".into(),
            credit_line_id: credit_line_id.into(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 10).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
            continuation_date: NaiveDate::from_ymd_opt(2026, 2, 5).unwrap(),
            currency: Currency::Chf,
            amount_original: 10_000_000,
            interest_amount: 10_000.0,
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> FacilityStore {
        let store = FacilityStore::open(dir.path().join("register.db")).unwrap();
        store
            .upsert_bank(&Bank {
                key: "B001".into(),
                name: "Bank 1".into(),
            })
            .unwrap();
        store
    }

    #[test]
    fn first_credit_line_gets_cl001() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let id = store.create_credit_line(&sample_line()).unwrap();
        assert_eq!(id, "CL001");
        assert_eq!(store.sequence_value("credit_lines").unwrap(), 1);
    }

    #[test]
    fn primed_sequence_formats_boundary_values() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.create_credit_line(&sample_line()).unwrap();

        let conn = Connection::open(dir.path().join("register.db")).unwrap();
        conn.execute(
            "UPDATE id_sequences SET last_value = 9 WHERE name = 'credit_lines'",
            [],
        )
        .unwrap();
        assert_eq!(store.create_credit_line(&sample_line()).unwrap(), "CL010");

        let advance_id = store.create_advance(&sample_advance("CL001")).unwrap();
        assert_eq!(advance_id, "FV0001");
        conn.execute(
            "UPDATE id_sequences SET last_value = 999 WHERE name = 'fixed_advances'",
            [],
        )
        .unwrap();
        assert_eq!(
            store.create_advance(&sample_advance("CL001")).unwrap(),
            "FV1000"
        );
    }

    #[test]
    fn failed_insert_leaves_sequence_untouched() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.create_credit_line(&sample_line()).unwrap();

        // Foreign key violation: the referenced credit line does not exist.
        let err = store.create_advance(&sample_advance("CL999")).unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert_eq!(store.sequence_value("fixed_advances").unwrap(), 0);

        // The next successful allocation issues the value the failed
        // attempt would have used.
        let id = store.create_advance(&sample_advance("CL001")).unwrap();
        assert_eq!(id, "FV0001");
    }

    #[test]
    fn bootstrap_resumes_after_legacy_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("register.db");
        {
            let store = FacilityStore::open(&path).unwrap();
            store
                .upsert_bank(&Bank {
                    key: "B001".into(),
                    name: "Bank 1".into(),
                })
                .unwrap();
            // Legacy rows written before the sequence table existed.
            let conn = Connection::open(&path).unwrap();
            for n in 1..=7 {
                conn.execute(
                    "INSERT INTO credit_lines (id, bank_key, currency, amount, committed, start_date)
                     VALUES (?1, 'B001', 'CHF', 1000000, 'Yes', '2026-01-01')",
                    [format!("CL{n:03}")],
                )
                .unwrap();
            }
        }
        let store = FacilityStore::open(&path).unwrap();
        assert_eq!(store.create_credit_line(&sample_line()).unwrap(), "CL008");
    }

    #[test]
    fn credit_line_roundtrip_with_bank_join() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let id = store.create_credit_line(&sample_line()).unwrap();

        let line = store.credit_line(&id).unwrap().unwrap();
        assert_eq!(line.bank_name.as_deref(), Some("Bank 1"));
        assert_eq!(line.currency, Currency::Chf);
        assert_eq!(line.amount, 80_000_000);

        let mut updated = sample_line();
        updated.amount = 90_000_000;
        updated.end_date = NaiveDate::from_ymd_opt(2027, 1, 1);
        store.update_credit_line(&id, &updated).unwrap();
        let line = store.credit_line(&id).unwrap().unwrap();
        assert_eq!(line.amount, 90_000_000);
        assert_eq!(line.end_date, NaiveDate::from_ymd_opt(2027, 1, 1));

        store.delete_credit_line(&id).unwrap();
        assert!(store.credit_line(&id).unwrap().is_none());
    }

    #[test]
    fn advance_listing_joins_line_description() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let cl_id = store.create_credit_line(&sample_line()).unwrap();
        store.create_advance(&sample_advance(&cl_id)).unwrap();

        let advances = store.advances().unwrap();
        assert_eq!(advances.len(), 1);
        assert_eq!(
            advances[0].cl_description.as_deref(),
            Some("Revolving facility")
        );
    }

    #[test]
    fn settings_default_and_upsert() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let settings = store.settings().unwrap();
        assert_eq!(
            settings.get(&SettingKey::DisplayUnit).map(String::as_str),
            Some("millions")
        );

        store
            .set_setting(SettingKey::ExportPath, "/srv/exports")
            .unwrap();
        store
            .set_setting(SettingKey::ExportPath, "/srv/exports/v2")
            .unwrap();
        let settings = store.settings().unwrap();
        assert_eq!(
            settings.get(&SettingKey::ExportPath).map(String::as_str),
            Some("/srv/exports/v2")
        );
    }

    #[test]
    fn unknown_sequence_is_rejected() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let err = store
            .allocate_and_insert("payments", |_tx, _id| Ok(()))
            .unwrap_err();
        assert!(matches!(err, StoreError::UnknownSequence(_)));
    }
}
